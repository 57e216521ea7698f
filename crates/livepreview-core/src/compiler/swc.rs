//! SWC-backed script compilation.
//!
//! Parse, strip TypeScript, lower JSX, rewrite import specifiers, then emit
//! plain ES module code.

#![allow(clippy::default_trait_access)]

use super::options::{JsxRuntime, TransformOptions};
use super::rewrite::SpecifierRewriter;
use crate::error::CompileError;
use swc_common::{
    comments::SingleThreadedComments, sync::Lrc, FileName, Globals, Mark, SourceMap, Span,
    Spanned, GLOBALS,
};
use swc_ecma_ast::{EsVersion, Module, Program};
use swc_ecma_codegen::{text_writer::JsWriter, Emitter};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};
use swc_ecma_transforms_base::{fixer::fixer, hygiene::hygiene, resolver};
use swc_ecma_transforms_react::{react, Options as ReactOptions, Runtime};
use swc_ecma_transforms_typescript::strip;
use swc_ecma_visit::{FoldWith, VisitMutWith};

const TARGET: EsVersion = EsVersion::Es2022;

/// Compile one script file. Specifiers are rewritten by `rewriter`, which
/// also collects the module's dependencies.
pub(crate) fn compile_script(
    path: &str,
    source: &str,
    typescript: bool,
    jsx: bool,
    options: &TransformOptions,
    rewriter: &mut SpecifierRewriter<'_>,
) -> Result<String, CompileError> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(path.to_string())),
        source.to_string(),
    );

    let syntax = if typescript {
        Syntax::Typescript(TsSyntax {
            tsx: jsx,
            decorators: true,
            ..Default::default()
        })
    } else {
        Syntax::Es(EsSyntax {
            jsx,
            decorators: true,
            ..Default::default()
        })
    };

    let comments = SingleThreadedComments::default();
    let lexer = Lexer::new(syntax, TARGET, StringInput::from(&*fm), Some(&comments));
    let mut parser = Parser::new_from(lexer);

    let module = parser
        .parse_module()
        .map_err(|e| syntax_error(&cm, path, e.span(), &e.kind().msg()))?;

    // Recoverable errors still mean the source is invalid.
    if let Some(e) = parser.take_errors().into_iter().next() {
        return Err(syntax_error(&cm, path, e.span(), &e.kind().msg()));
    }

    let output = GLOBALS.set(&Globals::default(), || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();

        let mut program = Program::Module(module);
        program = program.fold_with(&mut resolver(unresolved_mark, top_level_mark, typescript));

        if typescript {
            program = program.fold_with(&mut strip(unresolved_mark, top_level_mark));
        }

        let mut module = match program {
            Program::Module(m) => m,
            Program::Script(s) => Module {
                span: s.span,
                body: s
                    .body
                    .into_iter()
                    .map(swc_ecma_ast::ModuleItem::Stmt)
                    .collect(),
                shebang: s.shebang,
            },
        };

        if jsx {
            let runtime = match options.runtime {
                JsxRuntime::Automatic => Runtime::Automatic,
                JsxRuntime::Classic => Runtime::Classic,
            };
            let react_options = ReactOptions {
                runtime: Some(runtime),
                import_source: Some(options.import_source.clone()),
                ..Default::default()
            };
            module = module.fold_with(&mut react(
                cm.clone(),
                Some(&comments),
                react_options,
                top_level_mark,
                unresolved_mark,
            ));
        }

        module.visit_mut_with(rewriter);

        module = module.fold_with(&mut hygiene());
        module.fold_with(&mut fixer(Some(&comments)))
    });

    if let Some(error) = rewriter.error.take() {
        return Err(error);
    }

    let mut buf = Vec::new();
    {
        let writer = JsWriter::new(cm.clone(), "\n", &mut buf, None);
        let mut emitter = Emitter {
            cfg: swc_ecma_codegen::Config::default()
                .with_minify(options.minify)
                .with_target(TARGET),
            cm: cm.clone(),
            comments: Some(&comments),
            wr: writer,
        };
        emitter.emit_module(&output).map_err(|e| CompileError::Syntax {
            path: path.to_string(),
            message: format!("failed to emit: {e}"),
            line: None,
            column: None,
        })?;
    }

    String::from_utf8(buf).map_err(|e| CompileError::Syntax {
        path: path.to_string(),
        message: format!("invalid UTF-8 output: {e}"),
        line: None,
        column: None,
    })
}

fn syntax_error(cm: &SourceMap, path: &str, span: Span, message: &str) -> CompileError {
    let loc = cm.lookup_char_pos(span.lo);
    CompileError::Syntax {
        path: path.to_string(),
        message: message.to_string(),
        line: Some(loc.line),
        column: Some(loc.col.0 + 1),
    }
}
