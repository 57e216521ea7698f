//! Transform engine.
//!
//! Turns one virtual source file into browser-executable ES module code.
//! Local imports are not final after a transform: they point at placeholder
//! tokens that the registry later substitutes with module references.
//!
//! ```ignore
//! use livepreview_core::compiler::{transform, TransformOptions};
//!
//! let module = transform(&file, &Resolver::new(&files), &redirects, &TransformOptions::default())?;
//! let code = substitute(&module.template, &["/@blob/ns/1.js"]);
//! ```

pub mod options;
mod rewrite;
mod swc;

pub use options::{is_module_path, is_stylesheet_path, JsxRuntime, SourceKind, TransformOptions};

use crate::error::CompileError;
use crate::package::{PackageRedirects, PackageSpecifier};
use crate::resolver::Resolver;
use crate::vfs::VirtualFile;
use livepreview_util::hash::blake3_bytes;
use rewrite::SpecifierRewriter;
use std::collections::BTreeSet;

const PLACEHOLDER_PREFIX: &str = "__livepreview_dep_";
const PLACEHOLDER_SUFFIX: &str = "__";

/// Placeholder token for the `index`-th local dependency of a module.
#[must_use]
pub fn placeholder(index: usize) -> String {
    format!("{PLACEHOLDER_PREFIX}{index}{PLACEHOLDER_SUFFIX}")
}

/// Replace every placeholder in `template` with the matching entry of
/// `targets` (placeholder `i` becomes `targets[i]`).
#[must_use]
pub fn substitute<S: AsRef<str>>(template: &str, targets: &[S]) -> String {
    let mut code = template.to_string();
    for (idx, target) in targets.iter().enumerate() {
        code = code.replace(&placeholder(idx), target.as_ref());
    }
    code
}

/// Output of the first compilation pass for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedModule {
    /// Canonical path of the source file.
    pub path: String,
    /// Emitted code with local imports as placeholder tokens.
    pub template: String,
    /// Local modules this one imports, in placeholder index order.
    pub local_deps: Vec<String>,
    /// Packages this module imports.
    pub packages: BTreeSet<PackageSpecifier>,
    /// blake3 of the source content.
    pub source_hash: String,
}

/// Transform one module file.
///
/// Fails with [`CompileError::Syntax`] for unparsable input and with
/// [`CompileError::Resolution`] / [`CompileError::UnsupportedModule`] for
/// imports that cannot be satisfied.
pub fn transform(
    file: &VirtualFile,
    resolver: &Resolver<'_>,
    redirects: &PackageRedirects,
    options: &TransformOptions,
) -> Result<TransformedModule, CompileError> {
    let source_hash = blake3_bytes(file.content.as_bytes());

    let (template, local_deps, packages) = match SourceKind::of(&file.path) {
        SourceKind::Script { typescript, jsx } => {
            if file.content.trim().is_empty() {
                (String::new(), Vec::new(), BTreeSet::new())
            } else {
                let mut rewriter = SpecifierRewriter::new(&file.path, *resolver, redirects);
                let code = swc::compile_script(
                    &file.path,
                    &file.content,
                    typescript,
                    jsx,
                    options,
                    &mut rewriter,
                )?;
                (code, rewriter.local_deps, rewriter.packages)
            }
        }
        SourceKind::Json => (json_module(file)?, Vec::new(), BTreeSet::new()),
        SourceKind::Style | SourceKind::Other => {
            return Err(CompileError::UnsupportedModule {
                specifier: file.path.clone(),
                importer: file.path.clone(),
                path: file.path.clone(),
            })
        }
    };

    tracing::debug!(
        path = %file.path,
        deps = local_deps.len(),
        packages = packages.len(),
        "transformed module"
    );

    Ok(TransformedModule {
        path: file.path.clone(),
        template,
        local_deps,
        packages,
        source_hash,
    })
}

fn json_module(file: &VirtualFile) -> Result<String, CompileError> {
    let value: serde_json::Value =
        serde_json::from_str(&file.content).map_err(|e| CompileError::Syntax {
            path: file.path.clone(),
            message: e.to_string(),
            line: Some(e.line()),
            column: Some(e.column()),
        })?;
    Ok(format!("export default {value};\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::FileSet;

    fn compile(files: &FileSet, path: &str) -> Result<TransformedModule, CompileError> {
        let file = files.get(path).unwrap();
        transform(
            file,
            &Resolver::new(files),
            &PackageRedirects::default(),
            &TransformOptions::default(),
        )
    }

    #[test]
    fn test_placeholder_substitution() {
        let template = format!("import a from \"{}\";\nimport b from \"{}\";", placeholder(0), placeholder(1));
        let code = substitute(&template, &["/@blob/x/1.js", "/@blob/x/2.js"]);
        assert_eq!(code, "import a from \"/@blob/x/1.js\";\nimport b from \"/@blob/x/2.js\";");
    }

    #[test]
    fn test_substitution_with_many_deps() {
        let targets: Vec<String> = (0..12).map(|i| format!("ref{i}")).collect();
        let template = format!("{} {}", placeholder(1), placeholder(10));
        assert_eq!(substitute(&template, &targets), "ref1 ref10");
    }

    #[test]
    fn test_jsx_is_lowered() {
        let files = FileSet::from_files([(
            "/App.jsx",
            "export default () => <div className='x'>hi</div>",
        )]);
        let module = compile(&files, "/App.jsx").unwrap();
        assert!(!module.template.contains("<div"));
        assert!(module.template.contains("https://esm.sh/react@19/jsx-runtime"));
        assert!(module.packages.iter().any(|p| p.name == "react"));
        assert!(module.local_deps.is_empty());
    }

    #[test]
    fn test_jsx_in_js_files() {
        let files = FileSet::from_files([("/Card.js", "export const Card = () => <p>x</p>;")]);
        let module = compile(&files, "/Card.js").unwrap();
        assert!(!module.template.contains("<p>"));
    }

    #[test]
    fn test_classic_runtime() {
        let files = FileSet::from_files([(
            "/App.jsx",
            "import React from 'react';\nexport default () => <div/>;",
        )]);
        let file = files.get("/App.jsx").unwrap();
        let module = transform(
            file,
            &Resolver::new(&files),
            &PackageRedirects::default(),
            &TransformOptions::default().with_runtime(JsxRuntime::Classic),
        )
        .unwrap();
        assert!(module.template.contains("React.createElement"));
        assert!(!module.template.contains("jsx-runtime"));
    }

    #[test]
    fn test_typescript_is_stripped() {
        let files = FileSet::from_files([(
            "/util.ts",
            "export interface P { n: number }\nexport const double = (n: number): number => n * 2;",
        )]);
        let module = compile(&files, "/util.ts").unwrap();
        assert!(!module.template.contains("interface"));
        assert!(!module.template.contains(": number"));
        assert!(module.template.contains("double"));
    }

    #[test]
    fn test_tsx() {
        let files = FileSet::from_files([(
            "/Button.tsx",
            "type Props = { label: string };\nexport default function Button({ label }: Props) { return <button>{label}</button>; }",
        )]);
        let module = compile(&files, "/Button.tsx").unwrap();
        assert!(!module.template.contains("<button"));
        assert!(!module.template.contains("Props"));
    }

    #[test]
    fn test_local_imports_become_placeholders() {
        let files = FileSet::from_files([
            ("/App.jsx", "import Button from '@/components/Button';\nimport { sum } from './lib/math';\nexport default () => <Button n={sum(1, 2)}/>;"),
            ("/components/Button.jsx", "export default () => null;"),
            ("/lib/math.ts", "export const sum = (a: number, b: number) => a + b;"),
        ]);
        let module = compile(&files, "/App.jsx").unwrap();
        assert_eq!(
            module.local_deps,
            vec!["/components/Button.jsx".to_string(), "/lib/math.ts".to_string()]
        );
        assert!(module.template.contains(&placeholder(0)));
        assert!(module.template.contains(&placeholder(1)));
        assert!(!module.template.contains("@/components/Button"));
    }

    #[test]
    fn test_duplicate_local_imports_share_a_placeholder() {
        let files = FileSet::from_files([
            ("/App.jsx", "import a from './a';\nexport { b } from './a.js';\nexport default a;"),
            ("/a.js", "export default 1; export const b = 2;"),
        ]);
        let module = compile(&files, "/App.jsx").unwrap();
        assert_eq!(module.local_deps, vec!["/a.js".to_string()]);
    }

    #[test]
    fn test_reexports_and_dynamic_imports_are_rewritten() {
        let files = FileSet::from_files([
            ("/index.js", "export * from './a';\nexport const load = () => import('./b');\nexport const pkg = () => import('canvas-confetti');"),
            ("/a.js", "export const a = 1;"),
            ("/b.js", "export default 2;"),
        ]);
        let module = compile(&files, "/index.js").unwrap();
        assert_eq!(module.local_deps, vec!["/a.js".to_string(), "/b.js".to_string()]);
        assert!(module
            .template
            .contains("https://esm.sh/canvas-confetti@latest?external=react,react-dom"));
    }

    #[test]
    fn test_package_imports_use_redirects() {
        let files = FileSet::from_files([(
            "/App.jsx",
            "import { Heart } from 'lucide-react';\nexport default () => <Heart/>;",
        )]);
        let module = compile(&files, "/App.jsx").unwrap();
        assert!(module
            .template
            .contains("https://esm.sh/lucide-react@latest?external=react,react-dom"));
        assert!(module.packages.iter().any(|p| p.name == "lucide-react"));
    }

    #[test]
    fn test_url_imports_are_untouched() {
        let files = FileSet::from_files([(
            "/App.js",
            "import x from 'https://cdn.example/x.js';\nexport default x;",
        )]);
        let module = compile(&files, "/App.js").unwrap();
        assert!(module.template.contains("https://cdn.example/x.js"));
        assert!(module.packages.is_empty());
    }

    #[test]
    fn test_unresolvable_import_names_specifier_and_importer() {
        let files = FileSet::from_files([(
            "/App.jsx",
            "import Missing from '@/Missing';\nexport default Missing;",
        )]);
        let err = compile(&files, "/App.jsx").unwrap_err();
        assert_eq!(
            err,
            CompileError::Resolution {
                specifier: "@/Missing".to_string(),
                importer: "/App.jsx".to_string(),
            }
        );
    }

    #[test]
    fn test_stylesheet_side_effect_imports_are_dropped() {
        let files = FileSet::from_files([
            ("/App.jsx", "import './styles.css';\nexport default () => <div/>;"),
            ("/styles.css", ".x{}"),
        ]);
        let module = compile(&files, "/App.jsx").unwrap();
        assert!(!module.template.contains("styles.css"));
        assert!(module.local_deps.is_empty());
    }

    #[test]
    fn test_missing_stylesheet_import_is_an_error() {
        let files = FileSet::from_files([("/App.jsx", "import './missing.css';\nexport default 1;")]);
        assert!(matches!(
            compile(&files, "/App.jsx"),
            Err(CompileError::Resolution { .. })
        ));
    }

    #[test]
    fn test_binding_a_stylesheet_is_unsupported() {
        let files = FileSet::from_files([
            ("/App.jsx", "import styles from './a.css';\nexport default styles;"),
            ("/a.css", ".x{}"),
        ]);
        assert_eq!(
            compile(&files, "/App.jsx").unwrap_err(),
            CompileError::UnsupportedModule {
                specifier: "./a.css".to_string(),
                importer: "/App.jsx".to_string(),
                path: "/a.css".to_string(),
            }
        );
    }

    #[test]
    fn test_syntax_error_has_position() {
        let files = FileSet::from_files([("/App.jsx", "export default () => {\n  return <div>;\n")]);
        match compile(&files, "/App.jsx").unwrap_err() {
            CompileError::Syntax { path, line, column, .. } => {
                assert_eq!(path, "/App.jsx");
                assert!(line.is_some());
                assert!(column.is_some());
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_json_modules() {
        let files = FileSet::from_files([("/data.json", "{ \"items\": [1, 2] }")]);
        let module = compile(&files, "/data.json").unwrap();
        assert_eq!(module.template, "export default {\"items\":[1,2]};\n");
    }

    #[test]
    fn test_invalid_json_is_a_syntax_error() {
        let files = FileSet::from_files([("/data.json", "{ \"a\": }")]);
        match compile(&files, "/data.json").unwrap_err() {
            CompileError::Syntax { line, .. } => assert_eq!(line, Some(1)),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_script() {
        let files = FileSet::from_files([("/empty.js", "  \n")]);
        let module = compile(&files, "/empty.js").unwrap();
        assert_eq!(module.template, "");
    }

    #[test]
    fn test_transform_is_idempotent() {
        let files = FileSet::from_files([
            ("/App.tsx", "import B from './B';\nexport default function App(): JSX.Element { return <B/>; }"),
            ("/B.tsx", "export default () => <b/>;"),
        ]);
        let first = compile(&files, "/App.tsx").unwrap();
        let second = compile(&files, "/App.tsx").unwrap();
        assert_eq!(first, second);
    }
}
