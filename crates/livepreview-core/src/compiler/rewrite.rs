//! Import specifier rewriting over the SWC AST.
//!
//! Runs after the JSX transform so the injected `jsx-runtime` import is
//! rewritten like any other package import.

use super::options::{is_module_path, is_stylesheet_path};
use super::placeholder;
use crate::error::CompileError;
use crate::package::{PackageRedirects, PackageSpecifier};
use crate::resolver::{is_url_specifier, ResolvedSpecifier, Resolver};
use std::collections::BTreeSet;
use swc_ecma_ast::{
    CallExpr, Callee, ExportAll, Expr, ImportDecl, Lit, Module, ModuleDecl, ModuleItem,
    NamedExport, Str,
};
use swc_ecma_visit::{VisitMut, VisitMutWith};

/// Rewrites every static and literal dynamic import specifier of a module.
///
/// - local modules become placeholder tokens, indexed into [`Self::local_deps`]
/// - packages become CDN URLs
/// - URLs are left alone
///
/// The first failure is kept in [`Self::error`]; later specifiers are skipped.
pub(crate) struct SpecifierRewriter<'a> {
    importer: &'a str,
    resolver: Resolver<'a>,
    redirects: &'a PackageRedirects,
    pub(crate) local_deps: Vec<String>,
    pub(crate) packages: BTreeSet<PackageSpecifier>,
    pub(crate) error: Option<CompileError>,
}

impl<'a> SpecifierRewriter<'a> {
    pub(crate) fn new(
        importer: &'a str,
        resolver: Resolver<'a>,
        redirects: &'a PackageRedirects,
    ) -> Self {
        Self {
            importer,
            resolver,
            redirects,
            local_deps: Vec::new(),
            packages: BTreeSet::new(),
            error: None,
        }
    }

    fn fail(&mut self, error: CompileError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn dep_index(&mut self, path: String) -> usize {
        if let Some(idx) = self.local_deps.iter().position(|p| *p == path) {
            return idx;
        }
        self.local_deps.push(path);
        self.local_deps.len() - 1
    }

    fn rewrite(&mut self, src: &mut Str) {
        if self.error.is_some() {
            return;
        }
        let specifier = src.value.to_string();
        if is_url_specifier(&specifier) {
            return;
        }

        match self.resolver.resolve(&specifier, self.importer) {
            ResolvedSpecifier::Local(path) => {
                if !is_module_path(&path) {
                    self.fail(CompileError::UnsupportedModule {
                        specifier,
                        importer: self.importer.to_string(),
                        path,
                    });
                    return;
                }
                let idx = self.dep_index(path);
                set_specifier(src, placeholder(idx));
            }
            ResolvedSpecifier::Package(package) => {
                set_specifier(src, self.redirects.url_for(&package));
                self.packages.insert(package);
            }
            ResolvedSpecifier::Unresolvable => self.fail(CompileError::Resolution {
                specifier,
                importer: self.importer.to_string(),
            }),
        }
    }

    /// Whether `decl` is a bare `import "./x.css"` that should be dropped.
    ///
    /// Local stylesheets must still exist.
    fn is_stylesheet_import(&mut self, decl: &ImportDecl) -> bool {
        if !decl.specifiers.is_empty() {
            return false;
        }
        let specifier = decl.src.value.to_string();
        if !is_stylesheet_path(&specifier) {
            return false;
        }
        match self.resolver.resolve(&specifier, self.importer) {
            ResolvedSpecifier::Local(_) | ResolvedSpecifier::Package(_) => true,
            ResolvedSpecifier::Unresolvable => {
                self.fail(CompileError::Resolution {
                    specifier,
                    importer: self.importer.to_string(),
                });
                true
            }
        }
    }
}

fn set_specifier(src: &mut Str, value: String) {
    src.value = value.into();
    src.raw = None;
}

impl VisitMut for SpecifierRewriter<'_> {
    fn visit_mut_module(&mut self, module: &mut Module) {
        let mut body = std::mem::take(&mut module.body);
        body.retain(|item| match item {
            ModuleItem::ModuleDecl(ModuleDecl::Import(decl)) => {
                let drop = self.is_stylesheet_import(decl);
                if drop {
                    tracing::trace!(importer = self.importer, src = %decl.src.value, "dropping stylesheet import");
                }
                !drop
            }
            _ => true,
        });
        module.body = body;
        module.visit_mut_children_with(self);
    }

    fn visit_mut_import_decl(&mut self, decl: &mut ImportDecl) {
        if decl.type_only {
            return;
        }
        self.rewrite(&mut decl.src);
    }

    fn visit_mut_named_export(&mut self, export: &mut NamedExport) {
        if export.type_only {
            return;
        }
        if let Some(src) = &mut export.src {
            self.rewrite(src);
        }
    }

    fn visit_mut_export_all(&mut self, export: &mut ExportAll) {
        if export.type_only {
            return;
        }
        self.rewrite(&mut export.src);
    }

    fn visit_mut_call_expr(&mut self, call: &mut CallExpr) {
        call.visit_mut_children_with(self);

        if !matches!(call.callee, Callee::Import(_)) {
            return;
        }
        // Only literal specifiers can be resolved ahead of time.
        if let Some(arg) = call.args.first_mut() {
            if arg.spread.is_none() {
                if let Expr::Lit(Lit::Str(src)) = &mut *arg.expr {
                    self.rewrite(src);
                }
            }
        }
    }
}
