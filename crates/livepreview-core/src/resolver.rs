//! Import specifier resolution against a virtual file snapshot.
//!
//! Resolution is pure: the same specifier, importer and snapshot always
//! produce the same [`ResolvedSpecifier`].

use crate::package::PackageSpecifier;
use crate::vfs::{normalize_path, parent_dir, FileSet};

/// Extensions probed after the exact path, in priority order.
pub const EXTENSIONS: &[&str] = &[".jsx", ".tsx", ".js", ".ts"];

/// Directory index files probed last, in priority order.
pub const INDEX_FILES: &[&str] = &["index.jsx", "index.tsx", "index.js", "index.ts"];

/// Prefix of the project-root alias.
pub const ROOT_ALIAS: &str = "@/";

/// Outcome of resolving one import specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSpecifier {
    /// A file in the snapshot, by canonical path.
    Local(String),
    /// A third-party package.
    Package(PackageSpecifier),
    /// A local-shaped specifier (or malformed package name) with no match.
    Unresolvable,
}

/// Whether `specifier` names a file in the project rather than a package.
#[must_use]
pub fn is_local_specifier(specifier: &str) -> bool {
    specifier.starts_with(ROOT_ALIAS)
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
        || specifier == "."
        || specifier == ".."
}

/// Whether `specifier` is a full URL the browser loads as-is.
#[must_use]
pub fn is_url_specifier(specifier: &str) -> bool {
    ["http://", "https://", "data:", "blob:"]
        .iter()
        .any(|scheme| specifier.starts_with(scheme))
}

/// Resolve `specifier` imported from `from` against `files`.
#[must_use]
pub fn resolve(specifier: &str, from: &str, files: &FileSet) -> ResolvedSpecifier {
    Resolver::new(files).resolve(specifier, from)
}

/// Resolver bound to one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    files: &'a FileSet,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(files: &'a FileSet) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &'a FileSet {
        self.files
    }

    #[must_use]
    pub fn resolve(&self, specifier: &str, from: &str) -> ResolvedSpecifier {
        if is_local_specifier(specifier) {
            let base = local_base(specifier, from);
            return match probe(&base, |p| self.files.is_file(p)) {
                Some(path) => ResolvedSpecifier::Local(path),
                None => ResolvedSpecifier::Unresolvable,
            };
        }

        match PackageSpecifier::parse(specifier) {
            Some(package) => ResolvedSpecifier::Package(package),
            None => ResolvedSpecifier::Unresolvable,
        }
    }
}

/// Canonical base path of a local-shaped specifier, before probing.
fn local_base(specifier: &str, from: &str) -> String {
    if let Some(rest) = specifier.strip_prefix(ROOT_ALIAS) {
        return normalize_path(rest);
    }
    if specifier.starts_with('/') {
        return normalize_path(specifier);
    }
    let dir = parent_dir(from);
    normalize_path(&format!("{dir}/{specifier}"))
}

/// Probe `base` in the fixed order: exact path, each of [`EXTENSIONS`],
/// then each of [`INDEX_FILES`] below `base`. First match wins.
///
/// `exists` must answer for regular files only.
pub fn probe(base: &str, exists: impl Fn(&str) -> bool) -> Option<String> {
    if base != "/" && exists(base) {
        return Some(base.to_string());
    }

    if base != "/" {
        for ext in EXTENSIONS {
            let candidate = format!("{base}{ext}");
            if exists(&candidate) {
                return Some(candidate);
            }
        }
    }

    let dir = base.trim_end_matches('/');
    for index in INDEX_FILES {
        let candidate = format!("{dir}/{index}");
        if exists(&candidate) {
            return Some(candidate);
        }
    }

    None
}
