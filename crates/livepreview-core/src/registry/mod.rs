//! Module registry: canonical path to compiled module and reference.
//!
//! Recompilation runs in two passes:
//!
//! 1. [`Registry::stage`] transforms every module file in parallel. Local
//!    imports are placeholder tokens at this point. Pure; any error aborts
//!    here and the registry is left exactly as it was.
//! 2. [`Registry::commit`] releases the references of removed and changed
//!    modules, mints one reference per changed module, then substitutes the
//!    references into the templates and binds the final code.
//!
//! A module is "changed" (dirty) when it is new, when its source or template
//! differs, or when anything it imports is dirty. Clean modules keep their
//! reference because their final code is byte-identical.

pub mod blob;

pub use blob::{BlobStats, BlobStore, ModuleReference, BLOB_PREFIX};

use crate::compiler::{is_module_path, substitute, transform, TransformOptions, TransformedModule};
use crate::error::CompileError;
use crate::package::{PackageRedirects, PackageSpecifier};
use crate::resolver::Resolver;
use crate::vfs::{FileSet, VirtualFile};
use livepreview_util::hash::Fingerprint;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Final, executable form of one module file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModule {
    pub path: String,
    /// Executable ES module code with every local import pointing at a
    /// module reference.
    pub code: Arc<str>,
    /// blake3 of the source content.
    pub source_hash: String,
    pub reference: ModuleReference,
    /// Fingerprint of the pass-1 template and its dependency list.
    pub template_hash: String,
    pub local_deps: Vec<String>,
    pub packages: BTreeSet<PackageSpecifier>,
}

/// One module after pass 1.
#[derive(Debug, Clone)]
pub struct StagedModule {
    pub module: TransformedModule,
    pub template_hash: String,
}

/// Result of pass 1 for a whole snapshot, in path order.
#[derive(Debug, Clone, Default)]
pub struct StagedBuild {
    modules: Vec<StagedModule>,
}

impl StagedBuild {
    pub fn modules(&self) -> impl Iterator<Item = &StagedModule> {
        self.modules.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// What a commit did to the reference arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    /// References minted for new or changed modules.
    pub minted: usize,
    /// References released (removed or changed modules).
    pub released: usize,
    /// Modules that kept their reference.
    pub reused: usize,
}

/// Sole owner of module references.
#[derive(Debug)]
pub struct Registry {
    blobs: BlobStore,
    modules: BTreeMap<String, CompiledModule>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new("preview")
    }
}

impl Registry {
    /// Create an empty registry whose references live under `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            blobs: BlobStore::new(namespace),
            modules: BTreeMap::new(),
        }
    }

    /// Pass 1: transform every module file of `files`.
    ///
    /// Returns the first error in path order.
    pub fn stage(
        files: &FileSet,
        redirects: &PackageRedirects,
        options: &TransformOptions,
    ) -> Result<StagedBuild, CompileError> {
        let resolver = Resolver::new(files);
        let sources: Vec<&VirtualFile> = files.files().filter(|f| is_module_path(&f.path)).collect();

        let results: Vec<Result<StagedModule, CompileError>> = sources
            .par_iter()
            .map(|file| {
                let module = transform(file, &resolver, redirects, options)?;
                let template_hash = template_hash(&module);
                Ok(StagedModule {
                    module,
                    template_hash,
                })
            })
            .collect();

        let modules = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(StagedBuild { modules })
    }

    /// Pass 2: mint references and finalize code for a staged build.
    pub fn commit(&mut self, staged: StagedBuild) -> CommitSummary {
        let mut summary = CommitSummary::default();

        let present: BTreeSet<&str> = staged
            .modules
            .iter()
            .map(|m| m.module.path.as_str())
            .collect();

        let removed: Vec<String> = self
            .modules
            .keys()
            .filter(|p| !present.contains(p.as_str()))
            .cloned()
            .collect();
        for path in removed {
            if self.release(&path) {
                summary.released += 1;
            }
        }

        let mut dirty: BTreeSet<String> = staged
            .modules
            .iter()
            .filter(|m| {
                self.modules
                    .get(&m.module.path)
                    .map_or(true, |old| {
                        old.source_hash != m.module.source_hash
                            || old.template_hash != m.template_hash
                    })
            })
            .map(|m| m.module.path.clone())
            .collect();

        // Importers of a dirty module embed its reference, so they are dirty too.
        let mut importers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for m in &staged.modules {
            for dep in &m.module.local_deps {
                importers
                    .entry(dep.as_str())
                    .or_default()
                    .push(m.module.path.as_str());
            }
        }
        let mut queue: Vec<String> = dirty.iter().cloned().collect();
        while let Some(path) = queue.pop() {
            for importer in importers.get(path.as_str()).into_iter().flatten() {
                if dirty.insert((*importer).to_string()) {
                    queue.push((*importer).to_string());
                }
            }
        }

        for path in &dirty {
            if let Some(old) = self.modules.remove(path) {
                self.blobs.release(&old.reference);
                summary.released += 1;
            }
        }

        let mut references: BTreeMap<String, ModuleReference> = BTreeMap::new();
        for m in &staged.modules {
            let path = &m.module.path;
            let reference = match self.modules.get(path) {
                Some(existing) => existing.reference.clone(),
                None => {
                    summary.minted += 1;
                    self.blobs.allocate()
                }
            };
            references.insert(path.clone(), reference);
        }

        for StagedModule {
            module,
            template_hash,
        } in staged.modules
        {
            if self.modules.contains_key(&module.path) {
                summary.reused += 1;
                continue;
            }

            let targets: Vec<&str> = module
                .local_deps
                .iter()
                .map(|dep| references.get(dep).map_or("", ModuleReference::as_str))
                .collect();
            let code: Arc<str> = Arc::from(substitute(&module.template, &targets));

            let Some(reference) = references.get(&module.path).cloned() else {
                continue;
            };
            self.blobs.bind(&reference, Arc::clone(&code));
            self.modules.insert(
                module.path.clone(),
                CompiledModule {
                    path: module.path,
                    code,
                    source_hash: module.source_hash,
                    reference,
                    template_hash,
                    local_deps: module.local_deps,
                    packages: module.packages,
                },
            );
        }

        tracing::debug!(
            minted = summary.minted,
            released = summary.released,
            reused = summary.reused,
            "committed module references"
        );
        summary
    }

    /// Run both passes. On error the registry is unchanged.
    pub fn recompile_all(
        &mut self,
        files: &FileSet,
        redirects: &PackageRedirects,
        options: &TransformOptions,
    ) -> Result<CommitSummary, CompileError> {
        let staged = Self::stage(files, redirects, options)?;
        Ok(self.commit(staged))
    }

    /// Drop the module at `path` and release its reference.
    ///
    /// Modules importing it keep pointing at the released reference until
    /// the next commit.
    pub fn release(&mut self, path: &str) -> bool {
        match self.modules.remove(path) {
            Some(module) => self.blobs.release(&module.reference),
            None => false,
        }
    }

    /// Release every reference (preview teardown).
    pub fn release_all(&mut self) -> usize {
        self.modules.clear();
        self.blobs.release_all()
    }

    #[must_use]
    pub fn reference(&self, path: &str) -> Option<&ModuleReference> {
        self.modules.get(path).map(|m| &m.reference)
    }

    #[must_use]
    pub fn module(&self, path: &str) -> Option<&CompiledModule> {
        self.modules.get(path)
    }

    /// Compiled modules in path order.
    pub fn modules(&self) -> impl Iterator<Item = &CompiledModule> {
        self.modules.values()
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Code behind a live reference.
    #[must_use]
    pub fn dereference(&self, reference: &str) -> Option<Arc<str>> {
        self.blobs.get(reference)
    }

    /// Virtual path of the module behind a reference URL. Accepts full URLs
    /// (`http://host/@blob/ns/1.js`) as reported by browser stack traces.
    #[must_use]
    pub fn path_of(&self, url: &str) -> Option<&str> {
        let start = url.find(BLOB_PREFIX)?;
        let reference = &url[start..];
        self.modules
            .values()
            .find(|m| m.reference.as_str() == reference)
            .map(|m| m.path.as_str())
    }

    /// Every package imported by a compiled module.
    #[must_use]
    pub fn packages(&self) -> BTreeSet<PackageSpecifier> {
        self.modules
            .values()
            .flat_map(|m| m.packages.iter().cloned())
            .collect()
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.blobs.namespace()
    }

    #[must_use]
    pub fn stats(&self) -> BlobStats {
        self.blobs.stats()
    }
}

fn template_hash(module: &TransformedModule) -> String {
    let mut fp = Fingerprint::new();
    fp.entry("template", module.template.as_bytes());
    for dep in &module.local_deps {
        fp.entry("dep", dep.as_bytes());
    }
    fp.finish()
}
