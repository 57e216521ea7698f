//! Per-snapshot preview pipeline.
//!
//! ```text
//! request() ─► Ticket          (cheap, any thread)
//! Pipeline::build(files)       (pure, off-lock)
//! PreviewSession::apply(ticket, result)
//! ```
//!
//! Builds may finish in any order. [`RecompileGate`] guarantees that a
//! result is applied only when no newer ticket has been applied, so a stale
//! pass never overwrites a newer preview. A failed pass leaves the current
//! preview in place.

use crate::compiler::TransformOptions;
use crate::config::ProjectConfig;
use crate::error::CompileError;
use crate::import_map::{self, ImportMap};
use crate::package::PackageRedirects;
use crate::preview::{self, default_entry_candidates, DocumentOptions, PreviewDocument, RuntimeError};
use crate::registry::{CommitSummary, Registry, StagedBuild};
use crate::styles::{self, StyleOptions};
use crate::vfs::FileSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Runtime errors kept per document.
pub const MAX_RUNTIME_ERRORS: usize = 50;

/// Ticket for one requested pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket {
    version: u64,
}

impl Ticket {
    #[must_use]
    pub fn version(self) -> u64 {
        self.version
    }
}

/// Version counter ordering pass results.
#[derive(Debug, Default)]
pub struct RecompileGate {
    requested: AtomicU64,
    committed: AtomicU64,
}

impl RecompileGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket newer than every ticket issued before.
    pub fn request(&self) -> Ticket {
        Ticket {
            version: self.requested.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    /// Record `ticket` as applied unless a newer one already was.
    /// Returns `false` for stale tickets.
    pub fn try_commit(&self, ticket: Ticket) -> bool {
        self.committed.fetch_max(ticket.version, Ordering::SeqCst) < ticket.version
    }

    /// Whether no newer ticket has been issued since `ticket`.
    #[must_use]
    pub fn is_latest(&self, ticket: Ticket) -> bool {
        self.requested.load(Ordering::SeqCst) == ticket.version
    }

    #[must_use]
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }
}

/// Options for one pipeline run. Cheap to clone into worker threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub redirects: PackageRedirects,
    pub transform: TransformOptions,
    pub styles: StyleOptions,
    pub document: DocumentOptions,
    pub entry_candidates: Vec<String>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            redirects: PackageRedirects::default(),
            transform: TransformOptions::default(),
            styles: StyleOptions::default(),
            document: DocumentOptions::default(),
            entry_candidates: default_entry_candidates(),
        }
    }
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            redirects: config.packages.clone(),
            transform: config.jsx.clone(),
            styles: config.styles,
            document: config.document.clone(),
            entry_candidates: config.entry.clone(),
        }
    }

    pub fn with_transform(mut self, transform: TransformOptions) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_redirects(mut self, redirects: PackageRedirects) -> Self {
        self.redirects = redirects;
        self
    }

    pub fn with_entry_candidates(mut self, candidates: Vec<String>) -> Self {
        self.entry_candidates = candidates;
        self
    }

    /// Run everything that can fail: transform every module, aggregate the
    /// styles and check that an entry module exists. Touches no shared state.
    pub fn build(&self, files: &FileSet) -> Result<PreviewBuild, CompileError> {
        let fingerprint = files.fingerprint();
        let staged = Registry::stage(files, &self.redirects, &self.transform)?;
        let styles = styles::aggregate_with(files, self.styles)?;

        let entry = self
            .entry_candidates
            .iter()
            .find(|candidate| staged.modules().any(|m| m.module.path == **candidate))
            .cloned()
            .ok_or_else(|| CompileError::EntryMissing {
                candidates: self.entry_candidates.clone(),
            })?;

        Ok(PreviewBuild {
            fingerprint,
            staged,
            styles,
            entry,
        })
    }
}

/// Output of [`Pipeline::build`], ready to be applied.
#[derive(Debug, Clone)]
pub struct PreviewBuild {
    /// Fingerprint of the snapshot this was built from.
    pub fingerprint: String,
    pub staged: StagedBuild,
    pub styles: String,
    pub entry: String,
}

/// What [`PreviewSession::apply`] did with a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new document replaced the previous one.
    Applied(CommitSummary),
    /// The snapshot matches the rendered preview; nothing to do.
    Unchanged,
    /// A newer pass was applied first; the result was discarded.
    Stale,
    /// The pass failed; the previous preview is still current.
    Failed(CompileError),
}

/// Live preview state for one project.
#[derive(Debug)]
pub struct PreviewSession {
    pipeline: Pipeline,
    registry: Registry,
    gate: Arc<RecompileGate>,
    document: Option<PreviewDocument>,
    import_map: ImportMap,
    fingerprint: Option<String>,
    last_error: Option<CompileError>,
    runtime_errors: Vec<RuntimeError>,
}

impl PreviewSession {
    /// Create a session whose references live under `namespace`.
    #[must_use]
    pub fn new(pipeline: Pipeline, namespace: impl Into<String>) -> Self {
        Self {
            pipeline,
            registry: Registry::new(namespace),
            gate: Arc::new(RecompileGate::new()),
            document: None,
            import_map: ImportMap::default(),
            fingerprint: None,
            last_error: None,
            runtime_errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Shared gate, for requesting tickets without holding the session.
    #[must_use]
    pub fn gate(&self) -> Arc<RecompileGate> {
        Arc::clone(&self.gate)
    }

    /// Issue a ticket for a pass over the current snapshot.
    pub fn request(&self) -> Ticket {
        self.gate.request()
    }

    /// Whether `files` is exactly what the rendered preview was built from.
    #[must_use]
    pub fn is_current_fingerprint(&self, fingerprint: &str) -> bool {
        self.fingerprint.as_deref() == Some(fingerprint)
    }

    /// Fingerprint of the snapshot behind the rendered preview.
    #[must_use]
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Settle `ticket` without building when `fingerprint` is the snapshot
    /// already rendered. Returns `None` when it is not.
    pub fn settle_unchanged(&mut self, ticket: Ticket, fingerprint: &str) -> Option<ApplyOutcome> {
        if !self.is_current_fingerprint(fingerprint) {
            return None;
        }
        if !self.gate.try_commit(ticket) {
            return Some(ApplyOutcome::Stale);
        }
        self.last_error = None;
        Some(ApplyOutcome::Unchanged)
    }

    /// Apply the result of a pass.
    pub fn apply(
        &mut self,
        ticket: Ticket,
        result: Result<PreviewBuild, CompileError>,
    ) -> ApplyOutcome {
        if !self.gate.try_commit(ticket) {
            tracing::debug!(version = ticket.version, "discarding stale preview pass");
            return ApplyOutcome::Stale;
        }

        let build = match result {
            Ok(build) => build,
            Err(error) => {
                tracing::warn!(
                    version = ticket.version,
                    code = error.code(),
                    error = %error,
                    "preview pass failed, keeping previous preview"
                );
                self.last_error = Some(error.clone());
                return ApplyOutcome::Failed(error);
            }
        };

        if self.is_current_fingerprint(&build.fingerprint) {
            self.last_error = None;
            return ApplyOutcome::Unchanged;
        }

        let summary = self.registry.commit(build.staged);
        let import_map = import_map::build(&self.registry, &self.pipeline.redirects);
        let document = match preview::assemble(
            &import_map,
            &build.styles,
            std::slice::from_ref(&build.entry),
            &self.pipeline.document,
            ticket.version,
        ) {
            Ok(document) => document,
            Err(error) => {
                self.last_error = Some(error.clone());
                return ApplyOutcome::Failed(error);
            }
        };

        tracing::info!(
            version = ticket.version,
            entry = %document.entry,
            modules = self.registry.len(),
            minted = summary.minted,
            released = summary.released,
            "preview updated"
        );

        self.import_map = import_map;
        self.document = Some(document);
        self.fingerprint = Some(build.fingerprint);
        self.last_error = None;
        self.runtime_errors.clear();
        ApplyOutcome::Applied(summary)
    }

    /// Request, build and apply in one step.
    pub fn recompile(&mut self, files: &FileSet) -> ApplyOutcome {
        let ticket = self.request();
        if let Some(outcome) = self.settle_unchanged(ticket, &files.fingerprint()) {
            return outcome;
        }
        let result = self.pipeline.build(files);
        self.apply(ticket, result)
    }

    /// Record an error relayed from the sandbox. Errors from documents that
    /// are no longer current are dropped.
    pub fn record_runtime_error(&mut self, mut error: RuntimeError) -> bool {
        let Some(document) = &self.document else {
            return false;
        };
        if error.version.is_some_and(|v| v != document.version) {
            tracing::debug!(version = ?error.version, "dropping runtime error from an old document");
            return false;
        }

        if let Some(location) = &mut error.location {
            if let Some(path) = self.registry.path_of(&location.file) {
                location.file = path.to_string();
            }
        }

        tracing::warn!(error = %error, "runtime error in preview");
        if self.runtime_errors.len() >= MAX_RUNTIME_ERRORS {
            self.runtime_errors.remove(0);
        }
        self.runtime_errors.push(error);
        true
    }

    /// Release every module reference and forget the document.
    pub fn teardown(&mut self) -> usize {
        let released = self.registry.release_all();
        self.document = None;
        self.import_map = ImportMap::default();
        self.fingerprint = None;
        self.runtime_errors.clear();
        tracing::debug!(released, "preview torn down");
        released
    }

    #[must_use]
    pub fn document(&self) -> Option<&PreviewDocument> {
        self.document.as_ref()
    }

    #[must_use]
    pub fn import_map(&self) -> &ImportMap {
        &self.import_map
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The error of the most recent pass, if it failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&CompileError> {
        self.last_error.as_ref()
    }

    /// Runtime errors relayed for the current document.
    #[must_use]
    pub fn runtime_errors(&self) -> &[RuntimeError] {
        &self.runtime_errors
    }

    /// Code behind a module reference.
    #[must_use]
    pub fn dereference(&self, reference: &str) -> Option<Arc<str>> {
        self.registry.dereference(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::SourceLocation;

    fn files() -> FileSet {
        FileSet::from_files([
            ("/App.jsx", "import Title from './Title';\nexport default () => <Title/>;"),
            ("/Title.jsx", "export default () => <h1>hi</h1>;"),
        ])
    }

    fn session() -> PreviewSession {
        PreviewSession::new(Pipeline::default(), "t")
    }

    #[test]
    fn test_gate_orders_tickets() {
        let gate = RecompileGate::new();
        let a = gate.request();
        let b = gate.request();
        assert!(a < b);
        assert!(gate.is_latest(b));
        assert!(!gate.is_latest(a));

        assert!(gate.try_commit(b));
        assert!(!gate.try_commit(a));
        assert!(!gate.try_commit(b));
        assert_eq!(gate.committed(), b.version());
    }

    #[test]
    fn test_build_is_pure_and_checks_entry() {
        let pipeline = Pipeline::default();
        let build = pipeline.build(&files()).unwrap();
        assert_eq!(build.entry, "/App.jsx");
        assert_eq!(build.staged.len(), 2);

        let no_entry = FileSet::from_files([("/Other.jsx", "export default 1;")]);
        assert!(matches!(
            pipeline.build(&no_entry),
            Err(CompileError::EntryMissing { .. })
        ));
    }

    #[test]
    fn test_recompile_applies_and_then_is_unchanged() {
        let mut session = session();
        let files = files();
        assert!(matches!(session.recompile(&files), ApplyOutcome::Applied(_)));
        let doc = session.document().unwrap().clone();
        assert_eq!(doc.entry, "/App.jsx");

        assert_eq!(session.recompile(&files), ApplyOutcome::Unchanged);
        assert_eq!(session.document(), Some(&doc));
    }

    #[test]
    fn test_settle_unchanged_only_for_rendered_snapshot() {
        let mut session = session();
        let files = files();
        let fingerprint = files.fingerprint();

        let ticket = session.request();
        assert_eq!(session.settle_unchanged(ticket, &fingerprint), None);

        session.recompile(&files);
        assert_eq!(session.fingerprint(), Some(fingerprint.as_str()));

        let older = session.request();
        let newer = session.request();
        assert_eq!(
            session.settle_unchanged(newer, &fingerprint),
            Some(ApplyOutcome::Unchanged)
        );
        assert_eq!(
            session.settle_unchanged(older, &fingerprint),
            Some(ApplyOutcome::Stale)
        );
        assert_eq!(session.registry().stats().minted, 2);
    }

    #[test]
    fn test_failure_keeps_previous_document() {
        let mut session = session();
        let mut files = files();
        session.recompile(&files);
        let doc = session.document().unwrap().clone();

        files.insert_file("/Title.jsx", "export default () => <h1>;");
        match session.recompile(&files) {
            ApplyOutcome::Failed(CompileError::Syntax { path, .. }) => assert_eq!(path, "/Title.jsx"),
            other => panic!("expected syntax failure, got {other:?}"),
        }
        assert_eq!(session.document(), Some(&doc));
        assert!(session.last_error().is_some());
        assert!(session.dereference(session.import_map().get("/App.jsx").unwrap()).is_some());
    }

    #[test]
    fn test_stale_result_is_discarded() {
        let mut session = session();
        let pipeline = session.pipeline().clone();

        let old_files = files();
        let mut new_files = files();
        new_files.insert_file("/Title.jsx", "export default () => <h1>new</h1>;");

        let old_ticket = session.request();
        let new_ticket = session.request();
        let old_result = pipeline.build(&old_files);
        let new_result = pipeline.build(&new_files);

        assert!(matches!(session.apply(new_ticket, new_result), ApplyOutcome::Applied(_)));
        assert_eq!(session.apply(old_ticket, old_result), ApplyOutcome::Stale);
        assert_eq!(session.document().unwrap().version, new_ticket.version());

        let title = session.registry().module("/Title.jsx").unwrap();
        assert!(title.code.contains("new"));
    }

    #[test]
    fn test_runtime_errors_for_current_document() {
        let mut session = session();
        session.recompile(&files());
        let version = session.document().unwrap().version;
        let reference = session.registry().reference("/Title.jsx").unwrap().to_string();

        let error = RuntimeError::new("boom")
            .with_version(version)
            .with_location(SourceLocation {
                file: format!("http://localhost:5173{reference}"),
                line: Some(1),
                column: Some(2),
            });
        assert!(session.record_runtime_error(error));
        assert_eq!(session.runtime_errors().len(), 1);
        assert_eq!(
            session.runtime_errors()[0].location.as_ref().unwrap().file,
            "/Title.jsx"
        );

        assert!(!session.record_runtime_error(RuntimeError::new("old").with_version(version + 100)));
        assert_eq!(session.runtime_errors().len(), 1);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let mut session = session();
        session.recompile(&files());
        assert_eq!(session.teardown(), 2);
        assert!(session.document().is_none());
        assert_eq!(session.registry().stats().live, 0);
    }
}
