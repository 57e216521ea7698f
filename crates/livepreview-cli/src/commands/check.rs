//! `livepreview check` command implementation.
//!
//! Runs one preview pass over a project directory and reports what the
//! preview would contain, or the compile error that prevents it.

use livepreview_core::{
    ApplyOutcome, CompileError, FileSet, Pipeline, PreviewSession, ProjectConfig,
};
use livepreview_util::fs::atomic_write;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Namespace for references minted by a one-shot check.
const NAMESPACE: &str = "check";

/// Check command action.
#[derive(Debug, Clone)]
pub struct CheckAction {
    /// Project root.
    pub root: PathBuf,
    pub print_document: bool,
    pub print_import_map: bool,
    /// Export the document and every module into this directory.
    pub out: Option<PathBuf>,
}

/// Check result for JSON output.
#[derive(Serialize)]
struct CheckResultJson {
    ok: bool,
    root: String,
    entry: Option<String>,
    modules: Vec<ModuleJson>,
    packages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    import_map: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<String>,
    error: Option<ErrorJson>,
    notes: Vec<String>,
}

#[derive(Serialize)]
struct ModuleJson {
    path: String,
    reference: String,
    bytes: usize,
    imports: Vec<String>,
}

#[derive(Serialize)]
struct ErrorJson {
    code: &'static str,
    message: String,
    path: Option<String>,
}

impl From<&CompileError> for ErrorJson {
    fn from(error: &CompileError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
            path: error.path().map(ToString::to_string),
        }
    }
}

/// Run the check command.
pub fn run(action: CheckAction, json: bool) -> Result<()> {
    let root = action.root.canonicalize().map_err(|e| {
        miette::miette!("Cannot open project {}: {}", action.root.display(), e)
    })?;
    let config = ProjectConfig::load(&root).into_diagnostic()?;
    let files = FileSet::from_dir(&root).into_diagnostic()?;
    tracing::debug!(root = %root.display(), entries = files.len(), "loaded project snapshot");

    let mut session = PreviewSession::new(Pipeline::from_config(&config), NAMESPACE);
    let error = match session.recompile(&files) {
        ApplyOutcome::Failed(error) => Some(error),
        ApplyOutcome::Applied(_) | ApplyOutcome::Unchanged | ApplyOutcome::Stale => None,
    };

    let mut notes = Vec::new();
    if error.is_none() {
        if let Some(out) = &action.out {
            let written = export(&session, out)?;
            notes.push(format!("exported {written} files to {}", out.display()));
        }
    }

    let result = collect(&session, &root, &action, error.as_ref(), notes);

    if json {
        println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);
    } else {
        print_human(&result);
    }

    if let Some(error) = error {
        tracing::error!(code = error.code(), error = %error, "preview failed to compile");
        std::process::exit(1);
    }
    Ok(())
}

fn collect(
    session: &PreviewSession,
    root: &Path,
    action: &CheckAction,
    error: Option<&CompileError>,
    notes: Vec<String>,
) -> CheckResultJson {
    let registry = session.registry();
    let modules = registry
        .modules()
        .map(|m| ModuleJson {
            path: m.path.clone(),
            reference: m.reference.to_string(),
            bytes: m.code.len(),
            imports: m.local_deps.clone(),
        })
        .collect();
    let packages = registry.packages().iter().map(ToString::to_string).collect();

    let document = session.document();
    CheckResultJson {
        ok: error.is_none(),
        root: root.display().to_string(),
        entry: document.map(|d| d.entry.clone()),
        modules,
        packages,
        import_map: action
            .print_import_map
            .then(|| session.import_map().imports.clone()),
        document: if action.print_document {
            document.map(|d| d.html.clone())
        } else {
            None
        },
        error: error.map(ErrorJson::from),
        notes,
    }
}

/// Write `index.html` plus every module at its reference path, so the
/// directory can be served by any static file server.
fn export(session: &PreviewSession, out: &Path) -> Result<usize> {
    let Some(document) = session.document() else {
        return Ok(0);
    };

    std::fs::create_dir_all(out)
        .map_err(|e| miette::miette!("Failed to create {}: {}", out.display(), e))?;
    atomic_write(&out.join("index.html"), document.html.as_bytes())
        .map_err(|e| miette::miette!("Failed to write index.html: {}", e))?;

    let mut written = 1;
    for module in session.registry().modules() {
        let target = out.join(module.reference.as_str().trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| miette::miette!("Failed to create {}: {}", parent.display(), e))?;
        }
        atomic_write(&target, module.code.as_bytes())
            .map_err(|e| miette::miette!("Failed to write {}: {}", target.display(), e))?;
        written += 1;
    }

    tracing::debug!(out = %out.display(), written, "exported preview");
    Ok(written)
}

fn print_human(result: &CheckResultJson) {
    if let Some(error) = &result.error {
        eprintln!("error: {}: {}", error.code, error.message);
        return;
    }

    println!(
        "  Compiled {} module{} (entry {})",
        result.modules.len(),
        if result.modules.len() == 1 { "" } else { "s" },
        result.entry.as_deref().unwrap_or("-"),
    );
    for module in &result.modules {
        println!("    {} -> {} ({} bytes)", module.path, module.reference, module.bytes);
    }
    if !result.packages.is_empty() {
        println!("  Packages: {}", result.packages.join(", "));
    }
    for note in &result.notes {
        println!("  {note}");
    }

    if let Some(import_map) = &result.import_map {
        println!();
        for (key, target) in import_map {
            println!("  {key} -> {target}");
        }
    }
    if let Some(document) = &result.document {
        println!();
        println!("{document}");
    }
}
