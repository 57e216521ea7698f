//! Preview document assembly.
//!
//! A preview document is a standalone HTML page: the import map, the
//! aggregated styles, an error relay and a bootstrap module that mounts the
//! entry component into the root node. Documents are derived, stateless and
//! replaced wholesale on every successful pass.

pub mod sandbox;
mod template;

pub use sandbox::{
    channel, render, ChannelSandbox, HostMessage, RuntimeError, Sandbox, SandboxEndpoint,
    SandboxMessage, SourceLocation,
};

use crate::error::CompileError;
use crate::import_map::ImportMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Conventional entry module paths, in priority order.
pub const DEFAULT_ENTRY_CANDIDATES: &[&str] = &[
    "/App.jsx",
    "/App.tsx",
    "/App.js",
    "/App.ts",
    "/src/App.jsx",
    "/src/App.tsx",
];

#[must_use]
pub fn default_entry_candidates() -> Vec<String> {
    DEFAULT_ENTRY_CANDIDATES
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Document-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DocumentOptions {
    pub title: String,
    /// Extra markup appended to `<head>` verbatim (e.g. a Tailwind CDN script).
    pub head: Vec<String>,
    /// Id of the node the entry component is mounted into.
    pub root_id: String,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            title: "Preview".to_string(),
            head: Vec::new(),
            root_id: "root".to_string(),
        }
    }
}

/// An assembled preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewDocument {
    pub html: String,
    /// Canonical path of the mounted entry module.
    pub entry: String,
    /// Pass version the document was produced by.
    pub version: u64,
}

/// First candidate that the import map can resolve.
pub fn select_entry(import_map: &ImportMap, candidates: &[String]) -> Result<String, CompileError> {
    candidates
        .iter()
        .find(|c| import_map.contains(c))
        .cloned()
        .ok_or_else(|| CompileError::EntryMissing {
            candidates: candidates.to_vec(),
        })
}

/// Assemble the preview document.
pub fn assemble(
    import_map: &ImportMap,
    styles: &str,
    candidates: &[String],
    options: &DocumentOptions,
    version: u64,
) -> Result<PreviewDocument, CompileError> {
    let entry = select_entry(import_map, candidates)?;

    let map_json = import_map.to_json().map_err(|e| internal(&entry, &e))?;
    let bootstrap =
        template::bootstrap_module(&entry, &options.root_id).map_err(|e| internal(&entry, &e))?;

    let mut html = String::with_capacity(map_json.len() + styles.len() + bootstrap.len() + 2048);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\" />\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n");
    let _ = writeln!(html, "<title>{}</title>", template::html_escape(&options.title));
    let _ = writeln!(html, "<script>{}</script>", template::relay_script(version));
    let _ = writeln!(
        html,
        "<script type=\"importmap\">{}</script>",
        template::script_safe(&map_json)
    );
    for extra in &options.head {
        html.push_str(extra);
        html.push('\n');
    }
    let _ = writeln!(html, "<style>\n{}\n</style>", template::style_safe(styles));
    html.push_str("</head>\n<body>\n");
    let _ = writeln!(
        html,
        "<div id=\"{}\"></div>",
        template::html_escape(&options.root_id)
    );
    let _ = writeln!(html, "<script type=\"module\">\n{bootstrap}\n</script>");
    html.push_str("</body>\n</html>\n");

    Ok(PreviewDocument {
        html,
        entry,
        version,
    })
}

fn internal(entry: &str, err: &serde_json::Error) -> CompileError {
    CompileError::Syntax {
        path: entry.to_string(),
        message: format!("failed to serialize preview data: {err}"),
        line: None,
        column: None,
    }
}
