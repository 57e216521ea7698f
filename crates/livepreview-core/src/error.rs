use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for livepreview operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read snapshot {path}: {message}")]
    Snapshot { path: PathBuf, message: String },

    #[error("{operation} {path}: {message}")]
    FileSystem {
        operation: &'static str,
        path: String,
        message: String,
    },
}

/// Compile-time failure of a preview pass.
///
/// Any of these aborts the pass in flight; the previously rendered preview
/// stays in place. Every variant names the virtual file it originates from.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompileError {
    /// A local-shaped import specifier matched no file.
    #[error("Cannot resolve '{specifier}' imported from {importer}")]
    Resolution { specifier: String, importer: String },

    /// A local import resolved to a file that is not an executable module.
    #[error("Cannot import '{specifier}' from {importer}: {path} is not a JavaScript module")]
    UnsupportedModule {
        specifier: String,
        importer: String,
        path: String,
    },

    /// Unparsable source.
    #[error("Syntax error in {path}{}: {message}", position(.line, .column))]
    Syntax {
        path: String,
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    /// No root module at any conventional entry path.
    #[error("No entry module found (looked for {})", .candidates.join(", "))]
    EntryMissing { candidates: Vec<String> },

    /// A stylesheet could not be processed.
    #[error("Invalid stylesheet {path}: {message}")]
    Style { path: String, message: String },
}

impl CompileError {
    /// Stable error code for machine-readable output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "RESOLUTION_ERROR",
            Self::UnsupportedModule { .. } => "UNSUPPORTED_MODULE",
            Self::Syntax { .. } => "SYNTAX_ERROR",
            Self::EntryMissing { .. } => "ENTRY_MISSING",
            Self::Style { .. } => "STYLE_ERROR",
        }
    }

    /// The virtual file the error is attributed to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Resolution { importer, .. } | Self::UnsupportedModule { importer, .. } => {
                Some(importer)
            }
            Self::Syntax { path, .. } | Self::Style { path, .. } => Some(path),
            Self::EntryMissing { .. } => None,
        }
    }
}

fn position(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!(":{line}:{column}"),
        (Some(line), None) => format!(":{line}"),
        _ => String::new(),
    }
}
