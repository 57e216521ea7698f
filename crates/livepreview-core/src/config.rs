use crate::compiler::TransformOptions;
use crate::error::Error;
use crate::package::PackageRedirects;
use crate::preview::{default_entry_candidates, DocumentOptions};
use crate::styles::StyleOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the project configuration file.
pub const CONFIG_FILE: &str = "livepreview.json";

/// Runtime configuration for the livepreview CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// Per-project settings, read from `livepreview.json` at the project root.
///
/// Every section is optional.
///
/// ```json
/// {
///   "entry": ["/src/main.jsx"],
///   "jsx": { "runtime": "classic" },
///   "packages": { "pins": { "zod": "3" } },
///   "styles": { "minify": true },
///   "document": { "head": ["<script src=\"https://cdn.tailwindcss.com\"></script>"] },
///   "server": { "port": 4000 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Entry module candidates, in priority order.
    pub entry: Vec<String>,
    pub jsx: TransformOptions,
    pub packages: PackageRedirects,
    pub styles: StyleOptions,
    pub document: DocumentOptions,
    pub server: ServerConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            entry: default_entry_candidates(),
            jsx: TransformOptions::default(),
            packages: PackageRedirects::default(),
            styles: StyleOptions::default(),
            document: DocumentOptions::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Preview server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5173,
        }
    }
}

impl ProjectConfig {
    /// Load `livepreview.json` from `root`, falling back to defaults when
    /// the file does not exist.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let path = root.join(CONFIG_FILE);
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "no project config, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    /// Load a config file that must exist.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded project config");
        Ok(config.normalized())
    }

    /// Canonicalize entry paths and restore defaults for empty lists.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.entry.is_empty() {
            self.entry = default_entry_candidates();
        } else {
            self.entry = self
                .entry
                .iter()
                .map(|e| crate::vfs::normalize_path(e))
                .collect();
        }
        self
    }
}
