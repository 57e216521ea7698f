//! Transform options and source classification.
//!
//! Everything that influences the emitted code lives in [`TransformOptions`],
//! so identical sources with identical options always produce identical output.

use crate::vfs::extension;
use serde::{Deserialize, Serialize};

/// JSX runtime mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JsxRuntime {
    /// Classic JSX transform (React.createElement).
    Classic,
    /// Automatic JSX transform (React 17+ / jsx-runtime).
    #[default]
    Automatic,
}

impl JsxRuntime {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Automatic => "automatic",
        }
    }
}

impl std::fmt::Display for JsxRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options for the JSX/TypeScript transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransformOptions {
    /// JSX runtime.
    pub runtime: JsxRuntime,
    /// Package providing `jsx-runtime` for the automatic runtime.
    pub import_source: String,
    /// Whether to minify the emitted code.
    pub minify: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            runtime: JsxRuntime::Automatic,
            import_source: "react".to_string(),
            minify: false,
        }
    }
}

impl TransformOptions {
    /// Set the JSX runtime.
    pub fn with_runtime(mut self, runtime: JsxRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    /// Set the automatic runtime import source.
    pub fn with_import_source(mut self, source: impl Into<String>) -> Self {
        self.import_source = source.into();
        self
    }

    /// Enable or disable minification.
    pub fn with_minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }
}

/// How a virtual file is treated by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// JavaScript or TypeScript, JSX allowed in everything but `.ts`.
    Script { typescript: bool, jsx: bool },
    /// JSON, exposed as a default export.
    Json,
    /// Stylesheet, injected by the style aggregator.
    Style,
    /// Anything else. Not importable.
    Other,
}

impl SourceKind {
    /// Classify `path` by extension.
    #[must_use]
    pub fn of(path: &str) -> Self {
        match extension(path).as_deref() {
            Some(".jsx" | ".js" | ".mjs") => Self::Script {
                typescript: false,
                jsx: true,
            },
            Some(".tsx") => Self::Script {
                typescript: true,
                jsx: true,
            },
            Some(".ts" | ".mts") => Self::Script {
                typescript: true,
                jsx: false,
            },
            Some(".json") => Self::Json,
            Some(".css") => Self::Style,
            _ => Self::Other,
        }
    }

    /// Whether files of this kind compile to an executable module.
    #[must_use]
    pub fn is_module(self) -> bool {
        matches!(self, Self::Script { .. } | Self::Json)
    }
}

/// Whether the file at `path` compiles to an executable module.
#[must_use]
pub fn is_module_path(path: &str) -> bool {
    SourceKind::of(path).is_module()
}

/// Whether the file at `path` is a stylesheet.
#[must_use]
pub fn is_stylesheet_path(path: &str) -> bool {
    SourceKind::of(path) == SourceKind::Style
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsx_runtime_serialization() {
        assert_eq!(
            serde_json::to_string(&JsxRuntime::Classic).unwrap(),
            "\"classic\""
        );
        let rt: JsxRuntime = serde_json::from_str("\"automatic\"").unwrap();
        assert_eq!(rt, JsxRuntime::Automatic);
    }

    #[test]
    fn test_transform_options_defaults() {
        let opts: TransformOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, TransformOptions::default());
        assert_eq!(opts.import_source, "react");

        let opts: TransformOptions =
            serde_json::from_str(r#"{"runtime": "classic", "importSource": "preact"}"#).unwrap();
        assert_eq!(opts.runtime, JsxRuntime::Classic);
        assert_eq!(opts.import_source, "preact");
    }

    #[test]
    fn test_source_kind_classification() {
        assert_eq!(
            SourceKind::of("/App.jsx"),
            SourceKind::Script {
                typescript: false,
                jsx: true
            }
        );
        assert_eq!(
            SourceKind::of("/util.js"),
            SourceKind::Script {
                typescript: false,
                jsx: true
            }
        );
        assert_eq!(
            SourceKind::of("/types.ts"),
            SourceKind::Script {
                typescript: true,
                jsx: false
            }
        );
        assert_eq!(SourceKind::of("/data.json"), SourceKind::Json);
        assert_eq!(SourceKind::of("/a.CSS"), SourceKind::Style);
        assert_eq!(SourceKind::of("/README.md"), SourceKind::Other);
    }

    #[test]
    fn test_module_paths() {
        assert!(is_module_path("/App.tsx"));
        assert!(is_module_path("/data.json"));
        assert!(!is_module_path("/styles.css"));
        assert!(is_stylesheet_path("/styles.css"));
        assert!(!is_module_path("/logo.svg"));
    }
}
