//! Style aggregation.
//!
//! Every `.css` file of the snapshot is concatenated in ascending lexical
//! path order (cascade order is the path order), joined with a newline.

use crate::compiler::is_stylesheet_path;
use crate::error::CompileError;
use crate::vfs::FileSet;
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use serde::{Deserialize, Serialize};

/// Post-processing applied to each stylesheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleOptions {
    /// Minify each stylesheet.
    pub minify: bool,
    /// Add vendor prefixes and lower nesting for the default browser targets.
    pub autoprefixer: bool,
}

impl StyleOptions {
    fn is_passthrough(self) -> bool {
        !self.minify && !self.autoprefixer
    }
}

/// Concatenate every stylesheet unmodified. No stylesheets gives `""`.
#[must_use]
pub fn aggregate(files: &FileSet) -> String {
    files
        .files()
        .filter(|f| is_stylesheet_path(&f.path))
        .map(|f| f.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Concatenate every stylesheet after processing it with lightningcss.
///
/// A stylesheet that fails to parse is reported as [`CompileError::Style`].
pub fn aggregate_with(files: &FileSet, options: StyleOptions) -> Result<String, CompileError> {
    if options.is_passthrough() {
        return Ok(aggregate(files));
    }

    let mut parts = Vec::new();
    for file in files.files().filter(|f| is_stylesheet_path(&f.path)) {
        parts.push(process(&file.path, &file.content, options)?);
    }
    Ok(parts.join("\n"))
}

fn process(path: &str, source: &str, options: StyleOptions) -> Result<String, CompileError> {
    let style_error = |message: String| CompileError::Style {
        path: path.to_string(),
        message,
    };

    let parser_options = ParserOptions {
        filename: path.to_string(),
        ..ParserOptions::default()
    };
    let mut stylesheet =
        StyleSheet::parse(source, parser_options).map_err(|e| style_error(e.to_string()))?;

    stylesheet
        .minify(MinifyOptions {
            targets: targets(options),
            ..Default::default()
        })
        .map_err(|e| style_error(e.to_string()))?;

    let output = stylesheet
        .to_css(PrinterOptions {
            minify: options.minify,
            targets: targets(options),
            ..Default::default()
        })
        .map_err(|e| style_error(e.to_string()))?;

    Ok(output.code)
}

fn targets(options: StyleOptions) -> Targets {
    if options.autoprefixer {
        Targets::from(default_browser_targets())
    } else {
        Targets::default()
    }
}

fn default_browser_targets() -> Browsers {
    Browsers {
        chrome: Some(80 << 16),
        firefox: Some(75 << 16),
        safari: Some(13 << 16),
        edge: Some(80 << 16),
        ..Default::default()
    }
}
