//! Third-party package specifiers and CDN redirection rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bare package specifier: `name`, `@scope/name`, optionally followed by
/// `@version` and a `/sub/path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageSpecifier {
    pub name: String,
    pub version: Option<String>,
    pub subpath: Option<String>,
}

impl PackageSpecifier {
    /// Parse a bare specifier. Returns `None` for anything that cannot be a
    /// package name.
    #[must_use]
    pub fn parse(specifier: &str) -> Option<Self> {
        if specifier.is_empty()
            || specifier.contains(':')
            || specifier.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'')
        {
            return None;
        }

        // Split off the package part (one segment, two for scoped packages).
        let scoped = specifier.starts_with('@');
        let mut slash_positions = specifier.match_indices('/').map(|(i, _)| i);
        let split_at = if scoped {
            slash_positions.next()?;
            slash_positions.next()
        } else {
            slash_positions.next()
        };

        let (head, subpath) = match split_at {
            Some(idx) => (&specifier[..idx], Some(&specifier[idx + 1..])),
            None => (specifier, None),
        };

        // Version marker: the last `@` that is not the scope prefix.
        let search_from = usize::from(scoped);
        let (name, version) = match head[search_from..].rfind('@') {
            Some(rel) => {
                let at = rel + search_from;
                (&head[..at], Some(&head[at + 1..]))
            }
            None => (head, None),
        };

        if name.is_empty() || name == "@" || name.ends_with('/') {
            return None;
        }
        if scoped && !name.contains('/') {
            return None;
        }
        if version.is_some_and(str::is_empty) {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            version: version.map(str::to_string),
            subpath: subpath.filter(|s| !s.is_empty()).map(str::to_string),
        })
    }

    /// The specifier without a version: `name` or `name/subpath`.
    #[must_use]
    pub fn bare(&self) -> String {
        match &self.subpath {
            Some(sub) => format!("{}/{sub}", self.name),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Display for PackageSpecifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        if let Some(sub) = &self.subpath {
            write!(f, "/{sub}")?;
        }
        Ok(())
    }
}

/// Rules mapping bare package specifiers to pre-built ES module URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PackageRedirects {
    /// CDN base URL, without a trailing slash.
    pub cdn: String,
    /// Version used when neither the specifier nor a pin names one.
    pub default_version: String,
    /// Per-package version overrides.
    pub pins: BTreeMap<String, String>,
    /// Packages every other package imports through the import map
    /// instead of bundling its own copy.
    pub external: Vec<String>,
}

impl Default for PackageRedirects {
    fn default() -> Self {
        let mut pins = BTreeMap::new();
        pins.insert("react".to_string(), "19".to_string());
        pins.insert("react-dom".to_string(), "19".to_string());
        Self {
            cdn: "https://esm.sh".to_string(),
            default_version: "latest".to_string(),
            pins,
            external: vec!["react".to_string(), "react-dom".to_string()],
        }
    }
}

impl PackageRedirects {
    /// Version for `spec`: explicit version, then pin, then the default.
    #[must_use]
    pub fn version_for<'a>(&'a self, spec: &'a PackageSpecifier) -> &'a str {
        spec.version
            .as_deref()
            .or_else(|| self.pins.get(&spec.name).map(String::as_str))
            .unwrap_or(self.default_version.as_str())
    }

    /// Resolvable URL for `spec`.
    #[must_use]
    pub fn url_for(&self, spec: &PackageSpecifier) -> String {
        let mut url = format!(
            "{}/{}@{}",
            self.cdn.trim_end_matches('/'),
            spec.name,
            self.version_for(spec)
        );
        if let Some(sub) = &spec.subpath {
            url.push('/');
            url.push_str(sub);
        }
        if !self.external.is_empty() && !self.external.contains(&spec.name) {
            url.push_str("?external=");
            url.push_str(&self.external.join(","));
        }
        url
    }
}
