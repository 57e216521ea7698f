//! Browser import map built from the registry and package redirects.
//!
//! Rebuilt wholesale after every successful commit.

use crate::package::{PackageRedirects, PackageSpecifier};
use crate::registry::Registry;
use crate::resolver::{probe, EXTENSIONS, INDEX_FILES, ROOT_ALIAS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Packages the preview bootstrap imports itself.
pub const RUNTIME_PACKAGES: &[&str] = &["react", "react-dom", "react-dom/client", "react/jsx-runtime"];

/// `{ "imports": { specifier: url } }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    pub imports: BTreeMap<String, String>,
}

/// A key claimed by both a local module and a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConflict {
    pub key: String,
    pub local: String,
    pub package: String,
}

impl ImportMap {
    #[must_use]
    pub fn get(&self, specifier: &str) -> Option<&str> {
        self.imports.get(specifier).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, specifier: &str) -> bool {
        self.imports.contains_key(specifier)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.imports.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }

    /// Compact JSON, as embedded in `<script type="importmap">`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Indented JSON for humans.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Build the import map for the registry's current modules plus the runtime
/// packages and every package a module imports.
#[must_use]
pub fn build(registry: &Registry, redirects: &PackageRedirects) -> ImportMap {
    let mut local = BTreeMap::new();
    for module in registry.modules() {
        for key in local_keys(&module.path) {
            // An alias only belongs to this module if resolving it lands here.
            if key != module.path && !alias_resolves_to(&key, &module.path, registry) {
                continue;
            }
            local.insert(key, module.reference.to_string());
        }
    }

    let mut packages = BTreeMap::new();
    for name in RUNTIME_PACKAGES {
        if let Some(spec) = PackageSpecifier::parse(name) {
            packages.insert(spec.bare(), redirects.url_for(&spec));
        }
    }
    for spec in registry.packages() {
        packages
            .entry(spec.bare())
            .or_insert_with(|| redirects.url_for(&spec));
    }

    let (map, conflicts) = merge(local, packages);
    for conflict in &conflicts {
        tracing::warn!(
            key = %conflict.key,
            local = %conflict.local,
            package = %conflict.package,
            "import map key claimed by a local module and a package; local wins"
        );
    }
    map
}

/// Merge local and package entries. Local entries win on collision.
#[must_use]
pub fn merge(
    local: BTreeMap<String, String>,
    packages: BTreeMap<String, String>,
) -> (ImportMap, Vec<KeyConflict>) {
    let mut imports = local;
    let mut conflicts = Vec::new();
    for (key, url) in packages {
        match imports.get(&key) {
            Some(existing) => conflicts.push(KeyConflict {
                key,
                local: existing.clone(),
                package: url,
            }),
            None => {
                imports.insert(key, url);
            }
        }
    }
    (ImportMap { imports }, conflicts)
}

/// Every key under which the module at `path` may be imported.
fn local_keys(path: &str) -> Vec<String> {
    let mut bases = vec![path.to_string()];

    if let Some(stem) = strip_known_extension(path) {
        bases.push(stem.to_string());
        for index in INDEX_FILES {
            if let Some(dir) = path.strip_suffix(&format!("/{index}")) {
                if !dir.is_empty() {
                    bases.push(dir.to_string());
                }
            }
        }
    }

    let mut keys = Vec::with_capacity(bases.len() * 2);
    for base in bases {
        keys.push(format!("{ROOT_ALIAS}{}", &base[1..]));
        keys.push(base);
    }
    keys
}

fn strip_known_extension(path: &str) -> Option<&str> {
    EXTENSIONS.iter().find_map(|ext| path.strip_suffix(ext))
}

fn alias_resolves_to(key: &str, path: &str, registry: &Registry) -> bool {
    let canonical = match key.strip_prefix(ROOT_ALIAS) {
        Some(rest) => format!("/{rest}"),
        None => key.to_string(),
    };
    probe(&canonical, |p| registry.contains(p)).as_deref() == Some(path)
}
