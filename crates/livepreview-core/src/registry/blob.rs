//! Arena of dereferenceable module references.
//!
//! A [`ModuleReference`] is a URL path (`/@blob/<namespace>/<id>.js`) bound
//! to exactly one code body. Ids are never reused, so a reference that has
//! been released can never start resolving to different code.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// URL prefix under which references are served.
pub const BLOB_PREFIX: &str = "/@blob/";

/// Opaque, dereferenceable handle to one version of a module's code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleReference(String);

impl ModuleReference {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reference accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlobStats {
    /// References currently dereferenceable.
    pub live: usize,
    /// References ever minted.
    pub minted: u64,
    /// References released.
    pub released: u64,
}

/// Owner of every live reference. Only the registry mints and releases.
#[derive(Debug)]
pub struct BlobStore {
    namespace: String,
    next_id: u64,
    /// `None` between allocation and binding.
    live: HashMap<ModuleReference, Option<Arc<str>>>,
    released: u64,
}

impl BlobStore {
    /// Create an arena whose references live under `/@blob/<namespace>/`.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            next_id: 0,
            live: HashMap::new(),
            released: 0,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Mint a fresh reference. It dereferences to nothing until bound.
    pub(crate) fn allocate(&mut self) -> ModuleReference {
        self.next_id += 1;
        let reference = ModuleReference(format!(
            "{BLOB_PREFIX}{}/{}.js",
            self.namespace, self.next_id
        ));
        self.live.insert(reference.clone(), None);
        reference
    }

    /// Bind code to a freshly allocated reference. Returns `false` if the
    /// reference is not live or already bound.
    pub(crate) fn bind(&mut self, reference: &ModuleReference, code: Arc<str>) -> bool {
        match self.live.get_mut(reference) {
            Some(slot) if slot.is_none() => {
                *slot = Some(code);
                true
            }
            _ => false,
        }
    }

    /// Release a reference. Returns `false` (and logs) if it was not live.
    pub(crate) fn release(&mut self, reference: &ModuleReference) -> bool {
        if self.live.remove(reference).is_some() {
            self.released += 1;
            true
        } else {
            tracing::warn!(reference = %reference, "release of a reference that is not live");
            false
        }
    }

    /// Release every live reference. Returns how many were released.
    pub(crate) fn release_all(&mut self) -> usize {
        let count = self.live.len();
        self.live.clear();
        self.released += count as u64;
        count
    }

    /// Code bound to `reference`, if it is live and bound.
    #[must_use]
    pub fn get(&self, reference: &str) -> Option<Arc<str>> {
        self.live
            .get(&ModuleReference(reference.to_string()))
            .and_then(Clone::clone)
    }

    #[must_use]
    pub fn is_live(&self, reference: &ModuleReference) -> bool {
        self.live.contains_key(reference)
    }

    #[must_use]
    pub fn stats(&self) -> BlobStats {
        BlobStats {
            live: self.live.len(),
            minted: self.next_id,
            released: self.released,
        }
    }
}
