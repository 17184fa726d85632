// src/module/cache.rs
//! Memoized module evaluation results
//!
//! Keys are the literal import-path strings handed in by the caller. No
//! normalisation happens here: `./a` and `a` are different modules.

use ahash::HashMap;
use sha2::{Digest, Sha256};

use crate::runtime::value::Value;

/// Result of evaluating a module once
#[derive(Debug, Clone)]
pub struct ModuleEntry {
    /// Namespace object produced by the module
    pub namespace: Value,
    /// Module globals captured when evaluation finished
    pub globals: HashMap<String, Value>,
    /// SHA-256 of the module source, when it was imported from source
    pub fingerprint: Option<[u8; 32]>,
}

/// Import cache, alive for the lifetime of its VM
#[derive(Debug, Default)]
pub struct ImportCache {
    entries: HashMap<String, ModuleEntry>,
}

impl ImportCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, path: &str) -> Option<&ModuleEntry> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: ModuleEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Whether the cached entry for `path` was built from source with this fingerprint
    pub fn is_fresh(&self, path: &str, fingerprint: &[u8; 32]) -> bool {
        self.entries
            .get(path)
            .is_some_and(|entry| entry.fingerprint.as_ref() == Some(fingerprint))
    }

    /// Drop one entry so the next import re-evaluates the module
    pub fn invalidate(&mut self, path: &str) -> Option<ModuleEntry> {
        self.entries.remove(path)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// SHA-256 digest of module source text
pub fn fingerprint(source: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}
