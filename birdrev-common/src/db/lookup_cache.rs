//! Time-to-live cache for picker lookups (distinct sessions, species)

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cached lookup families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKind {
    Sessions,
    Species,
}

/// Values expire after `ttl`; [`LookupCache::clear`] drops everything at once.
#[derive(Debug)]
pub struct LookupCache {
    ttl: Duration,
    entries: Mutex<HashMap<LookupKind, (Instant, Vec<String>)>>,
}

impl LookupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh cached value, if any
    pub fn get(&self, kind: LookupKind) -> Option<Vec<String>> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(&kind)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, values)| values.clone())
    }

    pub fn put(&self, kind: LookupKind, values: Vec<String>) {
        if self.ttl.is_zero() {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(kind, (Instant::now(), values));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}
