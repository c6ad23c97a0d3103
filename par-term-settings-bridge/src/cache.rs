//! Client-side write-through cache.
//!
//! An entry is trusted only through its "known" flags: `value_known` with
//! `value == None` means the server confirmed there is no value, while
//! `value_known == false` means the server must be asked. Value and
//! writability are tracked independently.

use std::collections::HashMap;
use std::sync::Arc;

use par_term_settings::{Value, ValueType, is_dir};
use parking_lot::Mutex;

/// Cached knowledge about one key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    pub value: Option<Value>,
    pub value_known: bool,
    pub writable: bool,
    pub writable_known: bool,
}

/// Outcome of a value lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Ask the server.
    Miss,
    /// The server's answer, possibly "no value".
    Hit(Option<Value>),
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Bumped by every invalidation. An answer fetched while it moved may
    /// predate a change and is not stored.
    generation: u64,
}

/// Key-indexed cache shared between the client and its notification task.
///
/// The lock is never held across an await point.
#[derive(Debug, Clone, Default)]
pub struct SettingsCache {
    state: Arc<Mutex<CacheState>>,
}

impl SettingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current invalidation generation; capture it before asking the server.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Look up the value of `key`, treating a cached value of another type
    /// than `expected` as a miss.
    pub fn lookup_value(&self, key: &str, expected: &ValueType) -> CacheLookup {
        let state = self.state.lock();
        match state.entries.get(key) {
            Some(entry) if entry.value_known => match &entry.value {
                None => CacheLookup::Hit(None),
                Some(v) if &v.value_type() == expected => CacheLookup::Hit(Some(v.clone())),
                Some(_) => CacheLookup::Miss,
            },
            _ => CacheLookup::Miss,
        }
    }

    pub fn lookup_writable(&self, key: &str) -> Option<bool> {
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .filter(|e| e.writable_known)
            .map(|e| e.writable)
    }

    pub fn store_value(&self, key: &str, value: Option<Value>) {
        let mut state = self.state.lock();
        let entry = state.entries.entry(key.to_string()).or_default();
        entry.value = value;
        entry.value_known = true;
    }

    /// Store `value` only if nothing was invalidated since `generation`.
    pub fn store_value_if(&self, key: &str, value: Option<Value>, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        let entry = state.entries.entry(key.to_string()).or_default();
        entry.value = value;
        entry.value_known = true;
        true
    }

    pub fn store_writable(&self, key: &str, writable: bool) {
        let mut state = self.state.lock();
        let entry = state.entries.entry(key.to_string()).or_default();
        entry.writable = writable;
        entry.writable_known = true;
    }

    /// Store writability only if nothing was invalidated since `generation`.
    pub fn store_writable_if(&self, key: &str, writable: bool, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        let entry = state.entries.entry(key.to_string()).or_default();
        entry.writable = writable;
        entry.writable_known = true;
        true
    }

    /// Mirror confirmed writes, in order: a directory path evicts everything
    /// below it, an absent value invalidates, a present value is stored.
    ///
    /// If anything was invalidated since `generation`, every touched entry is
    /// invalidated instead and `false` is returned.
    pub fn apply_writes(&self, writes: &[(String, Option<Value>)], generation: u64) -> bool {
        let mut state = self.state.lock();
        let current = state.generation == generation;
        for (path, value) in writes {
            if is_dir(path) {
                state.entries.retain(|k, _| !k.starts_with(path.as_str()));
            } else if let (true, Some(v)) = (current, value) {
                let entry = state.entries.entry(path.clone()).or_default();
                entry.value = Some(v.clone());
                entry.value_known = true;
            } else if let Some(entry) = state.entries.get_mut(path) {
                entry.value = None;
                entry.value_known = false;
            }
        }
        state.generation += 1;
        current
    }

    /// Forget the value of `key` so the next read goes to the server.
    pub fn invalidate_value(&self, key: &str) {
        let mut state = self.state.lock();
        state.generation += 1;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.value = None;
            entry.value_known = false;
        }
    }

    /// Forget the writability of `key`, or of every key below it when `key`
    /// is a directory.
    pub fn invalidate_writable(&self, key: &str) {
        let mut state = self.state.lock();
        state.generation += 1;
        if is_dir(key) {
            for (k, entry) in state.entries.iter_mut() {
                if k.starts_with(key) {
                    entry.writable_known = false;
                }
            }
        } else if let Some(entry) = state.entries.get_mut(key) {
            entry.writable_known = false;
        }
    }

    /// Drop every entry whose key starts with `prefix`. Returns how many
    /// entries were removed.
    pub fn evict_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state.lock();
        state.generation += 1;
        let before = state.entries.len();
        state.entries.retain(|k, _| !k.starts_with(prefix));
        before - state.entries.len()
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}
