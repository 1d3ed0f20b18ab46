//! Storage backends.

use std::sync::RwLock;

use hashbrown::HashMap;

use crate::{CacheEntry, CacheKey, StoreError, StoreResult};

/// Persistence for named cache generations.
///
/// Implementations give atomic per-key reads and writes; `put` writes a
/// whole batch or nothing.
pub trait CacheBackend: Send + Sync {
    /// Create the named cache if it does not exist.
    fn create(&self, name: &str) -> StoreResult<()>;

    /// Check if a cache exists.
    fn has(&self, name: &str) -> StoreResult<bool>;

    /// Delete a cache and all its entries. Returns whether it existed.
    fn delete(&self, name: &str) -> StoreResult<bool>;

    /// All cache names, in creation order.
    fn names(&self) -> StoreResult<Vec<String>>;

    /// Look up one entry.
    fn get(&self, name: &str, key: &CacheKey) -> StoreResult<Option<CacheEntry>>;

    /// Insert or overwrite entries as one atomic batch.
    fn put(&self, name: &str, entries: Vec<CacheEntry>) -> StoreResult<()>;

    /// Remove one entry. Returns whether it existed.
    fn remove(&self, name: &str, key: &CacheKey) -> StoreResult<bool>;

    /// All keys in a cache.
    fn keys(&self, name: &str) -> StoreResult<Vec<CacheKey>>;
}

#[derive(Debug, Default)]
struct Generation {
    created: u64,
    entries: HashMap<CacheKey, CacheEntry>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    caches: HashMap<String, Generation>,
}

/// Process-local backend. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryBackend {
    fn create(&self, name: &str) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        if !state.caches.contains_key(name) {
            let created = state.next_id;
            state.next_id += 1;
            state.caches.insert(
                name.to_string(),
                Generation {
                    created,
                    entries: HashMap::new(),
                },
            );
        }
        Ok(())
    }

    fn has(&self, name: &str) -> StoreResult<bool> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.caches.contains_key(name))
    }

    fn delete(&self, name: &str) -> StoreResult<bool> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        Ok(state.caches.remove(name).is_some())
    }

    fn names(&self) -> StoreResult<Vec<String>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let mut names: Vec<(u64, String)> = state
            .caches
            .iter()
            .map(|(name, generation)| (generation.created, name.clone()))
            .collect();
        names.sort();
        Ok(names.into_iter().map(|(_, name)| name).collect())
    }

    fn get(&self, name: &str, key: &CacheKey) -> StoreResult<Option<CacheEntry>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .caches
            .get(name)
            .and_then(|generation| generation.entries.get(key))
            .cloned())
    }

    fn put(&self, name: &str, entries: Vec<CacheEntry>) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let generation = state
            .caches
            .get_mut(name)
            .ok_or_else(|| StoreError::CacheNotFound(name.to_string()))?;
        for entry in entries {
            generation.entries.insert(entry.key.clone(), entry);
        }
        Ok(())
    }

    fn remove(&self, name: &str, key: &CacheKey) -> StoreResult<bool> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .caches
            .get_mut(name)
            .map(|generation| generation.entries.remove(key).is_some())
            .unwrap_or(false))
    }

    fn keys(&self, name: &str) -> StoreResult<Vec<CacheKey>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let generation = state
            .caches
            .get(name)
            .ok_or_else(|| StoreError::CacheNotFound(name.to_string()))?;
        let mut keys: Vec<CacheKey> = generation.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
