use std::collections::HashMap;
use std::sync::RwLock;

use super::{ArtifactStore, CacheError, CachedEntry};
use crate::util::hash::CacheKey;

/// In-process store, mainly for tests and one-shot builds.
#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: RwLock<HashMap<CacheKey, CachedEntry>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.read().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn contains(&self, key: &CacheKey) -> bool {
    self.entries.read().map(|e| e.contains_key(key)).unwrap_or(false)
  }

  pub fn keys(&self) -> Vec<CacheKey> {
    self
      .entries
      .read()
      .map(|e| e.keys().cloned().collect())
      .unwrap_or_default()
  }
}

impl ArtifactStore for MemoryStore {
  fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError> {
    let entries = self.entries.read().map_err(|_| CacheError::Corrupt {
      key: key.clone(),
      reason: "store lock poisoned".to_string(),
    })?;
    Ok(entries.get(key).cloned())
  }

  fn put(&self, key: &CacheKey, entry: CachedEntry) -> Result<(), CacheError> {
    let mut entries = self.entries.write().map_err(|_| CacheError::Corrupt {
      key: key.clone(),
      reason: "store lock poisoned".to_string(),
    })?;
    entries.entry(key.clone()).or_insert(entry);
    Ok(())
  }

  fn describe(&self) -> String {
    "memory".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::CachedOutput;

  fn entry(content: &str) -> CachedEntry {
    CachedEntry {
      outputs: vec![CachedOutput::new(content.as_bytes().to_vec())],
    }
  }

  #[test]
  fn miss_then_hit() {
    let store = MemoryStore::new();
    let key = CacheKey("abc".into());
    assert!(store.get(&key).unwrap().is_none());

    store.put(&key, entry("one")).unwrap();
    assert_eq!(store.get(&key).unwrap(), Some(entry("one")));
  }

  #[test]
  fn put_never_replaces() {
    let store = MemoryStore::new();
    let key = CacheKey("abc".into());
    store.put(&key, entry("first")).unwrap();
    store.put(&key, entry("second")).unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(store.get(&key).unwrap(), Some(entry("first")));
  }
}
