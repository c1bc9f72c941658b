//! Content-addressed artifact cache.
//!
//! The store maps an action's cache key to the bytes of the outputs it
//! produced. Entries are insert-once: a `put` for a key that is already
//! present leaves the existing entry untouched, unless that entry fails
//! verification, in which case it is replaced.
//!
//! # Layout
//!
//! ```text
//! artifacts/
//! └── <key[0..2]>/
//!     └── <key>/
//!         ├── entry.json      # output hashes and sizes, by position
//!         ├── 0.blob
//!         └── 1.blob
//! ```
//!
//! Outputs are recorded by their position in the action's declared output
//! list, so a hit can be materialized into any output directory.

pub mod disk;
pub mod memory;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::ActionId;
use crate::util::hash::{CacheKey, ContentHash, hash_bytes};

pub use disk::DiskStore;
pub use memory::MemoryStore;

/// A produced file, as exposed to dependents and to callers of `build`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
  pub path: PathBuf,
  pub hash: ContentHash,
  pub action: ActionId,
}

/// One output of a cached action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedOutput {
  pub hash: ContentHash,
  pub bytes: Vec<u8>,
}

impl CachedOutput {
  pub fn new(bytes: Vec<u8>) -> Self {
    Self {
      hash: hash_bytes(&bytes),
      bytes,
    }
  }
}

/// All outputs of one action, in declared order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedEntry {
  pub outputs: Vec<CachedOutput>,
}

/// Serialized form of an entry's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EntryManifest {
  pub version: u32,
  pub key: String,
  pub outputs: Vec<OutputRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OutputRecord {
  pub hash: ContentHash,
  pub size: u64,
}

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("artifact store unreachable at {path}: {source}")]
  Unreachable {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("corrupt cache entry {key}: {reason}")]
  Corrupt { key: CacheKey, reason: String },

  #[error("failed to write cache entry {key}: {source}")]
  Write {
    key: CacheKey,
    #[source]
    source: io::Error,
  },
}

/// Backing storage for cached action outputs.
///
/// Shared by concurrent workers; implementations only ever insert.
pub trait ArtifactStore: Send + Sync {
  /// Look up an entry. `Ok(None)` is a miss.
  fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError>;

  /// Insert an entry unless a readable one already exists for `key`.
  fn put(&self, key: &CacheKey, entry: CachedEntry) -> Result<(), CacheError>;

  /// Human-readable location, for diagnostics.
  fn describe(&self) -> String;
}
