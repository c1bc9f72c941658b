//! Hashing utilities for content-addressed storage and cache keys.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 of some bytes
//! - `CacheKey`: the deterministic signature of an action
//! - `KeyHasher`: an incremental, length-prefixed builder for `CacheKey`
//! - `hash_bytes()` / `hash_file()`: content hashing

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A full 64-character SHA-256 hash of file or blob content.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Deterministic signature of an action: command template, ordered input
/// content hashes and toolchain identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
  /// Two-character shard prefix used by on-disk stores.
  pub fn shard(&self) -> &str {
    &self.0[..2.min(self.0.len())]
  }
}

impl std::fmt::Display for CacheKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Incremental builder for cache keys.
///
/// Every field is written with a length prefix so that `["ab", "c"]` and
/// `["a", "bc"]` never collide.
pub struct KeyHasher {
  hasher: Sha256,
}

impl KeyHasher {
  pub fn new(domain: &str) -> Self {
    let mut hasher = Self { hasher: Sha256::new() };
    hasher.field(domain);
    hasher
  }

  pub fn field(&mut self, value: &str) -> &mut Self {
    self.hasher.update((value.len() as u64).to_le_bytes());
    self.hasher.update(value.as_bytes());
    self
  }

  pub fn fields<'a>(&mut self, values: impl IntoIterator<Item = &'a str>) -> &mut Self {
    let values: Vec<&str> = values.into_iter().collect();
    self.hasher.update((values.len() as u64).to_le_bytes());
    for value in values {
      self.field(value);
    }
    self
  }

  pub fn finish(self) -> CacheKey {
    CacheKey(hex::encode(self.hasher.finalize()))
  }
}

/// Hash arbitrary bytes.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Hash a single file's contents, streaming in 64 KiB chunks.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
  let mut file = File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 65536];

  loop {
    let read = file.read(&mut buffer)?;
    if read == 0 {
      break;
    }
    hasher.update(&buffer[..read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}
