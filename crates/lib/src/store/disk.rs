use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use super::{ArtifactStore, CacheError, CachedEntry, CachedOutput, EntryManifest, OutputRecord};
use crate::util::hash::{CacheKey, hash_bytes};

const ENTRY_FILE: &str = "entry.json";
const ENTRY_VERSION: u32 = 1;

/// Store rooted in a local directory, shared across builds and processes.
#[derive(Debug, Clone)]
pub struct DiskStore {
  root: PathBuf,
}

impl DiskStore {
  /// Open (creating if needed) a store at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
    let root = root.into();
    fs::create_dir_all(&root).map_err(|source| CacheError::Unreachable {
      path: root.clone(),
      source,
    })?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// `<root>/<shard>/<key>`
  pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
    self.root.join(key.shard()).join(&key.0)
  }

  fn blob_name(index: usize) -> String {
    format!("{}.blob", index)
  }

  fn read_entry(&self, key: &CacheKey, dir: &Path) -> Result<Option<CachedEntry>, CacheError> {
    let manifest_path = dir.join(ENTRY_FILE);
    let raw = match fs::read_to_string(&manifest_path) {
      Ok(raw) => raw,
      Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(CacheError::Unreachable {
          path: manifest_path,
          source,
        });
      }
    };

    let corrupt = |reason: String| CacheError::Corrupt { key: key.clone(), reason };

    let manifest: EntryManifest = serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))?;
    if manifest.version != ENTRY_VERSION || manifest.key != key.0 {
      return Err(corrupt(format!(
        "entry header mismatch (version {}, key {})",
        manifest.version, manifest.key
      )));
    }

    let mut outputs = Vec::with_capacity(manifest.outputs.len());
    for (index, record) in manifest.outputs.iter().enumerate() {
      let blob_path = dir.join(Self::blob_name(index));
      let bytes = fs::read(&blob_path).map_err(|e| corrupt(format!("{}: {}", blob_path.display(), e)))?;

      if bytes.len() as u64 != record.size || hash_bytes(&bytes) != record.hash {
        return Err(corrupt(format!("output {} does not match its recorded hash", index)));
      }

      outputs.push(CachedOutput {
        hash: record.hash.clone(),
        bytes,
      });
    }

    Ok(Some(CachedEntry { outputs }))
  }

  /// Move a bad entry out of the way, then delete it.
  fn discard(&self, key: &CacheKey, dir: &Path) -> io::Result<()> {
    let trash = tempfile::Builder::new()
      .prefix(".discard-")
      .tempdir_in(self.root.join(key.shard()))?;
    match fs::rename(dir, trash.path().join(&key.0)) {
      Ok(()) => Ok(()),
      // Another writer already moved it.
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(err) => Err(err),
    }
  }

  fn write_staged(&self, key: &CacheKey, staging: &Path, entry: &CachedEntry) -> io::Result<()> {
    for (index, output) in entry.outputs.iter().enumerate() {
      fs::write(staging.join(Self::blob_name(index)), &output.bytes)?;
    }

    let manifest = EntryManifest {
      version: ENTRY_VERSION,
      key: key.0.clone(),
      outputs: entry
        .outputs
        .iter()
        .map(|o| OutputRecord {
          hash: o.hash.clone(),
          size: o.bytes.len() as u64,
        })
        .collect(),
    };
    let json = serde_json::to_vec_pretty(&manifest).map_err(io::Error::other)?;
    fs::write(staging.join(ENTRY_FILE), json)
  }
}

impl ArtifactStore for DiskStore {
  fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError> {
    let dir = self.entry_dir(key);
    let entry = self.read_entry(key, &dir)?;
    trace!(key = %key, hit = entry.is_some(), "disk store lookup");
    Ok(entry)
  }

  fn put(&self, key: &CacheKey, entry: CachedEntry) -> Result<(), CacheError> {
    let dir = self.entry_dir(key);
    let write_err = |source: io::Error| CacheError::Write { key: key.clone(), source };

    if dir.exists() {
      match self.read_entry(key, &dir) {
        Ok(Some(_)) => return Ok(()),
        Ok(None) | Err(CacheError::Corrupt { .. }) => {
          warn!(key = %key, "replacing unreadable cache entry");
          self.discard(key, &dir).map_err(write_err)?;
        }
        Err(err) => return Err(err),
      }
    }

    let shard = self.root.join(key.shard());
    fs::create_dir_all(&shard).map_err(write_err)?;

    // Staged next to its final location so the rename never crosses filesystems.
    let staging = tempfile::Builder::new()
      .prefix(".staging-")
      .tempdir_in(&shard)
      .map_err(write_err)?;
    self.write_staged(key, staging.path(), &entry).map_err(write_err)?;

    match fs::rename(staging.path(), &dir) {
      Ok(()) => {
        debug!(key = %key, outputs = entry.outputs.len(), "stored cache entry");
        Ok(())
      }
      // Another writer won the race; its entry has identical content.
      Err(_) if dir.exists() => Ok(()),
      Err(source) => Err(write_err(source)),
    }
  }

  fn describe(&self) -> String {
    self.root.display().to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn key(s: &str) -> CacheKey {
    CacheKey(format!("{:0>64}", s))
  }

  fn entry(contents: &[&str]) -> CachedEntry {
    CachedEntry {
      outputs: contents.iter().map(|c| CachedOutput::new(c.as_bytes().to_vec())).collect(),
    }
  }

  #[test]
  fn put_then_get_roundtrips_outputs_in_order() {
    let temp = TempDir::new().unwrap();
    let store = DiskStore::open(temp.path()).unwrap();
    let k = key("ab12");

    assert!(store.get(&k).unwrap().is_none());
    store.put(&k, entry(&["header", "source"])).unwrap();

    let got = store.get(&k).unwrap().unwrap();
    assert_eq!(got, entry(&["header", "source"]));
    assert!(store.entry_dir(&k).join("entry.json").exists());
    assert!(store.entry_dir(&k).starts_with(temp.path().join("00")));
  }

  #[test]
  fn second_put_is_noop() {
    let temp = TempDir::new().unwrap();
    let store = DiskStore::open(temp.path()).unwrap();
    let k = key("1");

    store.put(&k, entry(&["first"])).unwrap();
    store.put(&k, entry(&["second"])).unwrap();

    assert_eq!(store.get(&k).unwrap().unwrap(), entry(&["first"]));
  }

  #[test]
  fn no_staging_dirs_left_behind() {
    let temp = TempDir::new().unwrap();
    let store = DiskStore::open(temp.path()).unwrap();
    let k = key("2");
    store.put(&k, entry(&["x"])).unwrap();

    let names: Vec<String> = fs::read_dir(temp.path().join(k.shard()))
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
      .collect();
    assert_eq!(names, vec![k.0.clone()]);
  }

  #[test]
  fn tampered_blob_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let store = DiskStore::open(temp.path()).unwrap();
    let k = key("3");
    store.put(&k, entry(&["good"])).unwrap();

    fs::write(store.entry_dir(&k).join("0.blob"), "evil").unwrap();
    assert!(matches!(store.get(&k), Err(CacheError::Corrupt { .. })));
  }

  #[test]
  fn put_replaces_corrupt_entry() {
    let temp = TempDir::new().unwrap();
    let store = DiskStore::open(temp.path()).unwrap();
    let k = key("5");
    store.put(&k, entry(&["good"])).unwrap();
    fs::write(store.entry_dir(&k).join("0.blob"), "evil").unwrap();

    store.put(&k, entry(&["good"])).unwrap();
    assert_eq!(store.get(&k).unwrap().unwrap(), entry(&["good"]));

    let names: Vec<String> = fs::read_dir(temp.path().join(k.shard()))
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
      .collect();
    assert_eq!(names, vec![k.0.clone()], "discarded entry is cleaned up");
  }

  #[test]
  fn garbage_manifest_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let store = DiskStore::open(temp.path()).unwrap();
    let k = key("4");
    fs::create_dir_all(store.entry_dir(&k)).unwrap();
    fs::write(store.entry_dir(&k).join("entry.json"), "{not json").unwrap();

    assert!(matches!(store.get(&k), Err(CacheError::Corrupt { .. })));
  }
}
