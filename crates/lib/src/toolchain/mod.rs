//! Toolchain registry.
//!
//! Maps a (language, target triple) pair to exactly one registered toolchain.
//! There is no fallback to compilers found on `PATH`: an unregistered pair is
//! an error, which keeps cross and hermetic builds from picking up ambient
//! binaries.

mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

pub use types::{CommandKind, Language, Toolchain, ToolchainCommands, ToolchainError};

/// Deterministic (language, triple) → toolchain mapping.
///
/// The registry is passed explicitly to the planner and executor rather than
/// living in a global, so tests can substitute fake toolchains.
#[derive(Debug, Clone, Default)]
pub struct ToolchainRegistry {
  entries: BTreeMap<(Language, String), Arc<Toolchain>>,
}

impl ToolchainRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a toolchain under its own language and triple.
  ///
  /// The (language, triple) key is read from the toolchain itself, so an
  /// entry can never be filed under a pair it was not built for.
  ///
  /// # Errors
  ///
  /// Returns `Duplicate` if the pair is already registered; entries are never replaced.
  pub fn register(&mut self, toolchain: Toolchain) -> Result<(), ToolchainError> {
    let key = (toolchain.language.clone(), toolchain.triple.clone());
    if self.entries.contains_key(&key) {
      return Err(ToolchainError::Duplicate {
        language: key.0,
        triple: key.1,
      });
    }

    debug!(
      language = %toolchain.language,
      triple = %toolchain.triple,
      compiler = %toolchain.compiler.display(),
      "registered toolchain"
    );
    self.entries.insert(key, Arc::new(toolchain));
    Ok(())
  }

  /// Resolve the toolchain for a language on a target triple.
  pub fn resolve(&self, language: &Language, triple: &str) -> Result<Arc<Toolchain>, ToolchainError> {
    self
      .entries
      .get(&(language.clone(), triple.to_string()))
      .cloned()
      .ok_or_else(|| ToolchainError::NotFound {
        language: language.clone(),
        triple: triple.to_string(),
      })
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Registered toolchains, sorted by (language, triple).
  pub fn iter(&self) -> impl Iterator<Item = &Arc<Toolchain>> {
    self.entries.values()
  }
}
