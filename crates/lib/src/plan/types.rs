use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::plan::template::TemplateError;
use crate::toolchain::{CommandKind, Language, Toolchain, ToolchainError};

/// Index of an action in its `ActionGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ActionId(pub usize);

impl std::fmt::Display for ActionId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// One declared input of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionInput {
  /// A source file of the producing target.
  Source { path: PathBuf },
  /// An output of an upstream action.
  Artifact { path: PathBuf, producer: ActionId },
  /// An auxiliary library of the toolchain.
  AuxLibrary { path: PathBuf },
}

impl ActionInput {
  pub fn path(&self) -> &Path {
    match self {
      ActionInput::Source { path } | ActionInput::Artifact { path, .. } | ActionInput::AuxLibrary { path } => path,
    }
  }
}

/// Program plus unrendered argument template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandTemplate {
  pub program: PathBuf,
  pub args: Vec<String>,
}

/// A single toolchain invocation with explicit inputs and outputs.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
  pub id: ActionId,
  /// Display name: the target name, or `target#lang` for fanout actions.
  pub label: String,
  pub target: String,
  pub kind: CommandKind,
  /// Generated language of a fanout action.
  pub language: Option<Language>,
  pub command: CommandTemplate,
  /// Scalar template variables (`name`, `opt`, `lang`, ...).
  pub vars: BTreeMap<String, String>,
  pub inputs: Vec<ActionInput>,
  pub outputs: Vec<PathBuf>,
  /// Producers of artifact inputs, deduplicated.
  pub deps: Vec<ActionId>,
  #[serde(skip)]
  pub toolchain: Arc<Toolchain>,
}

/// Errors raised while expanding a target into actions.
///
/// All but `UnresolvedDependency` fail only the offending target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
  #[error("target '{target}': {source}")]
  MissingToolchain {
    target: String,
    #[source]
    source: ToolchainError,
  },

  /// Internal invariant violation: graph validation guarantees every dependency exists.
  #[error("target '{target}': dependency '{dependency}' was not planned before it")]
  UnresolvedDependency { target: String, dependency: String },

  #[error("target '{target}': invalid output spec: {reason}")]
  InvalidOutputSpec { target: String, reason: String },

  #[error("target '{target}': dependency '{dependency}' does not generate '{language}'")]
  LanguageNotGenerated {
    target: String,
    dependency: String,
    language: Language,
  },

  #[error("target '{target}': bad {kind} command template: {source}")]
  Template {
    target: String,
    kind: CommandKind,
    #[source]
    source: TemplateError,
  },
}

impl PlanError {
  pub fn target(&self) -> &str {
    match self {
      PlanError::MissingToolchain { target, .. }
      | PlanError::UnresolvedDependency { target, .. }
      | PlanError::InvalidOutputSpec { target, .. }
      | PlanError::LanguageNotGenerated { target, .. }
      | PlanError::Template { target, .. } => target,
    }
  }

  pub fn is_toolchain_error(&self) -> bool {
    matches!(self, PlanError::MissingToolchain { .. })
  }
}

/// A target that was not planned because one of its dependencies failed planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTarget {
  pub target: String,
  pub blocked_by: String,
}

/// The planned action DAG.
///
/// `actions` is in topological order: every action's dependencies have a
/// smaller `ActionId`.
#[derive(Debug, Default)]
pub struct ActionGraph {
  pub actions: Vec<Action>,
  /// Planned targets in topological order, with their actions.
  pub targets: Vec<(String, Vec<ActionId>)>,
  pub failed: Vec<PlanError>,
  pub blocked: Vec<BlockedTarget>,
}

impl ActionGraph {
  pub fn len(&self) -> usize {
    self.actions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.actions.is_empty()
  }

  pub fn get(&self, id: ActionId) -> Option<&Action> {
    self.actions.get(id.0)
  }

  pub fn actions_for(&self, target: &str) -> &[ActionId] {
    self
      .targets
      .iter()
      .find(|(name, _)| name == target)
      .map(|(_, ids)| ids.as_slice())
      .unwrap_or(&[])
  }

  /// Whether every selected target was planned.
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty() && self.blocked.is_empty()
  }

  /// Direct dependents of each action, indexed by `ActionId`.
  pub fn dependents(&self) -> Vec<Vec<ActionId>> {
    let mut dependents = vec![Vec::new(); self.actions.len()];
    for action in &self.actions {
      for dep in &action.deps {
        dependents[dep.0].push(action.id);
      }
    }
    dependents
  }
}
