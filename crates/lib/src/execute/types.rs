//! Types for action execution.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::plan::ActionId;
use crate::plan::template::TemplateError;
use crate::store::Artifact;

/// Why a single action failed. Every variant names the action.
#[derive(Debug, Error)]
pub enum ActionError {
  #[error("{action}: missing input {}", path.display())]
  MissingInput { action: String, path: PathBuf },

  #[error("{action}: cannot render command: {source}")]
  Template {
    action: String,
    #[source]
    source: TemplateError,
  },

  #[error("{action}: failed to start {}: {reason}", program.display())]
  Spawn {
    action: String,
    program: PathBuf,
    reason: String,
  },

  #[error("{action}: command failed with exit code {code:?}")]
  CommandFailed {
    action: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("{action}: declared output {} was not produced", path.display())]
  MissingOutput { action: String, path: PathBuf },

  #[error("{action}: timed out after {}s", after.as_secs_f64())]
  TimedOut { action: String, after: Duration },

  #[error("{action}: cancelled")]
  Cancelled { action: String },

  #[error("{action}: io error on {}: {source}", path.display())]
  Io {
    action: String,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{action}: worker task ended unexpectedly")]
  Internal { action: String },
}

impl ActionError {
  pub fn action(&self) -> &str {
    match self {
      ActionError::MissingInput { action, .. }
      | ActionError::Template { action, .. }
      | ActionError::Spawn { action, .. }
      | ActionError::CommandFailed { action, .. }
      | ActionError::MissingOutput { action, .. }
      | ActionError::TimedOut { action, .. }
      | ActionError::Cancelled { action }
      | ActionError::Io { action, .. }
      | ActionError::Internal { action } => action,
    }
  }
}

/// Why an action never ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
  /// A transitive dependency failed; holds its label.
  DependencyFailed(String),
  /// Fail-fast stopped scheduling after another failure.
  BuildAborted,
  /// The build was cancelled before the action started.
  Cancelled,
}

impl std::fmt::Display for SkipReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SkipReason::DependencyFailed(label) => write!(f, "dependency {} failed", label),
      SkipReason::BuildAborted => write!(f, "build aborted after an earlier failure"),
      SkipReason::Cancelled => write!(f, "build cancelled"),
    }
  }
}

/// Final state of one action.
#[derive(Debug)]
pub enum ActionOutcome {
  /// Ran the toolchain and registered new artifacts.
  Built(Vec<Artifact>),
  /// Reused cached outputs without invoking the toolchain.
  Cached(Vec<Artifact>),
  Failed(ActionError),
  Skipped(SkipReason),
}

impl ActionOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, ActionOutcome::Built(_) | ActionOutcome::Cached(_))
  }

  pub fn artifacts(&self) -> &[Artifact] {
    match self {
      ActionOutcome::Built(artifacts) | ActionOutcome::Cached(artifacts) => artifacts,
      ActionOutcome::Failed(_) | ActionOutcome::Skipped(_) => &[],
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ActionOutcome::Built(_) => "built",
      ActionOutcome::Cached(_) => "cached",
      ActionOutcome::Failed(_) => "failed",
      ActionOutcome::Skipped(_) => "skipped",
    }
  }
}

/// Result of executing an action graph.
#[derive(Debug, Default)]
pub struct ExecutionReport {
  /// Indexed by `ActionId`.
  pub outcomes: Vec<ActionOutcome>,
  pub cache_hits: usize,
  pub cache_misses: usize,
  /// The store failed and caching was turned off part way through.
  pub cache_disabled: bool,
  pub cancelled: bool,
  pub elapsed: Duration,
}

impl ExecutionReport {
  pub fn is_success(&self) -> bool {
    self.outcomes.iter().all(ActionOutcome::is_success)
  }

  pub fn failures(&self) -> impl Iterator<Item = (ActionId, &ActionError)> {
    self.outcomes.iter().enumerate().filter_map(|(i, o)| match o {
      ActionOutcome::Failed(err) => Some((ActionId(i), err)),
      _ => None,
    })
  }

  pub fn skipped(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|o| matches!(o, ActionOutcome::Skipped(_)))
      .count()
  }

  pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
    self.outcomes.iter().flat_map(|o| o.artifacts().iter())
  }
}

/// Configuration for action execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of actions running at once.
  pub jobs: usize,
  /// Keep scheduling independent actions after a failure.
  pub keep_going: bool,
  /// Per-action deadline.
  pub action_timeout: Option<Duration>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      jobs: default_jobs(),
      keep_going: false,
      action_timeout: None,
    }
  }
}

/// Available parallelism, falling back to 4.
pub fn default_jobs() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
