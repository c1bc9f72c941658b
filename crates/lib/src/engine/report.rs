//! Build and test reports returned to callers.
//!
//! Only artifact paths, content hashes, outcomes and status codes cross this
//! boundary. Everything here serializes to JSON for `--output json`.

use std::time::Duration;

use serde::Serialize;

use crate::execute::{ActionOutcome, ExecutionReport};
use crate::plan::{ActionGraph, ActionId};
use crate::store::Artifact;

/// Overall result of a `build` or `test` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
  Success,
  /// One or more actions (or tests) failed.
  ActionFailed,
  /// Configuration or validation error found before any action ran.
  ConfigError,
}

impl BuildStatus {
  /// Process exit code: 0, 1 or 2.
  pub fn code(self) -> i32 {
    match self {
      BuildStatus::Success => 0,
      BuildStatus::ActionFailed => 1,
      BuildStatus::ConfigError => 2,
    }
  }

  pub fn is_success(self) -> bool {
    self == BuildStatus::Success
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
  Built,
  Cached,
  Failed,
  Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionSummary {
  pub id: ActionId,
  pub label: String,
  pub target: String,
  pub state: ActionState,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub detail: Option<String>,
  pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TargetState {
  /// At least one action ran; none failed.
  Built,
  /// Every action was served from the cache.
  UpToDate,
  Failed { error: String },
  Skipped { reason: String },
  /// Planning failed for this target (missing toolchain, bad options).
  PlanFailed { error: String },
  /// A dependency failed planning.
  Blocked { blocked_by: String },
}

impl TargetState {
  pub fn is_success(&self) -> bool {
    matches!(self, TargetState::Built | TargetState::UpToDate)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
  pub name: String,
  #[serde(flatten)]
  pub state: TargetState,
  pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
  pub status: BuildStatus,
  pub targets: Vec<TargetSummary>,
  pub actions: Vec<ActionSummary>,
  /// Configuration and planning errors.
  pub errors: Vec<String>,
  pub cache_hits: usize,
  pub cache_misses: usize,
  pub cache_disabled: bool,
  pub cancelled: bool,
  #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
  pub elapsed: Duration,
}

impl BuildReport {
  /// Report for a build rejected before planning finished.
  pub fn config_error(errors: Vec<String>) -> Self {
    Self {
      status: BuildStatus::ConfigError,
      targets: Vec::new(),
      actions: Vec::new(),
      errors,
      cache_hits: 0,
      cache_misses: 0,
      cache_disabled: false,
      cancelled: false,
      elapsed: Duration::ZERO,
    }
  }

  /// Combine a plan with its (possibly absent) execution.
  pub(crate) fn assemble(plan: &ActionGraph, execution: Option<ExecutionReport>) -> Self {
    let mut errors: Vec<String> = plan.failed.iter().map(ToString::to_string).collect();
    errors.extend(
      plan
        .blocked
        .iter()
        .map(|b| format!("target '{}' blocked by failed dependency '{}'", b.target, b.blocked_by)),
    );

    let actions: Vec<ActionSummary> = match &execution {
      Some(report) => plan
        .actions
        .iter()
        .zip(&report.outcomes)
        .map(|(action, outcome)| ActionSummary {
          id: action.id,
          label: action.label.clone(),
          target: action.target.clone(),
          state: match outcome {
            ActionOutcome::Built(_) => ActionState::Built,
            ActionOutcome::Cached(_) => ActionState::Cached,
            ActionOutcome::Failed(_) => ActionState::Failed,
            ActionOutcome::Skipped(_) => ActionState::Skipped,
          },
          detail: match outcome {
            ActionOutcome::Failed(err) => Some(err.to_string()),
            ActionOutcome::Skipped(reason) => Some(reason.to_string()),
            ActionOutcome::Built(_) | ActionOutcome::Cached(_) => None,
          },
          artifacts: outcome.artifacts().to_vec(),
        })
        .collect(),
      None => Vec::new(),
    };

    let mut targets: Vec<TargetSummary> = plan
      .targets
      .iter()
      .map(|(name, ids)| summarize_target(name, ids, &actions, execution.is_some()))
      .collect();
    targets.extend(plan.failed.iter().map(|err| TargetSummary {
      name: err.target().to_string(),
      state: TargetState::PlanFailed { error: err.to_string() },
      artifacts: Vec::new(),
    }));
    targets.extend(plan.blocked.iter().map(|b| TargetSummary {
      name: b.target.clone(),
      state: TargetState::Blocked {
        blocked_by: b.blocked_by.clone(),
      },
      artifacts: Vec::new(),
    }));

    let status = if !errors.is_empty() {
      BuildStatus::ConfigError
    } else if execution.as_ref().is_some_and(|r| r.is_success()) {
      BuildStatus::Success
    } else {
      BuildStatus::ActionFailed
    };

    let (cache_hits, cache_misses, cache_disabled, cancelled, elapsed) = match &execution {
      Some(r) => (r.cache_hits, r.cache_misses, r.cache_disabled, r.cancelled, r.elapsed),
      None => (0, 0, false, false, Duration::ZERO),
    };

    Self {
      status,
      targets,
      actions,
      errors,
      cache_hits,
      cache_misses,
      cache_disabled,
      cancelled,
      elapsed,
    }
  }

  pub fn target(&self, name: &str) -> Option<&TargetSummary> {
    self.targets.iter().find(|t| t.name == name)
  }

  pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
    self.targets.iter().flat_map(|t| t.artifacts.iter())
  }
}

fn summarize_target(name: &str, ids: &[ActionId], actions: &[ActionSummary], executed: bool) -> TargetSummary {
  let mine: Vec<&ActionSummary> = ids.iter().filter_map(|id| actions.get(id.0)).collect();
  let artifacts = mine.iter().flat_map(|a| a.artifacts.iter().cloned()).collect();

  let detail = |state: ActionState| {
    mine
      .iter()
      .find(|a| a.state == state)
      .and_then(|a| a.detail.clone())
      .unwrap_or_default()
  };

  let state = if !executed {
    TargetState::Skipped {
      reason: "not executed".to_string(),
    }
  } else if mine.iter().any(|a| a.state == ActionState::Failed) {
    TargetState::Failed {
      error: detail(ActionState::Failed),
    }
  } else if mine.iter().any(|a| a.state == ActionState::Skipped) {
    TargetState::Skipped {
      reason: detail(ActionState::Skipped),
    }
  } else if mine.iter().all(|a| a.state == ActionState::Cached) {
    TargetState::UpToDate
  } else {
    TargetState::Built
  };

  TargetSummary {
    name: name.to_string(),
    state,
    artifacts,
  }
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_u64(duration.as_millis() as u64)
}

/// Result of running one test binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TestOutcome {
  Passed,
  Failed { code: Option<i32>, stderr: String },
  TimedOut,
  Cancelled,
  /// The test binary (or one of its dependencies) did not build.
  NotBuilt { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
  pub target: String,
  #[serde(flatten)]
  pub outcome: TestOutcome,
  #[serde(rename = "duration_ms", serialize_with = "as_millis")]
  pub duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
  pub status: BuildStatus,
  pub results: Vec<TestResult>,
  pub build: BuildReport,
}

impl TestReport {
  pub fn passed(&self) -> usize {
    self
      .results
      .iter()
      .filter(|r| r.outcome == TestOutcome::Passed)
      .count()
  }

  pub fn result(&self, target: &str) -> Option<&TestResult> {
    self.results.iter().find(|r| r.target == target)
  }
}
