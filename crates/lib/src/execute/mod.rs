//! Action execution.
//!
//! This module runs a planned action graph. It handles:
//! - Dependency ordering: an action is dispatched only after every producer
//!   of its inputs succeeded
//! - Bounded concurrency: at most `jobs` actions run at once
//! - Output locking: two actions declaring the same output never overlap
//! - Failure propagation: dependents of a failed action are skipped
//! - Fail-fast (default) or keep-going scheduling after a failure; fail-fast
//!   still finishes the other fanout actions of a failed schema target
//! - Cancellation through a `CancellationToken`

pub mod action;
pub mod runner;
pub mod types;

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::plan::{ActionGraph, ActionId};
use crate::store::ArtifactStore;

use action::{ActionContext, run_action};

pub use action::cache_key;
pub use runner::{ActionRunner, Invocation, ProcessRunner, RunError, RunOutput};
pub use types::{ActionError, ActionOutcome, ExecuteConfig, ExecutionReport, SkipReason, default_jobs};

/// Execute every action of a graph.
///
/// Actions are dispatched in `ActionId` order among those that are ready, so a
/// run with `jobs = 1` is deterministic.
pub async fn execute(
  graph: &ActionGraph,
  store: Arc<dyn ArtifactStore>,
  runner: Arc<dyn ActionRunner>,
  config: &ExecuteConfig,
  cancel: &CancellationToken,
) -> ExecutionReport {
  let started = Instant::now();
  let total = graph.len();
  let jobs = config.jobs.max(1);
  info!(actions = total, jobs, keep_going = config.keep_going, "starting execution");

  let dependents = graph.dependents();
  let mut pending: Vec<usize> = graph.actions.iter().map(|a| a.deps.len()).collect();
  let mut outcomes: Vec<Option<ActionOutcome>> = (0..total).map(|_| None).collect();
  let mut ready: BTreeSet<ActionId> = graph
    .actions
    .iter()
    .filter(|a| a.deps.is_empty())
    .map(|a| a.id)
    .collect();

  let cache_enabled = Arc::new(AtomicBool::new(true));
  let ctx = Arc::new(ActionContext {
    store,
    runner,
    cache_enabled: cache_enabled.clone(),
    cancel: cancel.clone(),
    timeout: config.action_timeout,
  });

  let mut running: JoinSet<(ActionId, ActionOutcome)> = JoinSet::new();
  let mut in_flight: HashSet<ActionId> = HashSet::new();
  let mut locked_outputs: HashSet<PathBuf> = HashSet::new();
  let mut aborted = false;
  let mut failed_targets: HashSet<&str> = HashSet::new();
  let mut cancelled = false;

  loop {
    if !cancelled && cancel.is_cancelled() {
      warn!("cancellation requested, no new actions will start");
      cancelled = true;
    }

    if !cancelled {
      let mut blocked = Vec::new();
      while running.len() < jobs {
        let Some(id) = ready.pop_first() else { break };
        let action = &graph.actions[id.0];

        // After a fail-fast stop only fanout siblings of a failed action still start.
        if aborted && !failed_targets.contains(action.target.as_str()) {
          blocked.push(id);
          continue;
        }

        if action.outputs.iter().any(|p| locked_outputs.contains(p)) {
          debug!(action = %action.label, "output locked by a running action, deferring");
          blocked.push(id);
          continue;
        }

        locked_outputs.extend(action.outputs.iter().cloned());
        in_flight.insert(id);
        debug!(action = %action.label, "dispatching action");

        let action = action.clone();
        let ctx = ctx.clone();
        running.spawn(async move {
          let outcome = run_action(&action, &ctx).await;
          (action.id, outcome)
        });
      }
      ready.extend(blocked);
    }

    if running.is_empty() {
      break;
    }

    let joined = tokio::select! {
      joined = running.join_next() => joined,
      _ = cancel.cancelled(), if !cancelled => continue,
    };

    let (id, outcome) = match joined {
      Some(Ok(done)) => done,
      Some(Err(err)) => {
        error!(error = %err, "action task panicked");
        aborted = true;
        continue;
      }
      None => break,
    };

    in_flight.remove(&id);
    let action = &graph.actions[id.0];
    for path in &action.outputs {
      locked_outputs.remove(path);
    }

    if outcome.is_success() {
      for dependent in &dependents[id.0] {
        pending[dependent.0] -= 1;
        if pending[dependent.0] == 0 && outcomes[dependent.0].is_none() {
          ready.insert(*dependent);
        }
      }
    } else {
      skip_dependents(id, &action.label, &dependents, &mut outcomes, &mut ready);
      if !config.keep_going {
        if !aborted {
          warn!(action = %action.label, "stopping after failure, in-flight actions will finish");
          aborted = true;
        }
        failed_targets.insert(action.target.as_str());
      }
    }

    outcomes[id.0] = Some(outcome);
  }

  for id in in_flight {
    outcomes[id.0] = Some(ActionOutcome::Failed(ActionError::Internal {
      action: graph.actions[id.0].label.clone(),
    }));
  }

  let leftover = if cancelled {
    SkipReason::Cancelled
  } else {
    SkipReason::BuildAborted
  };
  let outcomes: Vec<ActionOutcome> = outcomes
    .into_iter()
    .map(|o| o.unwrap_or_else(|| ActionOutcome::Skipped(leftover.clone())))
    .collect();

  let cache_hits = outcomes.iter().filter(|o| matches!(o, ActionOutcome::Cached(_))).count();
  let cache_misses = outcomes.iter().filter(|o| matches!(o, ActionOutcome::Built(_))).count();

  let report = ExecutionReport {
    outcomes,
    cache_hits,
    cache_misses,
    cache_disabled: !cache_enabled.load(Ordering::SeqCst),
    cancelled,
    elapsed: started.elapsed(),
  };

  info!(
    built = report.cache_misses,
    cached = report.cache_hits,
    failed = report.failures().count(),
    skipped = report.skipped(),
    elapsed_ms = report.elapsed.as_millis() as u64,
    "execution complete"
  );

  report
}

/// Mark every transitive dependent of a failed action as skipped.
fn skip_dependents(
  failed: ActionId,
  label: &str,
  dependents: &[Vec<ActionId>],
  outcomes: &mut [Option<ActionOutcome>],
  ready: &mut BTreeSet<ActionId>,
) {
  let mut stack: Vec<ActionId> = dependents[failed.0].clone();
  while let Some(id) = stack.pop() {
    if outcomes[id.0].is_some() {
      continue;
    }
    ready.remove(&id);
    debug!(action = %id, failed_dependency = %label, "skipping action");
    outcomes[id.0] = Some(ActionOutcome::Skipped(SkipReason::DependencyFailed(label.to_string())));
    stack.extend(dependents[id.0].iter().copied());
  }
}
