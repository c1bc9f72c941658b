//! The `build` / `test` entry points.
//!
//! An `Engine` owns a validated target graph, the toolchain registry, an
//! artifact store and a runner. `build` plans the closure of the requested
//! labels and executes it; `test` additionally runs the built test binaries.

pub mod report;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::execute::{self, ActionRunner, ExecuteConfig, Invocation, ProcessRunner, RunError};
use crate::graph::{BuildGraph, GraphError, TargetKind};
use crate::plan::{ActionGraph, PlanConfig, PlanError, Planner};
use crate::store::ArtifactStore;
use crate::toolchain::ToolchainRegistry;

pub use report::{
  ActionState, ActionSummary, BuildReport, BuildStatus, TargetState, TargetSummary, TestOutcome, TestReport, TestResult,
};

#[derive(Debug, Error)]
pub enum EngineError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Plan(#[from] PlanError),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub plan: PlanConfig,
  pub execute: ExecuteConfig,
}

pub struct Engine {
  graph: BuildGraph,
  registry: ToolchainRegistry,
  store: Arc<dyn ArtifactStore>,
  runner: Arc<dyn ActionRunner>,
  config: EngineConfig,
  cancel: CancellationToken,
}

impl Engine {
  pub fn new(graph: BuildGraph, registry: ToolchainRegistry, store: Arc<dyn ArtifactStore>, config: EngineConfig) -> Self {
    Self {
      graph,
      registry,
      store,
      runner: Arc::new(ProcessRunner),
      config,
      cancel: CancellationToken::new(),
    }
  }

  /// Replace the subprocess runner.
  pub fn with_runner(mut self, runner: Arc<dyn ActionRunner>) -> Self {
    self.runner = runner;
    self
  }

  /// Token that cancels builds started by this engine.
  pub fn cancel_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  pub fn graph(&self) -> &BuildGraph {
    &self.graph
  }

  pub fn registry(&self) -> &ToolchainRegistry {
    &self.registry
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Plan the closure of `labels` without running anything.
  pub fn plan<S: AsRef<str>>(&self, labels: &[S]) -> Result<ActionGraph, EngineError> {
    let targets = self.graph.closure(labels)?;
    Ok(Planner::new(&self.registry, &self.config.plan).plan(&targets)?)
  }

  /// Build the requested targets and everything they depend on.
  ///
  /// An empty label list or `//...` builds every target.
  pub async fn build<S: AsRef<str>>(&self, labels: &[S]) -> BuildReport {
    let started = Instant::now();

    let plan = match self.plan(labels) {
      Ok(plan) => plan,
      Err(err) => {
        error!(error = %err, "build rejected");
        return BuildReport::config_error(vec![err.to_string()]);
      }
    };

    if !plan.is_complete() && !self.config.execute.keep_going {
      error!(
        failed = plan.failed.len(),
        blocked = plan.blocked.len(),
        "planning failed, not running any action"
      );
      let mut report = BuildReport::assemble(&plan, None);
      report.elapsed = started.elapsed();
      return report;
    }

    let execution = execute::execute(
      &plan,
      self.store.clone(),
      self.runner.clone(),
      &self.config.execute,
      &self.cancel,
    )
    .await;

    let mut report = BuildReport::assemble(&plan, Some(execution));
    report.elapsed = started.elapsed();
    info!(
      status = ?report.status,
      targets = report.targets.len(),
      cache_hits = report.cache_hits,
      cache_misses = report.cache_misses,
      "build finished"
    );
    report
  }

  /// Build the selected test targets, then run each built test binary.
  ///
  /// Labels select test targets the same way `build` selects targets;
  /// non-test targets in the selection are built only as dependencies.
  pub async fn test<S: AsRef<str>>(&self, labels: &[S]) -> TestReport {
    let tests: Vec<String> = match self.graph.closure(labels) {
      Ok(targets) => targets
        .into_iter()
        .filter(|t| t.kind == TargetKind::Test)
        .map(|t| t.name.clone())
        .collect(),
      Err(err) => {
        return TestReport {
          status: BuildStatus::ConfigError,
          results: Vec::new(),
          build: BuildReport::config_error(vec![err.to_string()]),
        };
      }
    };

    if tests.is_empty() {
      warn!("no test targets selected");
      let build = BuildReport::assemble(&ActionGraph::default(), Some(Default::default()));
      return TestReport {
        status: BuildStatus::Success,
        results: Vec::new(),
        build,
      };
    }

    let build = self.build(&tests).await;
    let results = self.run_tests(&tests, &build).await;

    let status = if build.status == BuildStatus::ConfigError {
      BuildStatus::ConfigError
    } else if results.iter().all(|r| r.outcome == TestOutcome::Passed) {
      BuildStatus::Success
    } else {
      BuildStatus::ActionFailed
    };

    info!(
      status = ?status,
      total = results.len(),
      passed = results.iter().filter(|r| r.outcome == TestOutcome::Passed).count(),
      "tests finished"
    );

    TestReport { status, results, build }
  }

  async fn run_tests(&self, tests: &[String], build: &BuildReport) -> Vec<TestResult> {
    let semaphore = Arc::new(Semaphore::new(self.config.execute.jobs.max(1)));
    let mut set = JoinSet::new();
    let mut results = Vec::with_capacity(tests.len());

    for (index, name) in tests.iter().enumerate() {
      let binary = match build.target(name) {
        Some(summary) if summary.state.is_success() => summary.artifacts.first().map(|a| a.path.clone()),
        _ => None,
      };

      let Some(binary) = binary else {
        let reason = match build.target(name).map(|t| &t.state) {
          Some(TargetState::Failed { error }) => error.clone(),
          Some(TargetState::Skipped { reason }) => reason.clone(),
          Some(TargetState::PlanFailed { error }) => error.clone(),
          Some(TargetState::Blocked { blocked_by }) => format!("dependency '{}' failed planning", blocked_by),
          _ => "no test binary was produced".to_string(),
        };
        results.push((
          index,
          TestResult {
            target: name.clone(),
            outcome: TestOutcome::NotBuilt { reason },
            duration: Default::default(),
          },
        ));
        continue;
      };

      let invocation = Invocation {
        label: format!("test:{}", name),
        program: binary.clone(),
        args: Vec::new(),
        working_dir: self.config.plan.root.clone(),
        out_dir: binary.parent().map(PathBuf::from).unwrap_or_default(),
        search_path: Vec::new(),
      };
      let runner = self.runner.clone();
      let cancel = self.cancel.clone();
      let timeout = self.config.execute.action_timeout;
      let semaphore = semaphore.clone();
      let target = name.clone();

      set.spawn(async move {
        let _permit = semaphore.acquire_owned().await;
        let started = Instant::now();
        let outcome = match runner.run(&invocation, &cancel, timeout).await {
          Ok(_) => TestOutcome::Passed,
          Err(RunError::Exit { code, stderr }) => TestOutcome::Failed { code, stderr },
          Err(RunError::TimedOut(_)) => TestOutcome::TimedOut,
          Err(RunError::Cancelled) => TestOutcome::Cancelled,
          Err(err) => TestOutcome::Failed {
            code: None,
            stderr: err.to_string(),
          },
        };
        if outcome != TestOutcome::Passed {
          warn!(test = %target, outcome = ?outcome, "test did not pass");
        }
        (
          index,
          TestResult {
            target,
            outcome,
            duration: started.elapsed(),
          },
        )
      });
    }

    while let Some(joined) = set.join_next().await {
      match joined {
        Ok(result) => results.push(result),
        Err(err) => error!(error = %err, "test task panicked"),
      }
    }

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
  }
}
