mod build;
mod graph;
mod info;
mod plan;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::warn;

use kiln_lib::Engine;
use kiln_lib::consts::WORKSPACE_FILE;
use kiln_lib::workspace::{Overrides, Workspace};

pub use build::cmd_build;
pub use graph::cmd_graph;
pub use info::cmd_info;
pub use plan::cmd_plan;
pub use test::cmd_test;

/// Target selection and `[build]` overrides shared by build, test and plan.
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
  /// Target labels (`name` or `//name`; default: all)
  pub targets: Vec<String>,

  /// Maximum number of actions run at once
  #[arg(short, long)]
  pub jobs: Option<usize>,

  /// Keep building independent targets after a failure
  #[arg(short, long)]
  pub keep_going: bool,

  /// Output directory
  #[arg(long)]
  pub out_dir: Option<PathBuf>,

  /// Artifact cache directory
  #[arg(long)]
  pub cache_dir: Option<PathBuf>,

  /// Default target triple
  #[arg(long)]
  pub triple: Option<String>,

  /// Per-action timeout (e.g. "90s", "10m")
  #[arg(long, value_parser = humantime::parse_duration)]
  pub timeout: Option<Duration>,
}

impl BuildArgs {
  fn overrides(&self) -> Overrides {
    Overrides {
      jobs: self.jobs,
      keep_going: self.keep_going,
      out_dir: self.out_dir.clone(),
      cache_dir: self.cache_dir.clone(),
      default_triple: self.triple.clone(),
      action_timeout: self.timeout,
    }
  }
}

/// Load the workspace named by `-C`, or the nearest one above the current directory.
pub fn load_workspace(path: Option<&Path>, overrides: Overrides) -> Result<Workspace> {
  let mut workspace = match path {
    Some(path) if path.is_dir() => Workspace::load(&path.join(WORKSPACE_FILE)),
    Some(path) => Workspace::load(path),
    None => {
      let cwd = std::env::current_dir().context("Failed to read current directory")?;
      Workspace::discover(&cwd)
    }
  }
  .context("Failed to load workspace")?;

  workspace.apply(overrides);
  Ok(workspace)
}

/// Run `work` on a fresh runtime, cancelling the engine on Ctrl-C.
fn block_on_engine<F: Future>(engine: &Engine, work: F) -> Result<F::Output> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let cancel = engine.cancel_token();

  Ok(rt.block_on(async move {
    let interrupt = tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling running actions");
        cancel.cancel();
      }
    });
    let output = work.await;
    interrupt.abort();
    output
  }))
}

/// The command line as typed, recorded in the output directory lock.
fn command_line() -> String {
  std::env::args().collect::<Vec<_>>().join(" ")
}
