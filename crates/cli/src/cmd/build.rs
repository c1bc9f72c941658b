//! Implementation of the `kiln build` command.

use std::path::Path;

use anyhow::{Context, Result};

use kiln_lib::build_lock::BuildLock;
use kiln_lib::engine::{BuildReport, TargetState};

use super::{BuildArgs, block_on_engine, command_line, load_workspace};
use crate::output::{
  OutputFormat, format_duration, print_error, print_json, print_stat, print_success, print_warning, symbols,
  truncate_hash,
};

/// Build the selected targets and return the process exit code.
pub fn cmd_build(workspace: Option<&Path>, args: &BuildArgs, output: OutputFormat, verbose: bool) -> Result<u8> {
  let workspace = load_workspace(workspace, args.overrides())?;

  let report = match workspace.engine() {
    Ok(engine) => {
      let _lock = BuildLock::acquire(&workspace.out_dir(), &command_line())
        .context("Failed to lock output directory")?;
      block_on_engine(&engine, engine.build(&args.targets))?
    }
    Err(err) => BuildReport::config_error(vec![err.to_string()]),
  };

  if output.is_json() {
    print_json(&report)?;
  } else {
    print_build_report(&report, verbose);
    println!();
    if report.status.is_success() {
      print_success("Build succeeded");
    } else {
      print_error("Build failed");
    }
  }

  Ok(report.status.code() as u8)
}

/// Per-target lines plus a summary block.
pub(crate) fn print_build_report(report: &BuildReport, verbose: bool) {
  if report.targets.is_empty() {
    for error in &report.errors {
      print_error(error);
    }
  }

  for target in &report.targets {
    match &target.state {
      TargetState::Built => print_success(&format!("{} built", target.name)),
      TargetState::UpToDate => print_success(&format!("{} up to date", target.name)),
      TargetState::Failed { error } => print_error(&format!("{} failed: {}", target.name, error)),
      TargetState::Skipped { reason } => print_warning(&format!("{} skipped: {}", target.name, reason)),
      TargetState::PlanFailed { error } => print_error(error),
      TargetState::Blocked { blocked_by } => print_warning(&format!(
        "{} not planned: dependency '{}' failed planning",
        target.name, blocked_by
      )),
    }

    if verbose {
      for artifact in &target.artifacts {
        println!(
          "    {} {} ({})",
          symbols::ARROW,
          artifact.path.display(),
          truncate_hash(&artifact.hash.0)
        );
      }
    }
  }

  println!();
  print_stat("Targets", &report.targets.len().to_string());
  print_stat("Actions", &report.actions.len().to_string());
  print_stat(
    "Cache",
    &format!("{} hit(s), {} miss(es)", report.cache_hits, report.cache_misses),
  );
  print_stat("Duration", &format_duration(report.elapsed));

  if report.cache_disabled {
    print_warning("Artifact cache unavailable; caching was disabled for this build");
  }
  if report.cancelled {
    print_warning("Build cancelled");
  }
}
