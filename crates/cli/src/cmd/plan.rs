//! Implementation of the `kiln plan` command.
//!
//! Expands the selected targets into actions without running anything.

use std::path::Path;

use anyhow::{Context, Result};

use kiln_lib::plan::ActionInput;

use super::{BuildArgs, load_workspace};
use crate::output::{OutputFormat, print_error, print_info, print_json, print_stat, print_warning, symbols};

pub fn cmd_plan(workspace: Option<&Path>, args: &BuildArgs, output: OutputFormat) -> Result<u8> {
  let workspace = load_workspace(workspace, args.overrides())?;
  let engine = workspace.engine().context("Invalid workspace")?;
  let plan = engine.plan(&args.targets).context("Planning failed")?;

  let failed: Vec<String> = plan.failed.iter().map(ToString::to_string).collect();

  if output.is_json() {
    let json = serde_json::json!({
      "actions": plan.actions,
      "failed": failed,
      "blocked": plan.blocked,
    });
    print_json(&json)?;
  } else {
    for action in &plan.actions {
      println!(
        "{} {} ({}, {})",
        symbols::PLUS,
        action.label,
        action.kind,
        action.toolchain.compiler.display()
      );
      let sources = action
        .inputs
        .iter()
        .filter(|i| matches!(i, ActionInput::Source { .. }))
        .count();
      let deps = action.deps.len();
      println!("    inputs: {} source(s), {} upstream action(s)", sources, deps);
      for out in &action.outputs {
        println!("    {} {}", symbols::ARROW, out.display());
      }
    }

    for error in &failed {
      print_error(error);
    }
    for blocked in &plan.blocked {
      print_warning(&format!(
        "{} not planned: dependency '{}' failed planning",
        blocked.target, blocked.blocked_by
      ));
    }

    println!();
    print_stat("Targets", &plan.targets.len().to_string());
    print_stat("Actions", &plan.actions.len().to_string());
    if plan.is_complete() {
      print_info("Nothing was run");
    }
  }

  Ok(if plan.is_complete() { 0 } else { 2 })
}
