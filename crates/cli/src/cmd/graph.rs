//! Implementation of the `kiln graph` command.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use kiln_lib::graph::TargetKind;
use kiln_lib::toolchain::Language;
use kiln_lib::workspace::Overrides;

use super::load_workspace;
use crate::output::{OutputFormat, print_json, print_stat, symbols};

#[derive(Serialize)]
struct TargetNode<'a> {
  name: &'a str,
  kind: TargetKind,
  language: &'a Language,
  deps: &'a [String],
}

/// Print the selected targets in build order.
pub fn cmd_graph(workspace: Option<&Path>, targets: &[String], dot: bool, output: OutputFormat) -> Result<u8> {
  let workspace = load_workspace(workspace, Overrides::default())?;
  let graph = workspace.graph().context("Invalid target graph")?;
  let selected = graph.closure(targets).context("Invalid target selection")?;

  if dot {
    print!("{}", graph.to_dot());
    return Ok(0);
  }

  if output.is_json() {
    let nodes: Vec<TargetNode> = selected
      .iter()
      .map(|t| TargetNode {
        name: &t.name,
        kind: t.kind,
        language: &t.language,
        deps: &t.deps,
      })
      .collect();
    print_json(&nodes)?;
    return Ok(0);
  }

  for target in &selected {
    println!("{} [{}, {}]", target.name, target.kind, target.language);
    for dep in &target.deps {
      println!("  {} {}", symbols::ARROW, dep);
    }
  }
  println!();
  print_stat("Targets", &selected.len().to_string());

  Ok(0)
}
