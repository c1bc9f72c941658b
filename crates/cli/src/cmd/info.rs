use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use kiln_lib::execute::default_jobs;
use kiln_lib::platform::{host_triple, paths};
use kiln_lib::workspace::Overrides;

use super::load_workspace;
use crate::output::{OutputFormat, print_info, print_json, print_stat};

#[derive(Serialize)]
struct Info {
  version: &'static str,
  host_triple: String,
  default_jobs: usize,
  cache_dir: String,
  workspace: Option<WorkspaceInfo>,
}

#[derive(Serialize)]
struct WorkspaceInfo {
  root: String,
  out_dir: String,
  artifacts_dir: String,
  default_triple: String,
  targets: usize,
  toolchains: Vec<String>,
}

pub fn cmd_info(workspace: Option<&Path>, output: OutputFormat) -> Result<u8> {
  // A missing workspace is not an error here.
  let workspace = load_workspace(workspace, Overrides::default()).ok().map(|ws| WorkspaceInfo {
    root: ws.root.display().to_string(),
    out_dir: ws.out_dir().display().to_string(),
    artifacts_dir: ws.artifacts_dir().display().to_string(),
    default_triple: ws.default_triple(),
    targets: ws.targets.len(),
    toolchains: ws
      .toolchains
      .iter()
      .map(|t| format!("{} on {} ({})", t.language, t.triple, t.compiler.display()))
      .collect(),
  });

  let info = Info {
    version: env!("CARGO_PKG_VERSION"),
    host_triple: host_triple(),
    default_jobs: default_jobs(),
    cache_dir: paths::cache_dir().display().to_string(),
    workspace,
  };

  if output.is_json() {
    print_json(&info)?;
    return Ok(0);
  }

  println!("kiln {}", info.version);
  print_stat("Host", &info.host_triple);
  print_stat("Jobs", &info.default_jobs.to_string());
  print_stat("Cache", &info.cache_dir);

  println!();
  match &info.workspace {
    Some(ws) => {
      println!("Workspace:");
      print_stat("Root", &ws.root);
      print_stat("Output", &ws.out_dir);
      print_stat("Artifacts", &ws.artifacts_dir);
      print_stat("Triple", &ws.default_triple);
      print_stat("Targets", &ws.targets.to_string());
      for toolchain in &ws.toolchains {
        print_stat("Toolchain", toolchain);
      }
    }
    None => print_info("No kiln.toml found"),
  }

  Ok(0)
}
