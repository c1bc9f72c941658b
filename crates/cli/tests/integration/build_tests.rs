//! `kiln build` integration tests.

use std::path::PathBuf;

use predicates::prelude::*;

use super::common::{TestEnv, target};

fn c_project() -> TestEnv {
  let env = TestEnv::from_fixture("c_project.toml");
  env.write_file("src/core.c", "core;");
  env.write_file("src/util.c", "util;");
  env.write_file("src/main.c", "main;");
  env
}

fn artifact_path(target: &serde_json::Value) -> PathBuf {
  PathBuf::from(target["artifacts"][0]["path"].as_str().unwrap())
}

#[test]
fn build_links_dependencies_in_order() {
  let env = c_project();

  env
    .kiln_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("app built"))
    .stdout(predicate::str::contains("Build succeeded"));

  let app = env.root().join("kiln-out/app/app");
  assert_eq!(env.read_file(&app), "main;core;util;");
}

#[test]
fn rebuild_is_fully_cached() {
  let env = c_project();

  let (code, first) = env.json(&["build"]);
  assert_eq!(code, 0);
  assert_eq!(first["cache_misses"], 3);
  let app = artifact_path(target(&first, "app"));
  let before = std::fs::read(&app).unwrap();

  let (code, second) = env.json(&["build"]);
  assert_eq!(code, 0);
  assert_eq!(second["cache_hits"], 3);
  assert_eq!(second["cache_misses"], 0);
  assert_eq!(target(&second, "app")["state"], "up_to_date");
  assert_eq!(target(&second, "app")["artifacts"][0]["hash"], target(&first, "app")["artifacts"][0]["hash"]);
  assert_eq!(std::fs::read(&app).unwrap(), before);
}

#[test]
fn source_edit_rebuilds_only_dependents() {
  let env = c_project();
  env.json(&["build"]);

  env.write_file("src/core.c", "core v2;");
  let (code, report) = env.json(&["build"]);
  assert_eq!(code, 0);
  assert_eq!(report["cache_hits"], 1);
  assert_eq!(report["cache_misses"], 2);
  assert_eq!(target(&report, "util")["state"], "up_to_date");
  assert_eq!(target(&report, "core")["state"], "built");
  assert_eq!(target(&report, "app")["state"], "built");
}

#[test]
fn selecting_a_target_builds_only_its_closure() {
  let env = c_project();

  let (code, report) = env.json(&["build", "//core"]);
  assert_eq!(code, 0);
  assert_eq!(report["targets"].as_array().unwrap().len(), 1);
  assert!(!env.root().join("kiln-out/app").exists());
}

#[test]
fn deleted_output_is_restored_from_cache() {
  let env = c_project();
  let (_, first) = env.json(&["build"]);
  let app = artifact_path(target(&first, "app"));

  std::fs::remove_file(&app).unwrap();
  let (code, second) = env.json(&["build"]);
  assert_eq!(code, 0);
  assert_eq!(second["cache_hits"], 3);
  assert_eq!(env.read_file(&app), "main;core;util;");
}

#[test]
fn failed_action_skips_dependents_and_exits_one() {
  let env = TestEnv::from_fixture("failing_lib.toml");
  env.write_file("src/core.s", "nop");
  env.write_file("src/main.c", "main;");
  env.write_file("src/tool.c", "tool;");

  let (code, report) = env.json(&["build"]);
  assert_eq!(code, 1);
  assert_eq!(report["status"], "action_failed");
  assert_eq!(target(&report, "core")["state"], "failed");
  assert!(target(&report, "core")["error"].as_str().unwrap().contains("assembler exploded"));
  assert_eq!(target(&report, "app")["state"], "skipped");
  assert!(!env.root().join("kiln-out/app/app").exists());
}

#[test]
fn keep_going_builds_independent_targets() {
  let env = TestEnv::from_fixture("failing_lib.toml");
  env.write_file("src/core.s", "nop");
  env.write_file("src/main.c", "main;");
  env.write_file("src/tool.c", "tool;");

  let (code, report) = env.json(&["build", "--keep-going"]);
  assert_eq!(code, 1);
  assert_eq!(target(&report, "tool")["state"], "built");
  assert_eq!(target(&report, "app")["state"], "skipped");
  assert_eq!(env.read_file(&env.root().join("kiln-out/tool/tool")), "tool;");
}

#[test]
fn failure_is_reported_in_text_mode() {
  let env = TestEnv::from_fixture("failing_lib.toml");
  env.write_file("src/core.s", "nop");
  env.write_file("src/main.c", "main;");
  env.write_file("src/tool.c", "tool;");

  env
    .kiln_cmd()
    .arg("build")
    .assert()
    .code(1)
    .stderr(predicate::str::contains("core failed"))
    .stderr(predicate::str::contains("Build failed"));
}

#[test]
fn schema_fans_out_per_language() {
  let env = TestEnv::from_fixture("schema.toml");
  env.write_file("api.proto", "message Ping {}\n");
  env.write_file("client.c", "client;\n");

  let (code, report) = env.json(&["build"]);
  assert_eq!(code, 0);

  let labels: Vec<&str> = report["actions"]
    .as_array()
    .unwrap()
    .iter()
    .map(|a| a["label"].as_str().unwrap())
    .collect();
  assert_eq!(labels.len(), 4);
  for lang in ["c", "go", "python"] {
    assert!(labels.contains(&format!("api#{}", lang).as_str()), "{:?}", labels);
  }

  let api = target(&report, "api");
  assert_eq!(api["artifacts"].as_array().unwrap().len(), 3);

  let client = env.read_file(&artifact_path(target(&report, "client")));
  assert_eq!(client, "client;\n// c\nmessage Ping {}\n");
}

#[test]
fn cycle_is_a_config_error() {
  let env = TestEnv::from_fixture("cycle.toml");

  let (code, report) = env.json(&["build"]);
  assert_eq!(code, 2);
  assert_eq!(report["status"], "config_error");
  assert!(report["actions"].as_array().unwrap().is_empty());
  assert!(report["errors"][0].as_str().unwrap().contains("cycle"));
}

#[test]
fn unknown_label_is_a_config_error() {
  let env = c_project();

  env
    .kiln_cmd()
    .args(["build", "//nope"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("nope"));
}

#[test]
fn missing_toolchain_runs_nothing() {
  let env = c_project();
  let (code, report) = env.json(&["build", "--triple", "aarch64-apple-darwin"]);
  assert_eq!(code, 2);
  assert_eq!(target(&report, "core")["state"], "plan_failed");
  assert!(!env.root().join("kiln-out/core").exists());
}

#[test]
fn out_dir_override() {
  let env = c_project();
  env.kiln_cmd().args(["build", "--out-dir", "elsewhere"]).assert().success();
  assert!(env.root().join("elsewhere/app/app").exists());
}
