//! `kiln test` integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

fn test_project() -> TestEnv {
  let env = TestEnv::from_fixture("tests.toml");
  env.write_file("lib.sh", "# lib\n");
  env.write_file("good_test.sh", "#!/bin/sh\nexit 0\n");
  env.write_file("bad_test.sh", "#!/bin/sh\necho 'expected 4, got 5' >&2\nexit 3\n");
  env
}

fn result<'a>(report: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
  report["results"]
    .as_array()
    .unwrap()
    .iter()
    .find(|r| r["target"] == name)
    .unwrap_or_else(|| panic!("no result for {}: {}", name, report))
}

#[test]
fn runs_built_tests() {
  let env = test_project();

  let (code, report) = env.json(&["test"]);
  assert_eq!(code, 1);
  assert_eq!(report["status"], "action_failed");
  assert_eq!(result(&report, "good_test")["outcome"], "passed");

  let bad = result(&report, "bad_test");
  assert_eq!(bad["outcome"], "failed");
  assert_eq!(bad["code"], 3);
  assert!(bad["stderr"].as_str().unwrap().contains("expected 4, got 5"));
}

#[test]
fn passing_selection_exits_zero() {
  let env = test_project();

  env
    .kiln_cmd()
    .args(["test", "//good_test"])
    .assert()
    .success()
    .stdout(predicate::str::contains("PASS good_test"))
    .stdout(predicate::str::contains("1 passed, 0 failed"));
}

#[test]
fn failing_test_shows_stderr() {
  let env = test_project();

  env
    .kiln_cmd()
    .args(["test", "bad_test"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("FAIL bad_test (exit 3"))
    .stderr(predicate::str::contains("expected 4, got 5"));
}

#[test]
fn test_binaries_are_cached() {
  let env = test_project();
  env.json(&["test", "good_test"]);

  let (code, report) = env.json(&["test", "good_test"]);
  assert_eq!(code, 0);
  assert_eq!(report["build"]["cache_hits"], 2);
  assert_eq!(result(&report, "good_test")["outcome"], "passed");
}

#[test]
fn timeout_fails_the_test() {
  let env = test_project();
  env.write_file("good_test.sh", "#!/bin/sh\nwhile :; do :; done\n");

  let (code, report) = env.json(&["test", "good_test", "--timeout", "300ms"]);
  assert_eq!(code, 1);
  assert_eq!(result(&report, "good_test")["outcome"], "timed_out");
}
