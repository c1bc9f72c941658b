//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated workspace.
///
/// Each test gets its own temporary directory holding `kiln.toml`, the
/// sources, the output directory and the artifact cache.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Create from a fixture file, copied to `kiln.toml`.
  pub fn from_fixture(name: &str) -> Self {
    let env = Self::empty();
    env.write_file("kiln.toml", &fixture_content(name));
    env
  }

  pub fn empty() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn root(&self) -> PathBuf {
    dunce::canonicalize(self.temp.path()).unwrap()
  }

  /// Write a file relative to the workspace root.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn read_file(&self, path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
  }

  /// Artifact cache (isolated per test).
  pub fn cache_path(&self) -> PathBuf {
    self.temp.path().join("cache")
  }

  /// Get a pre-configured Command for the kiln binary, run from the workspace root.
  ///
  /// Sets `KILN_CACHE_DIR` so nothing touches the user's cache.
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.current_dir(self.temp.path());
    cmd.env("KILN_CACHE_DIR", self.cache_path());
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Run kiln with `--output json` and parse stdout.
  pub fn json(&self, args: &[&str]) -> (i32, serde_json::Value) {
    let output = self.kiln_cmd().args(args).args(["--output", "json"]).output().unwrap();
    let value = serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
      panic!(
        "stdout is not JSON ({}):\n{}\nstderr:\n{}",
        e,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
      )
    });
    (output.status.code().unwrap_or(-1), value)
  }
}

/// Find the JSON entry of a target in a build report.
pub fn target<'a>(report: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
  report["targets"]
    .as_array()
    .unwrap()
    .iter()
    .find(|t| t["name"] == name)
    .unwrap_or_else(|| panic!("target {} not in report: {}", name, report))
}
