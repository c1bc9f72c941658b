//! Test utilities for kiln-lib.
//!
//! Provides a recording fake runner and toolchains whose "compilers" simply
//! concatenate their inputs, so builds can be checked byte for byte.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::execute::{ActionRunner, Invocation, RunError, RunOutput};
use crate::toolchain::{CommandKind, Toolchain};

pub const TEST_TRIPLE: &str = "x86_64-unknown-linux-gnu";

/// Returns the shell command and args to execute a shell script.
#[cfg(unix)]
pub fn shell(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(windows)]
pub fn shell(script: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), script.to_string()])
}

/// Template understood by `RecordingRunner`: output path, then every input.
pub fn fake_template() -> Vec<String> {
  vec!["$${out}".to_string(), "$${inputs}".to_string()]
}

/// Toolchain for `RecordingRunner`, same template for every command kind.
pub fn fake_toolchain(language: &str) -> Toolchain {
  let mut toolchain = Toolchain::new(language, TEST_TRIPLE, "/fake/cc");
  for kind in [
    CommandKind::Library,
    CommandKind::Binary,
    CommandKind::Test,
    CommandKind::Generate,
  ] {
    toolchain = toolchain.with_command(kind, fake_template());
  }
  toolchain
}

/// Write a file, creating parent directories.
pub fn write_file(path: &Path, content: &str) {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}

/// Fake runner: `args[0]` is the output, the rest are inputs to concatenate.
#[derive(Default)]
pub struct RecordingRunner {
  fail: HashSet<String>,
  delays: HashMap<String, Duration>,
  skip_output: HashSet<String>,
  calls: Mutex<Vec<String>>,
  running: AtomicUsize,
  max_running: AtomicUsize,
}

impl RecordingRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Exit non-zero for this label.
  pub fn failing(mut self, label: &str) -> Self {
    self.fail.insert(label.to_string());
    self
  }

  pub fn delayed(mut self, label: &str, delay: Duration) -> Self {
    self.delays.insert(label.to_string(), delay);
    self
  }

  /// Succeed without writing the output.
  pub fn forgetful(mut self, label: &str) -> Self {
    self.skip_output.insert(label.to_string());
    self
  }

  /// Labels of every invocation, in start order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn max_running(&self) -> usize {
    self.max_running.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ActionRunner for RecordingRunner {
  async fn run(
    &self,
    invocation: &Invocation,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
  ) -> Result<RunOutput, RunError> {
    self.calls.lock().unwrap().push(invocation.label.clone());
    let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_running.fetch_max(now, Ordering::SeqCst);

    let result = self.work(invocation, cancel, timeout).await;
    self.running.fetch_sub(1, Ordering::SeqCst);
    result
  }
}

impl RecordingRunner {
  async fn work(
    &self,
    invocation: &Invocation,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
  ) -> Result<RunOutput, RunError> {
    if let Some(&delay) = self.delays.get(&invocation.label) {
      let wait = timeout.map_or(delay, |limit| limit.min(delay));
      tokio::select! {
        _ = tokio::time::sleep(wait) => {}
        _ = cancel.cancelled() => return Err(RunError::Cancelled),
      }
      if let Some(limit) = timeout.filter(|limit| *limit < delay) {
        return Err(RunError::TimedOut(limit));
      }
    }

    if self.fail.contains(&invocation.label) {
      return Err(RunError::Exit {
        code: Some(1),
        stderr: format!("{} failed", invocation.label),
      });
    }
    if self.skip_output.contains(&invocation.label) {
      return Ok(RunOutput::default());
    }

    let Some((out, inputs)) = invocation.args.split_first() else {
      return Ok(RunOutput::default());
    };
    let mut content = Vec::new();
    for input in inputs {
      content.extend(std::fs::read(input)?);
    }
    std::fs::write(PathBuf::from(out), content)?;
    Ok(RunOutput::default())
  }
}
