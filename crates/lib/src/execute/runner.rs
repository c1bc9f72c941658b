//! Subprocess invocation.
//!
//! Every compiler, code generator and test binary is launched through the
//! `ActionRunner` trait, so the scheduler never touches processes directly.
//! `ProcessRunner` is the real implementation.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::consts::SOURCE_DATE_EPOCH;

/// Time a process gets to exit after SIGTERM before it is killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// A fully rendered command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  /// Action label or test target, for logs.
  pub label: String,
  pub program: PathBuf,
  pub args: Vec<String>,
  pub working_dir: PathBuf,
  /// Exposed to the process as `$out`.
  pub out_dir: PathBuf,
  /// Directories exposed as `PATH`; empty leaves `PATH` unusable.
  pub search_path: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
  pub stdout: String,
  pub stderr: String,
}

#[derive(Debug, Error)]
pub enum RunError {
  #[error("failed to start {program}: {source}")]
  Spawn {
    program: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("exited with {}", exit_label(.code))]
  Exit { code: Option<i32>, stderr: String },

  #[error("timed out after {}s", .0.as_secs_f64())]
  TimedOut(Duration),

  #[error("cancelled")]
  Cancelled,

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("status {}", code),
    None => "signal".to_string(),
  }
}

/// Runs an invocation to completion.
#[async_trait]
pub trait ActionRunner: Send + Sync {
  async fn run(
    &self,
    invocation: &Invocation,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
  ) -> Result<RunOutput, RunError>;
}

/// Launches real processes in an isolated environment.
///
/// - Clears all environment variables
/// - Sets PATH to the declared search path, or /path-not-set when there is
///   none, so undeclared tools fail fast
/// - Sets HOME to /homeless-shelter
/// - Points TMPDIR/TMP/TEMP at a private temp directory
/// - Sets `out` to the output directory
/// - Sets `LANG=C`, `LC_ALL=C` and `SOURCE_DATE_EPOCH`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ActionRunner for ProcessRunner {
  async fn run(
    &self,
    invocation: &Invocation,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
  ) -> Result<RunOutput, RunError> {
    let tmp_dir = tempfile::Builder::new().prefix("kiln-tmp-").tempdir()?;
    let path = if invocation.search_path.is_empty() {
      OsString::from("/path-not-set")
    } else {
      std::env::join_paths(&invocation.search_path).map_err(io::Error::other)?
    };

    let mut command = Command::new(&invocation.program);
    command
      .args(&invocation.args)
      .current_dir(&invocation.working_dir)
      .env_clear()
      .env("PATH", &path)
      .env("HOME", "/homeless-shelter")
      .env("TMPDIR", tmp_dir.path())
      .env("TMP", tmp_dir.path())
      .env("TEMP", tmp_dir.path())
      .env("TEMPDIR", tmp_dir.path())
      .env("out", &invocation.out_dir)
      .env("LANG", "C")
      .env("LC_ALL", "C")
      .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    debug!(
      action = %invocation.label,
      program = %invocation.program.display(),
      args = ?invocation.args,
      "spawning process"
    );

    let mut child = command.spawn().map_err(|source| RunError::Spawn {
      program: invocation.program.clone(),
      source,
    })?;

    let stdout = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr = tokio::spawn(read_pipe(child.stderr.take()));

    let deadline = async {
      match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
      }
    };

    let finished = tokio::select! {
      status = child.wait() => Ok(status?),
      _ = deadline => Err(RunError::TimedOut(timeout.unwrap_or_default())),
      _ = cancel.cancelled() => Err(RunError::Cancelled),
    };

    let status = match finished {
      Ok(status) => status,
      Err(err) => {
        warn!(action = %invocation.label, reason = %err, "terminating process");
        terminate(&mut child).await;
        return Err(err);
      }
    };

    let output = RunOutput {
      stdout: stdout.await.unwrap_or_default(),
      stderr: stderr.await.unwrap_or_default(),
    };

    if !status.success() {
      if !output.stderr.is_empty() {
        debug!(action = %invocation.label, stderr = %output.stderr, "command stderr");
      }
      return Err(RunError::Exit {
        code: status.code(),
        stderr: output.stderr,
      });
    }

    Ok(output)
  }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
  let mut buf = Vec::new();
  if let Some(mut pipe) = pipe {
    let _ = pipe.read_to_end(&mut buf).await;
  }
  String::from_utf8_lossy(&buf).into_owned()
}

/// SIGTERM, then SIGKILL if the process outlives the grace period.
async fn terminate(child: &mut Child) {
  #[cfg(unix)]
  if let Some(pid) = child.id().and_then(|id| rustix::process::Pid::from_raw(id as i32)) {
    let _ = rustix::process::kill_process(pid, rustix::process::Signal::TERM);
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
      return;
    }
  }

  let _ = child.kill().await;
}
