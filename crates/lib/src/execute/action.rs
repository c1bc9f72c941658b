//! Execution of a single action: cache lookup, invocation, registration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::runner::{ActionRunner, Invocation, RunError};
use super::types::{ActionError, ActionOutcome};
use crate::consts::CACHE_KEY_VERSION;
use crate::plan::template::{self, RenderContext};
use crate::plan::{Action, ActionInput};
use crate::store::{Artifact, ArtifactStore, CacheError, CachedEntry, CachedOutput};
use crate::toolchain::CommandKind;
use crate::util::hash::{CacheKey, ContentHash, KeyHasher, hash_file};

/// Shared state handed to every action task.
pub(super) struct ActionContext {
  pub store: Arc<dyn ArtifactStore>,
  pub runner: Arc<dyn ActionRunner>,
  pub cache_enabled: Arc<AtomicBool>,
  pub cancel: CancellationToken,
  pub timeout: Option<Duration>,
}

impl ActionContext {
  fn caching(&self) -> bool {
    self.cache_enabled.load(Ordering::SeqCst)
  }

  fn disable_cache(&self, err: &CacheError) {
    if self.cache_enabled.swap(false, Ordering::SeqCst) {
      warn!(store = %self.store.describe(), error = %err, "artifact store failed, continuing without cache");
    }
  }
}

/// Deterministic signature of an action.
///
/// Covers the unrendered command template, scalar variables, the content of
/// every input in declared order and the toolchain identity. Output paths are
/// left out, so the same work under a different output directory still hits.
pub fn cache_key(action: &Action, input_hashes: &[ContentHash]) -> CacheKey {
  let mut hasher = KeyHasher::new(CACHE_KEY_VERSION);
  hasher
    .field(&action.kind.to_string())
    .field(&action.command.program.to_string_lossy())
    .fields(action.command.args.iter().map(String::as_str));

  let vars: Vec<String> = action.vars.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
  hasher.fields(vars.iter().map(String::as_str));

  let inputs: Vec<String> = action
    .inputs
    .iter()
    .zip(input_hashes)
    .map(|(input, hash)| {
      let tag = match input {
        ActionInput::Source { .. } => "src",
        ActionInput::Artifact { .. } => "dep",
        ActionInput::AuxLibrary { .. } => "lib",
      };
      format!("{}:{}", tag, hash)
    })
    .collect();
  hasher.fields(inputs.iter().map(String::as_str));

  hasher
    .field(&action.toolchain.identity())
    .field(&action.outputs.len().to_string());
  hasher.finish()
}

/// Run one action to a final outcome. Never leaves a partial output behind.
pub(super) async fn run_action(action: &Action, ctx: &ActionContext) -> ActionOutcome {
  match execute(action, ctx).await {
    Ok(outcome) => outcome,
    Err(err) => {
      remove_outputs(action);
      error!(action = %action.label, error = %err, "action failed");
      ActionOutcome::Failed(err)
    }
  }
}

async fn execute(action: &Action, ctx: &ActionContext) -> Result<ActionOutcome, ActionError> {
  let hashes = hash_inputs(action)?;
  let key = cache_key(action, &hashes);

  if ctx.caching() {
    match ctx.store.get(&key) {
      Ok(Some(entry)) if entry.outputs.len() == action.outputs.len() => {
        let artifacts = materialize(action, &entry)?;
        debug!(action = %action.label, key = %key, "cache hit");
        return Ok(ActionOutcome::Cached(artifacts));
      }
      Ok(Some(entry)) => {
        warn!(
          action = %action.label,
          cached = entry.outputs.len(),
          declared = action.outputs.len(),
          "cache entry does not match declared outputs, rebuilding"
        );
      }
      Ok(None) => debug!(action = %action.label, key = %key, "cache miss"),
      Err(err @ CacheError::Corrupt { .. }) => {
        warn!(action = %action.label, error = %err, "ignoring corrupt cache entry, rebuilding");
      }
      Err(err) => ctx.disable_cache(&err),
    }
  }

  if ctx.cancel.is_cancelled() {
    return Err(ActionError::Cancelled {
      action: action.label.clone(),
    });
  }

  prepare_outputs(action)?;
  let invocation = render_invocation(action)?;

  ctx
    .runner
    .run(&invocation, &ctx.cancel, ctx.timeout)
    .await
    .map_err(|err| run_error(action, err))?;

  let mut artifacts = Vec::with_capacity(action.outputs.len());
  let mut outputs = Vec::with_capacity(action.outputs.len());
  for path in &action.outputs {
    let bytes = match fs::read(path) {
      Ok(bytes) => bytes,
      Err(err) if err.kind() == io::ErrorKind::NotFound => {
        return Err(ActionError::MissingOutput {
          action: action.label.clone(),
          path: path.clone(),
        });
      }
      Err(source) => return Err(io_error(action, path, source)),
    };

    let output = CachedOutput::new(bytes);
    artifacts.push(Artifact {
      path: path.clone(),
      hash: output.hash.clone(),
      action: action.id,
    });
    outputs.push(output);
  }

  if ctx.caching()
    && let Err(err) = ctx.store.put(&key, CachedEntry { outputs })
  {
    ctx.disable_cache(&err);
  }

  debug!(action = %action.label, "action built");
  Ok(ActionOutcome::Built(artifacts))
}

fn hash_inputs(action: &Action) -> Result<Vec<ContentHash>, ActionError> {
  action
    .inputs
    .iter()
    .map(|input| {
      hash_file(input.path()).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
          ActionError::MissingInput {
            action: action.label.clone(),
            path: input.path().to_path_buf(),
          }
        } else {
          io_error(action, input.path(), err)
        }
      })
    })
    .collect()
}

/// Remove stale outputs and create their directories.
fn prepare_outputs(action: &Action) -> Result<(), ActionError> {
  for path in &action.outputs {
    match fs::remove_file(path) {
      Ok(()) => {}
      Err(err) if err.kind() == io::ErrorKind::NotFound => {}
      Err(source) => return Err(io_error(action, path, source)),
    }
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|source| io_error(action, parent, source))?;
    }
  }
  Ok(())
}

fn remove_outputs(action: &Action) {
  for path in &action.outputs {
    let _ = fs::remove_file(path);
  }
}

/// Write cached bytes to the declared output paths.
fn materialize(action: &Action, entry: &CachedEntry) -> Result<Vec<Artifact>, ActionError> {
  let executable = matches!(action.kind, CommandKind::Binary | CommandKind::Test);
  let mut artifacts = Vec::with_capacity(entry.outputs.len());

  for (path, output) in action.outputs.iter().zip(&entry.outputs) {
    let up_to_date = hash_file(path).map(|h| h == output.hash).unwrap_or(false);
    if !up_to_date {
      write_atomic(path, &output.bytes, executable).map_err(|source| io_error(action, path, source))?;
    }
    artifacts.push(Artifact {
      path: path.clone(),
      hash: output.hash.clone(),
      action: action.id,
    });
  }

  Ok(artifacts)
}

fn write_atomic(path: &Path, bytes: &[u8], executable: bool) -> io::Result<()> {
  use std::io::Write;

  let parent = path.parent().unwrap_or(Path::new("."));
  fs::create_dir_all(parent)?;

  let mut file = tempfile::NamedTempFile::new_in(parent)?;
  file.write_all(bytes)?;

  #[cfg(unix)]
  if executable {
    use std::os::unix::fs::PermissionsExt;
    file.as_file().set_permissions(fs::Permissions::from_mode(0o755))?;
  }
  #[cfg(not(unix))]
  let _ = executable;

  file.persist(path).map_err(|e| e.error)?;
  Ok(())
}

fn render_invocation(action: &Action) -> Result<Invocation, ActionError> {
  let mut ctx = RenderContext {
    vars: Some(&action.vars),
    ..Default::default()
  };
  for input in &action.inputs {
    let path = path_arg(input.path());
    match input {
      ActionInput::Source { .. } => ctx.srcs.push(path.clone()),
      ActionInput::Artifact { .. } => ctx.deps.push(path.clone()),
      ActionInput::AuxLibrary { .. } => ctx.libs.push(path.clone()),
    }
    ctx.inputs.push(path);
  }
  ctx.outs = action.outputs.iter().map(|p| path_arg(p)).collect();

  let out_dir = action
    .outputs
    .first()
    .and_then(|p| p.parent())
    .map(Path::to_path_buf)
    .unwrap_or_else(|| PathBuf::from("."));
  ctx.out_dir = path_arg(&out_dir);

  let args = template::render(&action.command.args, &ctx).map_err(|source| ActionError::Template {
    action: action.label.clone(),
    source,
  })?;

  Ok(Invocation {
    label: action.label.clone(),
    program: action.command.program.clone(),
    args,
    working_dir: out_dir.clone(),
    out_dir,
    search_path: action.toolchain.search_path(),
  })
}

fn path_arg(path: &Path) -> String {
  path.to_string_lossy().to_string()
}

fn run_error(action: &Action, err: RunError) -> ActionError {
  let label = action.label.clone();
  match err {
    RunError::Spawn { program, source } => ActionError::Spawn {
      action: label,
      program,
      reason: source.to_string(),
    },
    RunError::Exit { code, stderr } => ActionError::CommandFailed {
      action: label,
      code,
      stderr,
    },
    RunError::TimedOut(after) => ActionError::TimedOut { action: label, after },
    RunError::Cancelled => ActionError::Cancelled { action: label },
    RunError::Io(source) => ActionError::Io {
      action: label,
      path: action.command.program.clone(),
      source,
    },
  }
}

fn io_error(action: &Action, path: &Path, source: io::Error) -> ActionError {
  ActionError::Io {
    action: action.label.clone(),
    path: path.to_path_buf(),
    source,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  use crate::plan::{ActionId, CommandTemplate};
  use crate::util::testutil::fake_toolchain;

  fn action(inputs: Vec<ActionInput>) -> Action {
    Action {
      id: ActionId(0),
      label: "core".into(),
      target: "core".into(),
      kind: CommandKind::Library,
      language: None,
      command: CommandTemplate {
        program: "/fake/cc".into(),
        args: vec!["-c".into(), "$${srcs}".into(), "-o".into(), "$${out}".into()],
      },
      vars: BTreeMap::from([("opt".to_string(), "2".to_string())]),
      inputs,
      outputs: vec![PathBuf::from("/out/core/libcore.a")],
      deps: vec![],
      toolchain: Arc::new(fake_toolchain("c")),
    }
  }

  fn hash(s: &str) -> ContentHash {
    crate::util::hash::hash_bytes(s.as_bytes())
  }

  #[test]
  fn key_depends_on_input_content_and_order() {
    let a = action(vec![
      ActionInput::Source { path: "/a.c".into() },
      ActionInput::Source { path: "/b.c".into() },
    ]);

    let base = cache_key(&a, &[hash("a"), hash("b")]);
    assert_eq!(base, cache_key(&a, &[hash("a"), hash("b")]));
    assert_ne!(base, cache_key(&a, &[hash("b"), hash("a")]));
    assert_ne!(base, cache_key(&a, &[hash("a"), hash("c")]));
  }

  #[test]
  fn key_ignores_output_location() {
    let a = action(vec![ActionInput::Source { path: "/a.c".into() }]);
    let mut moved = a.clone();
    moved.outputs = vec![PathBuf::from("/elsewhere/libcore.a")];
    assert_eq!(cache_key(&a, &[hash("a")]), cache_key(&moved, &[hash("a")]));
  }

  #[test]
  fn key_depends_on_template_vars_and_toolchain() {
    let a = action(vec![ActionInput::Source { path: "/a.c".into() }]);
    let base = cache_key(&a, &[hash("a")]);

    let mut opt = a.clone();
    opt.vars.insert("opt".into(), "3".into());
    assert_ne!(base, cache_key(&opt, &[hash("a")]));

    let mut args = a.clone();
    args.command.args.push("-g".into());
    assert_ne!(base, cache_key(&args, &[hash("a")]));

    let mut toolchain = a.clone();
    toolchain.toolchain = Arc::new(fake_toolchain("c").with_aux_libraries(vec!["/libm.a".into()]));
    assert_ne!(base, cache_key(&toolchain, &[hash("a")]));
  }

  #[test]
  fn invocation_renders_inputs_by_role() {
    let mut a = action(vec![
      ActionInput::Source { path: "/src/a.c".into() },
      ActionInput::Artifact {
        path: "/out/log/liblog.a".into(),
        producer: ActionId(3),
      },
      ActionInput::AuxLibrary { path: "/sys/libc.a".into() },
    ]);
    a.command.args = vec![
      "$${srcs}".into(),
      "$${deps}".into(),
      "$${libs}".into(),
      "-O$${opt}".into(),
      "-o".into(),
      "$${out}".into(),
    ];

    let inv = render_invocation(&a).unwrap();
    assert_eq!(
      inv.args,
      vec!["/src/a.c", "/out/log/liblog.a", "/sys/libc.a", "-O2", "-o", "/out/core/libcore.a"]
    );
    assert_eq!(inv.working_dir, PathBuf::from("/out/core"));
    assert_eq!(inv.program, PathBuf::from("/fake/cc"));
    assert_eq!(inv.search_path, vec![PathBuf::from("/fake")]);
  }
}
