//! `kiln.toml` loading.
//!
//! A workspace file declares build settings, the toolchains to register and
//! the target rules. Relative source and compiler paths resolve against the
//! directory holding the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{DEFAULT_OUT_DIR, WORKSPACE_FILE};
use crate::engine::{Engine, EngineConfig};
use crate::execute::{ExecuteConfig, default_jobs};
use crate::graph::{BuildGraph, GraphError, Target};
use crate::plan::PlanConfig;
use crate::platform;
use crate::store::{CacheError, DiskStore};
use crate::toolchain::{Toolchain, ToolchainError, ToolchainRegistry};

#[derive(Debug, Error)]
pub enum WorkspaceError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("no kiln.toml found in {start} or any parent directory")]
  NotFound { start: PathBuf },

  #[error(transparent)]
  Toolchain(#[from] ToolchainError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Store(#[from] CacheError),
}

/// The `[build]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSettings {
  pub jobs: Option<usize>,
  pub keep_going: bool,
  pub out_dir: Option<PathBuf>,
  pub cache_dir: Option<PathBuf>,
  pub default_triple: Option<String>,
  pub action_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkspaceFile {
  #[serde(default)]
  build: BuildSettings,
  #[serde(default, rename = "toolchain")]
  toolchains: Vec<Toolchain>,
  #[serde(default, rename = "target")]
  targets: Vec<Target>,
}

/// Command-line overrides for `[build]` settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
  pub jobs: Option<usize>,
  pub keep_going: bool,
  pub out_dir: Option<PathBuf>,
  pub cache_dir: Option<PathBuf>,
  pub default_triple: Option<String>,
  pub action_timeout: Option<Duration>,
}

/// A loaded `kiln.toml`.
#[derive(Debug, Clone)]
pub struct Workspace {
  pub root: PathBuf,
  pub settings: BuildSettings,
  pub toolchains: Vec<Toolchain>,
  pub targets: Vec<Target>,
}

impl Workspace {
  /// Load a workspace file. Its parent directory becomes the workspace root.
  pub fn load(path: &Path) -> Result<Self, WorkspaceError> {
    let content = std::fs::read_to_string(path).map_err(|source| WorkspaceError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let root = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .unwrap_or(Path::new("."));
    let root = dunce::canonicalize(root).map_err(|source| WorkspaceError::Read {
      path: root.to_path_buf(),
      source,
    })?;

    let workspace = Self::parse(&content, root).map_err(|err| match err {
      WorkspaceError::Parse { source, .. } => WorkspaceError::Parse {
        path: path.to_path_buf(),
        source,
      },
      other => other,
    })?;

    info!(
      root = %workspace.root.display(),
      targets = workspace.targets.len(),
      toolchains = workspace.toolchains.len(),
      "loaded workspace"
    );
    Ok(workspace)
  }

  /// Find `kiln.toml` in `start` or the nearest ancestor and load it.
  pub fn discover(start: &Path) -> Result<Self, WorkspaceError> {
    let start = dunce::canonicalize(start).map_err(|source| WorkspaceError::Read {
      path: start.to_path_buf(),
      source,
    })?;

    for dir in start.ancestors() {
      let candidate = dir.join(WORKSPACE_FILE);
      if candidate.is_file() {
        debug!(path = %candidate.display(), "found workspace file");
        return Self::load(&candidate);
      }
    }

    Err(WorkspaceError::NotFound { start })
  }

  /// Parse workspace file contents rooted at `root`.
  pub fn parse(content: &str, root: PathBuf) -> Result<Self, WorkspaceError> {
    let file: WorkspaceFile = toml::from_str(content).map_err(|source| WorkspaceError::Parse {
      path: root.join(WORKSPACE_FILE),
      source,
    })?;

    Ok(Self {
      root,
      settings: file.build,
      toolchains: file.toolchains,
      targets: file.targets,
    })
  }

  /// Apply command-line overrides on top of `[build]`.
  pub fn apply(&mut self, overrides: Overrides) {
    let settings = &mut self.settings;
    if overrides.jobs.is_some() {
      settings.jobs = overrides.jobs;
    }
    settings.keep_going |= overrides.keep_going;
    if overrides.out_dir.is_some() {
      settings.out_dir = overrides.out_dir;
    }
    if overrides.cache_dir.is_some() {
      settings.cache_dir = overrides.cache_dir;
    }
    if overrides.default_triple.is_some() {
      settings.default_triple = overrides.default_triple;
    }
    // Whole seconds, rounded up.
    if let Some(timeout) = overrides.action_timeout {
      let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
      settings.action_timeout_secs = Some(secs.max(1));
    }
  }

  fn resolve(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.root.join(path)
    }
  }

  /// Register every declared toolchain, with relative paths made absolute.
  pub fn registry(&self) -> Result<ToolchainRegistry, WorkspaceError> {
    let mut registry = ToolchainRegistry::new();
    for toolchain in &self.toolchains {
      let mut toolchain = toolchain.clone();
      // Bare program names stay as written; only paths with a separator are rooted.
      if toolchain.compiler.components().count() > 1 {
        toolchain.compiler = self.resolve(&toolchain.compiler);
      }
      toolchain.aux_libraries = toolchain.aux_libraries.iter().map(|p| self.resolve(p)).collect();
      toolchain.tool_paths = toolchain.tool_paths.iter().map(|p| self.resolve(p)).collect();
      registry.register(toolchain)?;
    }
    Ok(registry)
  }

  pub fn graph(&self) -> Result<BuildGraph, WorkspaceError> {
    Ok(BuildGraph::build(self.targets.iter().cloned())?)
  }

  pub fn out_dir(&self) -> PathBuf {
    match &self.settings.out_dir {
      Some(dir) => self.resolve(dir),
      None => self.root.join(DEFAULT_OUT_DIR),
    }
  }

  /// Root of the content-addressed artifact store.
  pub fn artifacts_dir(&self) -> PathBuf {
    match &self.settings.cache_dir {
      Some(dir) => self.resolve(dir).join("artifacts"),
      None => platform::paths::artifacts_dir(),
    }
  }

  pub fn default_triple(&self) -> String {
    self
      .settings
      .default_triple
      .clone()
      .unwrap_or_else(platform::host_triple)
  }

  pub fn execute_config(&self) -> ExecuteConfig {
    ExecuteConfig {
      jobs: self.settings.jobs.filter(|j| *j > 0).unwrap_or_else(default_jobs),
      keep_going: self.settings.keep_going,
      action_timeout: self.settings.action_timeout_secs.map(Duration::from_secs),
    }
  }

  pub fn plan_config(&self) -> PlanConfig {
    PlanConfig {
      root: self.root.clone(),
      out_dir: self.out_dir(),
      default_triple: self.default_triple(),
    }
  }

  /// Validate the rules and assemble an engine backed by the on-disk store.
  pub fn engine(&self) -> Result<Engine, WorkspaceError> {
    let graph = self.graph()?;
    let registry = self.registry()?;
    let store = DiskStore::open(self.artifacts_dir())?;
    let config = EngineConfig {
      plan: self.plan_config(),
      execute: self.execute_config(),
    };
    Ok(Engine::new(graph, registry, Arc::new(store), config))
  }
}
