use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::toolchain::Language;

/// What a target produces.
///
/// Planning dispatches on this with a single exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
  Library,
  Binary,
  Test,
  SchemaLibrary,
}

impl std::fmt::Display for TargetKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      TargetKind::Library => "library",
      TargetKind::Binary => "binary",
      TargetKind::Test => "test",
      TargetKind::SchemaLibrary => "schema_library",
    };
    write!(f, "{}", s)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
  #[default]
  Static,
  Dynamic,
}

impl LinkMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      LinkMode::Static => "static",
      LinkMode::Dynamic => "dynamic",
    }
  }
}

/// Per-kind option set of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetOptions {
  /// Optimization level passed through `$${opt}`.
  pub opt_level: String,
  /// Language edition or standard passed through `$${edition}`.
  pub edition: Option<String>,
  pub link_mode: LinkMode,
  /// Languages generated by a schema library, one action each.
  pub output_languages: Vec<Language>,
  /// Overrides the default artifact file name.
  pub output: Option<String>,
}

impl Default for TargetOptions {
  fn default() -> Self {
    Self {
      opt_level: "0".to_string(),
      edition: None,
      link_mode: LinkMode::Static,
      output_languages: Vec::new(),
      output: None,
    }
  }
}

/// A named buildable unit, as declared in the workspace rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
  pub name: String,
  pub kind: TargetKind,
  pub language: Language,
  /// Target triple; the workspace default applies when unset.
  #[serde(default)]
  pub triple: Option<String>,
  #[serde(default)]
  pub sources: Vec<PathBuf>,
  #[serde(default)]
  pub deps: Vec<String>,
  #[serde(default)]
  pub options: TargetOptions,
}

impl Target {
  pub fn new(name: &str, kind: TargetKind, language: &str) -> Self {
    Self {
      name: name.to_string(),
      kind,
      language: Language::new(language),
      triple: None,
      sources: Vec::new(),
      deps: Vec::new(),
      options: TargetOptions::default(),
    }
  }

  pub fn with_sources<P: Into<PathBuf>>(mut self, sources: impl IntoIterator<Item = P>) -> Self {
    self.sources = sources.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_deps<'a>(mut self, deps: impl IntoIterator<Item = &'a str>) -> Self {
    self.deps = deps.into_iter().map(str::to_string).collect();
    self
  }

  pub fn with_output_languages<'a>(mut self, languages: impl IntoIterator<Item = &'a str>) -> Self {
    self.options.output_languages = languages.into_iter().map(Language::new).collect();
    self
  }

  pub fn with_triple(mut self, triple: &str) -> Self {
    self.triple = Some(triple.to_string());
    self
  }

  pub fn with_options(mut self, options: TargetOptions) -> Self {
    self.options = options;
    self
  }
}

/// Configuration errors detected while building the target graph.
///
/// All of these abort the build before any action is planned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("duplicate target name: {name}")]
  DuplicateTarget { name: String },

  #[error("invalid target name '{name}': use letters, digits, '_', '-' or '.'")]
  InvalidTargetName { name: String },

  #[error("target '{target}' depends on unknown target '{dependency}'")]
  UnresolvedDependency { target: String, dependency: String },

  #[error("target '{target}' lists dependency '{dependency}' more than once")]
  DuplicateDependency { target: String, dependency: String },

  #[error("target '{target}' cannot depend on '{dependency}': {reason}")]
  InvalidDependency {
    target: String,
    dependency: String,
    reason: String,
  },

  #[error("dependency cycle: {}", cycle.join(" -> "))]
  Cycle { cycle: Vec<String> },

  #[error("unknown target: {label}")]
  UnknownTarget { label: String },
}

impl GraphError {
  /// The target or edge the error originates from.
  pub fn target(&self) -> &str {
    match self {
      GraphError::DuplicateTarget { name } | GraphError::InvalidTargetName { name } => name,
      GraphError::UnresolvedDependency { target, .. }
      | GraphError::DuplicateDependency { target, .. }
      | GraphError::InvalidDependency { target, .. } => target,
      GraphError::Cycle { cycle } => cycle.first().map(String::as_str).unwrap_or(""),
      GraphError::UnknownTarget { label } => label,
    }
  }
}
