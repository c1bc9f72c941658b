use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::KeyHasher;

/// A source or generated-code language, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Language(String);

impl Language {
  pub fn new(name: &str) -> Self {
    Self(name.trim().to_ascii_lowercase())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<String> for Language {
  fn from(value: String) -> Self {
    Language::new(&value)
  }
}

impl From<&str> for Language {
  fn from(value: &str) -> Self {
    Language::new(value)
  }
}

impl From<Language> for String {
  fn from(value: Language) -> Self {
    value.0
  }
}

impl std::fmt::Display for Language {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// The kind of invocation a command template is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
  Library,
  Binary,
  Test,
  Generate,
}

impl std::fmt::Display for CommandKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      CommandKind::Library => "library",
      CommandKind::Binary => "binary",
      CommandKind::Test => "test",
      CommandKind::Generate => "generate",
    };
    write!(f, "{}", s)
  }
}

/// Argument templates for each action kind, with `$${...}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainCommands {
  pub library: Vec<String>,
  pub binary: Vec<String>,
  pub test: Vec<String>,
  pub generate: Vec<String>,
}

fn args(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

impl Default for ToolchainCommands {
  fn default() -> Self {
    let link = args(&["-O$${opt}", "$${srcs}", "$${deps}", "$${libs}", "-o", "$${out}"]);
    Self {
      // Partial link: any number of sources become one relocatable object.
      library: args(&["-O$${opt}", "-r", "-nostdlib", "$${srcs}", "-o", "$${out}"]),
      binary: link.clone(),
      test: link,
      generate: args(&["--lang=$${lang}", "--out=$${out}", "$${srcs}", "$${deps}"]),
    }
  }
}

impl ToolchainCommands {
  pub fn for_kind(&self, kind: CommandKind) -> &[String] {
    match kind {
      CommandKind::Library => &self.library,
      CommandKind::Binary => &self.binary,
      CommandKind::Test => &self.test,
      CommandKind::Generate => &self.generate,
    }
  }
}

/// Concrete compiler or code generator for one (language, triple) pair.
///
/// Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Toolchain {
  pub language: Language,
  pub triple: String,
  pub compiler: PathBuf,
  #[serde(default)]
  pub aux_libraries: Vec<PathBuf>,
  /// Directories exposed as `PATH` to the compiler, for helper tools such as
  /// the assembler and linker. Defaults to the compiler's own directory.
  #[serde(default)]
  pub tool_paths: Vec<PathBuf>,
  #[serde(default)]
  pub commands: ToolchainCommands,
}

impl Toolchain {
  pub fn new(language: impl Into<Language>, triple: &str, compiler: impl Into<PathBuf>) -> Self {
    Self {
      language: language.into(),
      triple: triple.to_string(),
      compiler: compiler.into(),
      aux_libraries: Vec::new(),
      tool_paths: Vec::new(),
      commands: ToolchainCommands::default(),
    }
  }

  pub fn with_aux_libraries(mut self, libs: Vec<PathBuf>) -> Self {
    self.aux_libraries = libs;
    self
  }

  pub fn with_tool_paths(mut self, paths: Vec<PathBuf>) -> Self {
    self.tool_paths = paths;
    self
  }

  /// Directories searched for helper tools, in order.
  ///
  /// An empty list leaves `PATH` unusable, so only absolute program paths run.
  pub fn search_path(&self) -> Vec<PathBuf> {
    if !self.tool_paths.is_empty() {
      return self.tool_paths.clone();
    }
    match self.compiler.parent() {
      Some(dir) if self.compiler.is_absolute() => vec![dir.to_path_buf()],
      _ => Vec::new(),
    }
  }

  pub fn with_command(mut self, kind: CommandKind, template: Vec<String>) -> Self {
    match kind {
      CommandKind::Library => self.commands.library = template,
      CommandKind::Binary => self.commands.binary = template,
      CommandKind::Test => self.commands.test = template,
      CommandKind::Generate => self.commands.generate = template,
    }
    self
  }

  /// Stable identity mixed into every cache key of actions run with this toolchain.
  pub fn identity(&self) -> String {
    let mut hasher = KeyHasher::new("kiln-toolchain");
    hasher
      .field(self.language.as_str())
      .field(&self.triple)
      .field(&self.compiler.to_string_lossy());
    let libs: Vec<String> = self
      .aux_libraries
      .iter()
      .map(|p| p.to_string_lossy().to_string())
      .collect();
    hasher.fields(libs.iter().map(String::as_str));
    let search: Vec<String> = self
      .search_path()
      .iter()
      .map(|p| p.to_string_lossy().to_string())
      .collect();
    hasher.fields(search.iter().map(String::as_str));
    for kind in [
      CommandKind::Library,
      CommandKind::Binary,
      CommandKind::Test,
      CommandKind::Generate,
    ] {
      hasher.fields(self.commands.for_kind(kind).iter().map(String::as_str));
    }
    hasher.finish().0
  }
}

/// Errors raised by the toolchain registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolchainError {
  #[error("no toolchain registered for language '{language}' on '{triple}'")]
  NotFound { language: Language, triple: String },

  #[error("toolchain for language '{language}' on '{triple}' is already registered")]
  Duplicate { language: Language, triple: String },
}
