//! Schema-to-many-languages fanout.
//!
//! A schema library yields one generation action per requested output
//! language. The actions share the schema sources as inputs but never depend
//! on each other, so they can run concurrently and fail independently. Schema
//! dependencies contribute their generated output in the same language, which
//! forms a per-language sub-DAG inside the action graph.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::graph::Target;
use crate::toolchain::{CommandKind, Language, Toolchain};

use super::types::{Action, ActionId, ActionInput, CommandTemplate, PlanError};
use super::{PlannedArtifacts, base_vars, dedup_producers};

/// File extension of generated sources for a language.
pub fn extension_for(language: &Language) -> &str {
  match language.as_str() {
    "c" => "h",
    "cpp" | "c++" | "cxx" => "hpp",
    "rust" => "rs",
    "python" => "py",
    "typescript" | "ts" => "ts",
    "javascript" | "js" => "js",
    "csharp" | "c#" => "cs",
    "kotlin" => "kt",
    other => other,
  }
}

/// `<out_dir>/<name>/gen/<lang>/<name>.<ext>`
pub fn generated_path(out_dir: &Path, name: &str, language: &Language) -> PathBuf {
  out_dir
    .join(name)
    .join("gen")
    .join(language.as_str())
    .join(format!("{}.{}", name, extension_for(language)))
}

/// Check the requested output languages of a schema library.
pub fn validate_output_languages(target: &Target) -> Result<(), PlanError> {
  let languages = &target.options.output_languages;
  if languages.is_empty() {
    return Err(PlanError::InvalidOutputSpec {
      target: target.name.clone(),
      reason: "schema library requests no output languages".to_string(),
    });
  }

  let mut seen = HashSet::new();
  for language in languages {
    if !seen.insert(language) {
      return Err(PlanError::InvalidOutputSpec {
        target: target.name.clone(),
        reason: format!("output language '{}' requested more than once", language),
      });
    }
  }
  Ok(())
}

/// Expand a schema library into one generation action per output language.
#[allow(clippy::too_many_arguments)]
pub(super) fn expand_schema(
  target: &Target,
  toolchain: &Arc<Toolchain>,
  sources: &[ActionInput],
  flat_deps: &[String],
  upstream: &PlannedArtifacts,
  out_dir: &Path,
  triple: &str,
  first_id: ActionId,
) -> Result<Vec<Action>, PlanError> {
  validate_output_languages(target)?;

  let mut actions = Vec::with_capacity(target.options.output_languages.len());

  for (offset, language) in target.options.output_languages.iter().enumerate() {
    let mut inputs = sources.to_vec();
    for dep in flat_deps {
      let (path, producer) = upstream.artifact(&target.name, dep, language)?;
      inputs.push(ActionInput::Artifact { path, producer });
    }

    let mut vars: BTreeMap<String, String> = base_vars(target, triple);
    vars.insert("lang".to_string(), language.to_string());

    actions.push(Action {
      id: ActionId(first_id.0 + offset),
      label: format!("{}#{}", target.name, language),
      target: target.name.clone(),
      kind: CommandKind::Generate,
      language: Some(language.clone()),
      command: CommandTemplate {
        program: toolchain.compiler.clone(),
        args: toolchain.commands.generate.clone(),
      },
      vars,
      deps: dedup_producers(&inputs),
      inputs,
      outputs: vec![generated_path(out_dir, &target.name, language)],
      toolchain: toolchain.clone(),
    });
  }

  Ok(actions)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::TargetKind;

  #[test]
  fn generated_paths_by_language() {
    let out = Path::new("/out");
    assert_eq!(
      generated_path(out, "msgs", &Language::new("rust")),
      PathBuf::from("/out/msgs/gen/rust/msgs.rs")
    );
    assert_eq!(
      generated_path(out, "msgs", &Language::new("Python")),
      PathBuf::from("/out/msgs/gen/python/msgs.py")
    );
    assert_eq!(
      generated_path(out, "msgs", &Language::new("go")),
      PathBuf::from("/out/msgs/gen/go/msgs.go")
    );
  }

  #[test]
  fn zero_languages_is_invalid() {
    let target = Target::new("msgs", TargetKind::SchemaLibrary, "proto");
    let err = validate_output_languages(&target).unwrap_err();
    assert!(matches!(err, PlanError::InvalidOutputSpec { .. }));
  }

  #[test]
  fn repeated_language_is_invalid() {
    let target = Target::new("msgs", TargetKind::SchemaLibrary, "proto").with_output_languages(["rust", "RUST"]);
    assert!(validate_output_languages(&target).is_err());
  }
}
