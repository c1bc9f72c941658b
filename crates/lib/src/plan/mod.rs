//! Action planning.
//!
//! Expands each selected target, in topological order, into the actions that
//! build it:
//! - Library / Binary / Test: one action over sources, flattened dependency
//!   artifacts and toolchain auxiliary libraries
//! - SchemaLibrary: one generation action per output language (see `fanout`)
//!
//! A target whose toolchain cannot be resolved, or whose options are invalid,
//! fails on its own; targets depending on it are reported as blocked. Other
//! targets are still planned.

pub mod fanout;
pub mod template;
pub mod types;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::graph::{LinkMode, Target, TargetKind};
use crate::toolchain::{CommandKind, Language, Toolchain, ToolchainRegistry};

pub use types::{Action, ActionGraph, ActionId, ActionInput, BlockedTarget, CommandTemplate, PlanError};

/// Where planned actions read sources from and write outputs to.
#[derive(Debug, Clone)]
pub struct PlanConfig {
  /// Relative source paths resolve against this directory.
  pub root: PathBuf,
  pub out_dir: PathBuf,
  /// Triple for targets that don't name one.
  pub default_triple: String,
}

/// What a planned target exposes to its dependents.
#[derive(Debug, Clone)]
enum Produced {
  Single { path: PathBuf, action: ActionId },
  Generated(BTreeMap<Language, (PathBuf, ActionId)>),
}

#[derive(Debug, Clone)]
struct PlannedTarget {
  produced: Produced,
  /// Transitive dependencies, first occurrence wins, in link order.
  flat_deps: Vec<String>,
}

/// Artifacts of the targets planned so far.
#[derive(Debug, Default)]
pub struct PlannedArtifacts {
  targets: HashMap<String, PlannedTarget>,
}

impl PlannedArtifacts {
  /// The artifact `dependency` contributes to a consumer written in `language`.
  pub fn artifact(&self, consumer: &str, dependency: &str, language: &Language) -> Result<(PathBuf, ActionId), PlanError> {
    let planned = self
      .targets
      .get(dependency)
      .ok_or_else(|| PlanError::UnresolvedDependency {
        target: consumer.to_string(),
        dependency: dependency.to_string(),
      })?;

    match &planned.produced {
      Produced::Single { path, action } => Ok((path.clone(), *action)),
      Produced::Generated(outputs) => outputs
        .get(language)
        .cloned()
        .ok_or_else(|| PlanError::LanguageNotGenerated {
          target: consumer.to_string(),
          dependency: dependency.to_string(),
          language: language.clone(),
        }),
    }
  }

  /// Transitively flattened dependencies of a target: each declared dependency
  /// followed by its own flattened list, duplicates removed keeping the first.
  pub fn flatten(&self, target: &Target) -> Result<Vec<String>, PlanError> {
    let mut flat = Vec::new();
    let mut seen = HashSet::new();

    for dep in &target.deps {
      let planned = self.targets.get(dep).ok_or_else(|| PlanError::UnresolvedDependency {
        target: target.name.clone(),
        dependency: dep.clone(),
      })?;

      for name in std::iter::once(dep).chain(planned.flat_deps.iter()) {
        if seen.insert(name.as_str()) {
          flat.push(name.clone());
        }
      }
    }

    Ok(flat)
  }
}

pub struct Planner<'a> {
  registry: &'a ToolchainRegistry,
  config: &'a PlanConfig,
}

impl<'a> Planner<'a> {
  pub fn new(registry: &'a ToolchainRegistry, config: &'a PlanConfig) -> Self {
    Self { registry, config }
  }

  /// Plan a topologically ordered selection of targets.
  ///
  /// # Errors
  ///
  /// Only `UnresolvedDependency`, which graph validation rules out. Per-target
  /// failures are collected in `ActionGraph::failed`.
  pub fn plan(&self, targets: &[&Target]) -> Result<ActionGraph, PlanError> {
    let mut graph = ActionGraph::default();
    let mut upstream = PlannedArtifacts::default();
    let mut unavailable: HashSet<String> = HashSet::new();

    for target in targets {
      if let Some(dep) = target.deps.iter().find(|d| unavailable.contains(*d)) {
        warn!(target = %target.name, blocked_by = %dep, "not planning target, dependency failed planning");
        graph.blocked.push(BlockedTarget {
          target: target.name.clone(),
          blocked_by: dep.clone(),
        });
        unavailable.insert(target.name.clone());
        continue;
      }

      let flat_deps = upstream.flatten(target)?;
      let first_id = ActionId(graph.actions.len());

      let expanded = self
        .resolve_toolchain(target)
        .and_then(|toolchain| self.expand(target, &toolchain, &flat_deps, &upstream, first_id));

      let actions = match expanded {
        Ok(actions) => actions,
        Err(err @ PlanError::UnresolvedDependency { .. }) => return Err(err),
        Err(err) => {
          warn!(target = %target.name, error = %err, "target failed planning");
          unavailable.insert(target.name.clone());
          graph.failed.push(err);
          continue;
        }
      };

      let produced = match target.kind {
        TargetKind::SchemaLibrary => Produced::Generated(
          actions
            .iter()
            .filter_map(|a| Some((a.language.clone()?, (a.outputs[0].clone(), a.id))))
            .collect(),
        ),
        TargetKind::Library | TargetKind::Binary | TargetKind::Test => Produced::Single {
          path: actions[0].outputs[0].clone(),
          action: actions[0].id,
        },
      };

      debug!(target = %target.name, actions = actions.len(), "planned target");
      upstream
        .targets
        .insert(target.name.clone(), PlannedTarget { produced, flat_deps });
      graph
        .targets
        .push((target.name.clone(), actions.iter().map(|a| a.id).collect()));
      graph.actions.extend(actions);
    }

    info!(
      actions = graph.actions.len(),
      failed = graph.failed.len(),
      blocked = graph.blocked.len(),
      "planned actions"
    );

    Ok(graph)
  }

  fn resolve_toolchain(&self, target: &Target) -> Result<Arc<Toolchain>, PlanError> {
    self
      .registry
      .resolve(&target.language, self.triple_for(target))
      .map_err(|source| PlanError::MissingToolchain {
        target: target.name.clone(),
        source,
      })
  }

  fn triple_for<'t>(&'t self, target: &'t Target) -> &'t str {
    target.triple.as_deref().unwrap_or(&self.config.default_triple)
  }

  /// Expand one target into its actions, numbered from `first_id`.
  pub fn expand(
    &self,
    target: &Target,
    toolchain: &Arc<Toolchain>,
    flat_deps: &[String],
    upstream: &PlannedArtifacts,
    first_id: ActionId,
  ) -> Result<Vec<Action>, PlanError> {
    let kind = match target.kind {
      TargetKind::Library => CommandKind::Library,
      TargetKind::Binary => CommandKind::Binary,
      TargetKind::Test => CommandKind::Test,
      TargetKind::SchemaLibrary => CommandKind::Generate,
    };

    template::validate(toolchain.commands.for_kind(kind)).map_err(|source| PlanError::Template {
      target: target.name.clone(),
      kind,
      source,
    })?;

    let sources: Vec<ActionInput> = target
      .sources
      .iter()
      .map(|p| ActionInput::Source { path: self.resolve_path(p) })
      .collect();
    let triple = self.triple_for(target);

    match target.kind {
      TargetKind::SchemaLibrary => fanout::expand_schema(
        target,
        toolchain,
        &sources,
        flat_deps,
        upstream,
        &self.config.out_dir,
        triple,
        first_id,
      ),
      TargetKind::Library | TargetKind::Binary | TargetKind::Test => {
        validate_output_name(target)?;

        let mut inputs = sources;
        for dep in flat_deps {
          let (path, producer) = upstream.artifact(&target.name, dep, &target.language)?;
          inputs.push(ActionInput::Artifact { path, producer });
        }
        for lib in &toolchain.aux_libraries {
          inputs.push(ActionInput::AuxLibrary { path: self.resolve_path(lib) });
        }

        let output = self.config.out_dir.join(&target.name).join(artifact_file_name(target, triple));

        Ok(vec![Action {
          id: first_id,
          label: target.name.clone(),
          target: target.name.clone(),
          kind,
          language: None,
          command: CommandTemplate {
            program: toolchain.compiler.clone(),
            args: toolchain.commands.for_kind(kind).to_vec(),
          },
          vars: base_vars(target, triple),
          deps: dedup_producers(&inputs),
          inputs,
          outputs: vec![output],
          toolchain: toolchain.clone(),
        }])
      }
    }
  }

  fn resolve_path(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.config.root.join(path)
    }
  }
}

/// Scalar template variables shared by every action of a target.
fn base_vars(target: &Target, triple: &str) -> BTreeMap<String, String> {
  let mut vars = BTreeMap::new();
  vars.insert("name".to_string(), target.name.clone());
  vars.insert("lang".to_string(), target.language.to_string());
  vars.insert("opt".to_string(), target.options.opt_level.clone());
  vars.insert("edition".to_string(), target.options.edition.clone().unwrap_or_default());
  vars.insert("link".to_string(), target.options.link_mode.as_str().to_string());
  vars.insert("triple".to_string(), triple.to_string());
  vars
}

/// Producers of the artifact inputs, first occurrence wins.
fn dedup_producers(inputs: &[ActionInput]) -> Vec<ActionId> {
  let mut seen = HashSet::new();
  inputs
    .iter()
    .filter_map(|input| match input {
      ActionInput::Artifact { producer, .. } if seen.insert(*producer) => Some(*producer),
      _ => None,
    })
    .collect()
}

/// An `output` override must be a plain file name inside the target's directory.
fn validate_output_name(target: &Target) -> Result<(), PlanError> {
  let Some(name) = &target.options.output else {
    return Ok(());
  };
  if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
    return Err(PlanError::InvalidOutputSpec {
      target: target.name.clone(),
      reason: format!("output '{}' must be a plain file name", name),
    });
  }
  Ok(())
}

/// Default artifact file name for a non-schema target on a triple.
pub fn artifact_file_name(target: &Target, triple: &str) -> String {
  if let Some(name) = &target.options.output {
    return name.clone();
  }

  let windows = triple.contains("windows");
  let darwin = triple.contains("darwin") || triple.contains("apple");

  match (target.kind, target.options.link_mode) {
    (TargetKind::Library, LinkMode::Static) if windows => format!("{}.lib", target.name),
    (TargetKind::Library, LinkMode::Static) => format!("lib{}.a", target.name),
    (TargetKind::Library, LinkMode::Dynamic) if windows => format!("{}.dll", target.name),
    (TargetKind::Library, LinkMode::Dynamic) if darwin => format!("lib{}.dylib", target.name),
    (TargetKind::Library, LinkMode::Dynamic) => format!("lib{}.so", target.name),
    (TargetKind::Binary, _) if windows => format!("{}.exe", target.name),
    (TargetKind::Test, _) if windows => format!("{}-test.exe", target.name),
    (TargetKind::Binary, _) => target.name.clone(),
    (TargetKind::Test, _) => format!("{}-test", target.name),
    (TargetKind::SchemaLibrary, _) => target.name.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::BuildGraph;

  const TRIPLE: &str = "x86_64-unknown-linux-gnu";

  fn config() -> PlanConfig {
    PlanConfig {
      root: PathBuf::from("/ws"),
      out_dir: PathBuf::from("/ws/out"),
      default_triple: TRIPLE.to_string(),
    }
  }

  fn registry() -> ToolchainRegistry {
    let mut registry = ToolchainRegistry::new();
    registry
      .register(Toolchain::new("c", TRIPLE, "/usr/bin/cc").with_aux_libraries(vec![PathBuf::from("/sys/libc.a")]))
      .unwrap();
    registry.register(Toolchain::new("proto", TRIPLE, "/usr/bin/protoc")).unwrap();
    registry
  }

  fn lib(name: &str, deps: &[&str]) -> Target {
    Target::new(name, TargetKind::Library, "c")
      .with_sources([format!("{}.c", name)])
      .with_deps(deps.iter().copied())
  }

  fn plan_all(rules: Vec<Target>) -> ActionGraph {
    let graph = BuildGraph::build(rules).unwrap();
    let targets = graph.closure::<&str>(&[]).unwrap();
    let registry = registry();
    let config = config();
    Planner::new(&registry, &config).plan(&targets).unwrap()
  }

  fn input_paths(action: &Action) -> Vec<String> {
    action.inputs.iter().map(|i| i.path().display().to_string()).collect()
  }

  #[test]
  fn library_and_binary_plan_two_actions() {
    let plan = plan_all(vec![
      lib("a", &[]),
      Target::new("b", TargetKind::Binary, "c").with_sources(["main.c"]).with_deps(["a"]),
    ]);

    assert_eq!(plan.len(), 2);
    let b = &plan.actions[1];
    assert_eq!(b.deps, vec![ActionId(0)]);
    assert_eq!(b.outputs, vec![PathBuf::from("/ws/out/b/b")]);
    assert_eq!(
      input_paths(b),
      vec!["/ws/main.c", "/ws/out/a/liba.a", "/sys/libc.a"]
    );
    assert!(plan.is_complete());
  }

  #[test]
  fn deps_flattened_in_link_order_without_duplicates() {
    let plan = plan_all(vec![
      lib("c", &[]),
      lib("a", &["c"]),
      lib("d", &[]),
      lib("b", &["a", "c", "d"]),
    ]);

    let b = plan.get(plan.actions_for("b")[0]).unwrap();
    assert_eq!(
      input_paths(b),
      vec![
        "/ws/b.c",
        "/ws/out/a/liba.a",
        "/ws/out/c/libc.a",
        "/ws/out/d/libd.a",
        "/sys/libc.a"
      ]
    );
    assert_eq!(b.deps.len(), 3);
  }

  #[test]
  fn schema_fans_out_per_language() {
    let plan = plan_all(vec![
      Target::new("msgs", TargetKind::SchemaLibrary, "proto")
        .with_sources(["msgs.proto"])
        .with_output_languages(["rust", "c", "python"]),
    ]);

    assert_eq!(plan.len(), 3);
    for action in &plan.actions {
      assert!(action.deps.is_empty(), "fanout actions are independent");
      assert_eq!(input_paths(action), vec!["/ws/msgs.proto"]);
      assert_eq!(action.kind, CommandKind::Generate);
    }
    assert_eq!(plan.actions[0].label, "msgs#rust");
    assert_eq!(plan.actions[1].outputs, vec![PathBuf::from("/ws/out/msgs/gen/c/msgs.h")]);
  }

  #[test]
  fn schema_deps_form_per_language_subdag() {
    let plan = plan_all(vec![
      Target::new("base", TargetKind::SchemaLibrary, "proto")
        .with_sources(["base.proto"])
        .with_output_languages(["rust", "c"]),
      Target::new("api", TargetKind::SchemaLibrary, "proto")
        .with_sources(["api.proto"])
        .with_deps(["base"])
        .with_output_languages(["c", "rust"]),
    ]);

    let api_c = &plan.actions[2];
    assert_eq!(api_c.label, "api#c");
    assert_eq!(api_c.deps, vec![ActionId(1)]);
    let api_rust = &plan.actions[3];
    assert_eq!(api_rust.deps, vec![ActionId(0)]);
  }

  #[test]
  fn library_consumes_generated_code_in_its_language() {
    let plan = plan_all(vec![
      Target::new("msgs", TargetKind::SchemaLibrary, "proto")
        .with_sources(["msgs.proto"])
        .with_output_languages(["rust", "c"]),
      lib("client", &["msgs"]),
    ]);

    let client = plan.get(plan.actions_for("client")[0]).unwrap();
    assert!(input_paths(client).contains(&"/ws/out/msgs/gen/c/msgs.h".to_string()));
    assert_eq!(client.deps, vec![ActionId(1)]);
  }

  #[test]
  fn missing_generated_language_fails_consumer() {
    let plan = plan_all(vec![
      Target::new("msgs", TargetKind::SchemaLibrary, "proto")
        .with_sources(["msgs.proto"])
        .with_output_languages(["rust"]),
      lib("client", &["msgs"]),
    ]);

    assert_eq!(plan.failed.len(), 1);
    assert!(matches!(plan.failed[0], PlanError::LanguageNotGenerated { .. }));
  }

  #[test]
  fn missing_toolchain_fails_only_that_target() {
    let plan = plan_all(vec![
      lib("a", &[]),
      Target::new("z", TargetKind::Library, "zig").with_sources(["z.zig"]),
      lib("uses_z", &["z"]),
    ]);

    assert_eq!(plan.len(), 1);
    assert_eq!(plan.actions[0].target, "a");
    assert_eq!(plan.failed.len(), 1);
    assert!(plan.failed[0].is_toolchain_error());
    assert_eq!(plan.failed[0].target(), "z");
    assert_eq!(
      plan.blocked,
      vec![BlockedTarget {
        target: "uses_z".into(),
        blocked_by: "z".into()
      }]
    );
  }

  #[test]
  fn schema_without_languages_is_invalid_output_spec() {
    let plan = plan_all(vec![Target::new("s", TargetKind::SchemaLibrary, "proto").with_sources(["s.proto"])]);
    assert!(plan.is_empty());
    assert!(matches!(plan.failed[0], PlanError::InvalidOutputSpec { .. }));
  }

  #[test]
  fn bad_template_fails_target() {
    let mut registry = ToolchainRegistry::new();
    registry
      .register(Toolchain::new("c", TRIPLE, "cc").with_command(CommandKind::Library, vec!["$${bogus}".into()]))
      .unwrap();
    let graph = BuildGraph::build(vec![lib("a", &[])]).unwrap();
    let targets = graph.closure::<&str>(&[]).unwrap();
    let config = config();
    let plan = Planner::new(&registry, &config).plan(&targets).unwrap();
    assert!(matches!(plan.failed[0], PlanError::Template { .. }));
  }

  #[test]
  fn output_override_must_be_file_name() {
    let mut escaping = lib("a", &[]);
    escaping.options.output = Some("../elsewhere.a".into());
    let mut renamed = lib("b", &[]);
    renamed.options.output = Some("b.lib".into());

    let plan = plan_all(vec![escaping, renamed]);
    assert!(matches!(plan.failed[0], PlanError::InvalidOutputSpec { ref target, .. } if target == "a"));
    assert_eq!(plan.actions[0].outputs, vec![PathBuf::from("/ws/out/b/b.lib")]);
  }

  #[test]
  fn target_triple_overrides_default() {
    let mut registry = registry();
    registry.register(Toolchain::new("c", "x86_64-pc-windows-msvc", "cl.exe")).unwrap();
    let graph = BuildGraph::build(vec![
      Target::new("app", TargetKind::Binary, "c")
        .with_sources(["main.c"])
        .with_triple("x86_64-pc-windows-msvc"),
    ])
    .unwrap();
    let targets = graph.closure::<&str>(&[]).unwrap();
    let config = config();
    let plan = Planner::new(&registry, &config).plan(&targets).unwrap();

    let action = &plan.actions[0];
    assert_eq!(action.command.program, PathBuf::from("cl.exe"));
    assert_eq!(action.outputs, vec![PathBuf::from("/ws/out/app/app.exe")]);
    assert_eq!(action.vars["triple"], "x86_64-pc-windows-msvc");
  }

  #[test]
  fn artifact_names() {
    let mut t = lib("core", &[]);
    assert_eq!(artifact_file_name(&t, TRIPLE), "libcore.a");
    t.options.link_mode = LinkMode::Dynamic;
    assert_eq!(artifact_file_name(&t, TRIPLE), "libcore.so");
    assert_eq!(artifact_file_name(&t, "aarch64-apple-darwin"), "libcore.dylib");
    t.options.output = Some("custom.bin".into());
    assert_eq!(artifact_file_name(&t, TRIPLE), "custom.bin");

    let test = Target::new("core", TargetKind::Test, "c");
    assert_eq!(artifact_file_name(&test, TRIPLE), "core-test");
  }
}
