//! Target dependency graph.
//!
//! This module turns declarative target definitions into an immutable DAG:
//! - Name uniqueness and reference integrity
//! - Dependency kind compatibility
//! - Cycle detection (three-color DFS)
//! - A stable topological order, ties broken by declaration order
//!
//! Targets live in a petgraph arena addressed by stable `NodeIndex` values;
//! node index `i` is the `i`-th declared target.

mod cycle;
mod types;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::Direction;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use tracing::debug;

pub use types::{GraphError, LinkMode, Target, TargetKind, TargetOptions};

/// Label selecting every target in the workspace.
pub const ALL_TARGETS: &str = "//...";

/// A validated, immutable target DAG.
#[derive(Debug, Clone)]
pub struct BuildGraph {
  /// Edges point from a dependency to its dependent.
  graph: DiGraph<Target, ()>,

  /// Map from target name to node index.
  index: HashMap<String, NodeIndex>,

  /// Direct dependencies of each node, in declared order.
  deps: Vec<Vec<NodeIndex>>,

  /// Topological order (dependencies first).
  order: Vec<NodeIndex>,

  /// Position of each node in `order`.
  position: Vec<usize>,
}

impl BuildGraph {
  /// Build and validate a graph from target definitions.
  ///
  /// # Errors
  ///
  /// Returns a `GraphError` for duplicate or malformed names, unknown or
  /// repeated dependencies, incompatible dependency kinds, and cycles.
  pub fn build(rules: impl IntoIterator<Item = Target>) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut index = HashMap::new();

    // First pass: one node per target, in declaration order
    for target in rules {
      if !is_valid_name(&target.name) {
        return Err(GraphError::InvalidTargetName { name: target.name });
      }
      if index.contains_key(&target.name) {
        return Err(GraphError::DuplicateTarget { name: target.name });
      }
      let name = target.name.clone();
      let idx = graph.add_node(target);
      index.insert(name, idx);
    }

    // Second pass: resolve dependency names into edges
    let mut deps: Vec<Vec<NodeIndex>> = Vec::with_capacity(graph.node_count());
    for idx in graph.node_indices() {
      let target = &graph[idx];
      let mut resolved = Vec::with_capacity(target.deps.len());
      let mut seen = HashSet::new();

      for dep_name in &target.deps {
        let Some(&dep_idx) = index.get(dep_name) else {
          return Err(GraphError::UnresolvedDependency {
            target: target.name.clone(),
            dependency: dep_name.clone(),
          });
        };
        if !seen.insert(dep_idx) {
          return Err(GraphError::DuplicateDependency {
            target: target.name.clone(),
            dependency: dep_name.clone(),
          });
        }
        check_dependency_kind(target, &graph[dep_idx])?;
        resolved.push(dep_idx);
      }

      deps.push(resolved);
    }

    for (dependent, dep_list) in deps.iter().enumerate() {
      for &dep in dep_list {
        graph.add_edge(dep, NodeIndex::new(dependent), ());
      }
    }

    // Verify no cycles
    let plain: Vec<Vec<usize>> = deps.iter().map(|d| d.iter().map(|n| n.index()).collect()).collect();
    if let Some(cycle) = cycle::find_cycle(&plain) {
      return Err(GraphError::Cycle {
        cycle: cycle.into_iter().map(|i| graph[NodeIndex::new(i)].name.clone()).collect(),
      });
    }

    let order = stable_toposort(&graph, &deps);
    let mut position = vec![0; order.len()];
    for (pos, idx) in order.iter().enumerate() {
      position[idx.index()] = pos;
    }

    debug!(targets = graph.node_count(), edges = graph.edge_count(), "built target graph");

    Ok(Self {
      graph,
      index,
      deps,
      order,
      position,
    })
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  pub fn get(&self, name: &str) -> Option<&Target> {
    self.index.get(name).map(|&idx| &self.graph[idx])
  }

  pub fn contains(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  /// All targets, dependencies before dependents.
  pub fn topological_order(&self) -> impl Iterator<Item = &Target> {
    self.order.iter().map(|&idx| &self.graph[idx])
  }

  /// Direct dependencies of a target, in declared order.
  pub fn dependencies(&self, name: &str) -> Vec<&Target> {
    let Some(&idx) = self.index.get(name) else {
      return Vec::new();
    };
    self.deps[idx.index()].iter().map(|&d| &self.graph[d]).collect()
  }

  /// Graphviz rendering; edges point from a dependency to its dependent.
  pub fn to_dot(&self) -> String {
    let dot = Dot::with_attr_getters(
      &self.graph,
      &[Config::EdgeNoLabel, Config::NodeNoLabel],
      &|_, _| String::new(),
      &|_, (_, target)| format!("label = \"{}\\n{} ({})\"", target.name, target.kind, target.language),
    );
    format!("{:?}", dot)
  }

  /// All transitive dependents of a target, in topological order.
  pub fn dependents(&self, name: &str) -> Vec<&Target> {
    let Some(&start) = self.index.get(name) else {
      return Vec::new();
    };

    let mut found = Vec::new();
    let mut dfs = Dfs::new(&self.graph, start);
    while let Some(idx) = dfs.next(&self.graph) {
      if idx != start {
        found.push(idx);
      }
    }
    self.in_order(found)
  }

  /// Requested targets plus all their transitive dependencies, in topological order.
  ///
  /// Labels are `name` or `//name`. An empty list or `//...` selects everything.
  pub fn closure<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<&Target>, GraphError> {
    if labels.is_empty() || labels.iter().any(|l| l.as_ref() == ALL_TARGETS) {
      return Ok(self.topological_order().collect());
    }

    let reversed = Reversed(&self.graph);
    let mut selected = HashSet::new();

    for label in labels {
      let name = label.as_ref().strip_prefix("//").unwrap_or(label.as_ref());
      let Some(&start) = self.index.get(name) else {
        return Err(GraphError::UnknownTarget {
          label: label.as_ref().to_string(),
        });
      };

      let mut dfs = Dfs::new(reversed, start);
      while let Some(idx) = dfs.next(reversed) {
        selected.insert(idx);
      }
    }

    Ok(self.in_order(selected.into_iter().collect()))
  }

  fn in_order(&self, mut nodes: Vec<NodeIndex>) -> Vec<&Target> {
    nodes.sort_by_key(|idx| self.position[idx.index()]);
    nodes.into_iter().map(|idx| &self.graph[idx]).collect()
  }
}

/// Kahn's algorithm, always releasing the earliest-declared ready target.
fn stable_toposort(graph: &DiGraph<Target, ()>, deps: &[Vec<NodeIndex>]) -> Vec<NodeIndex> {
  let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
  let mut ready: BinaryHeap<Reverse<usize>> = in_degree
    .iter()
    .enumerate()
    .filter(|(_, d)| **d == 0)
    .map(|(i, _)| Reverse(i))
    .collect();

  let mut order = Vec::with_capacity(deps.len());
  while let Some(Reverse(i)) = ready.pop() {
    let idx = NodeIndex::new(i);
    order.push(idx);
    for dependent in graph.neighbors_directed(idx, Direction::Outgoing) {
      let d = &mut in_degree[dependent.index()];
      *d -= 1;
      if *d == 0 {
        ready.push(Reverse(dependent.index()));
      }
    }
  }

  order
}

fn is_valid_name(name: &str) -> bool {
  !name.is_empty()
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn check_dependency_kind(target: &Target, dep: &Target) -> Result<(), GraphError> {
  let reason = match (target.kind, dep.kind) {
    (_, TargetKind::Test) => "test targets cannot be depended on",
    (TargetKind::SchemaLibrary, kind) if kind != TargetKind::SchemaLibrary => {
      "schema libraries may only depend on schema libraries"
    }
    _ => return Ok(()),
  };

  Err(GraphError::InvalidDependency {
    target: target.name.clone(),
    dependency: dep.name.clone(),
    reason: reason.to_string(),
  })
}
