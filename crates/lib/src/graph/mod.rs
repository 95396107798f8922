//! Dependency graph over buildable and external targets.
//!
//! Edges run from a dependency to its dependent. Aliases are replaced by their
//! referents, and every buildable target gets an implicit edge from each
//! external executor its generators need, so externals are located before the
//! targets that run them.
//!
//! The topological order is stable: among targets whose dependencies are
//! satisfied, the one declared first comes first.

mod cycle;

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::dispatch;
use crate::registry::{ConfigError, Registry};
use crate::target::TargetId;

/// A cycle-free dependency graph built from a finalized registry.
#[derive(Debug)]
pub struct Graph {
  registry: Arc<Registry>,
  dag: DiGraph<TargetId, ()>,
  nodes: HashMap<TargetId, NodeIndex>,
  order: Vec<TargetId>,
}

/// Finalize `registry` and build its dependency graph.
///
/// # Errors
///
/// Returns any load-phase [`ConfigError`], including `DependencyCycle`.
pub fn load_complete(mut registry: Registry) -> Result<Graph, ConfigError> {
  registry.finalize()?;
  build_graph(Arc::new(registry))
}

/// Build the dependency graph of a finalized registry.
///
/// # Errors
///
/// - `NotFinalized` if the registry was not finalized
/// - `DependencyCycle` naming every target of the first cycle found
pub fn build_graph(registry: Arc<Registry>) -> Result<Graph, ConfigError> {
  if !registry.is_finalized() {
    return Err(ConfigError::NotFinalized);
  }

  let mut dag = DiGraph::new();
  let mut nodes = HashMap::new();

  // First pass: one node per buildable or external target
  for (id, target) in registry.iter() {
    if target.kind().is_graph_node() {
      nodes.insert(id, dag.add_node(id));
    }
  }

  // Second pass: edges from dependency to dependent
  for (id, target) in registry.iter() {
    let Some(def) = target.as_buildable() else {
      continue;
    };
    let dependent = nodes[&id];

    for &dep in &def.dependencies {
      if let Some(&dep_idx) = nodes.get(&registry.resolve(dep)) {
        dag.update_edge(dep_idx, dependent, ());
      }
    }

    for executor in implicit_executors(&registry, id) {
      if let Some(&exe_idx) = nodes.get(&executor) {
        dag.update_edge(exe_idx, dependent, ());
      }
    }
  }

  let mut graph = Graph {
    registry,
    dag,
    nodes,
    order: Vec::new(),
  };
  graph.verify_acyclic()?;
  graph.order = graph.stable_order();

  debug!(
    nodes = graph.dag.node_count(),
    edges = graph.dag.edge_count(),
    "dependency graph built"
  );
  Ok(graph)
}

/// External executors of every generator `target` will run.
///
/// Sources whose generator cannot be chosen are skipped here; the builder
/// reports them when it dispatches the source.
fn implicit_executors(registry: &Registry, target: TargetId) -> BTreeSet<TargetId> {
  let mut generators = BTreeSet::new();

  if let Some(def) = registry.target(target).as_buildable() {
    for source in &def.sources {
      if let Ok(generator) = dispatch::select_generator(registry, target, source) {
        generators.insert(generator);
      }
    }
  }
  if let Ok(Some(link)) = registry.link_generator(target) {
    generators.insert(link);
  }

  generators
    .into_iter()
    .filter_map(|generator| registry.target(generator).as_generator())
    .map(|def| registry.resolve(def.executor))
    .collect()
}

impl Graph {
  fn verify_acyclic(&self) -> Result<(), ConfigError> {
    let mut ids: Vec<TargetId> = self.nodes.keys().copied().collect();
    ids.sort();

    let dependencies: HashMap<TargetId, Vec<TargetId>> = ids.iter().map(|&id| (id, self.dependencies(id))).collect();

    match cycle::find_cycle(&ids, &dependencies) {
      Some(path) => Err(ConfigError::DependencyCycle {
        path: path.into_iter().map(|id| self.registry.label(id)).collect(),
      }),
      None => Ok(()),
    }
  }

  /// Kahn's algorithm with ties broken by declaration order.
  fn stable_order(&self) -> Vec<TargetId> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .dag
      .node_indices()
      .map(|idx| (idx, self.dag.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();

    let mut ready: BinaryHeap<Reverse<TargetId>> = in_degree
      .iter()
      .filter(|&(_, &degree)| degree == 0)
      .map(|(&idx, _)| Reverse(self.dag[idx]))
      .collect();

    let mut order = Vec::with_capacity(self.nodes.len());
    while let Some(Reverse(id)) = ready.pop() {
      order.push(id);
      for next in self.dag.neighbors_directed(self.nodes[&id], Direction::Outgoing) {
        if let Some(degree) = in_degree.get_mut(&next) {
          *degree -= 1;
          if *degree == 0 {
            ready.push(Reverse(self.dag[next]));
          }
        }
      }
    }
    order
  }

  pub fn registry(&self) -> &Arc<Registry> {
    &self.registry
  }

  pub fn contains(&self, id: TargetId) -> bool {
    self.nodes.contains_key(&id)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Graph nodes in build order, dependencies before dependents.
  pub fn topological_order(&self) -> &[TargetId] {
    &self.order
  }

  /// Direct dependencies of `id`, in declaration order.
  pub fn dependencies(&self, id: TargetId) -> Vec<TargetId> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Direct dependents of `id`, in declaration order.
  pub fn dependents(&self, id: TargetId) -> Vec<TargetId> {
    self.neighbors(id, Direction::Outgoing)
  }

  fn neighbors(&self, id: TargetId, direction: Direction) -> Vec<TargetId> {
    let Some(&idx) = self.nodes.get(&id) else {
      return Vec::new();
    };
    let mut ids: Vec<TargetId> = self
      .dag
      .neighbors_directed(idx, direction)
      .map(|n| self.dag[n])
      .collect();
    ids.sort();
    ids.dedup();
    ids
  }

  /// `(dependency, dependent)` pairs.
  pub fn edges(&self) -> impl Iterator<Item = (TargetId, TargetId)> + '_ {
    self
      .dag
      .edge_indices()
      .filter_map(|edge| self.dag.edge_endpoints(edge))
      .map(|(from, to)| (self.dag[from], self.dag[to]))
  }

  /// `requested` and everything they transitively depend on.
  ///
  /// Aliases are resolved; ids that are not graph nodes are ignored.
  pub fn closure(&self, requested: &[TargetId]) -> BTreeSet<TargetId> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<TargetId> = requested
      .iter()
      .map(|&id| self.registry.resolve(id))
      .filter(|id| self.contains(*id))
      .collect();

    while let Some(id) = stack.pop() {
      if seen.insert(id) {
        stack.extend(self.dependencies(id));
      }
    }
    seen
  }

  /// Group `subset` into waves.
  ///
  /// A target's wave is one past the latest wave of its dependencies within
  /// the subset. Each wave is sorted by declaration order.
  pub fn waves(&self, subset: &BTreeSet<TargetId>) -> Vec<Vec<TargetId>> {
    let mut level: HashMap<TargetId, usize> = HashMap::new();
    let mut waves: Vec<Vec<TargetId>> = Vec::new();

    for &id in self.order.iter().filter(|id| subset.contains(id)) {
      let wave = self
        .dependencies(id)
        .iter()
        .filter_map(|dep| level.get(dep))
        .map(|&l| l + 1)
        .max()
        .unwrap_or(0);
      level.insert(id, wave);

      if waves.len() <= wave {
        waves.resize_with(wave + 1, Vec::new);
      }
      waves[wave].push(id);
    }

    for wave in &mut waves {
      wave.sort();
    }
    waves
  }
}
