//! Cycle detection over target dependencies.

use std::collections::HashMap;

use crate::target::TargetId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum VisitState {
  Visiting,
  Visited,
}

/// Find a dependency cycle, if any.
///
/// `dependencies` maps each node to the nodes it depends on. The returned path
/// starts and ends with the same node and is rotated to begin at the lowest id,
/// so the same cycle is reported identically across runs.
pub(crate) fn find_cycle(nodes: &[TargetId], dependencies: &HashMap<TargetId, Vec<TargetId>>) -> Option<Vec<TargetId>> {
  let mut detector = CycleDetector {
    dependencies,
    stack: Vec::new(),
    states: HashMap::new(),
  };

  for &node in nodes {
    if let Some(cycle) = detector.visit(node) {
      return Some(canonicalize_cycle(cycle));
    }
  }
  None
}

struct CycleDetector<'a> {
  dependencies: &'a HashMap<TargetId, Vec<TargetId>>,
  stack: Vec<TargetId>,
  states: HashMap<TargetId, VisitState>,
}

impl CycleDetector<'_> {
  fn visit(&mut self, node: TargetId) -> Option<Vec<TargetId>> {
    match self.states.get(&node) {
      Some(VisitState::Visited) => return None,
      Some(VisitState::Visiting) => {
        let idx = self.stack.iter().position(|&n| n == node).unwrap_or(0);
        let mut cycle = self.stack[idx..].to_vec();
        cycle.push(node);
        return Some(cycle);
      }
      None => {
        self.states.insert(node, VisitState::Visiting);
      }
    }

    self.stack.push(node);
    if let Some(deps) = self.dependencies.get(&node) {
      for &dep in deps {
        if let Some(cycle) = self.visit(dep) {
          return Some(cycle);
        }
      }
    }
    self.stack.pop();
    self.states.insert(node, VisitState::Visited);
    None
  }
}

fn canonicalize_cycle(mut cycle: Vec<TargetId>) -> Vec<TargetId> {
  if cycle.len() < 2 {
    return cycle;
  }
  let len = cycle.len() - 1;
  let start = cycle[..len]
    .iter()
    .enumerate()
    .min_by_key(|(_, id)| **id)
    .map_or(0, |(idx, _)| idx);
  cycle[..len].rotate_left(start);
  cycle[len] = cycle[0];
  cycle
}
