//! Per-target build state.
//!
//! Each target owns a `watch` channel holding its state. Every transition goes
//! through `send_if_modified`, which runs under the channel's lock, so the
//! check-and-set that moves a target to `Building` happens exactly once. Other
//! callers observe `Building` and wait on the channel for a terminal state.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::watch;

use super::types::{BuildReport, Failure, TargetReport, TargetState};
use crate::graph::Graph;
use crate::target::TargetId;

#[derive(Debug, Clone, Default)]
pub(crate) struct Slot {
  pub(crate) state: TargetState,
  pub(crate) started: Option<Instant>,
  pub(crate) finished: Option<Instant>,
  pub(crate) failure: Option<Failure>,
}

/// Outcome of trying to start a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
  /// The caller moved the target to `Building` and must finish it.
  Acquired,
  /// Another caller is building it.
  InFlight,
  /// Already terminal.
  Finished(TargetState),
}

#[derive(Debug)]
pub(crate) struct StateTable {
  epoch: Instant,
  slots: HashMap<TargetId, watch::Sender<Slot>>,
}

impl StateTable {
  pub(crate) fn new(graph: &Graph) -> Self {
    let registry = graph.registry();
    let slots = graph
      .topological_order()
      .iter()
      .map(|&id| {
        let target = registry.target(id);
        let state = if target.as_external().is_some() && !target.is_resolved() {
          TargetState::Unresolved
        } else {
          TargetState::Pending
        };
        let (tx, _) = watch::channel(Slot {
          state,
          ..Slot::default()
        });
        (id, tx)
      })
      .collect();

    Self {
      epoch: Instant::now(),
      slots,
    }
  }

  pub(crate) fn state(&self, id: TargetId) -> Option<TargetState> {
    self.slots.get(&id).map(|slot| slot.borrow().state)
  }

  pub(crate) fn failure(&self, id: TargetId) -> Option<Failure> {
    self.slots.get(&id).and_then(|slot| slot.borrow().failure.clone())
  }

  /// Move a waiting target to `Ready`.
  pub(crate) fn mark_ready(&self, id: TargetId) -> bool {
    self.transition(id, |slot| {
      if matches!(slot.state, TargetState::Pending | TargetState::Unresolved) {
        slot.state = TargetState::Ready;
        true
      } else {
        false
      }
    })
  }

  /// Try to become the one caller building `id`.
  pub(crate) fn claim(&self, id: TargetId) -> Claim {
    let Some(slot) = self.slots.get(&id) else {
      return Claim::Finished(TargetState::Failed);
    };

    let mut claim = Claim::InFlight;
    slot.send_if_modified(|slot| match slot.state {
      TargetState::Building => false,
      state if state.is_terminal() => {
        claim = Claim::Finished(state);
        false
      }
      _ => {
        slot.state = TargetState::Building;
        slot.started = Some(Instant::now());
        claim = Claim::Acquired;
        true
      }
    });
    claim
  }

  /// Record the result of a build the caller claimed.
  ///
  /// Returns false if the target was not `Building`, e.g. when a builder
  /// reports the same target twice.
  pub(crate) fn finish(&self, id: TargetId, result: Result<(), Failure>) -> bool {
    self.transition(id, |slot| {
      if slot.state != TargetState::Building {
        return false;
      }
      slot.finished = Some(Instant::now());
      match result {
        Ok(()) => slot.state = TargetState::Built,
        Err(failure) => {
          slot.state = TargetState::Failed;
          slot.failure = Some(failure);
        }
      }
      true
    })
  }

  /// Fail a target that never started, e.g. because a dependency failed.
  pub(crate) fn fail_unstarted(&self, id: TargetId, failure: Failure) -> bool {
    self.transition(id, |slot| {
      if slot.state.is_terminal() || slot.state == TargetState::Building {
        return false;
      }
      slot.state = TargetState::Failed;
      slot.finished = Some(Instant::now());
      slot.failure = Some(failure);
      true
    })
  }

  /// Wait until `id` reaches a terminal state.
  pub(crate) async fn wait(&self, id: TargetId) -> TargetState {
    let Some(slot) = self.slots.get(&id) else {
      return TargetState::Failed;
    };
    let mut rx = slot.subscribe();
    match rx.wait_for(|slot| slot.state.is_terminal()).await {
      Ok(slot) => slot.state,
      Err(_) => TargetState::Failed,
    }
  }

  fn transition(&self, id: TargetId, apply: impl FnOnce(&mut Slot) -> bool) -> bool {
    self.slots.get(&id).is_some_and(|slot| slot.send_if_modified(apply))
  }

  pub(crate) fn report(&self, graph: &Graph, ids: impl IntoIterator<Item = TargetId>) -> BuildReport {
    let registry = graph.registry();
    let mut targets: Vec<TargetReport> = ids
      .into_iter()
      .filter_map(|id| {
        let slot = self.slots.get(&id)?.borrow().clone();
        let target = registry.target(id);
        Some(TargetReport {
          id,
          label: target.label(),
          kind: target.kind(),
          state: slot.state,
          failure: slot.failure,
          started_at: slot.started.map(|t| t.duration_since(self.epoch)),
          finished_at: slot.finished.map(|t| t.duration_since(self.epoch)),
        })
      })
      .collect();
    targets.sort_by_key(|t| t.id);
    targets.dedup_by_key(|t| t.id);
    BuildReport { targets }
  }
}
