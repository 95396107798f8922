//! Build execution.
//!
//! The engine runs the dependency closure of the requested targets wave by
//! wave. Within a wave, externals are handed to finders one by one and
//! buildable targets are grouped by kind into one batch per builder; all of it
//! runs concurrently, bounded by a semaphore. A target whose dependency failed
//! is failed by propagation and never attempted, while unrelated branches keep
//! going.
//!
//! Every state transition goes through the per-target guard in [`state`], so a
//! target requested by several concurrent runs is built at most once and later
//! requests wait for that attempt.

mod context;
mod state;
mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::graph::Graph;
use crate::hooks::{Builder, FindOutcome};
use crate::target::{TargetId, TargetKind};

use state::{Claim, StateTable};

pub use context::BuildContext;
pub use types::{
  BUILD_DIR_ENV, BuildReport, DRY_RUN_ENV, EngineConfig, ExecuteError, Failure, FailureKind, JOBS_ENV, ReportSummary,
  TargetReport, TargetState,
};

/// Run the build of `requested` (or of the whole graph if empty) on a fresh engine.
///
/// # Errors
///
/// Returns `NotBuildable` if a requested target is not part of the graph and
/// `NoBuilderForKind` if a wave needs a builder nobody registered. Failures of
/// individual targets are reported in the [`BuildReport`] instead.
pub async fn run(graph: Arc<Graph>, requested: &[TargetId], config: EngineConfig) -> Result<BuildReport, ExecuteError> {
  Engine::new(graph, config).run(requested).await
}

/// Executes builds against one graph.
///
/// Cloning is cheap; clones share build state, so concurrent runs on clones
/// never build the same target twice.
#[derive(Debug, Clone)]
pub struct Engine {
  graph: Arc<Graph>,
  config: Arc<EngineConfig>,
  states: Arc<StateTable>,
  semaphore: Arc<Semaphore>,
}

impl Engine {
  pub fn new(graph: Arc<Graph>, config: EngineConfig) -> Self {
    let states = Arc::new(StateTable::new(&graph));
    let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
    Self {
      graph,
      config: Arc::new(config),
      states,
      semaphore,
    }
  }

  pub fn graph(&self) -> &Arc<Graph> {
    &self.graph
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn state(&self, id: TargetId) -> Option<TargetState> {
    self.states.state(id)
  }

  /// Build `requested` and their transitive dependencies.
  ///
  /// Aliases build their referent. An empty request builds every buildable
  /// target together with the externals they need; externals nothing depends
  /// on are not looked up.
  pub async fn run(&self, requested: &[TargetId]) -> Result<BuildReport, ExecuteError> {
    let targets = self.plan(requested)?;
    let waves = self.graph.waves(&targets);
    info!(targets = targets.len(), waves = waves.len(), "starting build");

    for (wave_idx, wave) in waves.iter().enumerate() {
      debug!(wave = wave_idx, targets = wave.len(), "executing wave");
      self.execute_wave(wave).await?;

      let report = self.states.report(&self.graph, targets.iter().copied());
      let summary = report.summary();
      info!(
        wave = wave_idx,
        complete = summary.built,
        failed = summary.failed,
        remaining = summary.unfinished,
        total = summary.total,
        "wave finished"
      );
    }

    let report = self.states.report(&self.graph, targets.iter().copied());
    let summary = report.summary();
    info!(
      built = summary.built,
      failed = summary.failed,
      total = summary.total,
      "build finished"
    );
    Ok(report)
  }

  fn plan(&self, requested: &[TargetId]) -> Result<BTreeSet<TargetId>, ExecuteError> {
    let registry = self.graph.registry();
    if requested.is_empty() {
      let buildable: Vec<TargetId> = self
        .graph
        .topological_order()
        .iter()
        .copied()
        .filter(|&id| registry.target(id).kind().is_buildable())
        .collect();
      return Ok(self.graph.closure(&buildable));
    }

    for &id in requested {
      let resolved = registry.resolve(id);
      if registry.get(resolved).is_none() || !self.graph.contains(resolved) {
        return Err(ExecuteError::NotBuildable {
          target: registry.get(id).map_or_else(|| id.to_string(), |t| t.label()),
        });
      }
    }
    Ok(self.graph.closure(requested))
  }

  async fn execute_wave(&self, wave: &[TargetId]) -> Result<(), ExecuteError> {
    let registry = self.graph.registry();

    // Partition wave into ready targets and targets with failed dependencies
    let mut externals = Vec::new();
    let mut batches: BTreeMap<TargetKind, Vec<TargetId>> = BTreeMap::new();
    for &id in wave {
      if let Some(dependency) = self.failed_dependency(id) {
        let failure = self.propagated_failure(dependency);
        if self.states.fail_unstarted(id, failure) {
          warn!(
            target = %registry.label(id),
            failed_dep = %registry.label(dependency),
            "skipping target due to failed dependency"
          );
        }
        continue;
      }

      self.states.mark_ready(id);
      match registry.target(id).kind() {
        TargetKind::External => externals.push(id),
        kind => batches.entry(kind).or_default().push(id),
      }
    }

    let mut dispatch = Vec::with_capacity(batches.len());
    for (kind, ids) in batches {
      let Some((name, builder)) = registry.hooks().builder_for(kind) else {
        error!(%kind, "no builder registered");
        return Err(ExecuteError::NoBuilderForKind(kind));
      };
      dispatch.push((name.to_string(), builder.clone(), kind, ids));
    }

    // Only targets claimed here are ours to run and sweep; the rest belong to
    // another run and are awaited
    let mut claimed = Vec::new();
    let mut in_flight = Vec::new();
    let mut join_set = JoinSet::new();
    for id in self.claim(externals, &mut in_flight) {
      claimed.push(id);
      let engine = self.clone();
      join_set.spawn(async move { engine.resolve_external(id).await });
    }
    for (name, builder, kind, ids) in dispatch {
      let batch = self.claim(ids, &mut in_flight);
      if batch.is_empty() {
        continue;
      }
      claimed.extend(&batch);
      let engine = self.clone();
      join_set.spawn(async move { engine.invoke_builder(name, builder, kind, batch).await });
    }

    while let Some(joined) = join_set.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "build task panicked");
      }
    }

    // A panicking task leaves its claimed targets building
    for id in claimed {
      if self.states.state(id) == Some(TargetState::Building)
        && self
          .states
          .finish(id, Err(Failure::builder("build task aborted before reporting")))
      {
        error!(target = %registry.label(id), "build task aborted");
      }
    }

    for id in in_flight {
      self.states.wait(id).await;
    }

    Ok(())
  }

  /// Claim `ids` for this run, returning those acquired. Targets another run
  /// is working on go to `in_flight`.
  fn claim(&self, ids: Vec<TargetId>, in_flight: &mut Vec<TargetId>) -> Vec<TargetId> {
    let mut acquired = Vec::new();
    for id in ids {
      match self.states.claim(id) {
        Claim::Acquired => acquired.push(id),
        Claim::InFlight => in_flight.push(id),
        Claim::Finished(_) => {}
      }
    }
    acquired
  }

  fn failed_dependency(&self, id: TargetId) -> Option<TargetId> {
    self
      .graph
      .dependencies(id)
      .into_iter()
      .find(|&dep| self.states.state(dep) == Some(TargetState::Failed))
  }

  /// Failure recorded on a target skipped because `dependency` failed.
  ///
  /// An external no finder located surfaces as an unresolved executor on the
  /// targets that needed it.
  fn propagated_failure(&self, dependency: TargetId) -> Failure {
    let label = self.graph.registry().label(dependency);
    match self.states.failure(dependency).map(|failure| failure.kind) {
      Some(FailureKind::FinderNotFound) => Failure::unresolved_executor(label),
      _ => Failure::dependency(label),
    }
  }

  async fn resolve_external(&self, id: TargetId) {
    let registry = self.graph.registry();
    let label = registry.label(id);
    let Some(def) = registry.target(id).as_external() else {
      self.states.finish(id, Err(Failure::finder_error("not an external target")));
      return;
    };

    if let Some(location) = def.location() {
      debug!(target = %label, location = %location.display(), "external already located");
      self.states.finish(id, Ok(()));
      return;
    }

    let Ok(_permit) = self.semaphore.acquire().await else {
      self.states.finish(id, Err(Failure::finder_error("engine shut down")));
      return;
    };

    for (name, finder) in registry.hooks().finders() {
      if !finder.applies_to(def) {
        continue;
      }

      match finder.find(registry, id, def).await {
        Ok(FindOutcome::Found(location)) => {
          info!(target = %label, finder = name, location = %location.display(), "external located");
          registry.locate_external(id, location);
          self.states.finish(id, Ok(()));
          return;
        }
        Ok(FindOutcome::NotFound) => {
          debug!(target = %label, finder = name, "not found, trying next finder");
        }
        Err(e) => {
          error!(target = %label, finder = name, error = %e, "finder failed");
          self.states.finish(id, Err(Failure::finder_error(format!("{e:#}"))));
          return;
        }
      }
    }

    error!(target = %label, "no finder located external");
    self.states.finish(id, Err(Failure::not_found()));
  }

  async fn invoke_builder(&self, name: String, builder: Arc<dyn Builder>, kind: TargetKind, batch: Vec<TargetId>) {
    let registry = self.graph.registry();

    if self.config.dry_run {
      for &id in &batch {
        info!(target = %registry.label(id), "dry run: marking built");
        self.states.finish(id, Ok(()));
      }
      return;
    }

    let Ok(_permit) = self.semaphore.acquire().await else {
      for &id in &batch {
        self.states.finish(id, Err(Failure::builder("engine shut down")));
      }
      return;
    };

    debug!(builder = %name, %kind, targets = batch.len(), "dispatching batch");
    let ctx = BuildContext::new(
      self.graph.clone(),
      self.states.clone(),
      self.config.clone(),
      name.clone(),
      batch.clone(),
    );
    let result = builder.build(&ctx, &batch).await;

    for &id in &batch {
      let label = registry.label(id);
      if self.states.state(id) == Some(TargetState::Building) {
        let cause = match &result {
          Err(e) => format!("{e:#}"),
          Ok(()) => format!("builder {name} returned without reporting the target"),
        };
        self.states.finish(id, Err(Failure::builder(cause)));
      }

      match self.states.state(id) {
        Some(TargetState::Built) => info!(target = %label, "build succeeded"),
        _ => error!(target = %label, builder = %name, "build failed"),
      }
    }
  }
}
