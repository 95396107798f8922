use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use super::state::StateTable;
use super::types::{EngineConfig, Failure, TargetState};
use crate::graph::Graph;
use crate::registry::Registry;
use crate::target::{Target, TargetId};

/// Handle passed to a [`Builder`](crate::hooks::Builder) for one batch.
///
/// Builders read the registry and graph through it and report each target of
/// the batch as built or failed. Reports for targets outside the batch are
/// ignored.
pub struct BuildContext {
  graph: Arc<Graph>,
  states: Arc<StateTable>,
  config: Arc<EngineConfig>,
  builder: String,
  batch: Vec<TargetId>,
  root: PathBuf,
}

impl BuildContext {
  pub(crate) fn new(
    graph: Arc<Graph>,
    states: Arc<StateTable>,
    config: Arc<EngineConfig>,
    builder: String,
    batch: Vec<TargetId>,
  ) -> Self {
    let root = std::path::absolute(&config.root_dir).unwrap_or_else(|_| config.root_dir.clone());
    Self {
      graph,
      states,
      config,
      builder,
      batch,
      root,
    }
  }

  pub fn registry(&self) -> &Registry {
    self.graph.registry()
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Name the builder was registered under.
  pub fn builder_name(&self) -> &str {
    &self.builder
  }

  pub fn batch(&self) -> &[TargetId] {
    &self.batch
  }

  pub fn target(&self, id: TargetId) -> &Target {
    self.registry().target(id)
  }

  pub fn state(&self, id: TargetId) -> Option<TargetState> {
    self.states.state(id)
  }

  /// Location of a located external.
  pub fn external_location(&self, id: TargetId) -> Option<&Path> {
    let registry = self.registry();
    registry.target(registry.resolve(id)).as_external()?.location()
  }

  /// Absolute root directory. Builders run their commands here.
  pub fn root_dir(&self) -> &Path {
    &self.root
  }

  /// Absolute build directory.
  pub fn build_dir(&self) -> PathBuf {
    self.root.join(&self.config.build_dir)
  }

  /// Where a buildable target's artifact goes: `<build_dir>/<name><ext>`.
  pub fn artifact_path(&self, id: TargetId) -> PathBuf {
    let target = self.target(id);
    let file = format!("{}{}", target.name(), target.kind().artifact_extension());
    self.build_dir().join(file)
  }

  /// Where the object compiled from `source` goes: `<build_dir>/<source>.o`.
  pub fn object_path(&self, source: &Path) -> PathBuf {
    let source = self.source_path(source);
    let relative = source.strip_prefix(&self.root).unwrap_or(&source);
    let relative = relative.strip_prefix("/").unwrap_or(relative);
    let mut file = relative.as_os_str().to_owned();
    file.push(".o");
    self.build_dir().join(file)
  }

  /// Resolve a recipe path against the root directory.
  pub fn source_path(&self, source: &Path) -> PathBuf {
    self.root.join(source)
  }

  /// Report a target of this batch as built.
  pub fn mark_built(&self, id: TargetId) -> bool {
    if !self.owns(id) {
      return false;
    }
    self.states.finish(id, Ok(()))
  }

  /// Report a target of this batch as failed. Siblings are unaffected.
  pub fn mark_failed(&self, id: TargetId, cause: impl fmt::Display) -> bool {
    if !self.owns(id) {
      return false;
    }
    self.states.finish(id, Err(Failure::builder(cause.to_string())))
  }

  fn owns(&self, id: TargetId) -> bool {
    let owned = self.batch.contains(&id);
    if !owned {
      warn!(
        builder = %self.builder,
        target = %self.registry().label(id),
        "builder reported a target outside its batch"
      );
    }
    owned
  }
}

impl fmt::Debug for BuildContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuildContext")
      .field("builder", &self.builder)
      .field("batch", &self.batch)
      .finish_non_exhaustive()
  }
}
