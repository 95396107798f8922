//! Shared test helpers for engine integration tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use simba_lib::execute::BuildContext;
use simba_lib::hooks::{Builder, FindOutcome, Finder};
use simba_lib::registry::Registry;
use simba_lib::target::{BuildableDef, ExternalDef, TargetId, TargetKind};

/// Builder that records every target it is asked to build.
///
/// Targets named in `failing` are reported as failed, everything else as
/// built. Each target takes `delay` so concurrent runs overlap.
pub struct RecordingBuilder {
  kinds: Vec<TargetKind>,
  failing: HashSet<String>,
  delay: Duration,
  builds: Mutex<HashMap<String, usize>>,
  batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingBuilder {
  pub fn new() -> Self {
    Self {
      kinds: vec![
        TargetKind::Executable,
        TargetKind::StaticLibrary,
        TargetKind::SharedLibrary,
      ],
      failing: HashSet::new(),
      delay: Duration::ZERO,
      builds: Mutex::new(HashMap::new()),
      batches: Mutex::new(Vec::new()),
    }
  }

  pub fn failing(mut self, name: &str) -> Self {
    self.failing.insert(name.to_string());
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  /// How many times `name` was built.
  pub fn count(&self, name: &str) -> usize {
    self.builds.lock().unwrap().get(name).copied().unwrap_or(0)
  }

  /// Names of every target built, in no particular order.
  pub fn built(&self) -> HashSet<String> {
    self.builds.lock().unwrap().keys().cloned().collect()
  }

  pub fn batches(&self) -> Vec<Vec<String>> {
    self.batches.lock().unwrap().clone()
  }
}

#[async_trait]
impl Builder for RecordingBuilder {
  fn kinds(&self) -> &[TargetKind] {
    &self.kinds
  }

  async fn build(&self, ctx: &BuildContext, batch: &[TargetId]) -> anyhow::Result<()> {
    let names: Vec<String> = batch.iter().map(|&id| ctx.target(id).name().to_string()).collect();
    self.batches.lock().unwrap().push(names.clone());

    for (&id, name) in batch.iter().zip(names) {
      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }
      *self.builds.lock().unwrap().entry(name.clone()).or_default() += 1;

      if self.failing.contains(&name) {
        ctx.mark_failed(id, format!("{name} exploded"));
      } else {
        ctx.mark_built(id);
      }
    }
    Ok(())
  }
}

/// Finder answering from a fixed table of lookup names.
pub struct TableFinder {
  found: HashMap<String, PathBuf>,
  broken: HashSet<String>,
}

impl TableFinder {
  pub fn new() -> Self {
    Self {
      found: HashMap::new(),
      broken: HashSet::new(),
    }
  }

  pub fn with(mut self, name: &str, location: &str) -> Self {
    self.found.insert(name.to_string(), PathBuf::from(location));
    self
  }

  /// Lookups of `name` return an error instead of an answer.
  pub fn broken(mut self, name: &str) -> Self {
    self.broken.insert(name.to_string());
    self
  }
}

#[async_trait]
impl Finder for TableFinder {
  async fn find(&self, _registry: &Registry, _id: TargetId, external: &ExternalDef) -> anyhow::Result<FindOutcome> {
    if self.broken.contains(&external.lookup_name) {
      anyhow::bail!("lookup of {} crashed", external.lookup_name);
    }
    Ok(match self.found.get(&external.lookup_name) {
      Some(path) => FindOutcome::Found(path.clone()),
      None => FindOutcome::NotFound,
    })
  }
}

/// Declare a static library depending on `deps`.
pub fn library(registry: &mut Registry, name: &str, deps: &[TargetId]) -> TargetId {
  let def = deps
    .iter()
    .fold(BuildableDef::new(), |def, &dep| def.with_dependency(dep));
  registry.static_library(name, def).unwrap()
}

/// Declare an executable depending on `deps`.
pub fn executable(registry: &mut Registry, name: &str, deps: &[TargetId]) -> TargetId {
  let def = deps
    .iter()
    .fold(BuildableDef::new(), |def, &dep| def.with_dependency(dep));
  registry.executable(name, def).unwrap()
}

pub fn recording(registry: &mut Registry, builder: RecordingBuilder) -> Arc<RecordingBuilder> {
  let builder = Arc::new(builder);
  registry.register_builder("recording", builder.clone()).unwrap();
  builder
}
