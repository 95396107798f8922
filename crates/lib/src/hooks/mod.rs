//! Builder and finder plugin interfaces.
//!
//! Builders produce the artifacts of buildable targets; finders locate
//! external targets. Both are registered by name on the
//! [`Registry`](crate::registry::Registry), which also declares a matching
//! `builder`/`finder` target so recipes can reference hooks by name.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::execute::BuildContext;
use crate::registry::Registry;
use crate::target::{ExternalDef, TargetId, TargetKind};

/// Produces the artifacts of one kind of target.
///
/// The engine calls [`Builder::build`] with a batch of same-kind targets whose
/// dependencies are all built. A builder reports each target through
/// [`BuildContext::mark_built`] or [`BuildContext::mark_failed`]; a failure
/// in one target leaves its batch siblings unaffected. Returning `Err` fails
/// every target of the batch that was not reported yet.
#[async_trait]
pub trait Builder: Send + Sync {
  /// Target kinds this builder handles.
  fn kinds(&self) -> &[TargetKind];

  async fn build(&self, ctx: &BuildContext, batch: &[TargetId]) -> anyhow::Result<()>;
}

/// Result of a finder lookup that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindOutcome {
  Found(PathBuf),
  /// Not found by this finder; the next applicable finder is tried.
  NotFound,
}

/// Locates external targets.
#[async_trait]
pub trait Finder: Send + Sync {
  /// Whether this finder knows how to look for `external`.
  fn applies_to(&self, _external: &ExternalDef) -> bool {
    true
  }

  /// Look for `external`. An `Err` is fatal for the target; use
  /// [`FindOutcome::NotFound`] to let other finders try.
  async fn find(&self, registry: &Registry, id: TargetId, external: &ExternalDef) -> anyhow::Result<FindOutcome>;
}

/// Builders and finders keyed by name, in registration order.
#[derive(Default, Clone)]
pub struct HookRegistry {
  builders: Vec<(String, Arc<dyn Builder>)>,
  finders: Vec<(String, Arc<dyn Finder>)>,
}

impl HookRegistry {
  pub(crate) fn register_builder(&mut self, name: String, builder: Arc<dyn Builder>) {
    match self.builders.iter_mut().find(|(existing, _)| *existing == name) {
      Some(slot) => slot.1 = builder,
      None => self.builders.push((name, builder)),
    }
  }

  pub(crate) fn register_finder(&mut self, name: String, finder: Arc<dyn Finder>) {
    match self.finders.iter_mut().find(|(existing, _)| *existing == name) {
      Some(slot) => slot.1 = finder,
      None => self.finders.push((name, finder)),
    }
  }

  /// The builder handling `kind`.
  ///
  /// Builders registered later take precedence, so a recipe can take over a
  /// kind from the built-in builder by registering under any new name.
  /// Re-registering an existing name keeps its precedence.
  pub fn builder_for(&self, kind: TargetKind) -> Option<(&str, &Arc<dyn Builder>)> {
    self
      .builders
      .iter()
      .rev()
      .find(|(_, builder)| builder.kinds().contains(&kind))
      .map(|(name, builder)| (name.as_str(), builder))
  }

  pub fn builder(&self, name: &str) -> Option<&Arc<dyn Builder>> {
    self.builders.iter().find(|(n, _)| n == name).map(|(_, b)| b)
  }

  pub fn finder(&self, name: &str) -> Option<&Arc<dyn Finder>> {
    self.finders.iter().find(|(n, _)| n == name).map(|(_, f)| f)
  }

  /// Finders in registration order.
  pub fn finders(&self) -> impl Iterator<Item = (&str, &Arc<dyn Finder>)> {
    self.finders.iter().map(|(name, finder)| (name.as_str(), finder))
  }

  pub fn builder_names(&self) -> impl Iterator<Item = &str> {
    self.builders.iter().map(|(name, _)| name.as_str())
  }
}

impl fmt::Debug for HookRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HookRegistry")
      .field("builders", &self.builder_names().collect::<Vec<_>>())
      .field("finders", &self.finders().map(|(name, _)| name).collect::<Vec<_>>())
      .finish()
  }
}
