//! Target registry with forward-reference resolution.
//!
//! The registry is an arena of [`Target`] records keyed by `(kind, name)`.
//! The first declaration or reference of a pair creates the record; every
//! later call for the same pair returns the same [`TargetId`]. A reference made
//! before the declaration creates a placeholder that the declaration completes
//! in place.
//!
//! Once recipes are loaded, [`Registry::finalize`] validates that every
//! placeholder was completed (externals excepted), that attribute references
//! point at targets of the right kind, and that neither aliases nor
//! environment parents form cycles. After finalize the registry is frozen.

mod finalize;
mod types;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::trace;

use crate::hooks::{Builder, Finder, HookRegistry};
use crate::target::{
  BuildableDef, Declaration, Definition, EnvironmentDef, ExternalDef, FileTypeDef, GeneratorDef, Target, TargetId,
  TargetKind,
};

pub use types::ConfigError;

/// Name of the environment used when a target does not choose one.
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// Process-wide table of targets for one build run.
#[derive(Debug, Default)]
pub struct Registry {
  targets: Vec<Target>,
  index: HashMap<(TargetKind, String), TargetId>,
  default_environment: Option<TargetId>,
  hooks: HookRegistry,
  finalized: bool,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Declare a target, or complete the placeholder a forward reference created.
  ///
  /// Declaring an already complete target again with identical attributes
  /// returns the existing identity.
  ///
  /// # Errors
  ///
  /// - `DuplicateDefinition` if the target is complete with different attributes
  /// - `Frozen` if the registry is finalized and the call would change it
  pub fn declare(&mut self, name: impl Into<String>, declaration: Declaration) -> Result<TargetId, ConfigError> {
    self.define(name.into(), declaration, false)
  }

  /// Declare a target, replacing the attributes of an existing definition.
  ///
  /// # Errors
  ///
  /// Returns `Frozen` once the registry is finalized.
  pub fn redeclare(&mut self, name: impl Into<String>, declaration: Declaration) -> Result<TargetId, ConfigError> {
    self.define(name.into(), declaration, true)
  }

  /// Fetch the target for `(kind, name)`, creating a placeholder if none exists.
  ///
  /// # Errors
  ///
  /// Returns `Frozen` if the target does not exist and the registry is finalized.
  pub fn reference(&mut self, kind: TargetKind, name: impl Into<String>) -> Result<TargetId, ConfigError> {
    let name = name.into();
    if let Some(&id) = self.index.get(&(kind, name.clone())) {
      return Ok(id);
    }
    if self.finalized {
      return Err(ConfigError::Frozen { kind, name });
    }

    trace!(%kind, name = %name, "creating forward reference");
    Ok(self.insert(Target::placeholder(kind, name)))
  }

  fn define(&mut self, name: String, declaration: Declaration, overriding: bool) -> Result<TargetId, ConfigError> {
    let kind = declaration.kind();
    let body = declaration.into_body();

    let Some(&id) = self.index.get(&(kind, name.clone())) else {
      if self.finalized {
        return Err(ConfigError::Frozen { kind, name });
      }
      trace!(%kind, name = %name, "declaring target");
      let mut target = Target::placeholder(kind, name);
      target.definition = Definition::Complete(body);
      return Ok(self.insert(target));
    };

    let target = &mut self.targets[id.0];
    match &target.definition {
      Definition::Complete(existing) if *existing == body => return Ok(id),
      Definition::Complete(_) if !overriding => return Err(ConfigError::DuplicateDefinition { kind, name }),
      _ => {}
    }
    if self.finalized {
      return Err(ConfigError::Frozen { kind, name });
    }

    trace!(%kind, name = %name, overriding, "completing target");
    target.definition = Definition::Complete(body);
    Ok(id)
  }

  fn insert(&mut self, target: Target) -> TargetId {
    let id = TargetId(self.targets.len());
    self.index.insert((target.kind, target.name.clone()), id);
    self.targets.push(target);
    id
  }

  pub fn executable(&mut self, name: impl Into<String>, def: BuildableDef) -> Result<TargetId, ConfigError> {
    self.declare(name, Declaration::Executable(def))
  }

  pub fn static_library(&mut self, name: impl Into<String>, def: BuildableDef) -> Result<TargetId, ConfigError> {
    self.declare(name, Declaration::StaticLibrary(def))
  }

  pub fn shared_library(&mut self, name: impl Into<String>, def: BuildableDef) -> Result<TargetId, ConfigError> {
    self.declare(name, Declaration::SharedLibrary(def))
  }

  /// Register `name` as a transparent forward to `target`.
  pub fn alias(&mut self, name: impl Into<String>, target: TargetId) -> Result<TargetId, ConfigError> {
    self.declare(name, Declaration::Alias(target))
  }

  pub fn environment(&mut self, name: impl Into<String>, def: EnvironmentDef) -> Result<TargetId, ConfigError> {
    self.declare(name, Declaration::Environment(def))
  }

  pub fn generator(&mut self, name: impl Into<String>, def: GeneratorDef) -> Result<TargetId, ConfigError> {
    self.declare(name, Declaration::Generator(def))
  }

  pub fn filetype(&mut self, name: impl Into<String>, def: FileTypeDef) -> Result<TargetId, ConfigError> {
    self.declare(name, Declaration::FileType(def))
  }

  pub fn external(&mut self, name: impl Into<String>, def: ExternalDef) -> Result<TargetId, ConfigError> {
    self.declare(name, Declaration::External(def))
  }

  /// Register a builder callback and declare the matching `builder` target.
  ///
  /// Registering the same name again replaces the callback.
  pub fn register_builder(
    &mut self,
    name: impl Into<String>,
    builder: Arc<dyn Builder>,
  ) -> Result<TargetId, ConfigError> {
    let name = name.into();
    let id = self.redeclare(name.clone(), Declaration::Builder(builder.kinds().to_vec()))?;
    self.hooks.register_builder(name, builder);
    Ok(id)
  }

  /// Register a finder callback and declare the matching `finder` target.
  ///
  /// Finders are tried in registration order.
  pub fn register_finder(&mut self, name: impl Into<String>, finder: Arc<dyn Finder>) -> Result<TargetId, ConfigError> {
    let name = name.into();
    let id = self.redeclare(name.clone(), Declaration::Finder)?;
    self.hooks.register_finder(name, finder);
    Ok(id)
  }

  /// Choose the environment targets fall back to.
  ///
  /// # Errors
  ///
  /// Returns `NotAnEnvironment` if `id` is not an environment, or `Frozen`
  /// after finalize.
  pub fn set_default_environment(&mut self, id: TargetId) -> Result<(), ConfigError> {
    let target = self.target(id);
    if target.kind != TargetKind::Environment {
      return Err(ConfigError::NotAnEnvironment { found: target.label() });
    }
    if self.finalized {
      return Err(ConfigError::Frozen {
        kind: target.kind,
        name: target.name.clone(),
      });
    }
    self.default_environment = Some(id);
    Ok(())
  }

  /// The default environment. Always set once the registry is finalized.
  pub fn default_environment(&self) -> Option<TargetId> {
    self.default_environment
  }

  /// Get a target record.
  ///
  /// # Panics
  ///
  /// Panics if `id` was not issued by this registry.
  pub fn target(&self, id: TargetId) -> &Target {
    &self.targets[id.0]
  }

  pub fn get(&self, id: TargetId) -> Option<&Target> {
    self.targets.get(id.0)
  }

  pub fn lookup(&self, kind: TargetKind, name: &str) -> Option<TargetId> {
    self.index.get(&(kind, name.to_string())).copied()
  }

  pub fn label(&self, id: TargetId) -> String {
    self.target(id).label()
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }

  /// All targets in declaration order.
  pub fn iter(&self) -> impl Iterator<Item = (TargetId, &Target)> {
    self.targets.iter().enumerate().map(|(idx, target)| (TargetId(idx), target))
  }

  /// Ids of all targets of `kind`, in declaration order.
  pub fn of_kind(&self, kind: TargetKind) -> impl Iterator<Item = TargetId> + '_ {
    self.iter().filter(move |(_, t)| t.kind == kind).map(|(id, _)| id)
  }

  pub fn hooks(&self) -> &HookRegistry {
    &self.hooks
  }

  pub fn is_finalized(&self) -> bool {
    self.finalized
  }

  /// Follow alias forwards to the target they name.
  ///
  /// Non-alias targets resolve to themselves. The walk is bounded by the
  /// registry size; finalize rejects alias cycles.
  pub fn resolve(&self, id: TargetId) -> TargetId {
    let mut current = id;
    for _ in 0..self.targets.len() {
      match self.target(current).alias_target() {
        Some(next) => current = next,
        None => break,
      }
    }
    current
  }

  /// Record where a finder located an external.
  ///
  /// Returns false if the target is not an external or was already located.
  pub(crate) fn locate_external(&self, id: TargetId, location: PathBuf) -> bool {
    self
      .target(id)
      .as_external()
      .is_some_and(|def| def.locate(location))
  }
}
