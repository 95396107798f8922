//! Environment inheritance.
//!
//! An environment resolves a variable by walking its own mapping and then its
//! parents, the first definition found wins. Environments without an explicit
//! parent inherit from the registry's default environment. Linker, archiver and
//! include directories are inherited along the same chain.

use std::path::PathBuf;

use thiserror::Error;

use crate::registry::Registry;
use crate::target::{EnvironmentDef, TargetId, TargetKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
  #[error("undefined variable {key} in {environment} and its parents")]
  UndefinedVariable { key: String, environment: String },

  #[error("no default environment is set (finalize the registry first)")]
  MissingDefault,
}

impl Registry {
  /// The environment `env` inherits from, if any.
  ///
  /// An explicit parent wins; otherwise every environment except the default
  /// one inherits from the default.
  pub fn environment_parent(&self, env: TargetId) -> Option<TargetId> {
    let def = self.target(env).as_environment()?;
    match def.parent {
      Some(parent) => Some(self.resolve(parent)),
      None => self.default_environment().filter(|&default| default != env),
    }
  }

  /// `env` followed by its ancestors, nearest first.
  ///
  /// The walk stops at the first repeated environment, so this terminates even
  /// on a registry that failed the cycle check.
  pub fn environment_chain(&self, env: TargetId) -> Vec<TargetId> {
    let mut chain = vec![self.resolve(env)];
    while chain.len() <= self.len() {
      let Some(parent) = chain.last().and_then(|&last| self.environment_parent(last)) else {
        break;
      };
      if chain.contains(&parent) {
        break;
      }
      chain.push(parent);
    }
    chain
  }

  /// The environment a target is built with: its own, or the default.
  ///
  /// # Errors
  ///
  /// Returns `MissingDefault` if the target has no environment and the
  /// registry has not chosen a default yet.
  pub fn effective_environment(&self, target: TargetId) -> Result<TargetId, EnvError> {
    let target = self.resolve(target);
    if self.target(target).kind() == TargetKind::Environment {
      return Ok(target);
    }
    match self.target(target).as_buildable().and_then(|def| def.environment) {
      Some(env) => Ok(self.resolve(env)),
      None => self.default_environment().ok_or(EnvError::MissingDefault),
    }
  }

  /// Resolve `key` starting at `env`.
  ///
  /// # Errors
  ///
  /// Returns `UndefinedVariable` if no environment in the chain defines `key`.
  pub fn resolve_variable(&self, env: TargetId, key: &str) -> Result<&[String], EnvError> {
    self
      .environment_chain(env)
      .into_iter()
      .filter_map(|id| self.target(id).as_environment())
      .find_map(|def| def.variables.get(key))
      .map(Vec::as_slice)
      .ok_or_else(|| EnvError::UndefinedVariable {
        key: key.to_string(),
        environment: self.label(env),
      })
  }

  /// Resolve `key` in the effective environment of `target`.
  pub fn resolve_variable_for(&self, target: TargetId, key: &str) -> Result<&[String], EnvError> {
    let env = self.effective_environment(target)?;
    self.resolve_variable(env, key)
  }

  /// Include directories for `target`.
  ///
  /// The target's own includes come first, followed by those of its
  /// environment chain from nearest to farthest. Duplicates are dropped.
  pub fn effective_includes(&self, target: TargetId) -> Result<Vec<PathBuf>, EnvError> {
    let target = self.resolve(target);
    let env = self.effective_environment(target)?;

    let own = self
      .target(target)
      .as_buildable()
      .map(|def| def.includes.as_slice())
      .unwrap_or_default();
    let inherited = self
      .environment_chain(env)
      .into_iter()
      .filter_map(|id| self.target(id).as_environment())
      .flat_map(|def| def.includes.iter());

    let mut includes: Vec<PathBuf> = Vec::new();
    for dir in own.iter().chain(inherited) {
      if !includes.contains(dir) {
        includes.push(dir.clone());
      }
    }
    Ok(includes)
  }

  /// The linker inherited by `env`.
  pub fn linker(&self, env: TargetId) -> Option<TargetId> {
    self.inherited_generator(env, |def| def.linker)
  }

  /// The archiver inherited by `env`.
  pub fn archiver(&self, env: TargetId) -> Option<TargetId> {
    self.inherited_generator(env, |def| def.archiver)
  }

  /// The generator that produces the final artifact of a buildable target.
  ///
  /// Static libraries use the archiver, executables and shared libraries the
  /// linker. `None` if the environment chain provides neither.
  pub fn link_generator(&self, target: TargetId) -> Result<Option<TargetId>, EnvError> {
    let target = self.resolve(target);
    let env = self.effective_environment(target)?;
    Ok(match self.target(target).kind() {
      TargetKind::StaticLibrary => self.archiver(env),
      kind if kind.is_buildable() => self.linker(env),
      _ => None,
    })
  }

  fn inherited_generator(&self, env: TargetId, pick: impl Fn(&EnvironmentDef) -> Option<TargetId>) -> Option<TargetId> {
    self
      .environment_chain(env)
      .into_iter()
      .filter_map(|id| self.target(id).as_environment())
      .find_map(pick)
      .map(|generator| self.resolve(generator))
  }
}
