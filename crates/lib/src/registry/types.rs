//! Load-phase error types.

use thiserror::Error;

use crate::target::TargetKind;

/// Errors raised while recipes populate the registry or when it is finalized.
///
/// These indicate a malformed recipe set and abort before any build begins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  /// A fully defined target was declared again with different attributes.
  #[error("{kind}::{name} is already defined with different attributes (redeclare to override)")]
  DuplicateDefinition { kind: TargetKind, name: String },

  /// A target was referenced but never declared.
  #[error("unresolved forward reference to {kind}::{name} (referenced by: {})", .referenced_by.join(", "))]
  UnresolvedForwardReference {
    kind: TargetKind,
    name: String,
    referenced_by: Vec<String>,
  },

  /// An environment's parent chain loops back on itself.
  #[error("cyclic environment inheritance: {}", .chain.join(" -> "))]
  CyclicEnvironment { chain: Vec<String> },

  /// Targets depend on each other in a loop (aliases included).
  #[error("dependency cycle: {}", .path.join(" -> "))]
  DependencyCycle { path: Vec<String> },

  /// An attribute points at a target of the wrong kind.
  #[error("{owner}.{field} must reference one of [{}], found {found}", .expected.join(", "))]
  KindMismatch {
    owner: String,
    field: &'static str,
    expected: Vec<String>,
    found: String,
  },

  /// A new target was requested after the registry was finalized.
  #[error("cannot create {kind}::{name}: the registry is finalized")]
  Frozen { kind: TargetKind, name: String },

  /// A graph was requested from a registry that has not been finalized.
  #[error("the registry must be finalized before building the graph")]
  NotFinalized,

  /// A non-environment target was selected as the default environment.
  #[error("{found} cannot be the default environment")]
  NotAnEnvironment { found: String },
}
