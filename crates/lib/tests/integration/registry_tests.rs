//! Declaration, forward reference and finalize behavior.

use simba_lib::registry::{ConfigError, DEFAULT_ENVIRONMENT, Registry};
use simba_lib::target::{BuildableDef, EnvironmentDef, TargetKind};
use simba_lib::{build_graph, load_complete};

use super::common::{executable, library};

#[test]
fn same_kind_and_name_is_one_target() {
  let mut registry = Registry::new();

  let first = registry.reference(TargetKind::StaticLibrary, "util").unwrap();
  let second = registry.reference(TargetKind::StaticLibrary, "util").unwrap();
  let declared = library(&mut registry, "util", &[]);
  let other_kind = registry.reference(TargetKind::Executable, "util").unwrap();

  assert_eq!(first, second);
  assert_eq!(first, declared);
  assert_ne!(first, other_kind);
  assert_eq!(registry.lookup(TargetKind::StaticLibrary, "util"), Some(first));
}

#[test]
fn forward_reference_is_completed_by_later_declaration() {
  let mut registry = Registry::new();

  let util = registry.reference(TargetKind::StaticLibrary, "util").unwrap();
  let app = executable(&mut registry, "app", &[util]);
  assert!(registry.target(util).is_placeholder());

  library(&mut registry, "util", &[]);
  let graph = load_complete(registry).unwrap();

  assert!(!graph.registry().target(util).is_placeholder());
  assert_eq!(graph.dependencies(app), vec![util]);
}

#[test]
fn unresolved_forward_reference_names_referrer() {
  let mut registry = Registry::new();
  let util = registry.reference(TargetKind::StaticLibrary, "util").unwrap();
  executable(&mut registry, "app", &[util]);

  let err = load_complete(registry).unwrap_err();

  assert_eq!(
    err,
    ConfigError::UnresolvedForwardReference {
      kind: TargetKind::StaticLibrary,
      name: "util".to_string(),
      referenced_by: vec!["executable::app".to_string()],
    }
  );
}

#[test]
fn conflicting_redefinition_is_rejected() {
  let mut registry = Registry::new();
  library(&mut registry, "util", &[]);

  let again = registry.static_library("util", BuildableDef::new());
  assert!(again.is_ok(), "identical redeclaration is accepted");

  let err = registry
    .static_library("util", BuildableDef::new().with_sources(["util.c"]))
    .unwrap_err();
  assert_eq!(
    err,
    ConfigError::DuplicateDefinition {
      kind: TargetKind::StaticLibrary,
      name: "util".to_string(),
    }
  );
}

#[test]
fn redeclare_overrides_definition() {
  let mut registry = Registry::new();
  let util = library(&mut registry, "util", &[]);

  let replaced = registry
    .redeclare(
      "util",
      simba_lib::target::Declaration::StaticLibrary(BuildableDef::new().with_sources(["util.c"])),
    )
    .unwrap();

  assert_eq!(replaced, util);
  assert_eq!(registry.target(util).as_buildable().unwrap().sources.len(), 1);
}

#[test]
fn finalized_registry_is_frozen() {
  let mut registry = Registry::new();
  library(&mut registry, "util", &[]);
  registry.finalize().unwrap();

  let err = registry.reference(TargetKind::Executable, "late").unwrap_err();
  assert!(matches!(err, ConfigError::Frozen { .. }));
  assert!(registry.reference(TargetKind::StaticLibrary, "util").is_ok());
}

#[test]
fn finalize_creates_default_environment() {
  let mut registry = Registry::new();
  registry.finalize().unwrap();

  let default = registry.default_environment().unwrap();
  assert_eq!(registry.target(default).name(), DEFAULT_ENVIRONMENT);
}

#[test]
fn wrong_kind_in_attribute_is_rejected() {
  let mut registry = Registry::new();
  let not_env = library(&mut registry, "util", &[]);
  registry
    .executable("app", BuildableDef::new().with_environment(not_env))
    .unwrap();

  let err = load_complete(registry).unwrap_err();
  assert!(matches!(err, ConfigError::KindMismatch { field: "environment", .. }), "{err}");
}

#[test]
fn environment_parent_cycle_is_rejected() {
  let mut registry = Registry::new();
  let b = registry.reference(TargetKind::Environment, "b").unwrap();
  let a = registry
    .environment("a", EnvironmentDef::new().with_parent(b))
    .unwrap();
  registry
    .environment("b", EnvironmentDef::new().with_parent(a))
    .unwrap();

  let err = load_complete(registry).unwrap_err();
  assert!(matches!(err, ConfigError::CyclicEnvironment { .. }), "{err}");
}

#[test]
fn graph_requires_finalized_registry() {
  let registry = Registry::new();
  let err = build_graph(std::sync::Arc::new(registry)).unwrap_err();
  assert_eq!(err, ConfigError::NotFinalized);
}
