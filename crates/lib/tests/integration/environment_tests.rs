//! Environment inheritance and generator dispatch through the public API.

use std::path::{Path, PathBuf};

use simba_lib::dispatch::{DispatchError, render_command, select_generator};
use simba_lib::environment::EnvError;
use simba_lib::registry::{DEFAULT_ENVIRONMENT, Registry};
use simba_lib::target::{BuildableDef, EnvironmentDef, ExternalDef, FileTypeDef, GeneratorDef, TargetId};

struct Project {
  registry: Registry,
  debug: TargetId,
  release_app: TargetId,
  debug_app: TargetId,
  cc: TargetId,
}

/// `default` sets CFLAGS=-O2, `debug` inherits from it and overrides CFLAGS.
fn project() -> Project {
  let mut registry = Registry::new();
  let compiler = registry
    .external("gcc", ExternalDef::executable("gcc").with_location("/usr/bin/gcc"))
    .unwrap();
  let cc = registry
    .generator(
      "cc",
      GeneratorDef::new("{exe} -c {in} {env.CFLAGS} {includes} -o {out}", compiler),
    )
    .unwrap();
  registry.filetype("c", FileTypeDef::new(["c"], cc)).unwrap();

  registry
    .environment(
      DEFAULT_ENVIRONMENT,
      EnvironmentDef::new()
        .with_variable("CFLAGS", ["-O2"])
        .with_variable("LDFLAGS", ["-lm"])
        .with_includes(["include"]),
    )
    .unwrap();
  let debug = registry
    .environment(
      "debug",
      EnvironmentDef::new()
        .with_variable("CFLAGS", ["-O0", "-g"])
        .with_includes(["debug/include"]),
    )
    .unwrap();

  let release_app = registry
    .executable("release", BuildableDef::new().with_sources(["main.c"]))
    .unwrap();
  let debug_app = registry
    .executable(
      "debug",
      BuildableDef::new()
        .with_sources(["main.c", "notes.txt"])
        .with_environment(debug),
    )
    .unwrap();
  registry.finalize().unwrap();

  Project {
    registry,
    debug,
    release_app,
    debug_app,
    cc,
  }
}

#[test]
fn nearest_definition_wins() {
  let p = project();

  assert_eq!(p.registry.resolve_variable_for(p.release_app, "CFLAGS").unwrap(), ["-O2"]);
  assert_eq!(p.registry.resolve_variable_for(p.debug_app, "CFLAGS").unwrap(), ["-O0", "-g"]);
  assert_eq!(p.registry.resolve_variable(p.debug, "LDFLAGS").unwrap(), ["-lm"]);
}

#[test]
fn undefined_variable_is_an_error() {
  let p = project();

  let err = p.registry.resolve_variable(p.debug, "DFLAGS").unwrap_err();
  assert_eq!(
    err,
    EnvError::UndefinedVariable {
      key: "DFLAGS".to_string(),
      environment: "environment::debug".to_string(),
    }
  );
}

#[test]
fn includes_are_nearest_first() {
  let p = project();

  assert_eq!(p.registry.effective_includes(p.debug_app).unwrap(), vec![
    PathBuf::from("debug/include"),
    PathBuf::from("include"),
  ]);
}

#[test]
fn rendered_command_uses_target_environment() {
  let p = project();

  let generator = select_generator(&p.registry, p.debug_app, Path::new("main.c")).unwrap();
  assert_eq!(generator, p.cc);

  let cmd = render_command(
    &p.registry,
    generator,
    p.debug_app,
    &[PathBuf::from("main.c")],
    Path::new("builddir/main.c.o"),
  )
  .unwrap();
  assert_eq!(
    cmd,
    "/usr/bin/gcc -c main.c -O0 -g -I debug/include -I include -o builddir/main.c.o"
  );
}

#[test]
fn unclaimed_extension_is_reported() {
  let p = project();

  let err = select_generator(&p.registry, p.debug_app, Path::new("notes.txt")).unwrap_err();
  assert!(matches!(err, DispatchError::NoGeneratorForExtension { ref extension, .. } if extension == ".txt"), "{err}");
}
