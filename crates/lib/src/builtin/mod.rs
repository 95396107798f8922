//! Built-in recipes and hooks.
//!
//! [`load_builtins`] declares the `default` environment with an `ar` archiver
//! and a `cc` linker, generators for C, C++ and D sources, and registers the
//! [`PathFinder`] and [`CommandBuilder`] hooks. Load them before user recipes;
//! a recipe that wants different behavior uses [`Registry::redeclare`].

mod command;
mod finder;

use std::sync::Arc;

use tracing::debug;

pub use command::{CommandBuilder, CommandError, run_command};
pub use finder::PathFinder;

use crate::registry::{ConfigError, DEFAULT_ENVIRONMENT, Registry};
use crate::target::{EnvironmentDef, ExternalDef, FileTypeDef, GeneratorDef, TargetId};

/// Variables the built-in templates read. The default environment defines
/// each as empty so the templates render without user flags.
pub const FLAG_VARIABLES: [&str; 4] = ["CFLAGS", "CXXFLAGS", "DFLAGS", "LDFLAGS"];

/// Ids of the built-in targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtins {
  pub default_environment: TargetId,
  pub archiver: TargetId,
  pub linker: TargetId,
  pub relocatable_linker: TargetId,
  pub c: TargetId,
  pub cpp: TargetId,
  pub d: TargetId,
}

/// Declare the built-in recipes and register the built-in hooks.
pub fn load_builtins(registry: &mut Registry) -> Result<Builtins, ConfigError> {
  let builtins = load_builtin_recipes(registry)?;
  register_builtin_hooks(registry)?;
  Ok(builtins)
}

/// Declare the built-in environment, generators and file types.
pub fn load_builtin_recipes(registry: &mut Registry) -> Result<Builtins, ConfigError> {
  let ar = tool(registry, "ar")?;
  let cc = tool(registry, "cc")?;
  let cpp = tool(registry, "cpp")?;
  let ld = tool(registry, "ld")?;
  let ldmd2 = tool(registry, "ldmd2")?;

  let archiver = registry.generator(
    "ar",
    GeneratorDef::new("rm -f {output} && {executor} crs {output} {input}", ar).with_description("archive"),
  )?;
  let linker = registry.generator(
    "link",
    GeneratorDef::new("{executor} {input} -o {output}", cc).with_description("link"),
  )?;
  let relocatable_linker = registry.generator(
    "ld",
    GeneratorDef::new("{executor} -r {env.LDFLAGS} -o {output} {input}", ld).with_description("partial link"),
  )?;

  let c_gen = registry.generator(
    "cc",
    GeneratorDef::new("{executor} -c {input} {includes} {env.CFLAGS} -o {output}", cc).with_description("compile C"),
  )?;
  let cpp_gen = registry.generator(
    "cpp",
    GeneratorDef::new("{executor} -c {input} {includes} {env.CXXFLAGS} -o {output}", cpp)
      .with_description("compile C++"),
  )?;
  let d_gen = registry.generator(
    "ldmd2",
    GeneratorDef::new("{executor} -c {input} {includes} {env.DFLAGS} -of={output}", ldmd2)
      .with_description("compile D"),
  )?;

  let c = registry.filetype("c", FileTypeDef::new(["c", "cc"], c_gen))?;
  let cpp = registry.filetype("cpp", FileTypeDef::new(["cpp", "cxx"], cpp_gen))?;
  let d = registry.filetype("d", FileTypeDef::new(["d"], d_gen))?;

  let env = FLAG_VARIABLES
    .iter()
    .fold(EnvironmentDef::new(), |env, key| env.with_variable(*key, Vec::<String>::new()))
    .with_archiver(archiver)
    .with_linker(linker);
  let default_environment = registry.environment(DEFAULT_ENVIRONMENT, env)?;
  registry.set_default_environment(default_environment)?;

  debug!(targets = registry.len(), "loaded builtin recipes");

  Ok(Builtins {
    default_environment,
    archiver,
    linker,
    relocatable_linker,
    c,
    cpp,
    d,
  })
}

/// Register [`PathFinder`] and [`CommandBuilder`] under the name `default`.
pub fn register_builtin_hooks(registry: &mut Registry) -> Result<(), ConfigError> {
  registry.register_finder("default", Arc::new(PathFinder::new()))?;
  registry.register_builder("default", Arc::new(CommandBuilder::new()))?;
  Ok(())
}

fn tool(registry: &mut Registry, name: &str) -> Result<TargetId, ConfigError> {
  registry.external(name, ExternalDef::executable(name))
}
