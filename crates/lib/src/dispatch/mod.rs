//! Generator selection and command rendering.
//!
//! A buildable target turns each source into an object with a generator,
//! chosen by the target's override or by the filetype claiming the source's
//! extension. The generator's command template is then rendered against the
//! target's effective environment and the concrete input and output paths.

pub mod template;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::trace;

use crate::environment::EnvError;
use crate::registry::Registry;
use crate::target::{GeneratorDef, TargetId, TargetKind};

pub use template::TemplateError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
  #[error("no filetype claims extension '{extension}' of {} in {target}", .file.display())]
  NoGeneratorForExtension {
    target: String,
    file: PathBuf,
    extension: String,
  },

  #[error("extension '{extension}' is claimed by more than one filetype: {}", .filetypes.join(", "))]
  AmbiguousGenerator { extension: String, filetypes: Vec<String> },

  #[error("executor {executor} of {generator} has not been located")]
  UnresolvedExecutor { generator: String, executor: String },

  #[error("{found} is not a generator")]
  NotAGenerator { found: String },

  #[error("invalid command template in {generator}: {source}")]
  Template {
    generator: String,
    #[source]
    source: TemplateError,
  },

  #[error(transparent)]
  Variable(#[from] EnvError),
}

/// Choose the generator that turns `file` into an object for `target`.
///
/// The target's generator override wins. Otherwise the extension of `file`
/// must be claimed by exactly one filetype.
///
/// # Errors
///
/// - `NoGeneratorForExtension` if no filetype claims the extension
/// - `AmbiguousGenerator` if several do
pub fn select_generator(registry: &Registry, target: TargetId, file: &Path) -> Result<TargetId, DispatchError> {
  let target = registry.resolve(target);
  if let Some(generator) = registry.target(target).as_buildable().and_then(|def| def.generator) {
    return Ok(registry.resolve(generator));
  }

  let extension = file
    .extension()
    .and_then(OsStr::to_str)
    .map(|ext| format!(".{ext}"))
    .unwrap_or_default();

  let claims: Vec<TargetId> = registry
    .of_kind(TargetKind::FileType)
    .filter(|&id| {
      registry
        .target(id)
        .as_filetype()
        .is_some_and(|ft| ft.claims(&extension))
    })
    .collect();

  match claims.as_slice() {
    [] => Err(DispatchError::NoGeneratorForExtension {
      target: registry.label(target),
      file: file.to_path_buf(),
      extension,
    }),
    [filetype] => {
      let generator = registry
        .target(*filetype)
        .as_filetype()
        .map(|ft| registry.resolve(ft.generator))
        .ok_or_else(|| DispatchError::NotAGenerator {
          found: registry.label(*filetype),
        })?;
      trace!(file = %file.display(), generator = %registry.label(generator), "dispatched source");
      Ok(generator)
    }
    many => Err(DispatchError::AmbiguousGenerator {
      extension,
      filetypes: many.iter().map(|&id| registry.label(id)).collect(),
    }),
  }
}

/// Render the command of `generator` for building `output` from `inputs`.
///
/// Paths are shell-quoted; environment values are inserted verbatim so they
/// can carry several flags.
///
/// # Errors
///
/// - `UnresolvedExecutor` if the template uses `{exe}` before the executor is located
/// - `Variable` if an `{env.VAR}` is undefined in the target's environment chain
/// - `Template` for malformed templates
pub fn render_command(
  registry: &Registry,
  generator: TargetId,
  target: TargetId,
  inputs: &[PathBuf],
  output: &Path,
) -> Result<String, DispatchError> {
  let generator = registry.resolve(generator);
  let def = registry
    .target(generator)
    .as_generator()
    .ok_or_else(|| DispatchError::NotAGenerator {
      found: registry.label(generator),
    })?;

  let resolver = CommandResolver {
    registry,
    generator,
    def,
    target: registry.resolve(target),
    inputs,
    output,
  };

  let segments = template::parse(&def.command).map_err(|err| resolver.wrap(err))?;
  let command = template::substitute_segments(&segments, &resolver)?;
  if shlex::split(&command).is_none() {
    return Err(resolver.wrap(TemplateError::InvalidCommand(command)));
  }
  Ok(command)
}

struct CommandResolver<'a> {
  registry: &'a Registry,
  generator: TargetId,
  def: &'a GeneratorDef,
  target: TargetId,
  inputs: &'a [PathBuf],
  output: &'a Path,
}

impl CommandResolver<'_> {
  fn wrap(&self, source: TemplateError) -> DispatchError {
    DispatchError::Template {
      generator: self.registry.label(self.generator),
      source,
    }
  }

  fn quote_path(&self, path: &Path) -> Result<String, DispatchError> {
    template::quote(&path.to_string_lossy()).map_err(|err| self.wrap(err))
  }
}

impl template::Resolver for CommandResolver<'_> {
  type Error = DispatchError;

  fn resolve_input(&self) -> Result<String, DispatchError> {
    let quoted = self
      .inputs
      .iter()
      .map(|input| self.quote_path(input))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(quoted.join(" "))
  }

  fn resolve_output(&self) -> Result<String, DispatchError> {
    self.quote_path(self.output)
  }

  fn resolve_output_dir(&self) -> Result<String, DispatchError> {
    let dir = match self.output.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent,
      _ => Path::new("."),
    };
    self.quote_path(dir)
  }

  fn resolve_executor(&self) -> Result<String, DispatchError> {
    let executor = self.registry.resolve(self.def.executor);
    let location = self
      .registry
      .target(executor)
      .as_external()
      .and_then(|ext| ext.location())
      .ok_or_else(|| DispatchError::UnresolvedExecutor {
        generator: self.registry.label(self.generator),
        executor: self.registry.label(executor),
      })?;
    self.quote_path(location)
  }

  fn resolve_includes(&self) -> Result<String, DispatchError> {
    let formatted = self
      .registry
      .effective_includes(self.target)?
      .iter()
      .map(|dir| {
        self
          .quote_path(dir)
          .map(|quoted| self.def.include_format.replace("{}", &quoted))
      })
      .collect::<Result<Vec<_>, _>>()?;
    Ok(formatted.join(" "))
  }

  fn resolve_variable(&self, key: &str) -> Result<String, DispatchError> {
    Ok(self.registry.resolve_variable_for(self.target, key)?.join(" "))
  }
}
