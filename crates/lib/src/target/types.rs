use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// The type of a target.
///
/// Buildable kinds and externals become nodes of the dependency graph; the
/// remaining kinds only carry configuration consulted by buildable targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
  Executable,
  StaticLibrary,
  SharedLibrary,
  Alias,
  Environment,
  Generator,
  FileType,
  External,
  Finder,
  Builder,
}

impl TargetKind {
  pub const fn as_str(self) -> &'static str {
    match self {
      TargetKind::Executable => "executable",
      TargetKind::StaticLibrary => "static_library",
      TargetKind::SharedLibrary => "shared_library",
      TargetKind::Alias => "alias",
      TargetKind::Environment => "environment",
      TargetKind::Generator => "generator",
      TargetKind::FileType => "filetype",
      TargetKind::External => "external",
      TargetKind::Finder => "finder",
      TargetKind::Builder => "builder",
    }
  }

  /// Kinds whose artifacts are produced by a builder.
  pub const fn is_buildable(self) -> bool {
    matches!(
      self,
      TargetKind::Executable | TargetKind::StaticLibrary | TargetKind::SharedLibrary
    )
  }

  /// Kinds that become nodes of the dependency graph.
  pub const fn is_graph_node(self) -> bool {
    self.is_buildable() || matches!(self, TargetKind::External)
  }

  /// File suffix of the artifact a buildable kind produces.
  pub const fn artifact_extension(self) -> &'static str {
    match self {
      TargetKind::StaticLibrary => ".a",
      TargetKind::SharedLibrary => ".so",
      _ => "",
    }
  }
}

impl fmt::Display for TargetKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Stable handle to a target record inside a [`Registry`](crate::registry::Registry).
///
/// Ids are assigned in creation order, so comparing two ids compares the
/// order in which the targets were first declared or referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetId(pub(crate) usize);

impl TargetId {
  pub fn index(self) -> usize {
    self.0
  }
}

impl fmt::Display for TargetId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Attributes of an executable or library.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildableDef {
  pub sources: Vec<PathBuf>,
  pub includes: Vec<PathBuf>,
  pub dependencies: Vec<TargetId>,
  /// Environment to build with; the registry default when unset.
  pub environment: Option<TargetId>,
  /// Generator used for every source instead of filetype dispatch.
  pub generator: Option<TargetId>,
}

impl BuildableDef {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_sources<I, P>(mut self, sources: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    self.sources.extend(sources.into_iter().map(Into::into));
    self
  }

  pub fn with_includes<I, P>(mut self, includes: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    self.includes.extend(includes.into_iter().map(Into::into));
    self
  }

  pub fn with_dependency(mut self, dependency: TargetId) -> Self {
    if !self.dependencies.contains(&dependency) {
      self.dependencies.push(dependency);
    }
    self
  }

  pub fn with_environment(mut self, environment: TargetId) -> Self {
    self.environment = Some(environment);
    self
  }

  pub fn with_generator(mut self, generator: TargetId) -> Self {
    self.generator = Some(generator);
    self
  }
}

/// A named set of build variables with single-parent inheritance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentDef {
  pub variables: BTreeMap<String, Vec<String>>,
  /// Explicit parent. Environments without one inherit from the default environment.
  pub parent: Option<TargetId>,
  pub includes: Vec<PathBuf>,
  /// Generator used to link executables and shared libraries.
  pub linker: Option<TargetId>,
  /// Generator used to archive static libraries.
  pub archiver: Option<TargetId>,
}

impl EnvironmentDef {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_variable<I, S>(mut self, key: impl Into<String>, values: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .variables
      .insert(key.into(), values.into_iter().map(Into::into).collect());
    self
  }

  pub fn with_parent(mut self, parent: TargetId) -> Self {
    self.parent = Some(parent);
    self
  }

  pub fn with_includes<I, P>(mut self, includes: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    self.includes.extend(includes.into_iter().map(Into::into));
    self
  }

  pub fn with_linker(mut self, linker: TargetId) -> Self {
    self.linker = Some(linker);
    self
  }

  pub fn with_archiver(mut self, archiver: TargetId) -> Self {
    self.archiver = Some(archiver);
    self
  }
}

/// Default format applied to each include directory by `{includes}`.
pub const DEFAULT_INCLUDE_FORMAT: &str = "-I {}";

/// A command template plus the external tool that executes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorDef {
  pub command: String,
  pub executor: TargetId,
  pub description: Option<String>,
  /// Format for one include directory; `{}` is replaced by the quoted path.
  pub include_format: String,
}

impl GeneratorDef {
  pub fn new(command: impl Into<String>, executor: TargetId) -> Self {
    Self {
      command: command.into(),
      executor,
      description: None,
      include_format: DEFAULT_INCLUDE_FORMAT.to_string(),
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn with_include_format(mut self, format: impl Into<String>) -> Self {
    self.include_format = format.into();
    self
  }
}

/// Maps source file extensions to a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTypeDef {
  /// Extensions, each beginning with `.`.
  pub extensions: Vec<String>,
  pub generator: TargetId,
}

impl FileTypeDef {
  /// Extensions given without a leading `.` get one prepended.
  pub fn new<I, S>(extensions: I, generator: TargetId) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let extensions = extensions
      .into_iter()
      .map(Into::into)
      .map(|ext: String| if ext.starts_with('.') { ext } else { format!(".{ext}") })
      .collect();
    Self { extensions, generator }
  }

  pub fn claims(&self, extension: &str) -> bool {
    self.extensions.iter().any(|e| e == extension)
  }
}

/// What an external target provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalKind {
  Executable,
  Library,
  StaticLibrary,
  SharedLibrary,
  #[default]
  Unknown,
}

/// A tool or library not built by this system.
///
/// The location is set at most once, either up front by the recipe or later
/// by a finder. An external is resolved exactly when its location is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDef {
  pub lookup_name: String,
  pub provides: ExternalKind,
  location: OnceLock<PathBuf>,
}

impl ExternalDef {
  pub fn new(lookup_name: impl Into<String>, provides: ExternalKind) -> Self {
    Self {
      lookup_name: lookup_name.into(),
      provides,
      location: OnceLock::new(),
    }
  }

  pub fn executable(lookup_name: impl Into<String>) -> Self {
    Self::new(lookup_name, ExternalKind::Executable)
  }

  pub fn with_location(self, location: impl Into<PathBuf>) -> Self {
    let _ = self.location.set(location.into());
    self
  }

  pub fn location(&self) -> Option<&Path> {
    self.location.get().map(PathBuf::as_path)
  }

  pub fn is_resolved(&self) -> bool {
    self.location.get().is_some()
  }

  /// Record the location. Returns false if the external was already located.
  pub(crate) fn locate(&self, location: PathBuf) -> bool {
    self.location.set(location).is_ok()
  }
}

/// Registration record of a builder or finder hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookDef {
  /// Kinds a builder handles. Always empty for finders.
  pub kinds: Vec<TargetKind>,
}

/// Kind-specific attributes of a fully defined target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetBody {
  Buildable(BuildableDef),
  Alias(TargetId),
  Environment(EnvironmentDef),
  Generator(GeneratorDef),
  FileType(FileTypeDef),
  External(ExternalDef),
  Hook(HookDef),
}

/// The attributes passed to [`Registry::declare`](crate::registry::Registry::declare).
///
/// The variant determines the kind of the declared target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
  Executable(BuildableDef),
  StaticLibrary(BuildableDef),
  SharedLibrary(BuildableDef),
  Alias(TargetId),
  Environment(EnvironmentDef),
  Generator(GeneratorDef),
  FileType(FileTypeDef),
  External(ExternalDef),
  Finder,
  Builder(Vec<TargetKind>),
}

impl Declaration {
  pub fn kind(&self) -> TargetKind {
    match self {
      Declaration::Executable(_) => TargetKind::Executable,
      Declaration::StaticLibrary(_) => TargetKind::StaticLibrary,
      Declaration::SharedLibrary(_) => TargetKind::SharedLibrary,
      Declaration::Alias(_) => TargetKind::Alias,
      Declaration::Environment(_) => TargetKind::Environment,
      Declaration::Generator(_) => TargetKind::Generator,
      Declaration::FileType(_) => TargetKind::FileType,
      Declaration::External(_) => TargetKind::External,
      Declaration::Finder => TargetKind::Finder,
      Declaration::Builder(_) => TargetKind::Builder,
    }
  }

  pub fn into_body(self) -> TargetBody {
    match self {
      Declaration::Executable(def) | Declaration::StaticLibrary(def) | Declaration::SharedLibrary(def) => {
        TargetBody::Buildable(def)
      }
      Declaration::Alias(target) => TargetBody::Alias(target),
      Declaration::Environment(def) => TargetBody::Environment(def),
      Declaration::Generator(def) => TargetBody::Generator(def),
      Declaration::FileType(def) => TargetBody::FileType(def),
      Declaration::External(def) => TargetBody::External(def),
      Declaration::Finder => TargetBody::Hook(HookDef::default()),
      Declaration::Builder(kinds) => TargetBody::Hook(HookDef { kinds }),
    }
  }
}

/// Whether a target is still a forward reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
  /// Created by a reference; carries no attributes yet.
  Placeholder,
  Complete(TargetBody),
}

/// An attribute of one target pointing at another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
  pub field: &'static str,
  pub target: TargetId,
  /// Kinds the referent may have. Empty means any kind.
  pub expected: &'static [TargetKind],
}

const DEPENDENCY_KINDS: &[TargetKind] = &[
  TargetKind::Executable,
  TargetKind::StaticLibrary,
  TargetKind::SharedLibrary,
  TargetKind::External,
];
const ENVIRONMENT_KINDS: &[TargetKind] = &[TargetKind::Environment];
const GENERATOR_KINDS: &[TargetKind] = &[TargetKind::Generator];
const EXECUTOR_KINDS: &[TargetKind] = &[TargetKind::External];
const ANY_KIND: &[TargetKind] = &[];

/// A target record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
  pub(crate) kind: TargetKind,
  pub(crate) name: String,
  pub(crate) definition: Definition,
}

impl Target {
  pub(crate) fn placeholder(kind: TargetKind, name: String) -> Self {
    Self {
      kind,
      name,
      definition: Definition::Placeholder,
    }
  }

  pub fn kind(&self) -> TargetKind {
    self.kind
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// `kind::name`, used in diagnostics.
  pub fn label(&self) -> String {
    format!("{}::{}", self.kind, self.name)
  }

  pub fn definition(&self) -> &Definition {
    &self.definition
  }

  pub fn body(&self) -> Option<&TargetBody> {
    match &self.definition {
      Definition::Complete(body) => Some(body),
      Definition::Placeholder => None,
    }
  }

  pub fn is_placeholder(&self) -> bool {
    matches!(self.definition, Definition::Placeholder)
  }

  /// Complete, and for externals also located.
  pub fn is_resolved(&self) -> bool {
    match &self.definition {
      Definition::Placeholder => false,
      Definition::Complete(TargetBody::External(def)) => def.is_resolved(),
      Definition::Complete(_) => true,
    }
  }

  pub fn as_buildable(&self) -> Option<&BuildableDef> {
    match self.body() {
      Some(TargetBody::Buildable(def)) => Some(def),
      _ => None,
    }
  }

  pub fn as_environment(&self) -> Option<&EnvironmentDef> {
    match self.body() {
      Some(TargetBody::Environment(def)) => Some(def),
      _ => None,
    }
  }

  pub fn as_generator(&self) -> Option<&GeneratorDef> {
    match self.body() {
      Some(TargetBody::Generator(def)) => Some(def),
      _ => None,
    }
  }

  pub fn as_filetype(&self) -> Option<&FileTypeDef> {
    match self.body() {
      Some(TargetBody::FileType(def)) => Some(def),
      _ => None,
    }
  }

  pub fn as_external(&self) -> Option<&ExternalDef> {
    match self.body() {
      Some(TargetBody::External(def)) => Some(def),
      _ => None,
    }
  }

  pub fn as_hook(&self) -> Option<&HookDef> {
    match self.body() {
      Some(TargetBody::Hook(def)) => Some(def),
      _ => None,
    }
  }

  pub fn alias_target(&self) -> Option<TargetId> {
    match self.body() {
      Some(TargetBody::Alias(target)) => Some(*target),
      _ => None,
    }
  }

  /// All attributes of this target that point at other targets.
  pub fn references(&self) -> Vec<Reference> {
    let mut refs = Vec::new();
    let mut push = |field, target, expected| refs.push(Reference { field, target, expected });

    match self.body() {
      Some(TargetBody::Buildable(def)) => {
        for &dep in &def.dependencies {
          push("dependencies", dep, DEPENDENCY_KINDS);
        }
        if let Some(env) = def.environment {
          push("environment", env, ENVIRONMENT_KINDS);
        }
        if let Some(generator) = def.generator {
          push("generator", generator, GENERATOR_KINDS);
        }
      }
      Some(TargetBody::Alias(target)) => push("target", *target, ANY_KIND),
      Some(TargetBody::Environment(def)) => {
        if let Some(parent) = def.parent {
          push("parent", parent, ENVIRONMENT_KINDS);
        }
        if let Some(linker) = def.linker {
          push("linker", linker, GENERATOR_KINDS);
        }
        if let Some(archiver) = def.archiver {
          push("archiver", archiver, GENERATOR_KINDS);
        }
      }
      Some(TargetBody::Generator(def)) => push("executor", def.executor, EXECUTOR_KINDS),
      Some(TargetBody::FileType(def)) => push("generator", def.generator, GENERATOR_KINDS),
      Some(TargetBody::External(_)) | Some(TargetBody::Hook(_)) | None => {}
    }

    refs
  }
}
