//! Types for build execution.
//!
//! This module defines the error types, per-target states, the report
//! returned by a run, and the engine configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::target::{TargetId, TargetKind};

/// Errors that can occur during build execution.
///
/// `NoBuilderForKind` and `NotBuildable` abort a run. The remaining variants
/// describe the failure of a single target and are recorded in the
/// [`BuildReport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
  #[error("no builder is registered for {0} targets")]
  NoBuilderForKind(TargetKind),

  #[error("{target} is not a buildable target")]
  NotBuildable { target: String },

  #[error("{target} failed to build: {cause}")]
  BuilderFailure { target: String, cause: String },

  #[error("no finder located {target}")]
  FinderNotFound { target: String },

  #[error("finder failed for {target}: {cause}")]
  FinderError { target: String, cause: String },

  #[error("{target} was not built because {dependency} failed")]
  DependencyFailed { target: String, dependency: String },

  #[error("{target} needs {external}, which no finder located")]
  UnresolvedExecutor { target: String, external: String },
}

/// Build state of one target.
///
/// `Built` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
  /// An external with no known location, waiting for finder dispatch.
  Unresolved,
  #[default]
  Pending,
  /// All dependencies are built.
  Ready,
  Building,
  Built,
  Failed,
}

impl TargetState {
  pub fn is_terminal(self) -> bool {
    matches!(self, TargetState::Built | TargetState::Failed)
  }
}

impl fmt::Display for TargetState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TargetState::Unresolved => "unresolved",
      TargetState::Pending => "pending",
      TargetState::Ready => "ready",
      TargetState::Building => "building",
      TargetState::Built => "built",
      TargetState::Failed => "failed",
    };
    f.write_str(s)
  }
}

/// What caused a target to fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FailureKind {
  BuilderFailure,
  FinderError,
  FinderNotFound,
  /// Never attempted because a dependency failed.
  DependencyFailed { dependency: String },
  /// Never attempted because an external it needs was not located.
  UnresolvedExecutor { external: String },
}

/// The diagnostic recorded for a failed target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
  pub kind: FailureKind,
  pub message: String,
}

impl Failure {
  pub fn builder(message: impl Into<String>) -> Self {
    Self {
      kind: FailureKind::BuilderFailure,
      message: message.into(),
    }
  }

  pub fn finder_error(message: impl Into<String>) -> Self {
    Self {
      kind: FailureKind::FinderError,
      message: message.into(),
    }
  }

  pub fn not_found() -> Self {
    Self {
      kind: FailureKind::FinderNotFound,
      message: "no applicable finder located the external".to_string(),
    }
  }

  pub fn dependency(dependency: impl Into<String>) -> Self {
    let dependency = dependency.into();
    Self {
      message: format!("dependency {dependency} failed"),
      kind: FailureKind::DependencyFailed { dependency },
    }
  }

  pub fn unresolved_executor(external: impl Into<String>) -> Self {
    let external = external.into();
    Self {
      message: format!("{external} was not located by any finder"),
      kind: FailureKind::UnresolvedExecutor { external },
    }
  }

  /// The error this failure represents for `target`.
  pub fn to_error(&self, target: &str) -> ExecuteError {
    let target = target.to_string();
    match &self.kind {
      FailureKind::BuilderFailure => ExecuteError::BuilderFailure {
        target,
        cause: self.message.clone(),
      },
      FailureKind::FinderError => ExecuteError::FinderError {
        target,
        cause: self.message.clone(),
      },
      FailureKind::FinderNotFound => ExecuteError::FinderNotFound { target },
      FailureKind::DependencyFailed { dependency } => ExecuteError::DependencyFailed {
        target,
        dependency: dependency.clone(),
      },
      FailureKind::UnresolvedExecutor { external } => ExecuteError::UnresolvedExecutor {
        target,
        external: external.clone(),
      },
    }
  }
}

impl fmt::Display for Failure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message)
  }
}

/// Final state of one target after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
  pub id: TargetId,
  /// `kind::name`
  pub label: String,
  pub kind: TargetKind,
  pub state: TargetState,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failure: Option<Failure>,
  /// Offset from engine start at which the target began building.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<Duration>,
  /// Offset from engine start at which the target reached a terminal state.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<Duration>,
}

/// Per-state counts of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
  pub total: usize,
  pub built: usize,
  pub failed: usize,
  pub unfinished: usize,
}

/// Result of running the engine.
///
/// Lists every target of the run, requested targets and their transitive
/// dependencies, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
  pub targets: Vec<TargetReport>,
}

impl BuildReport {
  /// Returns true if every target was built.
  pub fn is_success(&self) -> bool {
    self.targets.iter().all(|t| t.state == TargetState::Built)
  }

  pub fn get(&self, id: TargetId) -> Option<&TargetReport> {
    self
      .targets
      .binary_search_by_key(&id, |t| t.id)
      .ok()
      .map(|idx| &self.targets[idx])
  }

  pub fn state(&self, id: TargetId) -> Option<TargetState> {
    self.get(id).map(|t| t.state)
  }

  pub fn built(&self) -> impl Iterator<Item = &TargetReport> {
    self.targets.iter().filter(|t| t.state == TargetState::Built)
  }

  pub fn failed(&self) -> impl Iterator<Item = &TargetReport> {
    self.targets.iter().filter(|t| t.state == TargetState::Failed)
  }

  /// One error per failed target.
  pub fn errors(&self) -> Vec<ExecuteError> {
    self
      .failed()
      .filter_map(|t| t.failure.as_ref().map(|f| f.to_error(&t.label)))
      .collect()
  }

  pub fn summary(&self) -> ReportSummary {
    let built = self.built().count();
    let failed = self.failed().count();
    ReportSummary {
      total: self.targets.len(),
      built,
      failed,
      unfinished: self.targets.len() - built - failed,
    }
  }

  /// Render the report for a driver.
  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&serde_json::json!({
      "success": self.is_success(),
      "summary": self.summary(),
      "targets": self.targets,
    }))
  }
}

/// Configuration for build execution.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Maximum number of builder batches and finder lookups running at once.
  pub parallelism: usize,

  /// Directory builders write artifacts into, relative to `root_dir` unless
  /// absolute.
  pub build_dir: PathBuf,

  /// Directory relative source paths are resolved against. Commands run here.
  pub root_dir: PathBuf,

  /// Mark targets built without invoking builders.
  pub dry_run: bool,

  /// Shell for command-running builders.
  /// If None, uses /bin/sh (Unix) or cmd.exe (Windows).
  pub shell: Option<String>,
}

pub const JOBS_ENV: &str = "SIMBA_JOBS";
pub const BUILD_DIR_ENV: &str = "SIMBA_BUILD_DIR";
pub const DRY_RUN_ENV: &str = "SIMBA_DRY_RUN";

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      build_dir: PathBuf::from("builddir"),
      root_dir: PathBuf::from("."),
      dry_run: false,
      shell: None,
    }
  }
}

impl EngineConfig {
  /// Defaults overlaid with `SIMBA_JOBS`, `SIMBA_BUILD_DIR` and `SIMBA_DRY_RUN`.
  ///
  /// Unparseable values are logged and ignored.
  pub fn from_env() -> Self {
    let mut config = Self::default();

    if let Ok(jobs) = std::env::var(JOBS_ENV) {
      match jobs.trim().parse::<usize>() {
        Ok(n) if n > 0 => config.parallelism = n,
        _ => warn!(value = %jobs, "ignoring invalid {JOBS_ENV}"),
      }
    }

    if let Ok(dir) = std::env::var(BUILD_DIR_ENV)
      && !dir.is_empty()
    {
      config.build_dir = PathBuf::from(dir);
    }

    if let Ok(flag) = std::env::var(DRY_RUN_ENV) {
      match flag.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => config.dry_run = true,
        "" | "0" | "false" | "no" | "off" => config.dry_run = false,
        _ => warn!(value = %flag, "ignoring invalid {DRY_RUN_ENV}"),
      }
    }

    config
  }

  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }

  pub fn with_build_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.build_dir = dir.into();
    self
  }

  pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.root_dir = dir.into();
    self
  }

  pub fn with_dry_run(mut self, dry_run: bool) -> Self {
    self.dry_run = dry_run;
    self
  }

  pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
    self.shell = Some(shell.into());
    self
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
