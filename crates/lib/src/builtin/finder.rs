//! Finder that locates executables on the search path.

use std::ffi::OsString;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::trace;

use crate::hooks::{FindOutcome, Finder};
use crate::registry::Registry;
use crate::target::{ExternalDef, ExternalKind, TargetId};

/// Looks up executable externals by their lookup name.
///
/// Searches `PATH` unless an explicit search path is set. Applies to externals
/// providing an executable or of unknown kind.
#[derive(Debug, Clone, Default)]
pub struct PathFinder {
  search_path: Option<OsString>,
}

impl PathFinder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Search these directories (in `PATH` syntax) instead of `PATH`.
  pub fn with_search_path(mut self, paths: impl Into<OsString>) -> Self {
    self.search_path = Some(paths.into());
    self
  }
}

#[async_trait]
impl Finder for PathFinder {
  fn applies_to(&self, external: &ExternalDef) -> bool {
    matches!(external.provides, ExternalKind::Executable | ExternalKind::Unknown)
  }

  async fn find(&self, _registry: &Registry, _id: TargetId, external: &ExternalDef) -> anyhow::Result<FindOutcome> {
    let name = external.lookup_name.clone();
    let search_path = self.search_path.clone();

    trace!(name = %name, "searching for executable");
    let found: which::Result<PathBuf> = tokio::task::spawn_blocking(move || match search_path {
      Some(paths) => which::which_in(&name, Some(paths), "."),
      None => which::which(&name),
    })
    .await?;

    match found {
      Ok(path) => Ok(FindOutcome::Found(path)),
      Err(which::Error::CannotFindBinaryPath) => Ok(FindOutcome::NotFound),
      Err(e) => Err(e.into()),
    }
  }
}
