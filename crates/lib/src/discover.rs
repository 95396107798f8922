//! File and folder enumeration for recipes.
//!
//! Results are relative to the recipe root, ready to use as target sources
//! and include directories.

use std::path::{Path, PathBuf};

use glob::glob;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum DiscoverError {
  #[error("invalid glob pattern {pattern}: {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: glob::PatternError,
  },

  #[error("not a directory: {0}")]
  NotADirectory(PathBuf),
}

/// Expand glob patterns relative to `root`.
///
/// Only regular files match. The result is sorted and free of duplicates.
/// Entries that cannot be read are skipped with a warning.
pub fn files<I, S>(root: &Path, patterns: I) -> Result<Vec<PathBuf>, DiscoverError>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut results = Vec::new();

  for pattern in patterns {
    let pattern = pattern.as_ref();
    let full_pattern = root.join(pattern);
    let entries = glob(&full_pattern.to_string_lossy()).map_err(|source| DiscoverError::Pattern {
      pattern: pattern.to_string(),
      source,
    })?;

    for entry in entries {
      match entry {
        Ok(path) if path.is_file() => results.push(relative_to(root, path)),
        Ok(_) => {}
        Err(e) => warn!(pattern = %pattern, error = %e, "skipping unreadable glob entry"),
      }
    }
  }

  results.sort();
  results.dedup();
  Ok(results)
}

/// Resolve directory paths relative to `root`, keeping their order.
///
/// # Errors
///
/// Returns `NotADirectory` for the first path that is missing or not a
/// directory.
pub fn folders<I, P>(root: &Path, paths: I) -> Result<Vec<PathBuf>, DiscoverError>
where
  I: IntoIterator<Item = P>,
  P: AsRef<Path>,
{
  let mut results: Vec<PathBuf> = Vec::new();
  for path in paths {
    let path = path.as_ref();
    if !root.join(path).is_dir() {
      return Err(DiscoverError::NotADirectory(path.to_path_buf()));
    }
    if !results.iter().any(|existing| existing == path) {
      results.push(path.to_path_buf());
    }
  }
  Ok(results)
}

fn relative_to(root: &Path, path: PathBuf) -> PathBuf {
  match path.strip_prefix(root) {
    Ok(relative) => relative.to_path_buf(),
    Err(_) => path,
  }
}
