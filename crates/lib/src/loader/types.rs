//! Load results and errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::build::BuildError;
use crate::manifest::ManifestError;
use crate::tree::TreeError;
use crate::unit::DependencyError;

/// Errors fatal to a whole load.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error("plugin root {path} does not exist or is not a directory")]
  RootNotFound { path: PathBuf },
}

/// Why a single unit failed. Never escapes a batch load.
#[derive(Debug, Error)]
pub enum UnitError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Dependency(#[from] DependencyError),

  #[error("failed to mount unit content: {0}")]
  Mount(#[from] TreeError),

  #[error("parent unit '{parent}' did not load")]
  ParentFailed { parent: String },
}

/// A unit that did not make it into the live forest.
#[derive(Debug)]
pub struct UnitFailure {
  pub name: String,
  pub path: PathBuf,
  pub error: UnitError,
}

/// A well-known path that failed to build after loading.
#[derive(Debug)]
pub struct EagerFailure {
  pub path: String,
  pub error: BuildError,
}

/// Outcome of a batch load.
#[derive(Debug, Default)]
pub struct LoadReport {
  pub root: PathBuf,
  /// Names of units that reached `Loaded`, in load order.
  pub loaded: Vec<String>,
  pub failed: Vec<UnitFailure>,
  pub eager_failures: Vec<EagerFailure>,
}

impl LoadReport {
  pub fn is_clean(&self) -> bool {
    self.failed.is_empty() && self.eager_failures.is_empty()
  }

  pub fn failure(&self, name: &str) -> Option<&UnitFailure> {
    self.failed.iter().find(|f| f.name.eq_ignore_ascii_case(name))
  }
}
