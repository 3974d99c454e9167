//! Manifest model and parser contract.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while reading a unit manifest.
///
/// These fail only the offending unit.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed manifest {path}: {message}")]
  Malformed { path: PathBuf, message: String },

  #[error("manifest {path} is missing required attribute '{attribute}'")]
  MissingAttribute { path: PathBuf, attribute: &'static str },

  #[error("unit name '{name}' in {path} is already used by {existing}")]
  DuplicateName {
    name: String,
    path: PathBuf,
    existing: PathBuf,
  },
}

/// What pre-declare needs: identity, descriptive fields and dependency names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitHeader {
  pub name: String,
  pub title: Option<String>,
  pub author: Option<String>,
  pub version: Option<String>,
  pub description: Option<String>,
  pub dependencies: Vec<String>,
}

/// A unit-scoped builder alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderAlias {
  pub name: String,
  /// Key into the host's builder registry.
  pub target: String,
}

/// A record fragment as declared in a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSpec {
  pub name: String,
  pub builder: String,
  pub type_name: Option<String>,
  pub position: Option<String>,
  pub properties: BTreeMap<String, String>,
  pub behaviors: BTreeMap<String, BTreeMap<String, String>>,
  /// Records mounted under this one.
  pub children: Vec<RecordSpec>,
}

/// A group of records to mount under one base path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSpec {
  pub path: String,
  pub records: Vec<RecordSpec>,
}

/// The full content of a unit, read at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitContent {
  pub builders: Vec<BuilderAlias>,
  pub extensions: Vec<ExtensionSpec>,
}

impl UnitContent {
  /// Number of records across all extensions, nested ones included.
  pub fn record_count(&self) -> usize {
    fn count(records: &[RecordSpec]) -> usize {
      records.iter().map(|r| 1 + count(&r.children)).sum()
    }
    self.extensions.iter().map(|e| count(&e.records)).sum()
  }
}

/// Reads unit files. The loader never parses a file format itself.
pub trait ManifestParser: Send + Sync {
  /// File extension (without the dot) that identifies unit files.
  fn extension(&self) -> &str;

  /// Read only the header. Called at pre-declare time.
  fn parse_manifest(&self, path: &Path) -> Result<UnitHeader, ManifestError>;

  /// Read builder aliases and record fragments. Called at load time.
  fn parse_content(&self, path: &Path) -> Result<UnitContent, ManifestError>;
}
