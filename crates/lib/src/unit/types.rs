//! Unit, manifest and dependency types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::record::Record;

/// Index of a unit inside its [`Forest`](super::Forest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UnitId(pub(crate) usize);

impl fmt::Display for UnitId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Lifecycle of a unit.
///
/// `Loading` is entered at pre-declare time, `Loaded` once the unit's content is
/// mounted. `Failed` units never appear in the live forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
  #[default]
  None,
  Loading,
  Loaded,
  Unloading,
  Unloaded,
  Failed,
}

impl UnitStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      UnitStatus::None => "none",
      UnitStatus::Loading => "loading",
      UnitStatus::Loaded => "loaded",
      UnitStatus::Unloading => "unloading",
      UnitStatus::Unloaded => "unloaded",
      UnitStatus::Failed => "failed",
    }
  }
}

impl fmt::Display for UnitStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A declared dependency: a name, plus the unit it resolved to once discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDependency {
  pub name: String,
  pub unit: Option<UnitId>,
}

impl UnitDependency {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      unit: None,
    }
  }
}

/// Static description of a unit.
#[derive(Debug, Clone, Default)]
pub struct UnitManifest {
  pub title: Option<String>,
  pub author: Option<String>,
  pub version: Option<String>,
  pub description: Option<String>,
  pub dependencies: Vec<UnitDependency>,
}

impl UnitManifest {
  pub fn has_dependencies(&self) -> bool {
    !self.dependencies.is_empty()
  }
}

/// One loadable unit.
#[derive(Debug)]
pub struct Unit {
  pub id: UnitId,
  /// Unique (case-insensitively) among siblings.
  pub name: String,
  /// The manifest file this unit was declared from.
  pub path: PathBuf,
  pub status: UnitStatus,
  /// Why the unit is in its current status (set for failures).
  pub status_description: Option<String>,
  pub manifest: UnitManifest,
  pub parent: Option<UnitId>,
  pub children: Vec<UnitId>,
  /// Records registered to this unit, in mount order.
  pub records: Vec<Arc<Record>>,
  /// Unit-scoped builder aliases: alias (lowercased) -> registry key.
  pub builders: BTreeMap<String, String>,
}

impl Unit {
  pub(crate) fn new(id: UnitId, name: &str, path: PathBuf, parent: Option<UnitId>) -> Self {
    Self {
      id,
      name: name.to_string(),
      path,
      status: UnitStatus::None,
      status_description: None,
      manifest: UnitManifest::default(),
      parent,
      children: Vec::new(),
      records: Vec::new(),
      builders: BTreeMap::new(),
    }
  }

  /// Declare a dependency by name. Duplicate names are ignored.
  pub fn add_dependency(&mut self, name: &str) {
    let name = name.trim();
    if name.is_empty()
      || self
        .manifest
        .dependencies
        .iter()
        .any(|d| d.name.eq_ignore_ascii_case(name))
    {
      return;
    }
    self.manifest.dependencies.push(UnitDependency::new(name));
  }

  /// A master unit declares no dependencies.
  pub fn is_master(&self) -> bool {
    !self.manifest.has_dependencies()
  }

  /// Look up a unit-scoped builder alias.
  pub fn builder_alias(&self, name: &str) -> Option<&str> {
    self.builders.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  pub(crate) fn fail(&mut self, reason: impl Into<String>) {
    self.status = UnitStatus::Failed;
    self.status_description = Some(reason.into());
  }
}

/// Errors raised while resolving and ordering unit dependencies.
///
/// These fail only the affected unit(s); they never abort a batch load.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DependencyError {
  /// A declared dependency matched no sibling or ancestor sibling.
  #[error("unit '{unit}' depends on '{dependency}', which does not exist")]
  NotFound { unit: String, dependency: String },

  /// A dependency resolved but did not load.
  #[error("unit '{unit}' depends on '{dependency}', which failed to load")]
  Failed { unit: String, dependency: String },

  /// The unit is part of a dependency cycle.
  #[error("dependency cycle detected: {}", units.join(" -> "))]
  Cycle { units: Vec<String> },
}
