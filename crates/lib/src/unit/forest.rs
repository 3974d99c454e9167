//! Arena-backed unit forest.
//!
//! Units are stored once in an arena and referenced by [`UnitId`]. The live
//! forest is whatever is reachable from `roots` through `children`; failed and
//! unloaded units stay in the arena for reporting but are detached.

use std::path::PathBuf;

use tracing::trace;

use super::types::{DependencyError, Unit, UnitId, UnitStatus};
use crate::manifest::ManifestError;

#[derive(Debug, Default)]
pub struct Forest {
  units: Vec<Unit>,
  roots: Vec<UnitId>,
}

impl Forest {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, id: UnitId) -> Option<&Unit> {
    self.units.get(id.0)
  }

  pub fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
    self.units.get_mut(id.0)
  }

  /// Top-level live units.
  pub fn roots(&self) -> &[UnitId] {
    &self.roots
  }

  /// The live units sharing `parent` (top-level units when `parent` is none).
  pub fn siblings(&self, parent: Option<UnitId>) -> &[UnitId] {
    match parent {
      None => &self.roots,
      Some(parent) => self.get(parent).map(|u| u.children.as_slice()).unwrap_or_default(),
    }
  }

  /// Find a live unit named `name` (case-insensitive) under `parent`.
  pub fn find_sibling(&self, parent: Option<UnitId>, name: &str) -> Option<UnitId> {
    self
      .siblings(parent)
      .iter()
      .copied()
      .find(|&id| self.get(id).is_some_and(|u| u.name.eq_ignore_ascii_case(name)))
  }

  /// Create a unit under `parent` in `Loading` status.
  ///
  /// Names must be unique among siblings; a clash is a manifest error for the
  /// newcomer and leaves the existing unit untouched.
  pub fn declare(
    &mut self,
    name: &str,
    path: impl Into<PathBuf>,
    parent: Option<UnitId>,
  ) -> Result<UnitId, ManifestError> {
    let path = path.into();
    let name = name.trim();
    if name.is_empty() {
      return Err(ManifestError::MissingAttribute {
        path,
        attribute: "name",
      });
    }
    if let Some(existing) = self.find_sibling(parent, name) {
      let existing_path = self.get(existing).map(|u| u.path.clone()).unwrap_or_default();
      return Err(ManifestError::DuplicateName {
        name: name.to_string(),
        path,
        existing: existing_path,
      });
    }

    let id = UnitId(self.units.len());
    let mut unit = Unit::new(id, name, path, parent);
    unit.status = UnitStatus::Loading;
    self.units.push(unit);

    match parent.and_then(|p| self.get_mut(p)) {
      Some(parent) => parent.children.push(id),
      None => self.roots.push(id),
    }
    trace!(unit = %name, "declared unit");
    Ok(id)
  }

  /// Resolve a dependency name from the point of view of unit `from`.
  ///
  /// Only siblings of `from`, then siblings of each of its ancestors, are
  /// eligible. Resolution never descends into another subtree.
  pub fn resolve(&self, from: UnitId, dependency: &str) -> Option<UnitId> {
    let mut scope = self.get(from)?.parent;
    loop {
      if let Some(found) = self.find_sibling(scope, dependency) {
        return Some(found);
      }
      scope = self.get(scope?)?.parent;
      if scope.is_none() {
        return self.find_sibling(None, dependency);
      }
    }
  }

  /// Resolve every declared dependency of `id`, recording the matches.
  pub fn resolve_dependencies(&mut self, id: UnitId) -> Result<(), DependencyError> {
    let Some(unit) = self.get(id) else {
      return Ok(());
    };
    let names: Vec<String> = unit.manifest.dependencies.iter().map(|d| d.name.clone()).collect();
    let unit_name = unit.name.clone();

    let mut resolved = Vec::with_capacity(names.len());
    for name in &names {
      match self.resolve(id, name) {
        Some(found) => resolved.push(found),
        None => {
          return Err(DependencyError::NotFound {
            unit: unit_name,
            dependency: name.clone(),
          });
        }
      }
    }

    if let Some(unit) = self.get_mut(id) {
      for (dependency, found) in unit.manifest.dependencies.iter_mut().zip(resolved) {
        dependency.unit = Some(found);
      }
    }
    Ok(())
  }

  /// Remove `id` from its parent's children (or the roots).
  pub fn detach(&mut self, id: UnitId) {
    let parent = self.get(id).and_then(|u| u.parent);
    match parent.and_then(|p| self.get_mut(p)) {
      Some(parent) => parent.children.retain(|&c| c != id),
      None => self.roots.retain(|&r| r != id),
    }
  }

  /// Returns true if `id` is reachable from the roots.
  pub fn is_live(&self, id: UnitId) -> bool {
    let Some(unit) = self.get(id) else {
      return false;
    };
    match unit.parent {
      None => self.roots.contains(&id),
      Some(parent) => {
        self.get(parent).is_some_and(|p| p.children.contains(&id)) && self.is_live(parent)
      }
    }
  }

  /// Live units whose resolved dependencies include `id`.
  pub fn slaves(&self, id: UnitId) -> Vec<UnitId> {
    self
      .live()
      .into_iter()
      .filter(|&candidate| {
        candidate != id
          && self.get(candidate).is_some_and(|u| {
            u.manifest
              .dependencies
              .iter()
              .any(|d| d.unit == Some(id))
          })
      })
      .collect()
  }

  /// Find a unit-scoped builder alias visible from `unit`.
  ///
  /// Searched in order: the unit itself, its resolved dependencies, its
  /// slaves, then each ancestor.
  pub fn builder_alias(&self, unit: UnitId, name: &str) -> Option<String> {
    let own = self.get(unit)?;
    let alias = |id: UnitId| self.get(id)?.builder_alias(name).map(str::to_string);

    alias(unit)
      .or_else(|| {
        own
          .manifest
          .dependencies
          .iter()
          .filter_map(|d| d.unit)
          .find_map(alias)
      })
      .or_else(|| self.slaves(unit).into_iter().find_map(alias))
      .or_else(|| {
        let mut current = own.parent;
        while let Some(parent) = current {
          if let Some(found) = alias(parent) {
            return Some(found);
          }
          current = self.get(parent)?.parent;
        }
        None
      })
  }

  /// Pre-order listing of the live forest.
  pub fn live(&self) -> Vec<UnitId> {
    let mut out = Vec::new();
    let mut stack: Vec<UnitId> = self.roots.iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
      out.push(id);
      if let Some(unit) = self.get(id) {
        stack.extend(unit.children.iter().rev().copied());
      }
    }
    out
  }

  /// Every unit ever declared, live or not.
  pub fn all(&self) -> impl Iterator<Item = &Unit> {
    self.units.iter()
  }

  /// First live unit named `name`, in pre-order.
  pub fn find(&self, name: &str) -> Option<UnitId> {
    self
      .live()
      .into_iter()
      .find(|&id| self.get(id).is_some_and(|u| u.name.eq_ignore_ascii_case(name)))
  }

  /// Depth below the top level.
  pub fn depth(&self, id: UnitId) -> usize {
    let mut depth = 0;
    let mut current = self.get(id).and_then(|u| u.parent);
    while let Some(parent) = current {
      depth += 1;
      current = self.get(parent).and_then(|u| u.parent);
    }
    depth
  }
}
