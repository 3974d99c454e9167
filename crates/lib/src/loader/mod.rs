//! Plugin forest loading and unloading.
//!
//! A load runs in two passes over the directory forest:
//!
//! 1. every unit file is pre-declared from its header only. Units of a
//!    directory become children of the caller's unit; subdirectories are
//!    parented to the directory's first master unit (a unit with no
//!    dependencies) or else to the caller's unit;
//! 2. each sibling group of the declared forest is loaded in dependency order
//!    with a work stack, parent groups before their children. Units stuck on a
//!    dependency cycle are found with Tarjan's algorithm and failed.
//!
//! Per-unit failures are isolated: they are logged, sent to listeners and
//! collected in the [`LoadReport`], but they never abort the batch. Only a
//! missing root directory fails a whole load.
//!
//! # Submodules
//!
//! - [`events`] - Lifecycle events and the listener contract

pub mod events;
mod types;

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

pub use events::{Flow, LoaderEvent, LoaderListener};
pub use types::*;

use crate::build::BuildSettings;
use crate::engine::Engine;
use crate::manifest::{RecordSpec, UnitContent};
use crate::record::{Behavior, Record};
use crate::tree::{Tree, TreeError};
use crate::unit::{DependencyError, Unit, UnitId, UnitStatus};

enum Readiness {
  /// Not waiting to load any more (loaded, failed or gone).
  Done,
  Ready,
  Waiting(Vec<UnitId>),
  DependencyFailed(String),
}

pub(crate) struct Loader<'a> {
  engine: &'a Engine,
}

impl<'a> Loader<'a> {
  pub(crate) fn new(engine: &'a Engine) -> Self {
    Self { engine }
  }

  pub(crate) fn load(&self, root: &Path) -> Result<LoadReport, LoadError> {
    let root = dunce::canonicalize(root)
      .ok()
      .filter(|p| p.is_dir())
      .ok_or_else(|| LoadError::RootNotFound {
        path: root.to_path_buf(),
      })?;

    info!(root = %root.display(), "loading plugins");
    self.engine.emit(&LoaderEvent::LoadingStarted { root: root.clone() });

    let mut report = LoadReport {
      root: root.clone(),
      ..LoadReport::default()
    };
    self.declare_directory(&root, None, &mut report);
    self.load_level(None, &mut report);
    self.build_eager_paths(&mut report);

    info!(
      loaded = report.loaded.len(),
      failed = report.failed.len(),
      "plugins loaded"
    );
    self.engine.emit(&LoaderEvent::LoadingFinished {
      root,
      loaded: report.loaded.len(),
      failed: report.failed.len(),
    });
    Ok(report)
  }

  fn is_hidden(path: &Path) -> bool {
    path
      .file_name()
      .and_then(|n| n.to_str())
      .is_some_and(|n| n.starts_with('.'))
  }

  fn is_unit_file(&self, path: &Path) -> bool {
    let extension = self.engine.parser().extension();
    path
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|e| e.eq_ignore_ascii_case(extension))
  }

  /// Unit files and subdirectories directly inside `dir`, sorted by name.
  fn scan(&self, dir: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let follow_hidden = self.engine.config().follow_hidden;
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
      let entry = match entry {
        Ok(entry) => entry,
        Err(err) => {
          warn!(dir = %dir.display(), error = %err, "skipping unreadable entry");
          continue;
        }
      };
      let path = entry.path();
      if entry.file_type().is_dir() {
        if follow_hidden || !Self::is_hidden(path) {
          dirs.push(path.to_path_buf());
        }
      } else if self.is_unit_file(path) {
        files.push(path.to_path_buf());
      }
    }
    (files, dirs)
  }

  /// Pre-declare every unit file below `dir`.
  fn declare_directory(&self, dir: &Path, parent: Option<UnitId>, report: &mut LoadReport) {
    let (files, dirs) = self.scan(dir);
    trace!(dir = %dir.display(), files = files.len(), dirs = dirs.len(), "scanned directory");

    let mut declared = Vec::with_capacity(files.len());
    let mut first_failure = None;
    for file in &files {
      match self.predeclare(file, parent) {
        Ok(id) => declared.push(id),
        Err((name, error)) => {
          first_failure.get_or_insert_with(|| name.clone());
          self.report_failure(name, file.clone(), error, report);
        }
      }
    }

    let master = {
      let forest = self.engine.forest();
      declared
        .iter()
        .copied()
        .find(|&id| forest.get(id).is_some_and(Unit::is_master))
    };

    if let (None, Some(failed)) = (master, &first_failure) {
      debug!(dir = %dir.display(), "no master unit survived pre-declare, failing subdirectories");
      for sub in &dirs {
        self.fail_directory(sub, failed, report);
      }
      return;
    }

    let scope = master.or(parent);
    for sub in &dirs {
      self.declare_directory(sub, scope, report);
    }
  }

  /// Load the declared sibling group under `parent`, then the children of
  /// each unit that loaded.
  fn load_level(&self, parent: Option<UnitId>, report: &mut LoadReport) {
    let group: Vec<UnitId> = {
      let forest = self.engine.forest();
      forest
        .siblings(parent)
        .iter()
        .copied()
        .filter(|&id| forest.get(id).is_some_and(|u| u.status == UnitStatus::Loading))
        .collect()
    };
    if group.is_empty() {
      return;
    }
    self.load_group(&group, report);

    for id in group {
      let Some((status, name)) = self.engine.forest().get(id).map(|u| (u.status, u.name.clone())) else {
        continue;
      };
      if status == UnitStatus::Loaded {
        self.load_level(Some(id), report);
      } else {
        self.fail_descendants(id, &name, report);
      }
    }
  }

  /// Fail every unit declared below a unit that did not load.
  fn fail_descendants(&self, id: UnitId, parent: &str, report: &mut LoadReport) {
    let children = self
      .engine
      .forest()
      .get(id)
      .map(|u| u.children.clone())
      .unwrap_or_default();
    for child in children {
      let error = UnitError::ParentFailed {
        parent: parent.to_string(),
      };
      self.fail_unit(child, error, report);
      self.fail_descendants(child, parent, report);
    }
  }

  /// Declare a unit from its header only.
  fn predeclare(&self, file: &Path, parent: Option<UnitId>) -> Result<UnitId, (String, UnitError)> {
    let fallback = file
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    let header = self
      .engine
      .parser()
      .parse_manifest(file)
      .map_err(|e| (fallback, UnitError::Manifest(e)))?;

    let mut forest = self.engine.forest_mut();
    let id = forest
      .declare(&header.name, file, parent)
      .map_err(|e| (header.name.clone(), UnitError::Manifest(e)))?;

    if let Some(unit) = forest.get_mut(id) {
      unit.manifest.title = header.title;
      unit.manifest.author = header.author;
      unit.manifest.version = header.version;
      unit.manifest.description = header.description;
      for dependency in &header.dependencies {
        unit.add_dependency(dependency);
      }
    }
    debug!(unit = %header.name, path = %file.display(), "declared unit");
    Ok(id)
  }

  fn report_failure(&self, name: String, path: PathBuf, error: UnitError, report: &mut LoadReport) {
    warn!(unit = %name, path = %path.display(), error = %error, "unit failed to load");
    self.engine.emit(&LoaderEvent::UnitFailed {
      name: name.clone(),
      path: path.clone(),
      reason: error.to_string(),
    });
    report.failed.push(UnitFailure { name, path, error });
  }

  /// Mark a declared unit failed and remove it from the live forest.
  fn fail_unit(&self, id: UnitId, error: UnitError, report: &mut LoadReport) {
    let (name, path) = {
      let mut forest = self.engine.forest_mut();
      let Some(unit) = forest.get_mut(id) else {
        return;
      };
      unit.fail(error.to_string());
      let info = (unit.name.clone(), unit.path.clone());
      forest.detach(id);
      info
    };
    self.report_failure(name, path, error, report);
  }

  /// Report every unit file below `dir` as failed because the unit that would
  /// have parented it failed to pre-declare.
  fn fail_directory(&self, dir: &Path, parent: &str, report: &mut LoadReport) {
    let follow_hidden = self.engine.config().follow_hidden;
    let walker = WalkDir::new(dir)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|e| follow_hidden || e.depth() == 0 || !Self::is_hidden(e.path()));

    for entry in walker.flatten() {
      let path = entry.path();
      if !entry.file_type().is_file() || !self.is_unit_file(path) {
        continue;
      }
      let name = self
        .engine
        .parser()
        .parse_manifest(path)
        .map(|h| h.name)
        .unwrap_or_else(|_| {
          path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
        });
      let error = UnitError::ParentFailed {
        parent: parent.to_string(),
      };
      self.report_failure(name, path.to_path_buf(), error, report);
    }
  }

  /// Load one sibling group in dependency order.
  fn load_group(&self, group: &[UnitId], report: &mut LoadReport) {
    for &id in group {
      let resolved = self.engine.forest_mut().resolve_dependencies(id);
      if let Err(error) = resolved {
        self.fail_unit(id, error.into(), report);
      }
    }

    let mut previous_stuck = usize::MAX;
    loop {
      self.drain(group, report);

      let stuck: Vec<UnitId> = {
        let forest = self.engine.forest();
        group
          .iter()
          .copied()
          .filter(|&id| forest.get(id).is_some_and(|u| u.status == UnitStatus::Loading))
          .collect()
      };
      if stuck.is_empty() {
        break;
      }

      let failed_cycles = self.fail_cycles(&stuck, report);
      if !failed_cycles && stuck.len() >= previous_stuck {
        // No cycle and no progress: fail the rest rather than spin.
        let units = self.names(&stuck);
        for id in stuck {
          self.fail_unit(id, DependencyError::Cycle { units: units.clone() }.into(), report);
        }
        break;
      }
      previous_stuck = stuck.len();
    }
  }

  /// One pass of the work stack. Units whose dependencies are not loaded yet
  /// are retried once after their dependencies; a unit seen waiting twice is
  /// left for cycle detection.
  fn drain(&self, group: &[UnitId], report: &mut LoadReport) {
    let mut stack: Vec<UnitId> = group.iter().rev().copied().collect();
    let mut deferred = HashSet::new();

    while let Some(id) = stack.pop() {
      match self.readiness(id) {
        Readiness::Done => {}
        Readiness::Ready => self.load_unit(id, report),
        Readiness::DependencyFailed(dependency) => {
          let unit = self.names(&[id]).pop().unwrap_or_default();
          self.fail_unit(id, DependencyError::Failed { unit, dependency }.into(), report);
        }
        Readiness::Waiting(pending) => {
          if !deferred.insert(id) {
            trace!(unit = ?id, "still waiting on dependencies");
            continue;
          }
          stack.push(id);
          stack.extend(pending.into_iter().rev());
        }
      }
    }
  }

  fn readiness(&self, id: UnitId) -> Readiness {
    let forest = self.engine.forest();
    let Some(unit) = forest.get(id) else {
      return Readiness::Done;
    };
    if unit.status != UnitStatus::Loading {
      return Readiness::Done;
    }

    let mut pending = Vec::new();
    for dependency in &unit.manifest.dependencies {
      let Some(target) = dependency.unit else {
        return Readiness::DependencyFailed(dependency.name.clone());
      };
      match forest.get(target).map(|u| u.status) {
        Some(UnitStatus::Loaded) => {}
        Some(UnitStatus::Loading) => pending.push(target),
        _ => return Readiness::DependencyFailed(dependency.name.clone()),
      }
    }

    if pending.is_empty() {
      Readiness::Ready
    } else {
      Readiness::Waiting(pending)
    }
  }

  /// Fail every unit that sits on a dependency cycle among `stuck`. Returns
  /// whether any cycle was found.
  fn fail_cycles(&self, stuck: &[UnitId], report: &mut LoadReport) -> bool {
    let cycles: Vec<Vec<UnitId>> = {
      let forest = self.engine.forest();
      let mut graph = DiGraph::<UnitId, ()>::new();
      let index: HashMap<UnitId, _> = stuck.iter().map(|&id| (id, graph.add_node(id))).collect();

      for &id in stuck {
        let Some(unit) = forest.get(id) else {
          continue;
        };
        for target in unit.manifest.dependencies.iter().filter_map(|d| d.unit) {
          if let Some(&to) = index.get(&target) {
            graph.add_edge(index[&id], to, ());
          }
        }
      }

      tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
          let mut ids: Vec<UnitId> = scc.into_iter().map(|n| graph[n]).collect();
          ids.sort();
          ids
        })
        .collect()
    };

    for cycle in &cycles {
      let units = self.names(cycle);
      for &id in cycle {
        self.fail_unit(id, DependencyError::Cycle { units: units.clone() }.into(), report);
      }
    }
    !cycles.is_empty()
  }

  fn names(&self, ids: &[UnitId]) -> Vec<String> {
    let forest = self.engine.forest();
    ids
      .iter()
      .filter_map(|&id| forest.get(id).map(|u| u.name.clone()))
      .collect()
  }

  /// Parse a unit's content, register its builder aliases and mount its
  /// records. A mount failure rolls back everything the unit mounted.
  fn load_unit(&self, id: UnitId, report: &mut LoadReport) {
    let Some((name, path)) = self.engine.forest().get(id).map(|u| (u.name.clone(), u.path.clone())) else {
      return;
    };
    self.engine.emit(&LoaderEvent::UnitLoading {
      name: name.clone(),
      path: path.clone(),
    });

    let content = match self.engine.parser().parse_content(&path) {
      Ok(content) => content,
      Err(error) => {
        self.fail_unit(id, error.into(), report);
        return;
      }
    };

    if let Some(unit) = self.engine.forest_mut().get_mut(id) {
      for alias in &content.builders {
        unit.builders.insert(alias.name.to_ascii_lowercase(), alias.target.clone());
      }
    }

    let mut mounted = Vec::new();
    let outcome = {
      let mut tree = self.engine.tree_mut();
      let outcome = mount_content(&mut tree, &content, id, &mut mounted);
      if outcome.is_err() {
        for record in mounted.iter().rev() {
          release_node(&mut tree, record);
        }
      }
      outcome
    };

    if let Err(error) = outcome {
      if let Some(unit) = self.engine.forest_mut().get_mut(id) {
        unit.builders.clear();
      }
      self.fail_unit(id, error.into(), report);
      return;
    }

    let records = mounted.len();
    if let Some(unit) = self.engine.forest_mut().get_mut(id) {
      unit.records = mounted;
      unit.status = UnitStatus::Loaded;
    }
    info!(unit = %name, records, "unit loaded");
    report.loaded.push(name.clone());
    self.engine.emit(&LoaderEvent::UnitLoaded { name, path });
  }

  fn build_eager_paths(&self, report: &mut LoadReport) {
    for path in &self.engine.config().eager_paths {
      let Some(node) = self.engine.find(path) else {
        debug!(path = %path, "eager path not present");
        continue;
      };
      match self.engine.build(node, &BuildSettings::default()) {
        Ok(_) => debug!(path = %path, "built eager path"),
        Err(error) => {
          warn!(path = %path, error = %error, "eager build failed");
          report.eager_failures.push(EagerFailure {
            path: path.clone(),
            error,
          });
        }
      }
    }
  }

  /// Unload a live unit: children, then slaves, then its records deepest
  /// first, then its builder aliases, then detach it. Returns false if the
  /// unit is not loaded or a listener vetoed.
  pub(crate) fn unload(&self, id: UnitId) -> bool {
    let info = {
      let forest = self.engine.forest();
      forest
        .get(id)
        .filter(|u| u.status == UnitStatus::Loaded && forest.is_live(id))
        .map(|u| (u.name.clone(), u.path.clone()))
    };
    let Some((name, path)) = info else {
      return false;
    };

    let flow = self.engine.emit(&LoaderEvent::UnitUnloading {
      name: name.clone(),
      path: path.clone(),
    });
    if flow == Flow::Veto {
      info!(unit = %name, "unload vetoed");
      return false;
    }

    let children = {
      let mut forest = self.engine.forest_mut();
      match forest.get_mut(id) {
        Some(unit) => {
          unit.status = UnitStatus::Unloading;
          unit.children.clone()
        }
        None => Vec::new(),
      }
    };
    for child in children {
      self.unload(child);
    }

    let slaves = self.engine.forest().slaves(id);
    for slave in slaves {
      self.unload(slave);
    }

    let mut records = self
      .engine
      .forest()
      .get(id)
      .map(|u| u.records.clone())
      .unwrap_or_default();
    records.reverse();
    {
      let tree = self.engine.tree();
      records.sort_by_key(|r| Reverse(r.node().map(|n| tree.depth(n)).unwrap_or(0)));
    }

    for record in &records {
      if let Err(error) = self.engine.destroy(record) {
        warn!(unit = %name, record = %record.name(), error = %error, "failed to destroy record");
      }
      release_node(&mut self.engine.tree_mut(), record);
    }

    {
      let mut forest = self.engine.forest_mut();
      if let Some(unit) = forest.get_mut(id) {
        unit.records.clear();
        unit.builders.clear();
        unit.status = UnitStatus::Unloaded;
      }
      forest.detach(id);
    }

    info!(unit = %name, records = records.len(), "unit unloaded");
    self.engine.emit(&LoaderEvent::UnitUnloaded { name, path });
    true
  }
}

fn mount_content(
  tree: &mut Tree,
  content: &UnitContent,
  unit: UnitId,
  mounted: &mut Vec<Arc<Record>>,
) -> Result<(), TreeError> {
  for extension in &content.extensions {
    for spec in &extension.records {
      mount_spec(tree, &extension.path, spec, unit, mounted)?;
    }
  }
  Ok(())
}

fn mount_spec(
  tree: &mut Tree,
  base: &str,
  spec: &RecordSpec,
  unit: UnitId,
  mounted: &mut Vec<Arc<Record>>,
) -> Result<(), TreeError> {
  let record = Arc::new(record_from_spec(spec, unit));
  let node = tree.mount_record(base, record.clone())?;
  mounted.push(record);

  let path = tree.full_path(node);
  for child in &spec.children {
    mount_spec(tree, &path, child, unit, mounted)?;
  }
  Ok(())
}

fn record_from_spec(spec: &RecordSpec, unit: UnitId) -> Record {
  let mut record = Record::new(&spec.name, &spec.builder, unit);
  if let Some(type_name) = &spec.type_name {
    record = record.with_type(type_name);
  }
  if let Some(position) = &spec.position {
    record = record.with_position(position);
  }
  for (key, value) in &spec.properties {
    record = record.with_property(key, value);
  }
  for (name, properties) in &spec.behaviors {
    let behavior = properties
      .iter()
      .fold(Behavior::new(name), |b, (k, v)| b.with(k, v));
    record = record.with_behavior(behavior);
  }
  record
}

/// Empty the record's node if it still holds this record, then prune vacant
/// nodes upward.
fn release_node(tree: &mut Tree, record: &Arc<Record>) {
  let Some(node) = record.node() else {
    return;
  };
  let holds = tree
    .node(node)
    .and_then(|n| n.content().record())
    .is_some_and(|r| Arc::ptr_eq(r, record));
  if holds {
    tree.clear(node);
    tree.prune(node);
  }
}
