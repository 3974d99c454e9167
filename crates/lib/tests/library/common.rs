//! Shared fixtures: plugin directories on disk and instrumented builders.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arbor_lib::build::{BuildContext, BuildError, Builder};
use arbor_lib::loader::{Flow, LoaderEvent, LoaderListener};
use arbor_lib::{Engine, LoaderConfig, Record, Value};
use tempfile::TempDir;

/// Write a unit file below `root`, creating directories as needed.
pub fn write_unit(root: &Path, relative: &str, contents: &str) {
  let path = root.join(relative);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, contents).unwrap();
}

/// A plugin directory and an engine configured to load it.
pub fn fixture(units: &[(&str, &str)]) -> (TempDir, Engine) {
  let dir = TempDir::new().unwrap();
  for (relative, contents) in units {
    write_unit(dir.path(), relative, contents);
  }
  let engine = Engine::new(LoaderConfig::with_plugins_dir(dir.path()));
  (dir, engine)
}

/// Records every loader event and optionally vetoes unloads.
#[derive(Default)]
pub struct Recorder {
  pub events: Mutex<Vec<LoaderEvent>>,
  pub veto: Option<String>,
}

impl Recorder {
  pub fn vetoing(unit: &str) -> Self {
    Self {
      events: Mutex::new(Vec::new()),
      veto: Some(unit.to_string()),
    }
  }

  pub fn events(&self) -> Vec<LoaderEvent> {
    self.events.lock().unwrap().clone()
  }

  /// Names of units in events matching `pick`, in order.
  pub fn units(&self, pick: fn(&LoaderEvent) -> bool) -> Vec<String> {
    self
      .events()
      .iter()
      .filter(|e| pick(e))
      .filter_map(|e| e.unit().map(str::to_string))
      .collect()
  }
}

impl LoaderListener for Recorder {
  fn on_event(&self, event: &LoaderEvent) -> Flow {
    self.events.lock().unwrap().push(event.clone());
    match (event, &self.veto) {
      (LoaderEvent::UnitUnloading { name, .. }, Some(veto)) if name == veto => Flow::Veto,
      _ => Flow::Continue,
    }
  }
}

/// Builds the record's name as a `String` and counts invocations. Destroyed
/// records are logged by name.
#[derive(Default)]
pub struct Tracked {
  pub builds: AtomicUsize,
  pub destroyed: Mutex<Vec<String>>,
}

impl Tracked {
  pub fn builds(&self) -> usize {
    self.builds.load(Ordering::SeqCst)
  }

  pub fn destroyed(&self) -> Vec<String> {
    self.destroyed.lock().unwrap().clone()
  }
}

impl Builder for Tracked {
  fn build(&self, ctx: &mut BuildContext<'_>) -> Result<Option<Value>, BuildError> {
    self.builds.fetch_add(1, Ordering::SeqCst);
    Ok(Some(Value::new(ctx.record().name().to_string())))
  }

  fn destroy(&self, record: &Record, _value: Value) -> Result<(), BuildError> {
    self.destroyed.lock().unwrap().push(record.name().to_string());
    Ok(())
  }
}

/// Register a fresh [`Tracked`] builder under `key`.
pub fn track(engine: &Engine, key: &str) -> Arc<Tracked> {
  let tracked = Arc::new(Tracked::default());
  engine.register_builder(key, tracked.clone());
  tracked
}
