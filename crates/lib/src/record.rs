//! Deferred records.
//!
//! A [`Record`] describes what to build (builder key, optional declared type,
//! raw properties and behaviors) and memoizes what was built. Records belong to
//! exactly one unit and are bound to exactly one tree node; the binding is set
//! once at mount time and never changes.
//!
//! Only the build orchestrator writes the memoized value.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::tree::{NodeId, TreeError};
use crate::unit::UnitId;
use crate::value::Value;

/// A named bag of raw properties attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Behavior {
  pub name: String,
  pub properties: BTreeMap<String, String>,
}

impl Behavior {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      properties: BTreeMap::new(),
    }
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.properties.insert(key.into(), value.into());
    self
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.properties.get(key).map(String::as_str)
  }

  /// Read a property as a boolean flag (`true`/`false`, case-insensitive).
  pub fn flag(&self, key: &str) -> Option<bool> {
    match self.get(key)?.trim() {
      v if v.eq_ignore_ascii_case("true") => Some(true),
      v if v.eq_ignore_ascii_case("false") => Some(false),
      _ => None,
    }
  }
}

/// A deferred-construction description mounted at a tree node.
pub struct Record {
  name: String,
  builder: String,
  unit: UnitId,
  type_name: Option<String>,
  position: Option<String>,
  properties: BTreeMap<String, String>,
  behaviors: BTreeMap<String, Behavior>,
  node: OnceLock<NodeId>,
  value: RwLock<Option<Value>>,
  built: AtomicBool,
}

impl Record {
  pub fn new(name: impl Into<String>, builder: impl Into<String>, unit: UnitId) -> Self {
    Self {
      name: name.into(),
      builder: builder.into(),
      unit,
      type_name: None,
      position: None,
      properties: BTreeMap::new(),
      behaviors: BTreeMap::new(),
      node: OnceLock::new(),
      value: RwLock::new(None),
      built: AtomicBool::new(false),
    }
  }

  pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
    self.type_name = Some(type_name.into());
    self
  }

  pub fn with_position(mut self, position: impl Into<String>) -> Self {
    self.position = Some(position.into());
    self
  }

  pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.properties.insert(key.into(), value.into());
    self
  }

  pub fn with_behavior(mut self, behavior: Behavior) -> Self {
    self.behaviors.insert(behavior.name.to_ascii_lowercase(), behavior);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// The builder key, resolved through unit aliases and then the registry.
  pub fn builder(&self) -> &str {
    &self.builder
  }

  pub fn unit(&self) -> UnitId {
    self.unit
  }

  /// The statically declared type, if any.
  pub fn declared_type(&self) -> Option<&str> {
    self.type_name.as_deref()
  }

  pub fn position(&self) -> Option<&str> {
    self.position.as_deref()
  }

  pub fn properties(&self) -> &BTreeMap<String, String> {
    &self.properties
  }

  pub fn property(&self, key: &str) -> Option<&str> {
    self.properties.get(key).map(String::as_str)
  }

  pub fn behaviors(&self) -> impl Iterator<Item = &Behavior> {
    self.behaviors.values()
  }

  pub fn behavior(&self, name: &str) -> Option<&Behavior> {
    self.behaviors.get(&name.to_ascii_lowercase())
  }

  /// The node this record is mounted at.
  pub fn node(&self) -> Option<NodeId> {
    self.node.get().copied()
  }

  pub(crate) fn bind(&self, node: NodeId) -> Result<(), TreeError> {
    self
      .node
      .set(node)
      .map_err(|_| TreeError::RecordAlreadyMounted {
        record: self.name.clone(),
      })
  }

  pub fn is_built(&self) -> bool {
    self.built.load(Ordering::Acquire)
  }

  /// The memoized value, if a build produced one. Never builds.
  pub fn cached(&self) -> Option<Value> {
    if !self.is_built() {
      return None;
    }
    self
      .value
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Store a build product. A build that produced nothing leaves the record
  /// unbuilt, so the next request builds again.
  pub(crate) fn store(&self, value: Option<Value>) {
    let mut slot = self.value.write().unwrap_or_else(PoisonError::into_inner);
    self.built.store(value.is_some(), Ordering::Release);
    *slot = value;
  }

  /// Drop the memoized value and return it.
  pub(crate) fn take(&self) -> Option<Value> {
    let mut slot = self.value.write().unwrap_or_else(PoisonError::into_inner);
    self.built.store(false, Ordering::Release);
    slot.take()
  }
}

impl fmt::Debug for Record {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Record")
      .field("name", &self.name)
      .field("builder", &self.builder)
      .field("unit", &self.unit)
      .field("type_name", &self.type_name)
      .field("node", &self.node())
      .field("built", &self.is_built())
      .finish()
  }
}
