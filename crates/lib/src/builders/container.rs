//! Container adapters.
//!
//! Owners accept children through exactly three container shapes, selected by
//! the builder key rather than by probing the owner's type at runtime.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crate::build::{AppendContext, Appender, BuildContext, BuildError, Builder};
use crate::record::Record;
use crate::tree::{IndexKey, Member};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
  /// Ordered, keys kept for lookup only.
  List,
  /// Keyed; appending an existing key replaces its value in place.
  Map,
  /// Holds at most one value.
  Slot,
}

impl ContainerKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ContainerKind::List => "list",
      ContainerKind::Map => "map",
      ContainerKind::Slot => "slot",
    }
  }
}

/// A thread-safe container of built values.
pub struct Container {
  kind: ContainerKind,
  entries: RwLock<Vec<(String, Value)>>,
}

impl Container {
  pub fn new(kind: ContainerKind) -> Self {
    Self {
      kind,
      entries: RwLock::new(Vec::new()),
    }
  }

  pub fn list() -> Self {
    Self::new(ContainerKind::List)
  }

  pub fn map() -> Self {
    Self::new(ContainerKind::Map)
  }

  pub fn slot() -> Self {
    Self::new(ContainerKind::Slot)
  }

  pub fn kind(&self) -> ContainerKind {
    self.kind
  }

  /// Add `value` under `key`. A slot that is already filled refuses.
  pub fn append(&self, key: &str, value: Value) -> bool {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    match self.kind {
      ContainerKind::List => entries.push((key.to_string(), value)),
      ContainerKind::Map => match entries.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key.to_string(), value)),
      },
      ContainerKind::Slot => {
        if !entries.is_empty() {
          return false;
        }
        entries.push((key.to_string(), value));
      }
    }
    true
  }

  pub fn len(&self) -> usize {
    self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.clone())
  }

  pub fn at(&self, index: usize) -> Option<Value> {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(index)
      .map(|(_, v)| v.clone())
  }

  pub fn keys(&self) -> Vec<String> {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .map(|(k, _)| k.clone())
      .collect()
  }

  /// Snapshot of the entries in insertion order.
  pub fn entries(&self) -> Vec<(String, Value)> {
    self.entries.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn clear(&self) {
    self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
  }

  /// Navigate one member: a key, a position, or `value` for a slot.
  pub fn member(&self, member: &Member) -> Option<Value> {
    match member {
      Member::Field(name) if self.kind == ContainerKind::Slot && name == "value" => self.at(0),
      Member::Field(name) => self.get(name),
      Member::Index(IndexKey::Position(index)) => self.at(*index),
      Member::Index(IndexKey::Key(key)) => self.get(key),
    }
  }
}

impl fmt::Debug for Container {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Container")
      .field("kind", &self.kind)
      .field("keys", &self.keys())
      .finish()
  }
}

/// Builds empty containers and appends children into them.
#[derive(Debug, Clone, Copy)]
pub struct ContainerBuilder {
  kind: ContainerKind,
}

impl ContainerBuilder {
  pub fn new(kind: ContainerKind) -> Self {
    Self { kind }
  }
}

impl Builder for ContainerBuilder {
  fn build(&self, _ctx: &mut BuildContext<'_>) -> Result<Option<Value>, BuildError> {
    Ok(Some(Value::new(Container::new(self.kind))))
  }

  fn value_type(&self, _record: &Record) -> Option<String> {
    Some(self.kind.as_str().to_string())
  }

  fn appender(&self) -> Option<&dyn Appender> {
    Some(self)
  }
}

impl Appender for ContainerBuilder {
  fn append(&self, ctx: &AppendContext<'_>) -> Result<bool, BuildError> {
    match ctx.owner.downcast_ref::<Container>() {
      Some(container) => Ok(container.append(ctx.key, ctx.child.clone())),
      None => Err(BuildError::builder(
        ctx.owner_path,
        format!("owner is a {}, not a container", ctx.owner.type_name()),
      )),
    }
  }
}
