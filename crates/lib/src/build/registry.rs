//! Builder and appender contracts, and the host registry of builders.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::context::BuildContext;
use super::types::BuildError;
use crate::builders::Container;
use crate::record::Record;
use crate::value::Value;

/// Turns a record into a live value.
pub trait Builder: Send + Sync {
  /// Produce the record's value. A builder may also publish its product early
  /// with [`BuildContext::set_result`], which lets nested lookups of this same
  /// record see the partial result; returning a different value afterwards is
  /// an error.
  fn build(&self, ctx: &mut BuildContext<'_>) -> Result<Option<Value>, BuildError>;

  /// Called after children are built and before the product is appended.
  fn build_complete(&self, _record: &Record, _value: Option<&Value>) -> Result<(), BuildError> {
    Ok(())
  }

  /// Release a product. Containers are emptied; everything else is dropped.
  fn destroy(&self, _record: &Record, value: Value) -> Result<(), BuildError> {
    if let Some(container) = value.downcast_ref::<Container>() {
      container.clear();
    }
    Ok(())
  }

  /// Best-effort type of what [`Builder::build`] would produce, without
  /// building.
  fn value_type(&self, _record: &Record) -> Option<String> {
    None
  }

  /// The appender used when this builder's products own children.
  fn appender(&self) -> Option<&dyn Appender> {
    None
  }
}

/// What an appender is asked to splice.
#[derive(Debug, Clone, Copy)]
pub struct AppendContext<'a> {
  pub owner: &'a Value,
  pub owner_path: &'a str,
  pub child: &'a Value,
  /// The child record's name.
  pub key: &'a str,
  pub record: &'a Record,
}

/// Splices a built child into its owner.
pub trait Appender: Send + Sync {
  /// Returns false when the owner does not accept the child.
  fn append(&self, ctx: &AppendContext<'_>) -> Result<bool, BuildError>;
}

/// Host-registered builder strategies, keyed case-insensitively.
#[derive(Default)]
pub struct BuilderRegistry {
  builders: RwLock<BTreeMap<String, Arc<dyn Builder>>>,
}

impl BuilderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `builder` under `key`, replacing any previous registration.
  pub fn register(&self, key: &str, builder: Arc<dyn Builder>) {
    self
      .builders
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key.to_ascii_lowercase(), builder);
  }

  pub fn get(&self, key: &str) -> Option<Arc<dyn Builder>> {
    self
      .builders
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&key.to_ascii_lowercase())
      .cloned()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.get(key).is_some()
  }

  pub fn keys(&self) -> Vec<String> {
    self
      .builders
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .keys()
      .cloned()
      .collect()
  }
}
