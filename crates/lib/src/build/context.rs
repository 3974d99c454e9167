//! The context handed to builder strategies.

use std::sync::Arc;

use super::session::BuildSession;
use super::types::{BuildError, BuildSettings, ObtainMode};
use crate::engine::Engine;
use crate::record::Record;
use crate::resolve::ResolveContext;
use crate::tree::NodeId;
use crate::value::Value;

/// The nearest non-empty ancestor of a node being built.
#[derive(Debug, Clone)]
pub struct Owner {
  pub node: NodeId,
  pub path: String,
  /// The owner's value as it stands. Reading it never builds.
  pub value: Option<Value>,
  /// Set when the owner is a record.
  pub record: Option<Arc<Record>>,
}

/// State for building one record.
pub struct BuildContext<'a> {
  engine: &'a Engine,
  session: &'a mut BuildSession,
  record: Arc<Record>,
  node: NodeId,
  path: String,
  owner: Option<Owner>,
  settings: &'a BuildSettings,
  pub(crate) result: Option<Value>,
  pub(crate) cancel: bool,
}

impl<'a> BuildContext<'a> {
  pub(crate) fn new(
    engine: &'a Engine,
    session: &'a mut BuildSession,
    record: Arc<Record>,
    node: NodeId,
    owner: Option<Owner>,
    settings: &'a BuildSettings,
  ) -> Self {
    let path = engine.tree().full_path(node);
    Self {
      engine,
      session,
      record,
      node,
      path,
      owner,
      settings,
      result: None,
      cancel: false,
    }
  }

  pub fn record(&self) -> &Record {
    &self.record
  }

  pub fn node(&self) -> NodeId {
    self.node
  }

  /// Full tree path of the record.
  pub fn path(&self) -> &str {
    &self.path
  }

  pub fn owner(&self) -> Option<&Owner> {
    self.owner.as_ref()
  }

  pub fn owner_value(&self) -> Option<&Value> {
    self.owner.as_ref().and_then(|o| o.value.as_ref())
  }

  pub fn parameter(&self) -> Option<&Value> {
    self.settings.parameter.as_ref()
  }

  pub fn settings(&self) -> &BuildSettings {
    self.settings
  }

  pub fn property(&self, key: &str) -> Option<&str> {
    self.record.property(key)
  }

  /// Resolve a raw property through the engine's expression resolver.
  pub fn resolve_property(&self, key: &str) -> Result<Option<Value>, BuildError> {
    let Some(raw) = self.record.property(key) else {
      return Ok(None);
    };
    let ctx = ResolveContext {
      record: &self.record,
      path: &self.path,
      property: key,
    };
    Ok(Some(self.engine.resolver().resolve(raw, &ctx)?))
  }

  pub fn result(&self) -> Option<&Value> {
    self.result.as_ref()
  }

  /// Publish the product before the build returns. Nested lookups of this
  /// record in the same session observe it as the partial result.
  pub fn set_result(&mut self, value: Value) {
    self.session.set_partial(&self.record, Some(value.clone()));
    self.result = Some(value);
  }

  /// Suppress the children cascade for this record's subtree.
  pub fn cancel(&mut self) {
    self.cancel = true;
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel
  }

  /// Read another node's value inside this build session, relative to the
  /// record's node. Records in progress higher up yield their partial result.
  pub fn obtain(&mut self, path: &str) -> Result<Option<Value>, BuildError> {
    self.obtain_with(path, ObtainMode::Auto)
  }

  pub fn obtain_with(&mut self, path: &str, mode: ObtainMode) -> Result<Option<Value>, BuildError> {
    let node = self
      .engine
      .tree()
      .find_from(self.node, path)
      .ok_or_else(|| BuildError::NodeNotFound {
        path: path.to_string(),
      })?;
    super::obtain_in(self.engine, self.session, node, mode)
  }
}
