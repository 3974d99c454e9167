//! Tree nodes and their content.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use crate::record::Record;
use crate::value::Value;

/// Index of a node in the tree arena.
///
/// Ids are never reused, so a stale id simply stops resolving once its node is
/// removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub(crate) usize);

/// What a node currently holds. Exactly one variant is active at a time.
#[derive(Clone, Default)]
pub enum NodeContent {
  /// A path segment only.
  #[default]
  Empty,
  /// A host-mounted value.
  Custom(Value),
  /// A deferred record, built on demand.
  Record(Arc<Record>),
}

impl NodeContent {
  pub fn kind(&self) -> NodeKind {
    match self {
      NodeContent::Empty => NodeKind::Empty,
      NodeContent::Custom(_) => NodeKind::Custom,
      NodeContent::Record(_) => NodeKind::Record,
    }
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, NodeContent::Empty)
  }

  pub fn record(&self) -> Option<&Arc<Record>> {
    match self {
      NodeContent::Record(record) => Some(record),
      _ => None,
    }
  }
}

impl fmt::Debug for NodeContent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NodeContent::Empty => f.write_str("Empty"),
      NodeContent::Custom(value) => write!(f, "Custom({:?})", value),
      NodeContent::Record(record) => write!(f, "Record({}:{})", record.name(), record.builder()),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
  Empty,
  Custom,
  Record,
}

impl NodeKind {
  pub fn as_str(self) -> &'static str {
    match self {
      NodeKind::Empty => "empty",
      NodeKind::Custom => "custom",
      NodeKind::Record => "record",
    }
  }
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A node in the composition tree.
#[derive(Debug)]
pub struct Node {
  pub(crate) id: NodeId,
  pub(crate) name: String,
  pub(crate) parent: Option<NodeId>,
  pub(crate) children: Vec<NodeId>,
  pub(crate) content: NodeContent,
  /// Cached full path. A node keeps its parent for life, so the cache never
  /// goes stale.
  pub(crate) full_path: OnceLock<String>,
}

impl Node {
  pub(crate) fn new(id: NodeId, name: &str, parent: Option<NodeId>) -> Self {
    Self {
      id,
      name: name.to_string(),
      parent,
      children: Vec::new(),
      content: NodeContent::Empty,
      full_path: OnceLock::new(),
    }
  }

  pub fn id(&self) -> NodeId {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn parent(&self) -> Option<NodeId> {
    self.parent
  }

  /// Children in insertion order (which honors positions).
  pub fn children(&self) -> &[NodeId] {
    &self.children
  }

  pub fn has_children(&self) -> bool {
    !self.children.is_empty()
  }

  pub fn content(&self) -> &NodeContent {
    &self.content
  }

  pub fn kind(&self) -> NodeKind {
    self.content.kind()
  }
}
