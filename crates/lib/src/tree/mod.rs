//! The composition tree.
//!
//! A mutable, path-addressable tree whose nodes hold nothing (a path segment),
//! a host-mounted custom value, or a deferred [`Record`]. Nodes live in an
//! arena and refer to each other by [`NodeId`], so parent links and record
//! bindings never form reference cycles.
//!
//! The tree itself never builds anything. In particular [`Tree::owner_of`] is a
//! pure upward walk over `&self`.

mod node;
mod path;
mod types;

use std::sync::Arc;

use tracing::{debug, trace};

use crate::record::Record;
use crate::value::Value;

pub use node::{Node, NodeContent, NodeId, NodeKind};
pub use path::{IndexKey, Member, PathAnchor, PathError, PathExpr};
pub use types::*;

/// Arena-backed composition tree.
///
/// Removed nodes leave a `None` slot behind. Ids are never reused, since a
/// record may still hold the id of a node it was unmounted from.
pub struct Tree {
  nodes: Vec<Option<Node>>,
  root: NodeId,
  listeners: Vec<Arc<dyn MountListener>>,
}

impl Default for Tree {
  fn default() -> Self {
    Self::new()
  }
}

impl Tree {
  pub fn new() -> Self {
    let root = NodeId(0);
    Self {
      nodes: vec![Some(Node::new(root, "", None))],
      root,
      listeners: Vec::new(),
    }
  }

  pub fn root(&self) -> NodeId {
    self.root
  }

  pub fn node(&self, id: NodeId) -> Option<&Node> {
    self.nodes.get(id.0).and_then(Option::as_ref)
  }

  fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
    self.nodes.get_mut(id.0).and_then(Option::as_mut)
  }

  fn require(&self, id: NodeId) -> Result<&Node, TreeError> {
    self.node(id).ok_or_else(|| TreeError::NodeNotFound {
      path: format!("<node {}>", id.0),
    })
  }

  /// Number of live nodes, including the root.
  pub fn len(&self) -> usize {
    self.nodes.iter().filter(|n| n.is_some()).count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 1
  }

  pub fn add_listener(&mut self, listener: Arc<dyn MountListener>) {
    self.listeners.push(listener);
  }

  /// The node's absolute path. The root is `/`.
  pub fn full_path(&self, id: NodeId) -> String {
    let Some(node) = self.node(id) else {
      return String::new();
    };
    node
      .full_path
      .get_or_init(|| match node.parent {
        None => "/".to_string(),
        Some(parent) => {
          let base = self.full_path(parent);
          if base == "/" {
            format!("/{}", node.name)
          } else {
            format!("{}/{}", base, node.name)
          }
        }
      })
      .clone()
  }

  pub fn children(&self, id: NodeId) -> &[NodeId] {
    self.node(id).map(Node::children).unwrap_or_default()
  }

  /// Look up a direct child by name.
  pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
    let node = self.node(parent)?;
    node
      .children
      .iter()
      .copied()
      .find(|&c| self.node(c).is_some_and(|child| child.name == name))
  }

  /// Find a node from the root. Never creates nodes.
  pub fn find(&self, path: &str) -> Option<NodeId> {
    self.find_from(self.root, path)
  }

  /// Find a node relative to `origin`.
  ///
  /// Absolute paths (`/a/b`) start at the root regardless of `origin`; `.`
  /// stays put and `..` moves to the parent.
  pub fn find_from(&self, origin: NodeId, path: &str) -> Option<NodeId> {
    let path = path.trim();
    let mut current = if path.starts_with('/') {
      self.root
    } else {
      origin
    };
    self.node(current)?;

    for segment in path.split('/').map(str::trim) {
      current = match segment {
        "" | "." => continue,
        ".." => self.node(current)?.parent?,
        name => self.child(current, name)?,
      };
    }
    Some(current)
  }

  /// Get or create the node at `path`, creating missing segments as empty
  /// nodes. `position` only places a newly created leaf among its siblings:
  /// `^` first, `:name` or `-name` after `name`, a bare `name` before it, and
  /// anything else (or nothing) appends.
  pub fn ensure_path(&mut self, path: &str, position: Option<&str>) -> Result<NodeId, TreeError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
      return Err(TreeError::InvalidPath {
        path: path.to_string(),
        reason: "path is empty",
      });
    }

    let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let body = body.strip_suffix('/').unwrap_or(body);
    if body.is_empty() {
      return Ok(self.root);
    }

    let segments: Vec<&str> = body.split('/').map(str::trim).collect();
    let last = segments.len() - 1;
    let mut current = self.root;

    for (i, segment) in segments.iter().enumerate() {
      current = match *segment {
        "" => {
          return Err(TreeError::InvalidPath {
            path: path.to_string(),
            reason: "empty segment",
          });
        }
        "." => continue,
        ".." => self.require(current)?.parent.ok_or_else(|| TreeError::InvalidPath {
          path: path.to_string(),
          reason: "'..' above the root",
        })?,
        name if name.contains(['.', '[', ']', '@']) => {
          return Err(TreeError::InvalidPath {
            path: path.to_string(),
            reason: "segment contains a reserved character",
          });
        }
        name => match self.child(current, name) {
          Some(existing) => existing,
          None => self.insert_child(current, name, if i == last { position } else { None }),
        },
      };
    }

    Ok(current)
  }

  fn insert_child(&mut self, parent: NodeId, name: &str, position: Option<&str>) -> NodeId {
    let id = NodeId(self.nodes.len());
    self.nodes.push(Some(Node::new(id, name, Some(parent))));

    let index = self.insertion_index(parent, position);
    if let Some(node) = self.node_mut(parent) {
      node.children.insert(index, id);
    }
    trace!(path = %self.full_path(id), "created node");
    id
  }

  fn insertion_index(&self, parent: NodeId, position: Option<&str>) -> usize {
    let children = self.children(parent);
    let len = children.len();
    let index_of = |name: &str| {
      children
        .iter()
        .position(|&c| self.node(c).is_some_and(|n| n.name == name))
    };

    match position.map(str::trim) {
      None | Some("") => len,
      Some("^") => 0,
      Some(p) => match p.strip_prefix([':', '-']) {
        Some(after) => index_of(after.trim()).map_or(len, |i| i + 1),
        None => index_of(p).unwrap_or(len),
      },
    }
  }

  fn check_mountable(value: &Value) -> Result<(), TreeError> {
    let illegal = value.is::<Record>()
      || value.is::<Arc<Record>>()
      || value.is::<NodeContent>()
      || value.is::<Tree>()
      || value.is::<Arc<Tree>>();
    if illegal {
      return Err(TreeError::IllegalValue {
        type_name: value.type_name(),
      });
    }
    Ok(())
  }

  fn notify(&self, phase: MountPhase, path: &str, kind: NodeKind) {
    let event = MountEvent { phase, path, kind };
    for listener in &self.listeners {
      listener.on_mount(&event);
    }
  }

  /// Mount a custom value at `path`, creating the path if needed.
  pub fn mount(&mut self, path: &str, value: Value) -> Result<NodeId, TreeError> {
    Self::check_mountable(&value)?;
    let id = self.ensure_path(path, None)?;
    self.mount_at(id, value)?;
    Ok(id)
  }

  /// Mount a custom value on an existing node, replacing any custom value it
  /// held. Nodes holding a record must be unmounted first.
  pub fn mount_at(&mut self, id: NodeId, value: Value) -> Result<(), TreeError> {
    Self::check_mountable(&value)?;
    let path = self.full_path(id);
    if let NodeContent::Record(_) = self.require(id)?.content {
      return Err(TreeError::NodeOccupied { path });
    }

    self.notify(MountPhase::Mounting, &path, NodeKind::Custom);
    if let Some(node) = self.node_mut(id) {
      node.content = NodeContent::Custom(value);
    }
    self.notify(MountPhase::Mounted, &path, NodeKind::Custom);
    debug!(path = %path, "mounted custom value");
    Ok(())
  }

  /// Mount `record` at `base_path/record.name`, honoring its position.
  pub fn mount_record(&mut self, base_path: &str, record: Arc<Record>) -> Result<NodeId, TreeError> {
    if record.node().is_some() {
      return Err(TreeError::RecordAlreadyMounted {
        record: record.name().to_string(),
      });
    }

    let base = base_path.trim().trim_end_matches('/');
    let full_path = format!("{}/{}", base, record.name());
    if let Some(existing) = self.find(&full_path)
      && let Some(NodeContent::Record(_)) = self.node(existing).map(Node::content)
    {
      return Err(TreeError::NodeOccupied { path: full_path });
    }

    let id = self.ensure_path(&full_path, record.position())?;
    let path = self.full_path(id);
    record.bind(id)?;

    self.notify(MountPhase::Mounting, &path, NodeKind::Record);
    if let Some(node) = self.node_mut(id) {
      node.content = NodeContent::Record(record.clone());
    }
    self.notify(MountPhase::Mounted, &path, NodeKind::Record);
    debug!(path = %path, builder = %record.builder(), "mounted record");
    Ok(id)
  }

  /// Detach the node's content and return what it held, without building. A
  /// record yields its cached value, if any.
  ///
  /// The node is removed when it has no children; otherwise it stays as an
  /// empty path segment.
  pub fn unmount(&mut self, id: NodeId) -> Result<Option<Value>, TreeError> {
    let path = self.full_path(id);
    let previous = match &self.require(id)?.content {
      NodeContent::Empty => None,
      NodeContent::Custom(value) => Some(value.clone()),
      NodeContent::Record(record) => record.cached(),
    };

    if let Some(node) = self.node_mut(id) {
      node.content = NodeContent::Empty;
    }
    let removed = self.remove_if_vacant(id);
    debug!(path = %path, removed, "unmounted node");
    Ok(previous)
  }

  pub fn unmount_path(&mut self, path: &str) -> Result<Option<Value>, TreeError> {
    let id = self.find(path).ok_or_else(|| TreeError::NodeNotFound {
      path: path.to_string(),
    })?;
    self.unmount(id)
  }

  /// The nearest ancestor that is not empty.
  ///
  /// This walks parent links only and never touches a record's value.
  pub fn owner_of(&self, id: NodeId) -> Option<NodeId> {
    let mut current = self.node(id)?.parent;
    while let Some(parent) = current {
      let node = self.node(parent)?;
      if !node.content.is_empty() {
        return Some(parent);
      }
      current = node.parent;
    }
    None
  }

  /// Remove the node if it is empty, childless and not the root.
  pub(crate) fn remove_if_vacant(&mut self, id: NodeId) -> bool {
    let Some(node) = self.node(id) else {
      return false;
    };
    if id == self.root || node.has_children() || !node.content.is_empty() {
      return false;
    }

    let parent = node.parent;
    if let Some(parent) = parent.and_then(|p| self.node_mut(p)) {
      parent.children.retain(|&c| c != id);
    }
    self.nodes[id.0] = None;
    true
  }

  /// Remove `id` if vacant, then keep removing vacant ancestors.
  pub(crate) fn prune(&mut self, id: NodeId) -> usize {
    let mut removed = 0;
    let mut current = Some(id);
    while let Some(node) = current {
      let parent = self.node(node).and_then(Node::parent);
      if !self.remove_if_vacant(node) {
        break;
      }
      removed += 1;
      current = parent;
    }
    removed
  }

  /// Reset a node to empty without removing it. Returns the record it held.
  pub(crate) fn clear(&mut self, id: NodeId) -> Option<Arc<Record>> {
    let node = self.node_mut(id)?;
    match std::mem::take(&mut node.content) {
      NodeContent::Record(record) => Some(record),
      _ => None,
    }
  }

  /// Pre-order walk of the subtree rooted at `id`.
  pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(next) = stack.pop() {
      if self.node(next).is_none() {
        continue;
      }
      out.push(next);
      stack.extend(self.children(next).iter().rev().copied());
    }
    out
  }

  /// Depth of a node below the root.
  pub fn depth(&self, id: NodeId) -> usize {
    let mut depth = 0;
    let mut current = self.node(id).and_then(Node::parent);
    while let Some(parent) = current {
      depth += 1;
      current = self.node(parent).and_then(Node::parent);
    }
    depth
  }
}
