//! Tree errors and mount notifications.

use thiserror::Error;

use super::node::NodeKind;
use super::path::PathError;

/// Errors raised by structural tree operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
  #[error(transparent)]
  Path(#[from] PathError),

  #[error("invalid tree path '{path}': {reason}")]
  InvalidPath { path: String, reason: &'static str },

  /// Records and tree-owned constructs cannot be mounted as custom values.
  #[error("a value of type {type_name} cannot be mounted as a custom value")]
  IllegalValue { type_name: &'static str },

  /// A record's node binding is write-once.
  #[error("record '{record}' is already mounted")]
  RecordAlreadyMounted { record: String },

  #[error("node '{path}' already holds a record")]
  NodeOccupied { path: String },

  #[error("no node at '{path}'")]
  NodeNotFound { path: String },
}

/// Which side of a mount a notification is sent from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPhase {
  Mounting,
  Mounted,
}

/// A mount notification.
#[derive(Debug, Clone, Copy)]
pub struct MountEvent<'a> {
  pub phase: MountPhase,
  pub path: &'a str,
  pub kind: NodeKind,
}

/// Observer of tree mounts. Listeners are informational and cannot veto.
pub trait MountListener: Send + Sync {
  fn on_mount(&self, event: &MountEvent<'_>);
}
