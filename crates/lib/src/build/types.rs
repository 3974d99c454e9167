//! Build settings, events and errors.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::resolve::ResolveError;
use crate::tree::PathError;
use crate::value::Value;

/// Errors raised to the caller of a specific build.
///
/// A build error leaves the tree structurally intact and never un-memoizes
/// records that were already built.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("no builder registered for '{key}' (record {path})")]
  BuilderNotFound { key: String, path: String },

  /// The builder returned one product and set a different one on the context.
  #[error("builder for {path} produced two different results")]
  AmbiguousResult { path: String },

  /// Reported by a builder strategy.
  #[error("failed to build {path}: {message}")]
  Builder { path: String, message: String },

  #[error("record '{record}' is not mounted in the tree")]
  NotMounted { record: String },

  #[error("no node at '{path}'")]
  NodeNotFound { path: String },

  #[error("cannot navigate '{member}' in {expr}: {message}")]
  Navigation {
    expr: String,
    member: String,
    message: String,
  },

  #[error(transparent)]
  Path(#[from] PathError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),
}

impl BuildError {
  /// Shorthand for builder strategies.
  pub fn builder(path: impl Into<String>, message: impl fmt::Display) -> Self {
    BuildError::Builder {
      path: path.into(),
      message: message.to_string(),
    }
  }
}

/// How to read a node's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObtainMode {
  /// Return the memoized value, building it once if needed.
  #[default]
  Auto,
  /// Build a fresh instance. The memo is neither read nor written and the
  /// product is not appended to its owner.
  Always,
  /// Return the memoized value only.
  Never,
}

/// Outcome of one record build, sent to listeners.
#[derive(Debug, Clone)]
pub struct BuildEvent {
  pub path: String,
  pub record: String,
  /// Whether the build produced a value.
  pub produced: bool,
  /// `None` when no append was attempted.
  pub appended: Option<bool>,
  pub append_error: Option<String>,
}

/// Observer of completed record builds.
pub trait BuildListener: Send + Sync {
  fn on_built(&self, event: &BuildEvent);
}

/// Completion callback carried in [`BuildSettings`].
pub type OnBuilt = Arc<dyn Fn(&BuildEvent, Option<&Value>) + Send + Sync>;

/// Options for one build call.
#[derive(Clone, Default)]
pub struct BuildSettings {
  /// Opaque value handed to builders.
  pub parameter: Option<Value>,
  /// Skip the children cascade.
  pub ignore_children: bool,
  /// Do not splice the product into its owner.
  pub ignore_appending: bool,
  /// Bypass the memo, building a fresh instance that is not cached.
  pub fresh: bool,
  pub on_built: Option<OnBuilt>,
}

impl BuildSettings {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_parameter(mut self, parameter: Value) -> Self {
    self.parameter = Some(parameter);
    self
  }

  pub fn ignore_children(mut self) -> Self {
    self.ignore_children = true;
    self
  }

  pub fn ignore_appending(mut self) -> Self {
    self.ignore_appending = true;
    self
  }

  /// Settings for an [`ObtainMode::Always`] read.
  pub fn fresh() -> Self {
    Self {
      fresh: true,
      ignore_appending: true,
      ..Self::default()
    }
  }

  pub fn on_built(mut self, callback: impl Fn(&BuildEvent, Option<&Value>) + Send + Sync + 'static) -> Self {
    self.on_built = Some(Arc::new(callback));
    self
  }

  /// Settings handed down to cascaded children.
  pub(crate) fn for_children(&self) -> Self {
    Self {
      parameter: self.parameter.clone(),
      fresh: self.fresh,
      ..Self::default()
    }
  }
}

impl fmt::Debug for BuildSettings {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuildSettings")
      .field("parameter", &self.parameter)
      .field("ignore_children", &self.ignore_children)
      .field("ignore_appending", &self.ignore_appending)
      .field("fresh", &self.fresh)
      .field("on_built", &self.on_built.is_some())
      .finish()
  }
}
