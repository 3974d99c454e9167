//! Loader lifecycle events.

use std::path::PathBuf;

/// A loader lifecycle event. Events carry owned data so listeners can keep
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
  LoadingStarted { root: PathBuf },
  LoadingFinished { root: PathBuf, loaded: usize, failed: usize },
  UnitLoading { name: String, path: PathBuf },
  UnitLoaded { name: String, path: PathBuf },
  UnitFailed { name: String, path: PathBuf, reason: String },
  /// The only event a listener may veto.
  UnitUnloading { name: String, path: PathBuf },
  UnitUnloaded { name: String, path: PathBuf },
}

impl LoaderEvent {
  /// The unit the event is about, if any.
  pub fn unit(&self) -> Option<&str> {
    match self {
      LoaderEvent::LoadingStarted { .. } | LoaderEvent::LoadingFinished { .. } => None,
      LoaderEvent::UnitLoading { name, .. }
      | LoaderEvent::UnitLoaded { name, .. }
      | LoaderEvent::UnitFailed { name, .. }
      | LoaderEvent::UnitUnloading { name, .. }
      | LoaderEvent::UnitUnloaded { name, .. } => Some(name),
    }
  }
}

/// A listener's answer to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
  #[default]
  Continue,
  /// Abort the unit's unload. Ignored for every other event.
  Veto,
}

pub trait LoaderListener: Send + Sync {
  fn on_event(&self, event: &LoaderEvent) -> Flow;
}
