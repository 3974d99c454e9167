//! arbor-lib: a declarative plugin composition engine.
//!
//! This crate provides the pieces a host application composes itself from:
//! - `unit`: the forest of plugin units and their dependency relations
//! - `manifest`: the unit file format and its parser contract
//! - `loader`: dependency-ordered loading and unloading of a unit forest
//! - `tree`: the path-addressable composition tree
//! - `record`: deferred construction recipes mounted into the tree
//! - `build`: the orchestrator that turns records into values
//!
//! An [`Engine`] ties them together.

pub mod build;
pub mod builders;
pub mod config;
pub mod engine;
pub mod loader;
pub mod manifest;
pub mod record;
pub mod resolve;
pub mod tree;
pub mod unit;
pub mod value;

pub use build::{BuildContext, BuildError, BuildSettings, Builder, ObtainMode};
pub use config::LoaderConfig;
pub use engine::Engine;
pub use loader::{LoadReport, LoaderEvent};
pub use record::Record;
pub use tree::{NodeId, PathExpr};
pub use value::Value;
