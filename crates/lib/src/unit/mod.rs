//! Units and the unit forest.
//!
//! A unit is one loadable, dependency-declaring source of tree fragments. Units
//! are arranged in a forest whose parent/child shape comes from directory
//! nesting, while the dependency edges between siblings drive load order.
//!
//! # Submodules
//!
//! - [`forest`] - Arena-backed forest with sibling-scoped dependency resolution

pub mod forest;
mod types;

pub use forest::Forest;
pub use types::*;
