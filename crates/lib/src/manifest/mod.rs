//! Unit manifests.
//!
//! The loader reads unit files through the [`ManifestParser`] contract in two
//! passes: a cheap header pass at pre-declare time and a content pass once the
//! unit's dependencies are loaded. [`TomlManifestParser`] is the bundled
//! implementation.

mod toml_parser;
mod types;

pub use toml_parser::{DEFAULT_EXTENSION, TomlManifestParser};
pub use types::*;
