//! TOML unit files.
//!
//! ```toml
//! name = "core"
//! version = "1.0"
//! dependencies = ["base"]
//!
//! [[builders]]
//! name = "menu"
//! type = "list"
//!
//! [[extension]]
//! path = "/workbench/menus"
//!
//!   [[extension.records]]
//!   name = "file"
//!   builder = "menu"
//!   position = "^"
//!   properties = { text = "File" }
//!   behaviors = { break = { value = "true" } }
//! ```
//!
//! Property values that are not TOML strings are kept as their JSON rendering,
//! so `count = 3` reaches the expression resolver as the raw text `3`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::types::{
  BuilderAlias, ExtensionSpec, ManifestError, ManifestParser, RecordSpec, UnitContent, UnitHeader,
};

pub const DEFAULT_EXTENSION: &str = "plugin";

#[derive(Debug, Default, Deserialize)]
struct RawHeader {
  name: Option<String>,
  title: Option<String>,
  author: Option<String>,
  version: Option<String>,
  description: Option<String>,
  #[serde(default)]
  dependencies: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawContent {
  #[serde(default)]
  builders: Vec<RawBuilder>,
  #[serde(default)]
  extension: Vec<RawExtension>,
}

#[derive(Debug, Deserialize)]
struct RawBuilder {
  name: Option<String>,
  #[serde(rename = "type")]
  target: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawExtension {
  path: Option<String>,
  #[serde(default)]
  records: Vec<RawRecord>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
  name: Option<String>,
  builder: Option<String>,
  #[serde(rename = "type")]
  type_name: Option<String>,
  position: Option<String>,
  #[serde(default)]
  properties: BTreeMap<String, toml::Value>,
  #[serde(default)]
  behaviors: BTreeMap<String, BTreeMap<String, toml::Value>>,
  #[serde(default)]
  children: Vec<RawRecord>,
}

/// The bundled [`ManifestParser`]: one TOML document per unit.
#[derive(Debug, Clone)]
pub struct TomlManifestParser {
  extension: String,
}

impl Default for TomlManifestParser {
  fn default() -> Self {
    Self::new()
  }
}

impl TomlManifestParser {
  pub fn new() -> Self {
    Self {
      extension: DEFAULT_EXTENSION.to_string(),
    }
  }

  /// Use a different unit file extension.
  pub fn with_extension(extension: impl Into<String>) -> Self {
    let extension = extension.into();
    Self {
      extension: extension.trim_start_matches('.').to_string(),
    }
  }

  fn read(path: &Path) -> Result<String, ManifestError> {
    fs::read_to_string(path).map_err(|source| ManifestError::Io {
      path: path.to_path_buf(),
      source,
    })
  }

  fn decode<T: DeserializeOwned>(path: &Path, text: &str) -> Result<T, ManifestError> {
    toml::from_str(text).map_err(|e| ManifestError::Malformed {
      path: path.to_path_buf(),
      message: e.message().to_string(),
    })
  }

  pub(crate) fn header_from_str(path: &Path, text: &str) -> Result<UnitHeader, ManifestError> {
    let raw: RawHeader = Self::decode(path, text)?;
    let name = raw
      .name
      .map(|n| n.trim().to_string())
      .filter(|n| !n.is_empty())
      .ok_or_else(|| ManifestError::MissingAttribute {
        path: path.to_path_buf(),
        attribute: "name",
      })?;

    Ok(UnitHeader {
      name,
      title: raw.title,
      author: raw.author,
      version: raw.version,
      description: raw.description,
      dependencies: raw
        .dependencies
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect(),
    })
  }

  pub(crate) fn content_from_str(path: &Path, text: &str) -> Result<UnitContent, ManifestError> {
    let raw: RawContent = Self::decode(path, text)?;
    let missing = |attribute: &'static str| ManifestError::MissingAttribute {
      path: path.to_path_buf(),
      attribute,
    };

    let mut builders = Vec::with_capacity(raw.builders.len());
    for builder in raw.builders {
      builders.push(BuilderAlias {
        name: builder.name.ok_or_else(|| missing("builders.name"))?,
        target: builder.target.ok_or_else(|| missing("builders.type"))?,
      });
    }

    let mut extensions = Vec::with_capacity(raw.extension.len());
    for extension in raw.extension {
      let records = extension
        .records
        .into_iter()
        .map(|r| convert_record(path, r))
        .collect::<Result<Vec<_>, _>>()?;
      extensions.push(ExtensionSpec {
        path: extension.path.ok_or_else(|| missing("extension.path"))?,
        records,
      });
    }

    Ok(UnitContent {
      builders,
      extensions,
    })
  }
}

impl ManifestParser for TomlManifestParser {
  fn extension(&self) -> &str {
    &self.extension
  }

  fn parse_manifest(&self, path: &Path) -> Result<UnitHeader, ManifestError> {
    Self::header_from_str(path, &Self::read(path)?)
  }

  fn parse_content(&self, path: &Path) -> Result<UnitContent, ManifestError> {
    Self::content_from_str(path, &Self::read(path)?)
  }
}

fn convert_record(path: &Path, raw: RawRecord) -> Result<RecordSpec, ManifestError> {
  let missing = |attribute: &'static str| ManifestError::MissingAttribute {
    path: path.to_path_buf(),
    attribute,
  };

  let children = raw
    .children
    .into_iter()
    .map(|c| convert_record(path, c))
    .collect::<Result<Vec<_>, _>>()?;

  Ok(RecordSpec {
    name: raw.name.ok_or_else(|| missing("records.name"))?,
    builder: raw.builder.ok_or_else(|| missing("records.builder"))?,
    type_name: raw.type_name,
    position: raw.position,
    properties: raw
      .properties
      .into_iter()
      .map(|(k, v)| (k, raw_text(v)))
      .collect(),
    behaviors: raw
      .behaviors
      .into_iter()
      .map(|(name, props)| {
        let props = props.into_iter().map(|(k, v)| (k, raw_text(v))).collect();
        (name, props)
      })
      .collect(),
    children,
  })
}

/// Strings stay as written; everything else becomes its JSON text.
fn raw_text(value: toml::Value) -> String {
  match value {
    toml::Value::String(s) => s,
    other => toml_to_json(other).to_string(),
  }
}

fn toml_to_json(value: toml::Value) -> serde_json::Value {
  match value {
    toml::Value::String(s) => serde_json::Value::String(s),
    toml::Value::Integer(i) => serde_json::json!(i),
    toml::Value::Float(f) => serde_json::json!(f),
    toml::Value::Boolean(b) => serde_json::Value::Bool(b),
    toml::Value::Array(items) => serde_json::Value::Array(items.into_iter().map(toml_to_json).collect()),
    toml::Value::Table(table) => serde_json::Value::Object(
      table
        .into_iter()
        .map(|(k, v)| (k, toml_to_json(v)))
        .collect(),
    ),
    toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
  }
}
