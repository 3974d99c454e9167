//! Bundled builder strategies.
//!
//! - `list`, `map`, `slot`: [`ContainerBuilder`], which also appends children
//! - `value`: [`ValueBuilder`]

mod container;
mod value;

use std::sync::Arc;

use crate::build::BuilderRegistry;
use crate::value::Value;

pub use container::{Container, ContainerBuilder, ContainerKind};
pub use value::ValueBuilder;

/// Register the bundled strategies.
pub fn register_defaults(registry: &BuilderRegistry) {
  for kind in [ContainerKind::List, ContainerKind::Map, ContainerKind::Slot] {
    registry.register(kind.as_str(), Arc::new(ContainerBuilder::new(kind)));
  }
  registry.register("value", Arc::new(ValueBuilder));
}

/// Render a value as JSON. Containers are rendered recursively; values of
/// other types become a `<type>` placeholder string.
pub fn to_json(value: &Value) -> serde_json::Value {
  if let Some(json) = value.downcast_ref::<serde_json::Value>() {
    return json.clone();
  }
  if let Some(text) = value.downcast_ref::<String>() {
    return serde_json::Value::String(text.clone());
  }
  if let Some(text) = value.downcast_ref::<&'static str>() {
    return serde_json::Value::String((*text).to_string());
  }
  if let Some(flag) = value.downcast_ref::<bool>() {
    return serde_json::Value::Bool(*flag);
  }
  if let Some(n) = value.downcast_ref::<i64>() {
    return serde_json::json!(n);
  }
  if let Some(n) = value.downcast_ref::<u64>() {
    return serde_json::json!(n);
  }
  if let Some(n) = value.downcast_ref::<f64>() {
    return serde_json::json!(n);
  }
  if let Some(container) = value.downcast_ref::<Container>() {
    let entries = container.entries();
    return match container.kind() {
      ContainerKind::List => serde_json::Value::Array(entries.iter().map(|(_, v)| to_json(v)).collect()),
      ContainerKind::Map => serde_json::Value::Object(
        entries
          .iter()
          .map(|(k, v)| (k.clone(), to_json(v)))
          .collect(),
      ),
      ContainerKind::Slot => entries
        .first()
        .map(|(_, v)| to_json(v))
        .unwrap_or(serde_json::Value::Null),
    };
  }
  serde_json::Value::String(format!("<{}>", value.type_name()))
}
