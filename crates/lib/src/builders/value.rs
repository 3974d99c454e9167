//! Scalar values from record properties.

use crate::build::{BuildContext, BuildError, Builder};
use crate::record::Record;
use crate::value::Value;

/// Builds a value from the record's `value` property. Without one, all
/// properties are resolved into a JSON object; a record with no properties
/// builds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueBuilder;

impl Builder for ValueBuilder {
  fn build(&self, ctx: &mut BuildContext<'_>) -> Result<Option<Value>, BuildError> {
    if let Some(value) = ctx.resolve_property("value")? {
      return Ok(Some(value));
    }
    if ctx.record().properties().is_empty() {
      return Ok(None);
    }

    let keys: Vec<String> = ctx.record().properties().keys().cloned().collect();
    let mut object = serde_json::Map::new();
    for key in keys {
      if let Some(value) = ctx.resolve_property(&key)? {
        object.insert(key, super::to_json(&value));
      }
    }
    Ok(Some(Value::new(serde_json::Value::Object(object))))
  }

  fn value_type(&self, _record: &Record) -> Option<String> {
    Some("json".to_string())
  }
}
