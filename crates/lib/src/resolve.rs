//! Turning raw property text into typed values.
//!
//! Record properties and behaviors are kept as the raw text a manifest
//! declared. Builders ask an [`ExpressionResolver`] to turn that text into a
//! [`Value`] when they need it.

use thiserror::Error;

use crate::record::Record;
use crate::value::Value;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot resolve property '{property}' of {path}: {message}")]
pub struct ResolveError {
  pub path: String,
  pub property: String,
  pub message: String,
}

/// Where a raw text comes from.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
  pub record: &'a Record,
  /// Full tree path of the record being built.
  pub path: &'a str,
  pub property: &'a str,
}

/// Consumed interface: `(raw text, context) -> typed value`.
pub trait ExpressionResolver: Send + Sync {
  fn resolve(&self, raw: &str, ctx: &ResolveContext<'_>) -> Result<Value, ResolveError>;
}

/// Reads raw text as a JSON literal, falling back to a JSON string.
///
/// The product is always a `serde_json::Value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralResolver;

impl ExpressionResolver for LiteralResolver {
  fn resolve(&self, raw: &str, _ctx: &ResolveContext<'_>) -> Result<Value, ResolveError> {
    let json = serde_json::from_str::<serde_json::Value>(raw.trim())
      .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok(Value::new(json))
  }
}
