//! Find command implementation.
//!
//! Resolves a path expression to its node and, with `--build`, evaluates it.

use std::path::Path;

use anyhow::{Context, Result};

use arbor_lib::PathExpr;
use arbor_lib::builders::to_json;

use crate::output::{print_info, print_json, print_stat};

pub fn cmd_find(dir: &Path, expr: &str, build: bool, config: Option<&Path>, json: bool) -> Result<()> {
  let (engine, _report) = super::load(dir, config)?;

  let parsed = PathExpr::parse(expr).with_context(|| format!("Invalid path expression '{}'", expr))?;
  let path = if parsed.path.is_empty() { "/" } else { parsed.path.as_str() };
  let node = engine.find(path).with_context(|| format!("No node at {}", path))?;

  let full_path = engine.full_path(node);
  let kind = engine.tree().node(node).map(|n| n.kind());
  let record = engine.record_at(node);
  let unit = record
    .as_ref()
    .and_then(|r| engine.forest().get(r.unit()).map(|u| u.name.clone()));
  let value_type = engine.value_type(node);

  let value = if build {
    let value = engine
      .evaluate(expr)
      .with_context(|| format!("Failed to build {}", expr))?;
    Some(value.map(|v| to_json(&v)).unwrap_or(serde_json::Value::Null))
  } else {
    None
  };

  if json {
    return print_json(&serde_json::json!({
      "path": full_path,
      "kind": kind,
      "builder": record.as_ref().map(|r| r.builder()),
      "unit": unit,
      "type": value_type,
      "built": record.as_ref().is_some_and(|r| r.is_built()),
      "members": parsed.members.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
      "value": value,
    }));
  }

  print_info(&full_path);
  if let Some(kind) = kind {
    print_stat("kind", kind.as_str());
  }
  if let Some(record) = &record {
    print_stat("builder", record.builder());
    print_stat("built", &record.is_built().to_string());
  }
  if let Some(unit) = &unit {
    print_stat("unit", unit);
  }
  if let Some(value_type) = &value_type {
    print_stat("type", value_type);
  }
  if let Some(value) = &value {
    println!("{}", serde_json::to_string_pretty(value)?);
  }
  Ok(())
}
