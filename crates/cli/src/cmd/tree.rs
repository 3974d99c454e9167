//! Tree command implementation.
//!
//! Prints the composition tree below a path, each node tagged with what it
//! holds.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use arbor_lib::tree::{NodeContent, NodeKind};

use crate::output::{indent, print_json};

#[derive(Debug, Serialize)]
struct NodeEntry {
  path: String,
  depth: usize,
  kind: NodeKind,
  #[serde(skip_serializing_if = "Option::is_none")]
  builder: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  value_type: Option<String>,
}

pub fn cmd_tree(dir: &Path, path: &str, config: Option<&Path>, json: bool) -> Result<()> {
  let (engine, _report) = super::load(dir, config)?;
  let start = engine.find(path).with_context(|| format!("No node at {}", path))?;

  let entries: Vec<NodeEntry> = {
    let tree = engine.tree();
    let base = tree.depth(start);
    tree
      .descendants(start)
      .into_iter()
      .filter_map(|id| {
        let node = tree.node(id)?;
        let (builder, value_type) = match node.content() {
          NodeContent::Empty => (None, None),
          NodeContent::Custom(value) => (None, Some(value.type_name().to_string())),
          NodeContent::Record(record) => (
            Some(record.builder().to_string()),
            record.declared_type().map(str::to_string),
          ),
        };
        Some(NodeEntry {
          path: tree.full_path(id),
          depth: tree.depth(id) - base,
          kind: node.kind(),
          builder,
          value_type,
        })
      })
      .collect()
  };

  if json {
    return print_json(&entries);
  }

  for entry in &entries {
    println!(
      "{}{} {}",
      indent(entry.depth),
      segment(&entry.path),
      tag(entry).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }
  Ok(())
}

/// Last path segment; the root prints as `/`.
fn segment(path: &str) -> &str {
  match path.rsplit('/').next() {
    Some("") | None => "/",
    Some(name) => name,
  }
}

fn tag(entry: &NodeEntry) -> String {
  match entry.kind {
    NodeKind::Empty => "empty".to_string(),
    NodeKind::Custom => format!("custom<{}>", entry.value_type.as_deref().unwrap_or("?")),
    NodeKind::Record => format!("record[{}]", entry.builder.as_deref().unwrap_or("?")),
  }
}
