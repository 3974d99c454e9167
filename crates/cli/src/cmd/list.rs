//! List command implementation.
//!
//! Loads a plugin directory and prints the live unit forest, indented by depth.

use std::path::{Path, PathBuf};

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use arbor_lib::unit::UnitStatus;

use crate::output::{indent, join_or_dash, print_error, print_json, print_stat, print_success, symbols};

#[derive(Debug, Serialize)]
struct UnitEntry {
  name: String,
  status: UnitStatus,
  version: Option<String>,
  dependencies: Vec<String>,
  depth: usize,
  records: usize,
  path: PathBuf,
}

#[derive(Debug, Serialize)]
struct FailureEntry {
  name: String,
  path: PathBuf,
  error: String,
}

pub fn cmd_list(dir: &Path, config: Option<&Path>, verbose: bool, json: bool) -> Result<()> {
  let (engine, report) = super::load(dir, config)?;

  let units: Vec<UnitEntry> = {
    let forest = engine.forest();
    forest
      .live()
      .into_iter()
      .filter_map(|id| {
        let unit = forest.get(id)?;
        Some(UnitEntry {
          name: unit.name.clone(),
          status: unit.status,
          version: unit.manifest.version.clone(),
          dependencies: unit.manifest.dependencies.iter().map(|d| d.name.clone()).collect(),
          depth: forest.depth(id),
          records: unit.records.len(),
          path: unit.path.clone(),
        })
      })
      .collect()
  };
  let failed: Vec<FailureEntry> = report
    .failed
    .iter()
    .map(|f| FailureEntry {
      name: f.name.clone(),
      path: f.path.clone(),
      error: f.error.to_string(),
    })
    .collect();

  if json {
    return print_json(&serde_json::json!({
      "root": report.root,
      "units": units,
      "failed": failed,
    }));
  }

  print_success(&format!(
    "Loaded {} unit(s) from {}",
    units.len(),
    report.root.display()
  ));
  for unit in &units {
    let version = unit.version.as_deref().unwrap_or("-");
    println!(
      "  {}{} {} {} {}",
      indent(unit.depth),
      unit.name,
      version.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      symbols::ARROW,
      join_or_dash(&unit.dependencies)
    );
    if verbose {
      print_stat("path", &unit.path.display().to_string());
      print_stat("records", &unit.records.to_string());
    }
  }

  if !failed.is_empty() {
    println!();
    print_error(&format!("{} unit(s) failed to load", failed.len()));
  }
  Ok(())
}
