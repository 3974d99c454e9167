mod find;
mod list;
mod tree;

use std::path::Path;

use anyhow::{Context, Result};
use arbor_lib::{Engine, LoadReport, LoaderConfig};

use crate::output::print_warning;

pub use find::cmd_find;
pub use list::cmd_list;
pub use tree::cmd_tree;

/// Load the plugin forest at `dir`. Per-unit failures are printed as warnings;
/// only a missing root is an error.
fn load(dir: &Path, config: Option<&Path>) -> Result<(Engine, LoadReport)> {
  let mut loader_config = match config {
    Some(path) => {
      LoaderConfig::from_file(path).with_context(|| format!("Failed to read config {}", path.display()))?
    }
    None => LoaderConfig::default(),
  };
  loader_config.plugins_dir = dir.to_path_buf();

  let engine = Engine::new(loader_config);
  let report = engine
    .load()
    .with_context(|| format!("Failed to load plugins from {}", dir.display()))?;

  for failure in &report.failed {
    print_warning(&format!(
      "{} ({}): {}",
      failure.name,
      failure.path.display(),
      failure.error
    ));
  }
  for failure in &report.eager_failures {
    print_warning(&format!("Eager build of {} failed: {}", failure.path, failure.error));
  }

  Ok((engine, report))
}
