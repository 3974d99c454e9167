use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

/// arbor - inspect a plugin composition forest
#[derive(Parser)]
#[command(name = "arbor")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Loader configuration file (TOML)
  #[arg(short, long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Print machine-readable JSON
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// List the units of a plugin directory
  List {
    /// Plugin root directory
    dir: PathBuf,
  },

  /// Print the composition tree
  Tree {
    /// Plugin root directory
    dir: PathBuf,

    /// Tree path to start from
    #[arg(default_value = "/")]
    path: String,
  },

  /// Show the node addressed by a path expression
  Find {
    /// Plugin root directory
    dir: PathBuf,

    /// Path expression, e.g. /workbench/menus.file
    expr: String,

    /// Build the node and print its value
    #[arg(short, long)]
    build: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let config = cli.config.as_deref();
  match cli.command {
    Commands::List { dir } => cmd::cmd_list(&dir, config, cli.verbose, cli.json),
    Commands::Tree { dir, path } => cmd::cmd_tree(&dir, &path, config, cli.json),
    Commands::Find { dir, expr, build } => cmd::cmd_find(&dir, &expr, build, config, cli.json),
  }
}
