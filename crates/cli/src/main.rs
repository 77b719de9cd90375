use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

use output::OutputFormat;

/// cymj - build and cache the simulation bridge extension
#[derive(Parser)]
#[command(name = "cymj")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build (if needed) and load the extension for this machine
  Build {
    /// Delete the cached artifact and rebuild it
    #[arg(long)]
    force_rebuild: bool,

    /// Never select the GPU variant
    #[arg(long)]
    force_cpu: bool,

    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Show the resolved variant, cache key and artifact state
  Info {
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Compile a callback body and print its entry address
  Compile {
    /// File holding the C body defining `fun`
    file: PathBuf,

    /// Userdata slot names, in slot order
    #[arg(long, value_delimiter = ',')]
    userdata: Vec<String>,

    /// Keep the generated intermediates
    #[arg(long)]
    keep: bool,
  },

  /// Remove cached artifacts and scratch directories
  Clean {
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
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

  match cli.command {
    Commands::Build {
      force_rebuild,
      force_cpu,
      output,
    } => cmd::cmd_build(force_rebuild, force_cpu, output),
    Commands::Info { output } => cmd::cmd_info(output),
    Commands::Compile { file, userdata, keep } => cmd::cmd_compile(&file, &userdata, keep),
    Commands::Clean { output } => cmd::cmd_clean(output),
  }
}
