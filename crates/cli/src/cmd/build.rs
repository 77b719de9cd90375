//! Build command implementation.
//!
//! Ensures the extension for this machine is built and loadable.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::debug;

use cymj_lib::config::BuildConfig;
use cymj_lib::functions::FunctionTable;
use cymj_lib::load_cython_ext;
use cymj_lib::util::hash::hash_file;

use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success};

pub fn cmd_build(force_rebuild: bool, force_cpu: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let mut config = BuildConfig::from_env()?;
  config.force_rebuild |= force_rebuild;
  config.force_cpu |= force_cpu;
  debug!(generated = ?config.generated_dir, lock = ?config.lock_dir, "loaded configuration");

  let module = load_cython_ext(&config).context("Failed to load the extension")?;
  let functions = FunctionTable::new(&module);
  let digest = hash_file(module.path()).context("Failed to hash the extension")?;

  if output.is_json() {
    let json_output = serde_json::json!({
      "path": module.path(),
      "sha256": digest,
      "functions": functions.names().collect::<Vec<_>>(),
    });
    print_json(&json_output)?;
  } else {
    print_success(&format!("Extension ready: {}", module.path().display()));
    print_stat("SHA-256", digest.short());
    print_stat("Functions", &functions.len().to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
