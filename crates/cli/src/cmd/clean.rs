use std::time::Instant;

use anyhow::{Context, Result};

use cymj_lib::cext::clean;
use cymj_lib::config::BuildConfig;

use crate::output::{OutputFormat, format_bytes, format_duration, print_json, print_stat, print_success};

pub fn cmd_clean(output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let config = BuildConfig::from_env()?;

  let stats = clean(&config).context("Failed to clean generated directory")?;

  if output.is_json() {
    print_json(&stats)?;
  } else {
    println!();
    print_success("Clean complete!");
    print_stat("Artifacts removed", &stats.artifacts_removed.to_string());
    print_stat("Scratch dirs removed", &stats.scratch_dirs_removed.to_string());
    print_stat("Space freed", &format_bytes(stats.bytes_freed));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
