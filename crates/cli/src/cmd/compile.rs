use anyhow::{Context, Result};
use std::path::Path;

use cymj_lib::compile_callback;
use cymj_lib::config::BuildConfig;

use crate::output::{print_info, print_success};

pub fn cmd_compile(file: &Path, userdata: &[String], keep: bool) -> Result<()> {
  let body = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;

  let mut config = BuildConfig::from_env()?;
  config.debug_fn_builder |= keep;

  let names: Vec<&str> = userdata.iter().map(String::as_str).collect();
  let callback = compile_callback(&config, &body, &names).context("Failed to compile callback")?;

  print_success(&format!("Callback compiled at {:#x}", callback.as_raw()));
  if keep {
    print_info(&format!("Intermediates kept in {}", config.callback_dir.display()));
  }
  Ok(())
}
