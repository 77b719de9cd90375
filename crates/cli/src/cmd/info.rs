//! Info command implementation.
//!
//! Reports what a build would use without building anything.

use anyhow::Result;

use cymj_lib::artifact::CacheKey;
use cymj_lib::build_lock::{BuildLock, LockStatus};
use cymj_lib::config::BuildConfig;
use cymj_lib::platform::gpu::DriverLocator;
use cymj_lib::platform::resolve_variant;
use cymj_lib::platform::search_path::ensure_library_path_env;
use cymj_lib::util::hash::hash_file;

use crate::output::{OutputFormat, print_json, print_stat, print_success, print_warning};

pub fn cmd_info(output: OutputFormat) -> Result<()> {
  let config = BuildConfig::from_env()?;
  let resolution = resolve_variant(std::env::consts::OS, config.force_cpu, &DriverLocator::system())?;
  let key = CacheKey::current(config.host_abi.clone(), resolution.variant);
  let artifact = key.artifact_path(&config.generated_dir);
  let digest = hash_file(&artifact).ok();
  let search_path = ensure_library_path_env(resolution.variant.os(), &config.mujoco.bin_dir()).err();
  let lock = BuildLock::status(&config.lock_dir)?;

  if output.is_json() {
    let json_output = serde_json::json!({
      "variant": resolution.variant.as_str(),
      "gpu_driver_dir": resolution.gpu_driver_dir,
      "cache_key": key.to_string(),
      "artifact": artifact,
      "built": digest.is_some(),
      "sha256": digest,
      "mujoco": config.mujoco.root,
      "key_present": config.mujoco.key_path.exists(),
      "library_path_ok": search_path.is_none(),
      "build_lock": match &lock {
        LockStatus::Free => serde_json::json!({ "held": false }),
        LockStatus::Held(holder) => serde_json::json!({ "held": true, "holder": holder }),
      },
    });
    print_json(&json_output)?;
  } else {
    print_success(&format!("Variant: {}", resolution.variant));
    if let Some(dir) = &resolution.gpu_driver_dir {
      print_stat("GPU driver", &dir.display().to_string());
    }
    print_stat("Cache key", &key.to_string());
    print_stat("Artifact", &artifact.display().to_string());
    match &digest {
      Some(digest) => print_stat("SHA-256", digest.short()),
      None => print_stat("SHA-256", "(not built)"),
    }
    print_stat("MuJoCo", &config.mujoco.root.display().to_string());
    print_stat("Generated", &config.generated_dir.display().to_string());
    match &lock {
      LockStatus::Free => print_stat("Build lock", "free"),
      LockStatus::Held(Some(holder)) => print_stat(
        "Build lock",
        &format!("held by pid {} ({})", holder.pid, holder.command),
      ),
      LockStatus::Held(None) => print_stat("Build lock", "held"),
    }
    if !config.mujoco.key_path.exists() {
      print_warning(&format!("License key not found at {}", config.mujoco.key_path.display()));
    }
    if let Some(err) = search_path {
      print_warning(&err.to_string());
    }
  }

  Ok(())
}
