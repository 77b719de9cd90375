//! Verification that the dynamic loader can find the simulation library.

use std::path::{Path, PathBuf};

use crate::config::ConfigError;
use crate::platform::os::Os;

fn absolute(path: &Path) -> PathBuf {
  let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
  dunce::simplified(&abs).to_path_buf()
}

/// Check that `lib_dir` is an entry of the library search path value `current`.
///
/// Entries are compared after being made absolute. The error message carries
/// the exact line to add to the user's shell profile.
pub fn ensure_library_path(os: Os, current: Option<&str>, lib_dir: &Path) -> Result<(), ConfigError> {
  let Some(var) = os.library_path_var() else {
    return Ok(());
  };

  let value = current.unwrap_or("");
  let wanted = absolute(lib_dir);
  let present = value
    .split(os.path_separator())
    .filter(|entry| !entry.is_empty())
    .any(|entry| absolute(Path::new(entry)) == wanted);

  if present {
    return Ok(());
  }

  let remediation = match os {
    Os::Windows => format!("set {var}={};%{var}%", lib_dir.display()),
    _ => format!("export {var}=${var}:{}", lib_dir.display()),
  };
  Err(ConfigError::MissingLibraryPath {
    var: var.to_string(),
    current: value.to_string(),
    remediation,
  })
}

/// Check the live process environment; see [`ensure_library_path`].
pub fn ensure_library_path_env(os: Os, lib_dir: &Path) -> Result<(), ConfigError> {
  let Some(var) = os.library_path_var() else {
    return Ok(());
  };
  let current = std::env::var(var).ok();
  ensure_library_path(os, current.as_deref(), lib_dir)
}
