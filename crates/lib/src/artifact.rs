//! Artifact naming: cache keys and the on-disk layout of generated artifacts.
//!
//! # Layout
//!
//! ```text
//! generated/
//! ├── cymj_<version>_<abi>_<variant>_<abi>.so   # published artifacts
//! ├── _build_<version>_<abi>_<variant>/          # per-key scratch directory
//! └── mujocopy-buildlock/                        # BuildLock target
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::consts::{EXTENSION_NAME, PACKAGE_VERSION};
use crate::platform::BuildVariant;

/// Identity of one build configuration: distinct keys never share files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub version: String,
  pub host_abi: String,
  pub variant: BuildVariant,
}

impl CacheKey {
  pub fn new(version: impl Into<String>, host_abi: impl Into<String>, variant: BuildVariant) -> Self {
    Self {
      version: version.into(),
      host_abi: host_abi.into(),
      variant,
    }
  }

  /// Key for this package's own version.
  pub fn current(host_abi: impl Into<String>, variant: BuildVariant) -> Self {
    Self::new(PACKAGE_VERSION, host_abi, variant)
  }

  /// Filename of the published artifact.
  pub fn artifact_file_name(&self) -> String {
    format!(
      "{}_{}_{}.{}",
      EXTENSION_NAME,
      self,
      self.host_abi,
      std::env::consts::DLL_EXTENSION
    )
  }

  /// Canonical artifact path under `generated_dir`.
  pub fn artifact_path(&self, generated_dir: &Path) -> PathBuf {
    generated_dir.join(self.artifact_file_name())
  }

  /// Scratch directory for intermediates of this key.
  pub fn scratch_dir(&self, generated_dir: &Path) -> PathBuf {
    generated_dir.join(format!("_build_{}", self))
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}_{}_{}", self.version, self.host_abi, self.variant)
  }
}
