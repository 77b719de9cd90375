//! Configuration assembled from the process environment.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::consts::{BUILD_LOCK_DIR, EXTENSION_ABI_VERSION, env};
use crate::platform::paths;

/// Fatal configuration problems, reported before any build is attempted.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Unsupported platform {0}")]
  UnsupportedPlatform(String),

  #[error(
    "Missing path to your environment variable.\n\
     Current values {var}={current}\n\
     Please add following line to .bashrc:\n{remediation}"
  )]
  MissingLibraryPath {
    var: String,
    current: String,
    remediation: String,
  },

  #[error(
    "Could not find GCC executable.\n\n\
     HINT: On OS X, install GCC with `brew install gcc`. or `port install gcc`."
  )]
  NoCompiler,

  #[error("invalid value for {var}: {message}")]
  InvalidValue { var: String, message: String },
}

/// Location of the simulation library installation.
///
/// Supplied by discovery and trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MujocoInstall {
  pub root: PathBuf,
  pub key_path: PathBuf,
}

impl MujocoInstall {
  pub fn new(root: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      key_path: key_path.into(),
    }
  }

  /// Resolve the installation from `MUJOCO_PY_MUJOCO_PATH` / `MUJOCO_PY_MJKEY_PATH`.
  pub fn from_env() -> Self {
    let root = env_path(env::MUJOCO_PATH).unwrap_or_else(paths::mujoco_dir);
    let key_path = env_path(env::MJKEY_PATH).unwrap_or_else(paths::mjkey_path);
    Self { root, key_path }
  }

  pub fn include_dir(&self) -> PathBuf {
    self.root.join("include")
  }

  pub fn bin_dir(&self) -> PathBuf {
    self.root.join("bin")
  }

  /// Returns `true` when the license key exists; logs the remediation otherwise.
  pub fn find_key(&self) -> bool {
    if self.key_path.exists() {
      return true;
    }
    warn!(
      key_path = ?self.key_path,
      "You appear to be missing a License Key for mujoco. We expected to find the file here: {}",
      self.key_path.display()
    );
    false
  }
}

/// Everything the build pipeline and the callback compiler need to know.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  pub mujoco: MujocoInstall,
  /// Directory holding `cymj.c` and the `gl/` shims.
  pub source_dir: PathBuf,
  /// Root of cached artifacts and per-version scratch directories.
  pub generated_dir: PathBuf,
  /// Fixed directory used as the machine-wide BuildLock target.
  pub lock_dir: PathBuf,
  /// Scratch directory for runtime-compiled callbacks.
  pub callback_dir: PathBuf,
  /// Host ABI tag, part of the cache key and checked against the loaded bridge.
  pub host_abi: String,
  pub force_rebuild: bool,
  pub force_cpu: bool,
  /// Keep callback intermediates on disk.
  pub debug_fn_builder: bool,
  /// Compiler override (`CC`).
  pub cc: Option<String>,
}

impl BuildConfig {
  /// Build a configuration with default directories under `source_dir`.
  pub fn new(mujoco: MujocoInstall, source_dir: impl Into<PathBuf>) -> Self {
    let source_dir = source_dir.into();
    let generated_dir = source_dir.join("generated");
    Self {
      mujoco,
      lock_dir: generated_dir.join(BUILD_LOCK_DIR),
      generated_dir,
      source_dir,
      callback_dir: paths::callback_dir(),
      host_abi: EXTENSION_ABI_VERSION.to_string(),
      force_rebuild: false,
      force_cpu: false,
      debug_fn_builder: false,
      cc: None,
    }
  }

  /// Read the configuration from the process environment.
  pub fn from_env() -> Result<Self, ConfigError> {
    let source_dir = env_path(env::SOURCE_DIR).unwrap_or_else(paths::data_dir);
    let mut config = Self::new(MujocoInstall::from_env(), source_dir);

    if let Some(dir) = env_path(env::GENERATED_DIR) {
      config.lock_dir = dir.join(BUILD_LOCK_DIR);
      config.generated_dir = dir;
    }
    if let Some(dir) = env_path(env::BUILD_LOCK) {
      config.lock_dir = dir;
    }
    if let Some(dir) = env_path(env::FN_BUILD_DIR) {
      config.callback_dir = dir;
    }
    if let Some(abi) = env_value(env::HOST_ABI) {
      if !abi.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConfigError::InvalidValue {
          var: env::HOST_ABI.to_string(),
          message: format!("{abi:?} must be alphanumeric"),
        });
      }
      config.host_abi = abi;
    }

    config.force_rebuild = env_value(env::FORCE_REBUILD).is_some();
    // Presence alone forces the CPU variant, even when empty.
    config.force_cpu = std::env::var_os(env::FORCE_CPU).is_some();
    config.debug_fn_builder = env_value(env::DEBUG_FN_BUILDER).is_some();
    config.cc = env_value(env::CC);

    Ok(config)
  }

  pub fn with_generated_dir(mut self, dir: impl AsRef<Path>) -> Self {
    self.generated_dir = dir.as_ref().to_path_buf();
    self.lock_dir = self.generated_dir.join(BUILD_LOCK_DIR);
    self
  }
}

/// Non-empty value of an environment variable.
fn env_value(var: &str) -> Option<String> {
  std::env::var(var).ok().filter(|v| !v.is_empty())
}

fn env_path(var: &str) -> Option<PathBuf> {
  env_value(var).map(PathBuf::from)
}
