use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the directory holding the bridge sources and generated artifacts
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
}

/// Returns the directory holding the bridge sources and generated artifacts
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Default installation root of the simulation library
pub fn mujoco_dir() -> PathBuf {
  home_dir().join(".mujoco").join("mujoco200")
}

/// Default location of the simulation library license key
pub fn mjkey_path() -> PathBuf {
  home_dir().join(".mujoco").join("mjkey.txt")
}

/// Scratch directory for runtime-compiled callbacks
pub fn callback_dir() -> PathBuf {
  std::env::temp_dir().join(format!("{}_fn", APP_NAME))
}
