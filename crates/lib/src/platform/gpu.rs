//! NVIDIA driver discovery for the GPU build variant.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::exec::find_executable;

/// Driver directory mounted by the NVIDIA container runtime.
pub const CONTAINER_DRIVER_DIR: &str = "/usr/local/nvidia/lib64";

/// Directory scanned for versioned `nvidia-NNN` driver directories.
pub const SYSTEM_LIB_DIR: &str = "/usr/lib";

/// Inputs for driver discovery, separated from the filesystem layout so it can
/// be pointed at a fixture tree.
#[derive(Debug, Clone)]
pub struct DriverLocator {
  /// Whether an `nvidia-smi` executable is reachable on `PATH`.
  pub smi_present: bool,
  pub container_dir: PathBuf,
  pub search_dir: PathBuf,
}

impl DriverLocator {
  /// Locate drivers on the running system.
  pub fn system() -> Self {
    Self {
      smi_present: find_executable("nvidia-smi").is_some(),
      container_dir: PathBuf::from(CONTAINER_DRIVER_DIR),
      search_dir: PathBuf::from(SYSTEM_LIB_DIR),
    }
  }

  /// Returns the driver library directory, or `None` when no GPU driver is usable.
  pub fn discover(&self) -> Option<PathBuf> {
    if !self.smi_present {
      debug!("nvidia-smi not found, skipping GPU driver discovery");
      return None;
    }
    if self.container_dir.is_dir() {
      return Some(self.container_dir.clone());
    }
    latest_driver_dir(&self.search_dir)
  }
}

/// Pick the latest `nvidia-NNN` directory under `search_dir`.
///
/// Candidates are sorted by path and the last one wins, so equal versions
/// resolve the same way on every call.
pub fn latest_driver_dir(search_dir: &Path) -> Option<PathBuf> {
  let entries = std::fs::read_dir(search_dir).ok()?;

  let mut candidates: Vec<PathBuf> = entries
    .filter_map(Result::ok)
    .filter(|entry| entry.path().is_dir())
    .filter(|entry| entry.file_name().to_str().is_some_and(is_driver_dir_name))
    .map(|entry| entry.path())
    .collect();
  candidates.sort();

  let latest = candidates.last()?.clone();
  if candidates.len() > 1 {
    info!(chosen = ?latest, among = ?candidates, "choosing the latest nvidia driver");
  }
  Some(latest)
}

fn is_driver_dir_name(name: &str) -> bool {
  name
    .strip_prefix("nvidia-")
    .is_some_and(|version| version.len() == 3 && version.bytes().all(|b| b.is_ascii_digit()))
}
