//! Build coordinator: find, build and load the bridge extension.
//!
//! Artifacts are cached on disk by [`CacheKey`]. Every build on the machine is
//! serialised by the [`BuildLock`], which is held across the whole
//! build-and-publish sequence so a waiting process never sees a half-written
//! artifact.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::build::{BuildError, ExtensionBuilder};
use crate::build_lock::{BuildLock, BuildLockError};
use crate::config::{BuildConfig, ConfigError};
use crate::consts::EXTENSION_NAME;
use crate::exec::{Runner, SystemRunner};
use crate::loader::{LoadError, LoadedModule};
use crate::platform::gpu::DriverLocator;
use crate::platform::search_path::ensure_library_path_env;
use crate::platform::{BuildVariant, resolve_variant};

#[derive(Debug, Error)]
pub enum ExtensionError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Lock(#[from] BuildLockError),

  #[error(transparent)]
  Load(#[from] LoadError),

  #[error("failed to remove {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Ensures a loadable artifact exists for a variant.
pub struct BuildCoordinator<'a> {
  config: &'a BuildConfig,
  runner: &'a dyn Runner,
}

impl<'a> BuildCoordinator<'a> {
  pub fn new(config: &'a BuildConfig, runner: &'a dyn Runner) -> Self {
    Self { config, runner }
  }

  /// Load the cached artifact for `variant`, building it first when needed.
  ///
  /// An existing artifact that fails to load is rebuilt once. If the rebuilt
  /// artifact fails to load as well, that error is returned.
  pub fn ensure_artifact(&self, variant: BuildVariant) -> Result<LoadedModule, ExtensionError> {
    let builder = ExtensionBuilder::new(self.config, variant, self.runner);
    let artifact = builder.artifact_path();
    let command = format!("build {}", builder.cache_key());

    if self.config.force_rebuild {
      let _lock = BuildLock::acquire(&self.config.lock_dir, &command)?;
      remove_artifact(&artifact)?;
      info!(artifact = ?artifact, "forced rebuild");
      return self.build_and_load(&builder);
    }

    // Identity of an artifact that already failed to load here.
    let mut rejected: Option<Option<FileIdentity>> = None;
    if artifact.exists() {
      match self.load(&artifact) {
        Ok(module) => {
          debug!(artifact = ?artifact, "using cached extension");
          return Ok(module);
        }
        Err(e) => {
          warn!(artifact = ?artifact, error = %e, "cached extension failed to load, rebuilding");
          rejected = Some(file_identity(&artifact));
        }
      }
    }

    let _lock = BuildLock::acquire(&self.config.lock_dir, &command)?;

    // Another process may have published while we waited for the lock.
    let republished = match rejected {
      None => artifact.exists(),
      Some(seen) => artifact.exists() && file_identity(&artifact) != seen,
    };
    if republished {
      match self.load(&artifact) {
        Ok(module) => {
          info!(artifact = ?artifact, "extension published by another process");
          return Ok(module);
        }
        Err(e) => warn!(artifact = ?artifact, error = %e, "published extension failed to load, rebuilding"),
      }
    }

    self.build_and_load(&builder)
  }

  fn build_and_load(&self, builder: &ExtensionBuilder<'_>) -> Result<LoadedModule, ExtensionError> {
    let artifact = builder.build()?;
    Ok(self.load(&artifact)?)
  }

  fn load(&self, path: &Path) -> Result<LoadedModule, LoadError> {
    let module = LoadedModule::load(EXTENSION_NAME, path)?;
    module.verify_abi(&self.config.host_abi)?;
    Ok(module)
  }
}

/// Device and inode. Publishing renames a fresh file over the artifact, so a
/// republished artifact always has a new inode.
#[cfg(unix)]
type FileIdentity = (u64, u64);

/// Size and modification time where inodes are not exposed.
#[cfg(not(unix))]
type FileIdentity = (u64, Option<std::time::SystemTime>);

#[cfg(unix)]
fn file_identity(path: &Path) -> Option<FileIdentity> {
  use std::os::unix::fs::MetadataExt;
  let meta = std::fs::metadata(path).ok()?;
  Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(path: &Path) -> Option<FileIdentity> {
  let meta = std::fs::metadata(path).ok()?;
  Some((meta.len(), meta.modified().ok()))
}

/// Delete `path`, treating an already-absent file as success.
fn remove_artifact(path: &Path) -> Result<(), ExtensionError> {
  match std::fs::remove_file(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      debug!(path = ?path, "artifact already absent");
      Ok(())
    }
    Err(source) => Err(ExtensionError::Remove {
      path: path.to_path_buf(),
      source,
    }),
  }
}

/// Resolve the variant for this machine, verify the loader environment and
/// ensure the extension with the system toolchain.
pub fn load_cython_ext(config: &BuildConfig) -> Result<LoadedModule, ExtensionError> {
  load_cython_ext_with(std::env::consts::OS, &DriverLocator::system(), &SystemRunner, config)
}

fn load_cython_ext_with(
  target_os: &str,
  locator: &DriverLocator,
  runner: &dyn Runner,
  config: &BuildConfig,
) -> Result<LoadedModule, ExtensionError> {
  let resolution = resolve_variant(target_os, config.force_cpu, locator)?;
  let os = resolution.variant.os();

  ensure_library_path_env(os, &config.mujoco.bin_dir())?;
  if let Some(driver_dir) = &resolution.gpu_driver_dir {
    ensure_library_path_env(os, driver_dir)?;
  }
  config.mujoco.find_key();

  BuildCoordinator::new(config, runner).ensure_artifact(resolution.variant)
}

#[derive(Debug, Default, serde::Serialize)]
pub struct CleanStats {
  pub artifacts_removed: usize,
  pub scratch_dirs_removed: usize,
  pub bytes_freed: u64,
  pub removed_paths: Vec<PathBuf>,
}

/// Remove every cached artifact and scratch directory under the generated
/// directory while holding the build lock.
pub fn clean(config: &BuildConfig) -> Result<CleanStats, ExtensionError> {
  let _lock = BuildLock::acquire(&config.lock_dir, "clean")?;
  let mut stats = CleanStats::default();

  if !config.generated_dir.exists() {
    return Ok(stats);
  }

  let artifact_prefix = format!("{}_", EXTENSION_NAME);
  for entry in WalkDir::new(&config.generated_dir).min_depth(1).max_depth(1) {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        warn!(error = %e, "skipping unreadable entry");
        continue;
      }
    };
    let name = entry.file_name().to_string_lossy();
    let path = entry.path();
    let remove_err = |source| ExtensionError::Remove {
      path: path.to_path_buf(),
      source,
    };

    if entry.file_type().is_file() && name.starts_with(&artifact_prefix) {
      stats.bytes_freed += entry.metadata().map(|m| m.len()).unwrap_or(0);
      std::fs::remove_file(path).map_err(remove_err)?;
      stats.artifacts_removed += 1;
    } else if entry.file_type().is_dir() && name.starts_with("_build_") {
      stats.bytes_freed += dir_size(path);
      std::fs::remove_dir_all(path).map_err(remove_err)?;
      stats.scratch_dirs_removed += 1;
    } else {
      continue;
    }
    debug!(path = ?path, "removed");
    stats.removed_paths.push(path.to_path_buf());
  }

  info!(
    artifacts = stats.artifacts_removed,
    scratch_dirs = stats.scratch_dirs_removed,
    bytes = stats.bytes_freed,
    "cleaned generated directory"
  );
  Ok(stats)
}

fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use crate::util::hash::hash_file;
  use crate::util::testutil::{FakeMujoco, RecordingRunner};
  use serial_test::serial;
  use std::time::Duration;

  fn artifact_for(config: &BuildConfig, runner: &RecordingRunner) -> PathBuf {
    ExtensionBuilder::new(config, BuildVariant::LinuxCpu, runner).artifact_path()
  }

  #[test]
  fn builds_once_then_uses_cache() {
    let fake = FakeMujoco::new();
    let config = fake.config();
    let runner = RecordingRunner::new(fake.bridge_source());
    let coordinator = BuildCoordinator::new(&config, &runner);

    let first = coordinator.ensure_artifact(BuildVariant::LinuxCpu).unwrap();
    let second = coordinator.ensure_artifact(BuildVariant::LinuxCpu).unwrap();

    assert_eq!(runner.compiles(), 1);
    assert_eq!(first.path(), second.path());
  }

  #[test]
  fn racing_builders_compile_once() {
    let fake = FakeMujoco::new();
    let config = fake.config();
    let runner = RecordingRunner::new(fake.bridge_source()).with_compile_delay(Duration::from_millis(200));

    let paths: Vec<PathBuf> = std::thread::scope(|s| {
      let handles: Vec<_> = (0..2)
        .map(|_| {
          s.spawn(|| {
            let coordinator = BuildCoordinator::new(&config, &runner);
            let module = coordinator.ensure_artifact(BuildVariant::LinuxCpu).unwrap();
            module.path().to_path_buf()
          })
        })
        .collect();
      handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(runner.compiles(), 1);
    assert_eq!(paths[0], paths[1]);
    assert_eq!(hash_file(&paths[0]).unwrap(), hash_file(&paths[1]).unwrap());
  }

  #[test]
  fn forced_rebuild_replaces_artifact() {
    let fake = FakeMujoco::new();
    let mut config = fake.config();
    let runner = RecordingRunner::new(fake.bridge_source());
    BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap();

    config.force_rebuild = true;
    BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap();

    assert_eq!(runner.compiles(), 2);
  }

  #[test]
  fn forced_rebuild_deletes_before_building() {
    let fake = FakeMujoco::new();
    let mut config = fake.config();
    let runner = RecordingRunner::new(fake.bridge_source());
    BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap();
    let artifact = artifact_for(&config, &runner);
    assert!(artifact.exists());

    config.force_rebuild = true;
    runner.fail_compiles(true);
    let err = BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap_err();

    assert!(matches!(err, ExtensionError::Build(BuildError::Toolchain(_))));
    assert!(!artifact.exists());
  }

  #[test]
  fn forced_rebuild_reports_unremovable_artifact() {
    let fake = FakeMujoco::new();
    let mut config = fake.config();
    config.force_rebuild = true;
    let runner = RecordingRunner::new(fake.bridge_source());
    let artifact = artifact_for(&config, &runner);
    std::fs::create_dir_all(&artifact).unwrap();

    let err = BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap_err();

    assert!(matches!(err, ExtensionError::Remove { ref path, .. } if *path == artifact));
    assert_eq!(runner.compiles(), 0);
  }

  #[test]
  fn forced_rebuild_tolerates_absent_artifact() {
    let fake = FakeMujoco::new();
    let mut config = fake.config();
    config.force_rebuild = true;
    let runner = RecordingRunner::new(fake.bridge_source());
    assert!(!artifact_for(&config, &runner).exists());

    let module = BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap();

    assert_eq!(runner.compiles(), 1);
    assert!(module.path().exists());
  }

  #[test]
  fn truncated_artifact_is_rebuilt_once() {
    let fake = FakeMujoco::new();
    let config = fake.config();
    let runner = RecordingRunner::new(fake.bridge_source());
    let artifact = artifact_for(&config, &runner);
    std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
    std::fs::write(&artifact, b"\x7fELF\x02\x01").unwrap();

    let module = BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap();

    assert_eq!(runner.compiles(), 1);
    assert_eq!(module.path(), artifact);
  }

  #[test]
  fn republished_artifact_has_new_identity() {
    let fake = FakeMujoco::new();
    let config = fake.config();
    let runner = RecordingRunner::new(fake.bridge_source());
    let artifact = BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap()
      .path()
      .to_path_buf();
    let before = file_identity(&artifact).unwrap();
    let mtime = std::fs::metadata(&artifact).unwrap().modified().unwrap();

    // Same bytes and same mtime, published by rename like a concurrent builder.
    let staged = artifact.with_extension("staged");
    std::fs::copy(&artifact, &staged).unwrap();
    std::fs::File::options()
      .write(true)
      .open(&staged)
      .unwrap()
      .set_modified(mtime)
      .unwrap();
    std::fs::rename(&staged, &artifact).unwrap();

    assert_eq!(std::fs::metadata(&artifact).unwrap().modified().unwrap(), mtime);
    assert_ne!(file_identity(&artifact).unwrap(), before);
  }

  #[test]
  fn unloadable_rebuild_surfaces_load_error() {
    let fake = FakeMujoco::new();
    let mut config = fake.config();
    // The stub bridge reports ABI 1.
    config.host_abi = "2".to_string();
    let runner = RecordingRunner::new(fake.bridge_source());

    let err = BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap_err();

    assert!(matches!(err, ExtensionError::Load(LoadError::AbiMismatch { .. })));
    assert_eq!(runner.compiles(), 1);
  }

  #[test]
  fn build_failure_leaves_no_artifact() {
    let fake = FakeMujoco::new();
    let config = fake.config();
    let runner = RecordingRunner::new(fake.bridge_source());
    runner.fail_compiles(true);

    let err = BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap_err();

    assert!(matches!(err, ExtensionError::Build(BuildError::Toolchain(_))));
    assert!(!artifact_for(&config, &runner).exists());

    // The lock was released: a retry can proceed.
    runner.fail_compiles(false);
    BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap();
    assert_eq!(runner.compiles(), 2);
  }

  #[test]
  #[serial]
  fn gpu_driver_missing_from_search_path_is_reported() {
    let fake = FakeMujoco::new();
    let config = fake.config();
    let driver_dir = fake.temp.path().join("lib").join("nvidia-450");
    std::fs::create_dir_all(&driver_dir).unwrap();
    let gpu = DriverLocator {
      smi_present: true,
      container_dir: fake.temp.path().join("no-container"),
      search_dir: fake.temp.path().join("lib"),
    };
    let runner = RecordingRunner::new(fake.bridge_source());
    let bin = config.mujoco.bin_dir();

    let result = temp_env::with_var("LD_LIBRARY_PATH", Some(bin.as_os_str()), || {
      load_cython_ext_with("linux", &gpu, &runner, &config)
    });

    match result {
      Err(ExtensionError::Config(ConfigError::MissingLibraryPath { var, remediation, .. })) => {
        assert_eq!(var, "LD_LIBRARY_PATH");
        assert!(remediation.contains(&driver_dir.display().to_string()), "{remediation}");
      }
      other => panic!("expected MissingLibraryPath, got {other:?}"),
    }
    assert_eq!(runner.compiles(), 0);
  }

  #[test]
  #[serial]
  fn configured_environment_loads_extension() {
    let fake = FakeMujoco::new();
    let config = fake.config();
    let cpu_only = DriverLocator {
      smi_present: false,
      container_dir: fake.temp.path().join("no-container"),
      search_dir: fake.temp.path().join("no-lib"),
    };
    let runner = RecordingRunner::new(fake.bridge_source());
    let bin = config.mujoco.bin_dir();

    let module = temp_env::with_var("LD_LIBRARY_PATH", Some(bin.as_os_str()), || {
      load_cython_ext_with("linux", &cpu_only, &runner, &config)
    })
    .unwrap();

    assert_eq!(module.path(), artifact_for(&config, &runner));
    assert_eq!(runner.compiles(), 1);
  }

  #[test]
  fn clean_removes_artifacts_and_scratch() {
    let fake = FakeMujoco::new();
    let config = fake.config();
    let runner = RecordingRunner::new(fake.bridge_source());
    BuildCoordinator::new(&config, &runner)
      .ensure_artifact(BuildVariant::LinuxCpu)
      .unwrap();

    let stats = clean(&config).unwrap();

    assert_eq!(stats.artifacts_removed, 1);
    assert_eq!(stats.scratch_dirs_removed, 1);
    assert!(stats.bytes_freed > 0);
    assert!(!artifact_for(&config, &runner).exists());
    assert!(config.lock_dir.exists());
  }

  #[test]
  fn clean_fresh_tree_removes_nothing() {
    let fake = FakeMujoco::new();
    let config = fake.config().with_generated_dir(fake.temp.path().join("nothing-here"));

    let stats = clean(&config).unwrap();

    assert!(stats.removed_paths.is_empty());
    assert_eq!(stats.bytes_freed, 0);
  }
}
