//! CLI smoke tests for cymj.
//!
//! These tests verify that the commands that need no toolchain run without
//! panicking and return appropriate exit codes.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the cymj binary with every setting pointed into `temp`.
fn cymj_cmd(temp: &TempDir) -> Command {
  let mut cmd = cargo_bin_cmd!("cymj");
  cmd
    .env("MUJOCO_PY_MUJOCO_PATH", temp.path().join("mujoco200"))
    .env("MUJOCO_PY_MJKEY_PATH", temp.path().join("mjkey.txt"))
    .env("MUJOCO_PY_SOURCE_DIR", temp.path().join("src"))
    .env("MUJOCO_PY_FN_BUILD_DIR", temp.path().join("fn"))
    .env("MUJOCO_PY_FORCE_CPU", "1")
    .env_remove("MUJOCO_PY_GENERATED_DIR")
    .env_remove("MUJOCO_PY_BUILD_LOCK")
    .env_remove("MUJOCO_PY_HOST_ABI")
    .env_remove("MUJOCO_PY_FORCE_REBUILD")
    .env_remove("RUST_LOG");
  cmd
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  let temp = TempDir::new().unwrap();
  cymj_cmd(&temp)
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  let temp = TempDir::new().unwrap();
  cymj_cmd(&temp)
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("cymj"));
}

#[test]
fn subcommand_help_works() {
  let temp = TempDir::new().unwrap();
  for cmd in &["build", "info", "compile", "clean"] {
    cymj_cmd(&temp)
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// Info
// =============================================================================

#[test]
#[serial]
fn info_reports_unbuilt_artifact() {
  let temp = TempDir::new().unwrap();
  cymj_cmd(&temp)
    .arg("info")
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache key"))
    .stdout(predicate::str::contains("(not built)"))
    .stdout(predicate::str::contains("Build lock"));
}

#[test]
#[serial]
#[cfg(target_os = "linux")]
fn info_json_on_linux_uses_cpu_variant_when_forced() {
  let temp = TempDir::new().unwrap();
  let output = cymj_cmd(&temp).args(["info", "--output", "json"]).output().unwrap();

  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["variant"], "linuxcpu");
  assert_eq!(json["built"], false);
  assert_eq!(json["key_present"], false);
  assert_eq!(json["build_lock"]["held"], false);
  assert!(json["cache_key"].as_str().unwrap().ends_with("_linuxcpu"));
}

#[test]
#[serial]
fn info_rejects_invalid_host_abi() {
  let temp = TempDir::new().unwrap();
  cymj_cmd(&temp)
    .env("MUJOCO_PY_HOST_ABI", "3.8")
    .arg("info")
    .assert()
    .failure()
    .stderr(predicate::str::contains("MUJOCO_PY_HOST_ABI"));
}

// =============================================================================
// Build / Compile / Clean
// =============================================================================

#[test]
#[serial]
#[cfg(target_os = "linux")]
fn build_without_library_path_fails_with_remediation() {
  let temp = TempDir::new().unwrap();
  cymj_cmd(&temp)
    .env("LD_LIBRARY_PATH", "/nonexistent")
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("export LD_LIBRARY_PATH="));
}

#[test]
fn compile_missing_file_fails() {
  let temp = TempDir::new().unwrap();
  cymj_cmd(&temp)
    .args(["compile", "does-not-exist.c"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to read"));
}

#[test]
#[serial]
fn clean_empty_tree_succeeds() {
  let temp = TempDir::new().unwrap();
  cymj_cmd(&temp)
    .args(["clean", "--output", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"artifacts_removed\": 0"));
}
