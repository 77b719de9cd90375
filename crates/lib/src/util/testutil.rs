//! Test utilities for cymj-lib.
//!
//! Provides shell helpers, a fake simulation-library installation compiled
//! with the system `cc`, and a [`Runner`] double that records every
//! invocation and stands in for the real toolchain.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tempfile::TempDir;

use crate::config::{BuildConfig, MujocoInstall};
use crate::consts::{EXTENSION_ABI_VERSION, MUJOCO_LIB};
use crate::exec::{ExecError, Invocation, Runner, SystemRunner};

#[cfg(unix)]
pub fn shell_script(script: &str) -> Invocation {
  Invocation::new("/bin/sh").arg("-c").arg(script)
}

#[cfg(windows)]
pub fn shell_script(script: &str) -> Invocation {
  Invocation::new("cmd.exe").arg("/C").arg(script)
}

#[cfg(unix)]
pub fn shell_with_exit(script: &str, code: i32) -> Invocation {
  shell_script(&format!("{script}; exit {code}"))
}

#[cfg(windows)]
pub fn shell_with_exit(script: &str, code: i32) -> Invocation {
  shell_script(&format!("{script} & exit /b {code}"))
}

#[cfg(unix)]
pub fn touch_file(filename: &str) -> Invocation {
  Invocation::new("/usr/bin/touch").arg(filename)
}

#[cfg(windows)]
pub fn touch_file(filename: &str) -> Invocation {
  Invocation::new("powershell.exe").args([
    "-NoProfile",
    "-Command",
    &format!("New-Item -ItemType File -Path '{}' -Force | Out-Null", filename),
  ])
}

/// Minimal stand-in for the simulation library header.
pub const MUJOCO_HEADER_STUB: &str = r#"
#ifndef MUJOCO_H_
#define MUJOCO_H_
typedef double mjtNum;
typedef struct _mjModel { int nu; int nuserdata; } mjModel;
typedef struct _mjData { mjtNum* ctrl; mjtNum* userdata; } mjData;
int mj_activate(const char* filename);
int mj_version(void);
#endif
"#;

/// Stand-in for the simulation library itself.
pub const MUJOCO_LIB_STUB: &str = r#"
int mj_activate(const char* filename) { return filename != 0; }
int mj_version(void) { return 200; }
"#;

/// Stand-in for the bridge extension source.
pub const BRIDGE_STUB: &str = r#"
unsigned int cymj_abi_version(void) { return 1; }
int _mj_activate(const char* filename) { return filename != 0 ? 1 : 0; }
int _mj_version(void) { return 200; }
int set_warning_callback(void) { return 0; }
"#;

/// Mirrors `mjModel` from [`MUJOCO_HEADER_STUB`].
#[repr(C)]
pub struct StubModel {
  pub nu: std::os::raw::c_int,
  pub nuserdata: std::os::raw::c_int,
}

/// Mirrors `mjData` from [`MUJOCO_HEADER_STUB`].
#[repr(C)]
pub struct StubData {
  pub ctrl: *mut f64,
  pub userdata: *mut f64,
}

pub fn shared_lib_name(name: &str) -> String {
  format!("lib{}.{}", name, std::env::consts::DLL_EXTENSION)
}

/// Compile `source` into a shared library at `output` with the system `cc`.
pub fn compile_shared(source: &Path, output: &Path) {
  let invocation = Invocation::new("cc")
    .args(["-shared", "-fPIC", "-o"])
    .arg(output)
    .arg(source);
  SystemRunner
    .run(&invocation)
    .unwrap_or_else(|e| panic!("failed to compile {}: {}", source.display(), e));
}

/// A throwaway simulation-library install plus bridge sources.
pub struct FakeMujoco {
  pub temp: TempDir,
  pub install: MujocoInstall,
}

impl FakeMujoco {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("mujoco200");
    let install = MujocoInstall::new(&root, temp.path().join("mjkey.txt"));

    std::fs::create_dir_all(install.include_dir()).unwrap();
    std::fs::create_dir_all(install.bin_dir()).unwrap();
    std::fs::write(install.include_dir().join("mujoco.h"), MUJOCO_HEADER_STUB).unwrap();

    let lib_source = temp.path().join("mujoco_stub.c");
    std::fs::write(&lib_source, MUJOCO_LIB_STUB).unwrap();
    compile_shared(&lib_source, &install.bin_dir().join(shared_lib_name(MUJOCO_LIB)));

    let source_dir = temp.path().join("src");
    std::fs::create_dir_all(source_dir.join("gl")).unwrap();
    std::fs::write(source_dir.join("cymj.c"), BRIDGE_STUB).unwrap();

    Self { temp, install }
  }

  pub fn source_dir(&self) -> PathBuf {
    self.temp.path().join("src")
  }

  pub fn bridge_source(&self) -> PathBuf {
    self.source_dir().join("cymj.c")
  }

  /// Configuration rooted entirely inside the temp directory.
  pub fn config(&self) -> BuildConfig {
    let mut config = BuildConfig::new(self.install.clone(), self.source_dir());
    config.callback_dir = self.temp.path().join("fn");
    config.host_abi = EXTENSION_ABI_VERSION.to_string();
    config.cc = Some("cc".to_string());
    config
  }
}

/// Toolchain double.
///
/// Compiler invocations build [`BRIDGE_STUB`] into the requested `-o` path
/// (ignoring the platform libraries the real recipe would link). Binary
/// rewriting tools succeed without touching the file; `ldd` reports the
/// simulation library as a dependency.
pub struct RecordingRunner {
  bridge_source: PathBuf,
  invocations: Mutex<Vec<Invocation>>,
  compiles: AtomicUsize,
  fail_compiles: AtomicBool,
  compile_delay: Duration,
}

impl RecordingRunner {
  pub fn new(bridge_source: impl Into<PathBuf>) -> Self {
    Self {
      bridge_source: bridge_source.into(),
      invocations: Mutex::new(Vec::new()),
      compiles: AtomicUsize::new(0),
      fail_compiles: AtomicBool::new(false),
      compile_delay: Duration::ZERO,
    }
  }

  /// Hold each compiler invocation open so concurrent builders overlap.
  pub fn with_compile_delay(mut self, delay: Duration) -> Self {
    self.compile_delay = delay;
    self
  }

  pub fn fail_compiles(&self, fail: bool) {
    self.fail_compiles.store(fail, Ordering::SeqCst);
  }

  pub fn compiles(&self) -> usize {
    self.compiles.load(Ordering::SeqCst)
  }

  pub fn invocations(&self) -> Vec<Invocation> {
    self.invocations.lock().unwrap().clone()
  }

  /// Program names in invocation order.
  pub fn programs(&self) -> Vec<String> {
    self.invocations().iter().map(Invocation::program_name).collect()
  }
}

impl Runner for RecordingRunner {
  fn run(&self, invocation: &Invocation) -> Result<String, ExecError> {
    self.invocations.lock().unwrap().push(invocation.clone());

    match invocation.program_name().as_str() {
      "patchelf" | "install_name_tool" => Ok(String::new()),
      "ldd" => Ok(format!("\t{} => not found", shared_lib_name(MUJOCO_LIB))),
      _ => {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.compile_delay);

        if self.fail_compiles.load(Ordering::SeqCst) {
          return Err(ExecError::Failed {
            cmd: invocation.to_string(),
            code: Some(1),
            stderr: "cymj.c:1: error: simulated failure".to_string(),
          });
        }

        let output = invocation
          .value_after("-o")
          .map(PathBuf::from)
          .unwrap_or_else(|| panic!("compiler invocation without -o: {invocation}"));
        compile_shared(&self.bridge_source, &output);
        Ok(String::new())
      }
    }
  }
}

/// Whether any entry of `dir` has a file name starting with `prefix`.
pub fn dir_has_prefix(dir: &Path, prefix: &str) -> bool {
  std::fs::read_dir(dir)
    .map(|entries| {
      entries
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_str().is_some_and(|n| n.starts_with(prefix)))
    })
    .unwrap_or(false)
}
