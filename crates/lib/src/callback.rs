//! Runtime compilation of native step callbacks.
//!
//! A callback body is C source defining
//! `void fun(const mjModel* m, mjData* d)`. It is wrapped into a uniquely
//! named module, compiled against the simulation library and loaded. The
//! module handle is then leaked so the code stays mapped, and every file the
//! compilation produced is deleted.
//!
//! Userdata names become macros bound to slots of `d->userdata`, in order:
//!
//! ```c
//! #define my_sum d->userdata[0]
//! ```

use std::ffi::c_void;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::build::toolchain::{CompileUnit, FlagStyle, select_callback_compiler};
use crate::build::{BuildError, manually_link_libraries};
use crate::config::{BuildConfig, ConfigError};
use crate::consts::{CALLBACK_ADDR_SYMBOL, CALLBACK_FN, CALLBACK_PREFIX, MUJOCO_HEADER, MUJOCO_LIB};
use crate::exec::{ExecError, Runner, SystemRunner};
use crate::loader::{LoadError, LoadedModule};
use crate::platform::Os;

const RANDOM_SUFFIX_LEN: usize = 15;

static MODULE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum CallbackError {
  #[error("invalid userdata name {0:?}: must be a C identifier")]
  InvalidName(String),

  #[error("userdata name {0:?} is bound twice")]
  DuplicateName(String),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("failed to compile callback {module}: {source}")]
  Compile {
    module: String,
    #[source]
    source: ExecError,
  },

  #[error("failed to link callback: {0}")]
  Link(#[from] BuildError),

  #[error(transparent)]
  Load(#[from] LoadError),

  #[error("callback {0} exported a null entry address")]
  NullEntry(String),

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// Signature every compiled callback has: `(const mjModel*, mjData*)`.
pub type StepFn = unsafe extern "C" fn(*const c_void, *mut c_void);

/// Entry address of a compiled callback.
///
/// Valid for the lifetime of the process that compiled it; never persist it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackFn(usize);

impl CallbackFn {
  /// Raw address, for handing to the simulation loop.
  pub fn as_raw(self) -> usize {
    self.0
  }

  pub fn as_fn(self) -> StepFn {
    // Safety: constructed only from a non-null address read from a module
    // that stays mapped for the rest of the process.
    unsafe { std::mem::transmute::<usize, StepFn>(self.0) }
  }

  /// Invoke the callback.
  ///
  /// # Safety
  ///
  /// `model` and `data` must point to a valid model and state matching the
  /// header the callback was compiled against.
  pub unsafe fn call(self, model: *const c_void, data: *mut c_void) {
    unsafe { (self.as_fn())(model, data) }
  }
}

/// Process-unique module name: prefix, pid, counter and a random suffix.
pub fn module_name() -> String {
  let counter = MODULE_COUNTER.fetch_add(1, Ordering::Relaxed);
  let mut rng = rand::thread_rng();
  let suffix: String = (0..RANDOM_SUFFIX_LEN)
    .map(|_| rng.gen_range(b'a'..=b'z') as char)
    .collect();
  format!("{}{}_{}_{}", CALLBACK_PREFIX, std::process::id(), counter, suffix)
}

fn is_c_identifier(name: &str) -> bool {
  let mut chars = name.chars();
  match chars.next() {
    Some(c) if c == '_' || c.is_ascii_alphabetic() => chars.all(|c| c == '_' || c.is_ascii_alphanumeric()),
    _ => false,
  }
}

/// Render the full compilation unit for `body`.
pub fn callback_source(body: &str, userdata_names: &[&str]) -> Result<String, CallbackError> {
  let mut source = String::new();
  source.push_str("#include <stdint.h>\n");
  let _ = writeln!(source, "#include <{}>", MUJOCO_HEADER);

  for (i, name) in userdata_names.iter().enumerate() {
    if !is_c_identifier(name) {
      return Err(CallbackError::InvalidName(name.to_string()));
    }
    if userdata_names[..i].contains(name) {
      return Err(CallbackError::DuplicateName(name.to_string()));
    }
    let _ = writeln!(source, "#define {} d->userdata[{}]", name, i);
  }

  source.push_str(body);
  let _ = write!(
    source,
    "\nuintptr_t {} = (uintptr_t) {};\n",
    CALLBACK_ADDR_SYMBOL, CALLBACK_FN
  );
  Ok(source)
}

/// Removes one intermediate file or directory.
type RemoveFn = fn(&Path) -> io::Result<()>;

/// Compiles callbacks into the configured scratch directory.
pub struct CallbackCompiler<'a> {
  config: &'a BuildConfig,
  runner: &'a dyn Runner,
  remove: RemoveFn,
}

impl<'a> CallbackCompiler<'a> {
  pub fn new(config: &'a BuildConfig, runner: &'a dyn Runner) -> Self {
    Self {
      config,
      runner,
      remove: remove_path,
    }
  }

  #[cfg(test)]
  fn with_remover(mut self, remove: RemoveFn) -> Self {
    self.remove = remove;
    self
  }

  /// Compile `body` and return the address of its `fun`.
  ///
  /// Files named after the module are removed afterwards whether or not
  /// compilation succeeded, unless intermediates are kept for debugging.
  pub fn compile_callback(&self, body: &str, userdata_names: &[&str]) -> Result<CallbackFn, CallbackError> {
    let source = callback_source(body, userdata_names)?;
    let module = module_name();
    let dir = &self.config.callback_dir;
    std::fs::create_dir_all(dir)?;

    let result = self.compile_module(dir, &module, &source);

    if self.config.debug_fn_builder {
      info!(module = %module, dir = ?dir, "keeping callback intermediates");
    } else {
      remove_module_files(dir, &module, self.remove);
    }
    result
  }

  fn compile_module(&self, dir: &Path, module: &str, source: &str) -> Result<CallbackFn, CallbackError> {
    let os = Os::current().ok_or_else(|| ConfigError::UnsupportedPlatform(std::env::consts::OS.to_string()))?;
    let compiler = select_callback_compiler(os, self.config.cc.as_deref());

    let source_path = dir.join(format!("{module}.c"));
    std::fs::write(&source_path, source)?;
    let output = dir.join(format!("{}.{}", module, std::env::consts::DLL_EXTENSION));

    let bin = self.config.mujoco.bin_dir();
    let unit = CompileUnit {
      sources: vec![source_path],
      include_dirs: vec![self.config.mujoco.include_dir()],
      library_dirs: vec![bin.clone()],
      libraries: vec![MUJOCO_LIB.to_string()],
      runtime_library_dirs: if os == Os::Windows { Vec::new() } else { vec![bin.clone()] },
      compile_args: vec![(if os == Os::Windows { "/w" } else { "-w" }).to_string()],
      ..Default::default()
    };
    let invocation = unit
      .shared_library(&compiler, FlagStyle::for_os(os), &output)
      .current_dir(dir);

    debug!(module, os = %os, compiler = %compiler, "compiling callback");
    self.runner.run(&invocation).map_err(|source| CallbackError::Compile {
      module: module.to_string(),
      source,
    })?;

    // Callbacks reference the simulation library the same way the bridge does.
    let loadable: PathBuf = match os {
      Os::MacOs => manually_link_libraries(self.runner, &bin, &output)?,
      Os::Linux | Os::Windows => output,
    };

    let loaded = LoadedModule::load(module, &loadable)?;
    let address = loaded.read_usize(CALLBACK_ADDR_SYMBOL)?;
    if address == 0 {
      return Err(CallbackError::NullEntry(module.to_string()));
    }
    loaded.leak();

    debug!(module, address = %format!("{address:#x}"), "callback ready");
    Ok(CallbackFn(address))
  }
}

fn remove_path(path: &Path) -> io::Result<()> {
  if path.is_dir() {
    std::fs::remove_dir_all(path)
  } else {
    std::fs::remove_file(path)
  }
}

/// Delete every entry of `dir` whose name starts with `module`.
///
/// Failures are logged; a library still mapped by the OS may refuse deletion.
fn remove_module_files(dir: &Path, module: &str, remove: RemoveFn) {
  let entries = match std::fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) => {
      warn!(dir = ?dir, error = %e, "failed to list callback directory");
      return;
    }
  };

  for entry in entries.filter_map(Result::ok) {
    if !entry.file_name().to_string_lossy().starts_with(module) {
      continue;
    }
    let path = entry.path();
    match remove(&path) {
      Ok(()) => debug!(path = ?path, "removed callback intermediate"),
      Err(e) => warn!(path = ?path, error = %e, "failed to remove callback intermediate"),
    }
  }
}

/// Compile a callback with the system toolchain.
pub fn compile_callback(config: &BuildConfig, body: &str, userdata_names: &[&str]) -> Result<CallbackFn, CallbackError> {
  CallbackCompiler::new(config, &SystemRunner).compile_callback(body, userdata_names)
}
