//! Compiler selection and command-line rendering.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ConfigError;
use crate::exec::{Invocation, find_executable};
use crate::platform::Os;

/// Known-working compilers on macOS, tried in order when `CC` is unset.
pub const MAC_COMPILER_CANDIDATES: &[&str] = &[
  "/usr/local/bin/gcc-6",
  "/usr/local/bin/gcc-7",
  "/usr/local/bin/gcc-8",
  "/opt/local/bin/gcc-mp-6",
  "/opt/local/bin/gcc-mp-7",
  "/opt/local/bin/gcc-mp-8",
];

/// Command-line dialect of the platform toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagStyle {
  Gnu,
  Msvc,
}

impl FlagStyle {
  pub fn for_os(os: Os) -> Self {
    match os {
      Os::Windows => Self::Msvc,
      Os::Linux | Os::MacOs => Self::Gnu,
    }
  }

  /// Flags enabling the parallel-compute pragma, for compiling and linking.
  pub fn openmp_flags(&self) -> (Vec<String>, Vec<String>) {
    match self {
      Self::Gnu => (vec!["-fopenmp".into(), "-w".into()], vec!["-fopenmp".into()]),
      Self::Msvc => (vec!["/openmp".into(), "/w".into()], Vec::new()),
    }
  }
}

/// Pick the compiler for `os`, honouring an explicit override.
pub fn select_compiler(os: Os, cc_override: Option<&str>) -> Result<String, ConfigError> {
  select_compiler_from(os, cc_override, MAC_COMPILER_CANDIDATES)
}

/// Pick the compiler for runtime callbacks.
///
/// Unlike the extension build, callbacks never search for a known-good gcc on
/// macOS: the platform default `cc` is used unless overridden.
pub fn select_callback_compiler(os: Os, cc_override: Option<&str>) -> String {
  match (cc_override, os) {
    (Some(cc), _) => cc.to_string(),
    (None, Os::Windows) => "cl.exe".to_string(),
    (None, Os::Linux | Os::MacOs) => "cc".to_string(),
  }
}

fn select_compiler_from(os: Os, cc_override: Option<&str>, candidates: &[&str]) -> Result<String, ConfigError> {
  if let Some(cc) = cc_override {
    return Ok(cc.to_string());
  }

  match os {
    Os::Linux => Ok("cc".to_string()),
    Os::Windows => Ok("cl.exe".to_string()),
    Os::MacOs => {
      let found = candidates
        .iter()
        .find(|candidate| find_executable(candidate).is_some())
        .ok_or(ConfigError::NoCompiler)?;
      debug!(compiler = %found, "selected known-good compiler");
      Ok(found.to_string())
    }
  }
}

/// Everything needed to compile and link one shared module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileUnit {
  pub sources: Vec<PathBuf>,
  pub include_dirs: Vec<PathBuf>,
  pub library_dirs: Vec<PathBuf>,
  pub libraries: Vec<String>,
  pub defines: Vec<String>,
  pub runtime_library_dirs: Vec<PathBuf>,
  pub compile_args: Vec<String>,
  pub link_args: Vec<String>,
}

impl CompileUnit {
  /// Single compiler invocation producing the shared module at `output`.
  pub fn shared_library(&self, compiler: &str, style: FlagStyle, output: &Path) -> Invocation {
    match style {
      FlagStyle::Gnu => self.gnu(compiler, output),
      FlagStyle::Msvc => self.msvc(compiler, output),
    }
  }

  fn gnu(&self, compiler: &str, output: &Path) -> Invocation {
    let mut invocation = Invocation::new(compiler)
      .args(["-shared", "-fPIC"])
      .args(&self.compile_args);
    for define in &self.defines {
      invocation = invocation.arg(format!("-D{define}"));
    }
    for dir in &self.include_dirs {
      invocation = invocation.arg(format!("-I{}", dir.display()));
    }
    invocation = invocation.args(&self.sources).arg("-o").arg(output);
    for dir in &self.library_dirs {
      invocation = invocation.arg(format!("-L{}", dir.display()));
    }
    for lib in &self.libraries {
      invocation = invocation.arg(format!("-l{lib}"));
    }
    for dir in &self.runtime_library_dirs {
      invocation = invocation.arg(format!("-Wl,-rpath,{}", dir.display()));
    }
    invocation.args(&self.link_args)
  }

  fn msvc(&self, compiler: &str, output: &Path) -> Invocation {
    let mut invocation = Invocation::new(compiler)
      .args(["/nologo", "/LD"])
      .args(&self.compile_args);
    for define in &self.defines {
      invocation = invocation.arg(format!("/D{define}"));
    }
    for dir in &self.include_dirs {
      invocation = invocation.arg(format!("/I{}", dir.display()));
    }
    invocation = invocation
      .args(&self.sources)
      .arg(format!("/Fe:{}", output.display()))
      .arg("/link");
    for dir in &self.library_dirs {
      invocation = invocation.arg(format!("/LIBPATH:{}", dir.display()));
    }
    for lib in &self.libraries {
      invocation = invocation.arg(format!("{lib}.lib"));
    }
    invocation.args(&self.link_args)
  }
}
