//! External process invocation.
//!
//! Every external tool (compiler, `patchelf`, `ldd`, `install_name_tool`) is
//! run through the [`Runner`] trait so the build pipeline can be driven by a
//! recording double in tests.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Errors raised while running an external tool.
#[derive(Debug, Error)]
pub enum ExecError {
  /// The program could not be started at all.
  #[error("failed to run {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// The program ran and exited unsuccessfully; `stderr` is its diagnostic text.
  #[error("command failed with exit code {code:?}: {cmd}\n{stderr}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },
}

/// A single program invocation. Arguments are passed verbatim, no shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: OsString,
  pub args: Vec<OsString>,
  pub cwd: Option<PathBuf>,
}

impl Invocation {
  pub fn new(program: impl AsRef<OsStr>) -> Self {
    Self {
      program: program.as_ref().to_os_string(),
      args: Vec::new(),
      cwd: None,
    }
  }

  pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
    self.args.push(arg.as_ref().to_os_string());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
    self
  }

  pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  /// Program name without directories, e.g. `patchelf`.
  pub fn program_name(&self) -> String {
    Path::new(&self.program)
      .file_name()
      .unwrap_or(self.program.as_os_str())
      .to_string_lossy()
      .to_string()
  }

  /// Value following `flag`, e.g. the output path after `-o`.
  pub fn value_after(&self, flag: &str) -> Option<&OsStr> {
    let pos = self.args.iter().position(|a| a == flag)?;
    self.args.get(pos + 1).map(OsString::as_os_str)
  }
}

impl fmt::Display for Invocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program.to_string_lossy())?;
    for arg in &self.args {
      write!(f, " {}", arg.to_string_lossy())?;
    }
    Ok(())
  }
}

/// Runs invocations and returns their trimmed stdout.
pub trait Runner {
  fn run(&self, invocation: &Invocation) -> Result<String, ExecError>;
}

/// Runs invocations as child processes of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
  fn run(&self, invocation: &Invocation) -> Result<String, ExecError> {
    debug!(cmd = %invocation, cwd = ?invocation.cwd, "spawning process");

    let mut command = Command::new(&invocation.program);
    command.args(&invocation.args);
    if let Some(cwd) = &invocation.cwd {
      command.current_dir(cwd);
    }

    let output = command.output().map_err(|source| ExecError::Spawn {
      program: invocation.program.to_string_lossy().to_string(),
      source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      if !stdout.is_empty() {
        debug!(stdout = %stdout, "command stdout");
      }
      return Err(ExecError::Failed {
        cmd: invocation.to_string(),
        code: output.status.code(),
        stderr,
      });
    }

    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command output");
    }
    Ok(stdout)
  }
}

/// Locate an executable by absolute path or by searching `PATH`.
pub fn find_executable(name: impl AsRef<Path>) -> Option<PathBuf> {
  let name = name.as_ref();
  if name.components().count() > 1 {
    return name.is_file().then(|| name.to_path_buf());
  }

  let path = std::env::var_os("PATH")?;
  std::env::split_paths(&path).find_map(|dir| {
    let candidate = dir.join(name);
    if candidate.is_file() {
      return Some(candidate);
    }
    #[cfg(windows)]
    {
      let exe = candidate.with_extension("exe");
      if exe.is_file() {
        return Some(exe);
      }
    }
    None
  })
}
