//! Dynamic loading of compiled native modules.

use std::ffi::c_void;
use std::os::raw::c_uint;
use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;
use tracing::debug;

use crate::consts::EXTENSION_ABI_SYMBOL;

/// Import-class failures, kept apart from build failures so callers can
/// choose between rebuilding and giving up.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error("failed to load {name} from {path}: {message}")]
  Open {
    name: String,
    path: PathBuf,
    message: String,
  },

  #[error("symbol {symbol} not found in {name}: {message}")]
  SymbolNotFound {
    name: String,
    symbol: String,
    message: String,
  },

  #[error("{name} was built for ABI {found}, this loader expects {expected}")]
  AbiMismatch {
    name: String,
    expected: String,
    found: String,
  },
}

/// A native module mapped into the current process.
pub struct LoadedModule {
  name: String,
  path: PathBuf,
  library: Library,
}

impl std::fmt::Debug for LoadedModule {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LoadedModule")
      .field("name", &self.name)
      .field("path", &self.path)
      .finish()
  }
}

impl LoadedModule {
  /// Map the shared object at `path` into the process as module `name`.
  pub fn load(name: &str, path: &Path) -> Result<Self, LoadError> {
    // Safety: running the module's initialisers is inherent to loading it;
    // only artifacts produced by this crate's builders are loaded here.
    let library = unsafe { Library::new(path) }.map_err(|e| LoadError::Open {
      name: name.to_string(),
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;

    debug!(name, path = ?path, "loaded native module");
    Ok(Self {
      name: name.to_string(),
      path: path.to_path_buf(),
      library,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Address of the exported symbol `symbol`.
  pub fn symbol_address(&self, symbol: &str) -> Result<usize, LoadError> {
    // Safety: the symbol is only read as an address, never dereferenced here.
    let sym = unsafe { self.library.get::<*const c_void>(symbol.as_bytes()) }.map_err(|e| self.missing(symbol, e))?;
    Ok(*sym as usize)
  }

  /// Value of an exported pointer-sized integer variable.
  pub fn read_usize(&self, symbol: &str) -> Result<usize, LoadError> {
    // Safety: callers name a symbol defined as a `uintptr_t` variable.
    unsafe {
      let sym = self.library.get::<*const usize>(symbol.as_bytes()).map_err(|e| self.missing(symbol, e))?;
      Ok(std::ptr::read(*sym))
    }
  }

  /// Check the ABI revision reported by the bridge against `expected`.
  pub fn verify_abi(&self, expected: &str) -> Result<(), LoadError> {
    // Safety: the bridge defines this symbol as `unsigned int (*)(void)`.
    let found = unsafe {
      let abi_version = self
        .library
        .get::<unsafe extern "C" fn() -> c_uint>(EXTENSION_ABI_SYMBOL.as_bytes())
        .map_err(|e| self.missing(EXTENSION_ABI_SYMBOL, e))?;
      abi_version()
    };

    if found.to_string() != expected {
      return Err(LoadError::AbiMismatch {
        name: self.name.clone(),
        expected: expected.to_string(),
        found: found.to_string(),
      });
    }
    Ok(())
  }

  /// Drop the handle without unmapping the module.
  ///
  /// Code and data of the module stay resident for the rest of the process,
  /// so addresses read from it remain valid after the files are deleted.
  pub fn leak(self) {
    debug!(name = %self.name, "releasing module handle, code stays mapped");
    std::mem::forget(self.library);
  }

  fn missing(&self, symbol: &str, err: libloading::Error) -> LoadError {
    LoadError::SymbolNotFound {
      name: self.name.clone(),
      symbol: symbol.to_string(),
      message: err.to_string(),
    }
  }
}
