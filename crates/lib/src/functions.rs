//! Flat table of the simulation functions exported by the bridge.
//!
//! The bridge re-exports each simulation entry point under a leading
//! underscore (`_mj_step`). The table resolves them once and keys them by the
//! public name (`mj_step`).

use std::collections::BTreeMap;
use std::ffi::{CString, c_char, c_int};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::loader::LoadedModule;

const EXPORT_PREFIX: &str = "_mj";

/// Bridge exports looked up by default.
pub const DEFAULT_EXPORTS: &[&str] = &[
  "_mj_activate",
  "_mj_deactivate",
  "_mj_version",
  "_mj_step",
  "_mj_step1",
  "_mj_step2",
  "_mj_forward",
  "_mj_inverse",
  "_mj_resetData",
  "_mj_name2id",
  "_mj_id2name",
];

#[derive(Debug, Error)]
pub enum FunctionError {
  #[error("function {0} is not exported by the extension")]
  Missing(String),

  #[error("path {0} contains an interior NUL byte")]
  InvalidPath(PathBuf),

  #[error("activation with key {0} failed")]
  ActivationFailed(PathBuf),
}

/// Resolved simulation functions, valid while the module is loaded.
#[derive(Debug)]
pub struct FunctionTable<'m> {
  module: &'m LoadedModule,
  entries: BTreeMap<String, usize>,
}

impl<'m> FunctionTable<'m> {
  /// Resolve every `_mj*` name in `exports`. Names the module lacks are skipped.
  pub fn from_exports(module: &'m LoadedModule, exports: &[&str]) -> Self {
    let mut entries = BTreeMap::new();
    for export in exports.iter().filter(|e| e.starts_with(EXPORT_PREFIX)) {
      match module.symbol_address(export) {
        Ok(address) => {
          entries.insert(export[1..].to_string(), address);
        }
        Err(e) => debug!(export, error = %e, "export not available"),
      }
    }
    debug!(module = module.name(), count = entries.len(), "resolved simulation functions");
    Self { module, entries }
  }

  pub fn new(module: &'m LoadedModule) -> Self {
    Self::from_exports(module, DEFAULT_EXPORTS)
  }

  /// Address of `name`, e.g. `mj_step`.
  pub fn get(&self, name: &str) -> Option<usize> {
    self.entries.get(name).copied()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.entries.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Activate the simulation library with the licence key at `key_path`.
  pub fn activate(&self, key_path: &Path) -> Result<(), FunctionError> {
    let address = self
      .get("mj_activate")
      .ok_or_else(|| FunctionError::Missing("mj_activate".to_string()))?;
    let key = CString::new(key_path.as_os_str().as_encoded_bytes())
      .map_err(|_| FunctionError::InvalidPath(key_path.to_path_buf()))?;

    // Safety: the bridge exports `_mj_activate` as `int (*)(const char*)` and
    // the module outlives `self`.
    let result = unsafe {
      let activate = std::mem::transmute::<usize, unsafe extern "C" fn(*const c_char) -> c_int>(address);
      activate(key.as_ptr())
    };

    if result != 1 {
      return Err(FunctionError::ActivationFailed(key_path.to_path_buf()));
    }
    debug!(module = self.module.name(), key = ?key_path, "activated simulation library");
    Ok(())
  }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use crate::util::testutil::{BRIDGE_STUB, compile_shared, shared_lib_name};
  use tempfile::TempDir;

  fn load_bridge(temp: &TempDir) -> LoadedModule {
    let source = temp.path().join("cymj.c");
    std::fs::write(&source, BRIDGE_STUB).unwrap();
    let output = temp.path().join(shared_lib_name("bridge"));
    compile_shared(&source, &output);
    LoadedModule::load("cymj", &output).unwrap()
  }

  #[test]
  fn strips_prefix_and_skips_missing() {
    let temp = TempDir::new().unwrap();
    let module = load_bridge(&temp);

    let table = FunctionTable::new(&module);

    assert_eq!(table.names().collect::<Vec<_>>(), vec!["mj_activate", "mj_version"]);
    assert!(table.get("mj_step").is_none());
  }

  #[test]
  fn ignores_non_simulation_exports() {
    let temp = TempDir::new().unwrap();
    let module = load_bridge(&temp);

    let table = FunctionTable::from_exports(&module, &["set_warning_callback", "_mj_version"]);

    assert_eq!(table.len(), 1);
    assert!(table.get("set_warning_callback").is_none());
  }

  #[test]
  fn activate_calls_through_table() {
    let temp = TempDir::new().unwrap();
    let module = load_bridge(&temp);
    let table = FunctionTable::new(&module);

    table.activate(&temp.path().join("mjkey.txt")).unwrap();
  }

  #[test]
  fn activate_requires_export() {
    let temp = TempDir::new().unwrap();
    let module = load_bridge(&temp);
    let table = FunctionTable::from_exports(&module, &["_mj_version"]);

    let err = table.activate(&temp.path().join("mjkey.txt")).unwrap_err();
    assert!(matches!(err, FunctionError::Missing(_)));
  }
}
