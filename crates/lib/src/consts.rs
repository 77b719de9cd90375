//! Fixed names shared across the crate.

/// Directory name used under the XDG data directory.
pub const APP_NAME: &str = "mujoco_py";

/// Version of this package, the first component of every cache key.
pub const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// ABI revision of the extension entry points expected by this loader.
pub const EXTENSION_ABI_VERSION: u32 = 1;

/// Name of the bridge extension module.
pub const EXTENSION_NAME: &str = "cymj";

/// Primary bridge source, relative to the source directory.
pub const EXTENSION_SOURCE: &str = "cymj.c";

/// Symbol exported by the bridge reporting its ABI revision.
pub const EXTENSION_ABI_SYMBOL: &str = "cymj_abi_version";

/// Simulation library name as passed to the linker.
pub const MUJOCO_LIB: &str = "mujoco200";

/// Header included by every runtime-compiled callback.
pub const MUJOCO_HEADER: &str = "mujoco.h";

/// Name of the lock directory under the generated-artifacts directory.
pub const BUILD_LOCK_DIR: &str = "mujocopy-buildlock";

/// Prefix of every runtime-compiled callback module.
pub const CALLBACK_PREFIX: &str = "_fn_";

/// Function every callback body must define.
pub const CALLBACK_FN: &str = "fun";

/// Symbol holding the address of the compiled callback.
pub const CALLBACK_ADDR_SYMBOL: &str = "__fun";

pub mod env {
  pub const MUJOCO_PATH: &str = "MUJOCO_PY_MUJOCO_PATH";
  pub const MJKEY_PATH: &str = "MUJOCO_PY_MJKEY_PATH";
  pub const SOURCE_DIR: &str = "MUJOCO_PY_SOURCE_DIR";
  pub const GENERATED_DIR: &str = "MUJOCO_PY_GENERATED_DIR";
  pub const BUILD_LOCK: &str = "MUJOCO_PY_BUILD_LOCK";
  pub const FN_BUILD_DIR: &str = "MUJOCO_PY_FN_BUILD_DIR";
  pub const HOST_ABI: &str = "MUJOCO_PY_HOST_ABI";
  pub const FORCE_REBUILD: &str = "MUJOCO_PY_FORCE_REBUILD";
  pub const FORCE_CPU: &str = "MUJOCO_PY_FORCE_CPU";
  pub const DEBUG_FN_BUILDER: &str = "MUJOCO_PY_DEBUG_FN_BUILDER";
  pub const CC: &str = "CC";
}
