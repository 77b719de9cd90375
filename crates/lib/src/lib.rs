//! cymj-lib: build, cache and load the simulation bridge extension.
//!
//! This crate provides:
//! - `platform`: build variant resolution for the running machine
//! - `build`: the variant-parameterised extension builder and post-link fixups
//! - `cext`: the cached, lock-protected build coordinator
//! - `callback`: runtime compilation of native step callbacks

pub mod artifact;
pub mod build;
pub mod build_lock;
pub mod callback;
pub mod cext;
pub mod config;
pub mod consts;
pub mod exec;
pub mod functions;
pub mod loader;
pub mod platform;
pub mod util;
pub mod warnings;

pub use artifact::CacheKey;
pub use callback::{CallbackFn, compile_callback};
pub use cext::{BuildCoordinator, ExtensionError, load_cython_ext};
pub use config::{BuildConfig, MujocoInstall};
pub use loader::{LoadError, LoadedModule};
pub use platform::BuildVariant;
