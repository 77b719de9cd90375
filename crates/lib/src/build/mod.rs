//! Extension builder.
//!
//! One build algorithm parameterised by a [`BuildVariant`]: the variant's
//! recipe contributes extra sources, libraries and the post-link strategy.
//!
//! # Steps
//!
//! 1. Assemble a [`CompileUnit`] from `cymj.c` plus the variant extras.
//! 2. Compile into the cache key's scratch directory.
//! 3. Apply the variant's post-link fixup.
//! 4. Rename the result onto the canonical artifact path.
//!
//! A toolchain failure stops before step 4, so nothing partial ever reaches
//! the canonical path.

pub mod fixup;
pub mod toolchain;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::artifact::CacheKey;
use crate::config::{BuildConfig, ConfigError};
use crate::consts::{EXTENSION_NAME, EXTENSION_SOURCE, MUJOCO_LIB};
use crate::exec::{ExecError, Runner};
use crate::platform::BuildVariant;
use crate::util::hash::hash_file;

pub use fixup::{apply_fixup, manually_link_libraries};
pub use toolchain::{CompileUnit, FlagStyle, select_compiler};

/// Errors that can occur while building the extension.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  /// The compiler failed; carries its diagnostics unchanged.
  #[error(transparent)]
  Toolchain(ExecError),

  #[error("post-link fixup failed for {path}: {source}")]
  Fixup {
    path: PathBuf,
    #[source]
    source: ExecError,
  },

  #[error("failed to publish {from} to {to}: {source}")]
  Publish {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// Builds the bridge extension for one variant.
pub struct ExtensionBuilder<'a> {
  config: &'a BuildConfig,
  variant: BuildVariant,
  key: CacheKey,
  runner: &'a dyn Runner,
}

impl<'a> ExtensionBuilder<'a> {
  pub fn new(config: &'a BuildConfig, variant: BuildVariant, runner: &'a dyn Runner) -> Self {
    Self {
      config,
      variant,
      key: CacheKey::current(config.host_abi.clone(), variant),
      runner,
    }
  }

  pub fn cache_key(&self) -> &CacheKey {
    &self.key
  }

  /// Canonical path the artifact is published to.
  pub fn artifact_path(&self) -> PathBuf {
    self.key.artifact_path(&self.config.generated_dir)
  }

  pub fn scratch_dir(&self) -> PathBuf {
    self.key.scratch_dir(&self.config.generated_dir)
  }

  pub fn compile_unit(&self) -> CompileUnit {
    let recipe = self.variant.recipe();
    let style = FlagStyle::for_os(self.variant.os());
    let source_dir = &self.config.source_dir;
    let mujoco = &self.config.mujoco;
    let (compile_args, link_args) = style.openmp_flags();

    let mut sources = vec![source_dir.join(EXTENSION_SOURCE)];
    sources.extend(recipe.extra_sources.iter().map(|s| source_dir.join(s)));

    let mut include_dirs = vec![source_dir.clone(), mujoco.include_dir()];
    include_dirs.extend(recipe.extra_include_dirs.iter().map(|d| source_dir.join(d)));

    let mut libraries = vec![MUJOCO_LIB.to_string()];
    libraries.extend(recipe.extra_libraries.iter().map(|l| l.to_string()));

    let runtime_library_dirs = if recipe.runtime_library_dirs {
      vec![mujoco.bin_dir()]
    } else {
      Vec::new()
    };

    CompileUnit {
      sources,
      include_dirs,
      library_dirs: vec![mujoco.bin_dir()],
      libraries,
      defines: recipe.defines.iter().map(|d| d.to_string()).collect(),
      runtime_library_dirs,
      compile_args,
      link_args,
    }
  }

  /// Compile, fix up and publish the artifact; returns the canonical path.
  pub fn build(&self) -> Result<PathBuf, BuildError> {
    let built = self.build_impl()?;
    let artifact = self.artifact_path();
    publish(&built, &artifact)?;

    match hash_file(&artifact) {
      Ok(digest) => info!(artifact = ?artifact, sha256 = %digest.short(), "published extension"),
      Err(e) => warn!(artifact = ?artifact, error = %e, "published extension, digest unavailable"),
    }
    Ok(artifact)
  }

  /// Compile into the scratch directory and apply the post-link fixup.
  fn build_impl(&self) -> Result<PathBuf, BuildError> {
    let os = self.variant.os();
    let compiler = select_compiler(os, self.config.cc.as_deref())?;
    let scratch = self.scratch_dir();
    std::fs::create_dir_all(&scratch)?;

    let output = scratch.join(format!("{}.{}", EXTENSION_NAME, std::env::consts::DLL_EXTENSION));
    let invocation = self
      .compile_unit()
      .shared_library(&compiler, FlagStyle::for_os(os), &output)
      .current_dir(&scratch);

    info!(variant = %self.variant, key = %self.key, compiler = %compiler, "building extension");
    self.runner.run(&invocation).map_err(BuildError::Toolchain)?;

    apply_fixup(
      self.runner,
      self.variant.recipe().fixup,
      &output,
      &self.config.mujoco.bin_dir(),
    )
  }
}

/// Atomically replace `to` with `from`.
fn publish(from: &Path, to: &Path) -> Result<(), BuildError> {
  if let Some(parent) = to.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::rename(from, to).map_err(|source| BuildError::Publish {
    from: from.to_path_buf(),
    to: to.to_path_buf(),
    source,
  })
}
