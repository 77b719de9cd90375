//! Build variants and the resolver that picks one for the running machine.

use std::fmt;
use std::path::PathBuf;

use tracing::info;

use crate::config::ConfigError;
use crate::platform::gpu::DriverLocator;
use crate::platform::os::Os;

/// How a freshly linked module has its dynamic-library references rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostLinkFixup {
  None,
  /// Strip the rpath and replace each `(needed, replacement)` dependency entry.
  Elf(&'static [(&'static str, &'static str)]),
  /// Write a `_final` copy with install names pointing into the library's `bin`.
  MachO,
}

/// Platform-specific additions to the base compilation recipe.
///
/// Paths in `extra_sources` and `extra_include_dirs` are relative to the
/// bridge source directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantRecipe {
  pub extra_sources: &'static [&'static str],
  pub extra_include_dirs: &'static [&'static str],
  pub extra_libraries: &'static [&'static str],
  pub defines: &'static [&'static str],
  /// Embed the simulation library's `bin` as a runtime search path.
  pub runtime_library_dirs: bool,
  pub fixup: PostLinkFixup,
}

const LINUX_CPU_FIXUPS: &[(&str, &str)] = &[
  ("libmujoco200.so", "libmujoco200.so"),
  ("libglewosmesa.so", "libglewosmesa.so"),
];

const LINUX_GPU_FIXUPS: &[(&str, &str)] = &[
  ("libOpenGL.so", "libOpenGL.so.0"),
  ("libEGL.so", "libEGL.so.1"),
  ("libmujoco200.so", "libmujoco200.so"),
  ("libglewegl.so", "libglewegl.so"),
];

/// A platform/acceleration combination the extension is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildVariant {
  LinuxCpu,
  LinuxGpu,
  Mac,
  Windows,
}

impl BuildVariant {
  /// Stable identifier, part of the cache key.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::LinuxCpu => "linuxcpu",
      Self::LinuxGpu => "linuxgpu",
      Self::Mac => "mac",
      Self::Windows => "windows",
    }
  }

  pub fn os(&self) -> Os {
    match self {
      Self::LinuxCpu | Self::LinuxGpu => Os::Linux,
      Self::Mac => Os::MacOs,
      Self::Windows => Os::Windows,
    }
  }

  pub fn recipe(&self) -> VariantRecipe {
    match self {
      Self::LinuxCpu => VariantRecipe {
        extra_sources: &["gl/osmesashim.c"],
        extra_include_dirs: &[],
        extra_libraries: &["glewosmesa", "OSMesa", "GL"],
        defines: &[],
        runtime_library_dirs: true,
        fixup: PostLinkFixup::Elf(LINUX_CPU_FIXUPS),
      },
      Self::LinuxGpu => VariantRecipe {
        extra_sources: &["gl/eglshim.c"],
        extra_include_dirs: &["vendor/egl"],
        extra_libraries: &["glewegl"],
        defines: &[],
        runtime_library_dirs: true,
        fixup: PostLinkFixup::Elf(LINUX_GPU_FIXUPS),
      },
      Self::Mac => VariantRecipe {
        extra_sources: &["gl/dummyshim.c"],
        extra_include_dirs: &[],
        extra_libraries: &["glfw.3"],
        defines: &["ONMAC"],
        runtime_library_dirs: true,
        fixup: PostLinkFixup::MachO,
      },
      Self::Windows => VariantRecipe {
        extra_sources: &["gl/dummyshim.c"],
        extra_include_dirs: &[],
        extra_libraries: &[],
        defines: &[],
        runtime_library_dirs: false,
        fixup: PostLinkFixup::None,
      },
    }
  }
}

impl fmt::Display for BuildVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Outcome of platform resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
  pub variant: BuildVariant,
  /// Driver library directory backing the GPU variant.
  pub gpu_driver_dir: Option<PathBuf>,
}

/// Select the build variant for `target_os`.
///
/// On Linux the GPU variant is preferred unless `force_cpu` is set or no
/// driver directory can be discovered. Other families have a single variant.
pub fn resolve_variant(target_os: &str, force_cpu: bool, locator: &DriverLocator) -> Result<Resolution, ConfigError> {
  let os = Os::from_target_os(target_os).ok_or_else(|| ConfigError::UnsupportedPlatform(target_os.to_string()))?;

  let resolution = match os {
    Os::Linux => {
      let driver = if force_cpu { None } else { locator.discover() };
      match driver {
        Some(dir) => Resolution {
          variant: BuildVariant::LinuxGpu,
          gpu_driver_dir: Some(dir),
        },
        None => Resolution {
          variant: BuildVariant::LinuxCpu,
          gpu_driver_dir: None,
        },
      }
    }
    Os::MacOs => Resolution {
      variant: BuildVariant::Mac,
      gpu_driver_dir: None,
    },
    Os::Windows => Resolution {
      variant: BuildVariant::Windows,
      gpu_driver_dir: None,
    },
  };

  info!(variant = %resolution.variant, driver = ?resolution.gpu_driver_dir, "resolved build variant");
  Ok(resolution)
}
