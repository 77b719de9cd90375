//! Post-link rewriting of dynamic-library references.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info};

use crate::build::BuildError;
use crate::exec::{ExecError, Invocation, Runner};
use crate::platform::PostLinkFixup;

/// Install name of the simulation library as shipped.
pub const MACHO_MUJOCO_FROM: &str = "@executable_path/libmujoco200.dylib";
pub const MACHO_MUJOCO_LIB: &str = "libmujoco200.dylib";
/// Windowing library reference as linked.
pub const MACHO_GLFW_LIB: &str = "libglfw.3.dylib";

/// Apply `fixup` to the freshly linked module at `so_file`.
///
/// Returns the path of the fixed module: `so_file` itself for in-place
/// strategies, the `_final` sibling for Mach-O.
pub fn apply_fixup(
  runner: &dyn Runner,
  fixup: PostLinkFixup,
  so_file: &Path,
  mujoco_bin: &Path,
) -> Result<PathBuf, BuildError> {
  match fixup {
    PostLinkFixup::None => Ok(so_file.to_path_buf()),
    PostLinkFixup::Elf(pairs) => {
      fix_elf(runner, so_file, pairs).map_err(|source| BuildError::Fixup {
        path: so_file.to_path_buf(),
        source,
      })?;
      Ok(so_file.to_path_buf())
    }
    PostLinkFixup::MachO => manually_link_libraries(runner, mujoco_bin, so_file),
  }
}

/// Remove embedded search paths and point dependencies at bare library names,
/// leaving resolution to the runtime search path.
pub fn fix_elf(runner: &dyn Runner, so_file: &Path, pairs: &[(&str, &str)]) -> Result<(), ExecError> {
  runner.run(&Invocation::new("patchelf").arg("--remove-rpath").arg(so_file))?;

  for (name, replacement) in pairs {
    let ldd_output = runner.run(&Invocation::new("ldd").arg(so_file))?;
    if ldd_output.contains(name) {
      runner.run(&Invocation::new("patchelf").arg("--remove-needed").arg(name).arg(so_file))?;
    }
    runner.run(&Invocation::new("patchelf").arg("--add-needed").arg(replacement).arg(so_file))?;
    debug!(so_file = ?so_file, name, replacement, "rewrote needed entry");
  }
  Ok(())
}

/// Sibling path `<stem>_final.<ext>` of a raw Mach-O module.
pub fn final_path(raw: &Path) -> PathBuf {
  let stem = raw.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
  let name = match raw.extension() {
    Some(ext) => format!("{}_final.{}", stem, ext.to_string_lossy()),
    None => format!("{}_final", stem),
  };
  raw.with_file_name(name)
}

fn modified(path: &Path) -> Option<SystemTime> {
  std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Produce a `_final` copy of `raw` whose references to the simulation and
/// windowing libraries are absolute paths into `mujoco_bin`.
///
/// The raw module is never modified. An existing final module at least as new
/// as the raw one is reused as-is; otherwise the copy is rewritten under a
/// temporary name and renamed into place, so concurrent writers each publish a
/// complete file.
pub fn manually_link_libraries(runner: &dyn Runner, mujoco_bin: &Path, raw: &Path) -> Result<PathBuf, BuildError> {
  let final_file = final_path(raw);

  if let (Some(final_time), Some(raw_time)) = (modified(&final_file), modified(raw))
    && final_time >= raw_time
  {
    debug!(final_file = ?final_file, "final module up to date");
    return Ok(final_file);
  }

  let mut tmp_name = final_file.clone().into_os_string();
  tmp_name.push(format!("~{}", std::process::id()));
  let tmp_file = PathBuf::from(tmp_name);
  std::fs::copy(raw, &tmp_file)?;

  let changes = [
    (MACHO_MUJOCO_FROM.to_string(), mujoco_bin.join(MACHO_MUJOCO_LIB)),
    (MACHO_GLFW_LIB.to_string(), mujoco_bin.join(MACHO_GLFW_LIB)),
  ];
  for (from, to) in &changes {
    let invocation = Invocation::new("install_name_tool")
      .arg("-change")
      .arg(from)
      .arg(to)
      .arg(&tmp_file);
    if let Err(source) = runner.run(&invocation) {
      let _ = std::fs::remove_file(&tmp_file);
      return Err(BuildError::Fixup {
        path: raw.to_path_buf(),
        source,
      });
    }
  }

  std::fs::rename(&tmp_file, &final_file)?;
  info!(final_file = ?final_file, "linked libraries into final module");
  Ok(final_file)
}
