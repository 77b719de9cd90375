use std::fmt;

/// Operating system families the extension can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    Self::from_target_os(std::env::consts::OS)
  }

  /// Map a `target_os` identifier onto a supported family
  pub fn from_target_os(os: &str) -> Option<Self> {
    match os {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "macos",
      Self::Windows => "windows",
    }
  }

  /// Separator used by the library search path variable
  pub fn path_separator(&self) -> char {
    match self {
      Self::Windows => ';',
      _ => ':',
    }
  }

  /// Environment variable the dynamic loader searches for shared libraries
  pub fn library_path_var(&self) -> Option<&'static str> {
    match self {
      Self::Linux => Some("LD_LIBRARY_PATH"),
      Self::Windows => Some("PATH"),
      // Mach-O references are rewritten to absolute paths instead.
      Self::MacOs => None,
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
