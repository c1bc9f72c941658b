use std::fmt;

/// Operating systems kiln can name in a host triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the vendor-os-env tail of a target triple
  pub fn triple_suffix(&self) -> &'static str {
    match self {
      Self::Linux => "unknown-linux-gnu",
      Self::MacOs => "apple-darwin",
      Self::Windows => "pc-windows-msvc",
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Linux => "linux",
      Self::MacOs => "macos",
      Self::Windows => "windows",
    };
    write!(f, "{}", name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn current_returns_supported_os() {
    assert!(Os::current().is_some(), "Current OS should be supported");
  }
}
