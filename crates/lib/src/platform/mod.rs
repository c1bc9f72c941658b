//! Host platform detection.

pub mod arch;
pub mod os;
pub mod paths;

use arch::Arch;
use os::Os;
use std::fmt;

/// Host platform, rendered as a target triple (e.g. "x86_64-unknown-linux-gnu").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

impl Platform {
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os.triple_suffix())
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

/// Returns the target triple of the machine kiln runs on.
///
/// Falls back to `unknown` on platforms kiln does not name; such hosts must set
/// `default_triple` explicitly in `kiln.toml`.
pub fn host_triple() -> String {
  Platform::current()
    .map(|p| p.triple())
    .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn platform_triple_format() {
    let platform = Platform::new(Arch::Aarch64, Os::MacOs);
    assert_eq!(platform.triple(), "aarch64-apple-darwin");

    let platform = Platform::new(Arch::X86_64, Os::Linux);
    assert_eq!(platform.triple(), "x86_64-unknown-linux-gnu");

    let platform = Platform::new(Arch::X86_64, Os::Windows);
    assert_eq!(platform.triple(), "x86_64-pc-windows-msvc");
  }

  #[test]
  fn host_triple_is_never_empty() {
    assert!(!host_triple().is_empty());
  }
}
