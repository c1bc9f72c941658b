use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the directory holding the shared artifact cache.
///
/// `KILN_CACHE_DIR` wins over the platform cache location.
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  if let Some(dir) = std::env::var_os("KILN_CACHE_DIR") {
    return PathBuf::from(dir);
  }
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory holding the shared artifact cache.
///
/// `KILN_CACHE_DIR` wins over `XDG_CACHE_HOME`, which wins over `~/.cache`.
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  if let Some(dir) = std::env::var_os("KILN_CACHE_DIR") {
    return PathBuf::from(dir);
  }
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Directory of the content-addressed artifact store inside the cache.
pub fn artifacts_dir() -> PathBuf {
  cache_dir().join("artifacts")
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn kiln_cache_dir_takes_precedence() {
    temp_env::with_vars(
      [
        ("KILN_CACHE_DIR", Some("/custom/kiln")),
        ("XDG_CACHE_HOME", Some("/xdg/cache")),
      ],
      || {
        assert_eq!(cache_dir(), PathBuf::from("/custom/kiln"));
        assert_eq!(artifacts_dir(), PathBuf::from("/custom/kiln/artifacts"));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_cache_home_used_when_set() {
    temp_env::with_vars(
      [("KILN_CACHE_DIR", None::<&str>), ("XDG_CACHE_HOME", Some("/xdg/cache"))],
      || {
        assert_eq!(cache_dir(), PathBuf::from("/xdg/cache").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn falls_back_to_home_cache() {
    temp_env::with_vars(
      [
        ("KILN_CACHE_DIR", None::<&str>),
        ("XDG_CACHE_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(cache_dir(), PathBuf::from("/home/user/.cache").join(APP_NAME));
      },
    );
  }
}
