pub const APP_NAME: &str = "kiln";

/// Default workspace file name.
pub const WORKSPACE_FILE: &str = "kiln.toml";

/// Default output directory, relative to the workspace root.
pub const DEFAULT_OUT_DIR: &str = "kiln-out";

/// Version tag mixed into every cache key. Bump to invalidate all entries.
pub const CACHE_KEY_VERSION: &str = "kiln-action-v1";

/// `SOURCE_DATE_EPOCH` handed to every action (1980-01-01, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
