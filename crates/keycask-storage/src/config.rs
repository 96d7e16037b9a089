use std::{
    fmt, fs,
    path::{Component, Path, PathBuf},
};

use dirs::data_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Environment override for [`StoreConfig::base_dir`].
pub const BASE_DIR_ENV: &str = "KEYCASK_BASE_DIR";
/// Environment override for [`StoreConfig::encryption_secret`].
pub const SECRET_ENV: &str = "KEYCASK_SECRET";

pub const DEFAULT_FILE_NAME: &str = "keycask_key.dat";
pub const DEFAULT_KEYRING_SERVICE: &str = "keycask";
pub const DEFAULT_KEYRING_ACCOUNT: &str = "store-key";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no data dir available")]
    NoDataDir,
    #[error("base_dir must not be empty")]
    EmptyBaseDir,
    #[error("invalid key file name {0:?}: must be a single path component")]
    InvalidFileName(String),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Where the encryption key comes from.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeySource {
    /// Configured secret, expanded to a key by hashing unless it is exactly 32 bytes.
    Secret { secret: String },
    /// OS keychain entry, generated on the first write.
    Keyring { service: String, account: String },
    /// Built-in insecure key, only for reading files from early releases.
    Legacy,
}

impl Default for KeySource {
    fn default() -> Self {
        Self::Keyring {
            service: DEFAULT_KEYRING_SERVICE.to_string(),
            account: DEFAULT_KEYRING_ACCOUNT.to_string(),
        }
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret { .. } => f.write_str("Secret([REDACTED])"),
            Self::Keyring { service, account } => f
                .debug_struct("Keyring")
                .field("service", service)
                .field("account", account)
                .finish(),
            Self::Legacy => f.write_str("Legacy"),
        }
    }
}

impl Drop for KeySource {
    fn drop(&mut self) {
        if let Self::Secret { secret } = self {
            drop(Zeroizing::new(std::mem::take(secret)));
        }
    }
}

/// Store configuration, usually read from `config.toml`.
///
/// ```toml
/// base_dir = "/var/lib/app/private"
/// file_name = "app_key.dat"
///
/// [encryption_secret]
/// kind = "secret"
/// secret = "..."
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of private storage. Created with mode 0700 when missing.
    pub base_dir: PathBuf,
    /// Key file name inside `base_dir`.
    pub file_name: String,
    /// Key material source.
    pub encryption_secret: KeySource,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir().unwrap_or_else(|_| PathBuf::from(".keycask")),
            file_name: DEFAULT_FILE_NAME.to_string(),
            encryption_secret: KeySource::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>, encryption_secret: KeySource) -> Self {
        Self {
            base_dir: base_dir.into(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            encryption_secret,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Load config from a given path; if missing or empty, return defaults.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = Zeroizing::new(fs::read_to_string(path)?);
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(toml::from_str(&contents)?)
    }

    /// Apply `KEYCASK_BASE_DIR` and `KEYCASK_SECRET` on top of file values.
    pub fn apply_env(self) -> Self {
        self.apply_overrides(
            std::env::var_os(BASE_DIR_ENV).map(PathBuf::from),
            std::env::var(SECRET_ENV).ok(),
        )
    }

    fn apply_overrides(mut self, base_dir: Option<PathBuf>, secret: Option<String>) -> Self {
        if let Some(dir) = base_dir.filter(|d| !d.as_os_str().is_empty()) {
            self.base_dir = dir;
        }
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.encryption_secret = KeySource::Secret { secret };
        }
        self
    }

    /// Reject an empty `base_dir` and file names that would escape it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyBaseDir);
        }
        let mut components = Path::new(&self.file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == self.file_name.as_str() => Ok(()),
            _ => Err(ConfigError::InvalidFileName(self.file_name.clone())),
        }
    }

    /// Fixed location of the key file.
    pub fn key_path(&self) -> PathBuf {
        self.base_dir.join(&self.file_name)
    }
}

/// Resolve the default data directory for keycask (platform aware).
pub fn default_base_dir() -> Result<PathBuf, ConfigError> {
    let base = data_dir().ok_or(ConfigError::NoDataDir)?;
    Ok(base.join("keycask"))
}
