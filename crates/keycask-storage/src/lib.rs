//! At-rest storage for a single secret, encrypted with AES-256-CBC under an
//! injected key and kept in an owner-only file.
//!
//! Not safe for unsynchronized concurrent writers against the same path:
//! writes are atomic renames, but a `store` racing a `delete` can end in
//! either state. Serialize externally if several actors share a store.

pub mod cipher;
pub mod config;
pub mod key_file;
pub mod key_provider;

use keycask_core::KeyStoreManager;
use tracing::debug;

use crate::{
    config::{ConfigError, KeySource, StoreConfig},
    key_file::KeyFileSlot,
    key_provider::{KeyProvider, KeyringProvider, LegacyKeyProvider, StaticKeyProvider},
};

/// Store whose key provider is chosen from configuration at runtime.
pub type FileKeyStore = KeyStoreManager<KeyFileSlot<Box<dyn KeyProvider>>>;

/// Build the key provider a [`KeySource`] describes.
pub fn provider_for(source: &KeySource) -> Box<dyn KeyProvider> {
    match source {
        KeySource::Secret { secret } => Box::new(StaticKeyProvider::new(secret.as_bytes())),
        KeySource::Keyring { service, account } => {
            Box::new(KeyringProvider::new(service.clone(), account.clone()))
        }
        KeySource::Legacy => Box::new(LegacyKeyProvider),
    }
}

/// Open the store described by `config`.
pub fn open_store(config: &StoreConfig) -> Result<FileKeyStore, ConfigError> {
    open_store_with(config, provider_for(&config.encryption_secret))
}

/// Open the store at `config`'s path with an explicitly supplied key provider;
/// `config.encryption_secret` is ignored.
pub fn open_store_with<P: KeyProvider>(
    config: &StoreConfig,
    key_provider: P,
) -> Result<KeyStoreManager<KeyFileSlot<P>>, ConfigError> {
    config.validate()?;
    let path = config.key_path();
    debug!(path = %path.display(), source = ?config.encryption_secret, "opening key store");
    Ok(KeyStoreManager::new(KeyFileSlot::new(path, key_provider)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_escaping_file_name() {
        let config = StoreConfig::new("/tmp/keycask", KeySource::Legacy).with_file_name("../x");
        assert!(matches!(
            open_store(&config),
            Err(ConfigError::InvalidFileName(_))
        ));
    }

    #[test]
    fn rejects_empty_base_dir() {
        let config = StoreConfig::new("", KeySource::Legacy);
        assert!(matches!(open_store(&config), Err(ConfigError::EmptyBaseDir)));
    }

    #[test]
    fn secret_source_round_trips_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StoreConfig::new(
            dir.path(),
            KeySource::Secret {
                secret: "app-secret".into(),
            },
        );

        assert!(open_store(&config).expect("open").store(b"value"));
        let reopened = open_store(&config).expect("reopen");
        assert_eq!(reopened.get_key().expect("present").as_slice(), b"value");
        assert_eq!(reopened.slot().path(), config.key_path());
    }
}
