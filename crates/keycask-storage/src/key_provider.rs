use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::cipher::{EncryptionKey, KEY_LEN};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no key stored")]
    Missing,
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Supplies the key the store seals under. Called once per operation so the
/// key is only held for the duration of a single seal or open.
pub trait KeyProvider: Send + Sync {
    /// Existing key only. Must never mint one: a key created on the read path
    /// could not open anything already on disk.
    fn load(&self) -> Result<EncryptionKey, KeyError>;

    /// Existing key, or a newly generated and saved one. Used when writing.
    fn load_or_create(&self) -> Result<EncryptionKey, KeyError> {
        self.load()
    }
}

impl<P: KeyProvider + ?Sized> KeyProvider for Box<P> {
    fn load(&self) -> Result<EncryptionKey, KeyError> {
        (**self).load()
    }

    fn load_or_create(&self) -> Result<EncryptionKey, KeyError> {
        (**self).load_or_create()
    }
}

/// Key fixed at construction: configured secret material, or a key the host
/// derived itself (e.g. [`EncryptionKey::from_signing_certificate`]).
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    key: EncryptionKey,
}

impl StaticKeyProvider {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self::from_key(EncryptionKey::from_secret(secret.as_ref()))
    }

    pub fn from_key(key: EncryptionKey) -> Self {
        Self { key }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn load(&self) -> Result<EncryptionKey, KeyError> {
        Ok(self.key.clone())
    }
}

/// Built-in key of early releases. See [`EncryptionKey::legacy_default`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyKeyProvider;

impl KeyProvider for LegacyKeyProvider {
    fn load(&self) -> Result<EncryptionKey, KeyError> {
        Ok(EncryptionKey::legacy_default())
    }
}

/// OS keyring-backed provider. A random key is generated and saved on the
/// first write; reads never create one.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

impl KeyringProvider {
    fn entry(&self) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Keyring(e.to_string()))
    }
}

impl KeyProvider for KeyringProvider {
    fn load(&self) -> Result<EncryptionKey, KeyError> {
        match self.entry()?.get_password() {
            Ok(secret) => decode_key(&Zeroizing::new(secret)),
            Err(keyring::Error::NoEntry) => Err(KeyError::Missing),
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }

    fn load_or_create(&self) -> Result<EncryptionKey, KeyError> {
        match self.load() {
            Err(KeyError::Missing) => {
                let bytes = generate_key_bytes()?;
                self.entry()?
                    .set_password(&encode_key(&bytes))
                    .map_err(|e| KeyError::Keyring(e.to_string()))?;
                Ok(EncryptionKey::from_bytes(*bytes))
            }
            other => other,
        }
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<EncryptionKey>>>,
}

impl KeyProvider for InMemoryKeyProvider {
    fn load(&self) -> Result<EncryptionKey, KeyError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;
        guard.as_ref().cloned().ok_or(KeyError::Missing)
    }

    fn load_or_create(&self) -> Result<EncryptionKey, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }

        let key = EncryptionKey::from_bytes(*generate_key_bytes()?);
        *guard = Some(key.clone());
        Ok(key)
    }
}

fn generate_key_bytes() -> Result<Zeroizing<[u8; KEY_LEN]>, KeyError> {
    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    OsRng
        .try_fill_bytes(bytes.as_mut_slice())
        .map_err(|e| KeyError::Generation(e.to_string()))?;
    Ok(bytes)
}

fn encode_key(bytes: &[u8; KEY_LEN]) -> Zeroizing<String> {
    Zeroizing::new(general_purpose::STANDARD.encode(bytes))
}

fn decode_key(secret: &str) -> Result<EncryptionKey, KeyError> {
    let bytes = Zeroizing::new(
        general_purpose::STANDARD
            .decode(secret)
            .map_err(|e| KeyError::Decode(e.to_string()))?,
    );

    let bytes: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
        KeyError::Decode(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
    })?;
    Ok(EncryptionKey::from_bytes(bytes))
}
