use tracing::{debug, error, warn};
use zeroize::Zeroizing;

use crate::slot::{SecretBytes, SecretSlot, SlotError};

/// Total-result facade over a [`SecretSlot`].
///
/// This is the surface host bridges call. None of the four operations
/// returns an error: failures are logged (cause only, never secret bytes)
/// and folded into `false` or `None`. Callers that must tell "absent" from
/// "failed" use [`KeyStoreManager::fetch`].
///
/// Not safe for unsynchronized concurrent `store`/`delete` from several
/// threads or processes against the same location; serialize externally.
#[derive(Debug, Clone)]
pub struct KeyStoreManager<S: SecretSlot> {
    slot: S,
}

impl<S: SecretSlot> KeyStoreManager<S> {
    pub fn new(slot: S) -> Self {
        Self { slot }
    }

    /// Borrow the underlying slot.
    pub fn slot(&self) -> &S {
        &self.slot
    }

    /// Persist `secret`, overwriting any previous one irrecoverably.
    pub fn store(&self, secret: &[u8]) -> bool {
        match self.slot.put(secret) {
            Ok(()) => {
                debug!(len = secret.len(), "secret stored");
                true
            }
            Err(err) => {
                error!(error = %err, "failed to store secret");
                false
            }
        }
    }

    /// Stored secret, or `None` when absent or unreadable.
    ///
    /// `Some` with an empty buffer is a stored empty secret.
    pub fn get_key(&self) -> Option<SecretBytes> {
        match self.slot.fetch() {
            Ok(found) => found,
            Err(err) => {
                error!(error = %err, "failed to read secret");
                None
            }
        }
    }

    /// Like [`KeyStoreManager::get_key`] for hosts that exchange strings.
    pub fn get_key_utf8(&self) -> Option<Zeroizing<String>> {
        let bytes = self.get_key()?;
        match std::str::from_utf8(&bytes) {
            Ok(text) => Some(Zeroizing::new(text.to_owned())),
            Err(_) => {
                warn!("stored secret is not valid UTF-8");
                None
            }
        }
    }

    /// Explicit present/absent/error view of the stored secret.
    pub fn fetch(&self) -> Result<Option<SecretBytes>, SlotError> {
        self.slot.fetch()
    }

    /// Remove the stored secret. Also `true` when nothing was stored.
    pub fn delete(&self) -> bool {
        match self.slot.remove() {
            Ok(removed) => {
                debug!(removed, "secret deleted");
                true
            }
            Err(err) => {
                error!(error = %err, "failed to delete secret");
                false
            }
        }
    }

    /// Whether a secret is currently stored. Never decrypts.
    pub fn has(&self) -> bool {
        self.slot.exists()
    }
}
