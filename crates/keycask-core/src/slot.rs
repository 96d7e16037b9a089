use std::{
    fmt,
    sync::{Arc, Mutex},
};

use thiserror::Error;
use zeroize::Zeroizing;

/// Plaintext secret bytes, wiped from memory on drop.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// Errors produced by secret slot implementations.
///
/// Framing and padding failures both collapse into [`SlotError::Rejected`] so a
/// caller cannot tell a wrong key from a corrupted file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SlotError {
    /// Key material could not be obtained.
    #[error("key unavailable: {reason}")]
    KeyUnavailable { reason: String },
    /// Cipher setup or an encrypt/decrypt step failed.
    #[error("cipher failure: {reason}")]
    Cipher { reason: String },
    /// Stored blob did not decrypt to well-formed plaintext.
    #[error("stored secret rejected")]
    Rejected,
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Io { reason: String },
}

/// Contract for a single secret kept at one fixed location.
///
/// Implementations are synchronous and not internally synchronized against
/// other processes: a `put` racing a `remove` may leave either state.
pub trait SecretSlot: Send + Sync {
    /// Persist `secret`, replacing whatever was stored before.
    fn put(&self, secret: &[u8]) -> Result<(), SlotError>;

    /// Read the stored secret. `Ok(None)` means nothing is stored.
    fn fetch(&self) -> Result<Option<SecretBytes>, SlotError>;

    /// Remove the stored secret. Returns whether something was removed.
    fn remove(&self) -> Result<bool, SlotError>;

    /// Existence probe only; never decrypts.
    fn exists(&self) -> bool;
}

/// In-memory slot that masks its contents. Not cryptographically secure;
/// meant for tests and for hosts that want an ephemeral slot.
#[derive(Default, Clone)]
pub struct InMemorySecretSlot {
    inner: Arc<Mutex<Option<SecretBytes>>>,
}

impl fmt::Debug for InMemorySecretSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySecretSlot")
            .field("present", &self.exists())
            .finish_non_exhaustive()
    }
}

impl InMemorySecretSlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretSlot for InMemorySecretSlot {
    fn put(&self, secret: &[u8]) -> Result<(), SlotError> {
        let mut guard = self.inner.lock().map_err(|err| SlotError::Io {
            reason: format!("lock poisoned: {err}"),
        })?;
        *guard = Some(mask(secret));
        Ok(())
    }

    fn fetch(&self) -> Result<Option<SecretBytes>, SlotError> {
        let guard = self.inner.lock().map_err(|err| SlotError::Io {
            reason: format!("lock poisoned: {err}"),
        })?;
        Ok(guard.as_ref().map(|masked| mask(masked)))
    }

    fn remove(&self) -> Result<bool, SlotError> {
        let mut guard = self.inner.lock().map_err(|err| SlotError::Io {
            reason: format!("lock poisoned: {err}"),
        })?;
        Ok(guard.take().is_some())
    }

    fn exists(&self) -> bool {
        self.inner.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }
}

const MASK_BYTE: u8 = 0xA5;

// XOR twice restores the original.
fn mask(input: &[u8]) -> SecretBytes {
    Zeroizing::new(input.iter().map(|b| b ^ MASK_BYTE).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_masks_and_unmasks() {
        let slot = InMemorySecretSlot::new();
        let secret = b"top-secret-payload";

        slot.put(secret).expect("put should succeed");
        let retrieved = slot.fetch().expect("fetch should succeed");
        assert_eq!(retrieved.as_deref().map(Vec::as_slice), Some(&secret[..]));

        // Ensure we are not holding plaintext.
        let inner = slot.inner.lock().expect("lock");
        assert_ne!(inner.as_ref().expect("stored").as_slice(), secret);
    }

    #[test]
    fn empty_secret_is_present_not_absent() {
        let slot = InMemorySecretSlot::new();
        assert_eq!(slot.fetch().expect("fetch"), None);

        slot.put(b"").expect("put should succeed");
        let stored = slot.fetch().expect("fetch").expect("present");
        assert!(stored.is_empty());
        assert!(slot.exists());
    }

    #[test]
    fn debug_output_reveals_only_presence() {
        let slot = InMemorySecretSlot::new();
        slot.put(b"s3cr3t").expect("put should succeed");

        let rendered = format!("{slot:?}");
        assert_eq!(rendered, "InMemorySecretSlot { present: true, .. }");
        let masked: Vec<u8> = b"s3cr3t".iter().map(|b| b ^ MASK_BYTE).collect();
        assert!(!rendered.contains(&format!("{masked:?}")));
    }

    #[test]
    fn remove_reports_whether_anything_was_stored() {
        let slot = InMemorySecretSlot::new();
        slot.put(b"v").expect("put should succeed");
        assert!(slot.remove().expect("remove"));
        assert!(!slot.remove().expect("remove again"));
        assert!(!slot.exists());
        assert_eq!(slot.fetch().expect("fetch"), None);
    }
}
