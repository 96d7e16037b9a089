//! AES-256-CBC sealing of a single secret under a fixed key.
//!
//! A sealed blob is positional: `IV (16 bytes) || ciphertext`, no header.
//! CBC carries no authentication tag. A corrupted blob almost always fails the
//! padding check, but now and then decrypts to garbage with valid padding, so a
//! successful [`open`] is not proof the blob was untouched.

use std::fmt;

use aes::Aes256;
use cbc::cipher::{
    block_padding::{NoPadding, Pkcs7},
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use keycask_core::{SecretBytes, SlotError};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::{ConstantTimeEq, ConstantTimeGreater};
use thiserror::Error;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// Length of the IV prepended to every sealed blob.
pub const IV_LEN: usize = 16;
/// AES block size.
pub const BLOCK_LEN: usize = 16;

/// Key constant baked into early releases. Only its first `KEY_LEN` bytes
/// were ever used by the cipher.
const LEGACY_SECRET: &[u8] = b"your_hardcoded_encryption_key_here";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Random source or cipher context could not be set up.
    #[error("cipher init failed: {0}")]
    Init(String),
    /// An encrypt or decrypt step failed.
    #[error("cipher operation failed: {0}")]
    Operation(String),
    /// Blob too short or not block aligned.
    #[error("sealed blob rejected")]
    InvalidCiphertext,
    /// Padding did not validate after decryption.
    #[error("sealed blob rejected")]
    Padding,
}

impl From<CipherError> for SlotError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Init(_) | CipherError::Operation(_) => SlotError::Cipher {
                reason: err.to_string(),
            },
            CipherError::InvalidCiphertext | CipherError::Padding => SlotError::Rejected,
        }
    }
}

/// 256-bit symmetric key. Wiped on drop, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_LEN],
}

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Turn configured secret material into a key.
    ///
    /// Exactly `KEY_LEN` bytes are used verbatim; any other length is hashed
    /// with SHA-256, never truncated or zero-padded.
    pub fn from_secret(secret: &[u8]) -> Self {
        match <[u8; KEY_LEN]>::try_from(secret) {
            Ok(bytes) => Self { bytes },
            Err(_) => Self::digest(secret),
        }
    }

    /// Key derived from the host application's signing certificate.
    pub fn from_signing_certificate(certificate: &[u8]) -> Self {
        Self::digest(certificate)
    }

    /// Insecure built-in key, kept so files written by early releases stay
    /// readable. Anyone with a copy of the binary can decrypt with it.
    pub fn legacy_default() -> Self {
        warn!("using the built-in legacy encryption key; configure a secret instead");
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&LEGACY_SECRET[..KEY_LEN]);
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    fn digest(input: &[u8]) -> Self {
        let mut digest = Sha256::digest(input);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&digest);
        digest.as_mut_slice().zeroize();
        Self { bytes }
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
///
/// Returns `IV || ciphertext`; the ciphertext is PKCS#7 padded, so it is
/// always at least one block long, even for empty input.
pub fn seal(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut iv = [0u8; IV_LEN];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| CipherError::Init(format!("iv generation failed: {e}")))?;

    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| CipherError::Init(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut sealed = Vec::with_capacity(IV_LEN + ciphertext.len());
    sealed.extend_from_slice(&iv);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a blob produced by [`seal`].
///
/// Framing and padding failures return errors with identical messages, and
/// padding is checked without data-dependent branches.
pub fn open(key: &EncryptionKey, sealed: &[u8]) -> Result<SecretBytes, CipherError> {
    if sealed.len() < IV_LEN {
        return Err(CipherError::InvalidCiphertext);
    }
    let (iv, ciphertext) = sealed.split_at(IV_LEN);
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CipherError::InvalidCiphertext);
    }

    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| CipherError::Init(e.to_string()))?;

    let mut buf = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_padded_mut::<NoPadding>(buf.as_mut_slice())
        .map_err(|e| CipherError::Operation(format!("decrypt failed: {e}")))?;

    let len = unpadded_len(&buf)?;
    buf.truncate(len);
    Ok(buf)
}

/// Length of `buf` once PKCS#7 padding is stripped.
///
/// `buf` must be non-empty and block aligned. Every byte of the final block
/// is inspected regardless of where a mismatch occurs.
fn unpadded_len(buf: &[u8]) -> Result<usize, CipherError> {
    let block = &buf[buf.len() - BLOCK_LEN..];
    let pad = block[BLOCK_LEN - 1];

    let mut valid = !pad.ct_eq(&0) & !pad.ct_gt(&(BLOCK_LEN as u8));
    for (i, byte) in block.iter().enumerate() {
        let distance = (BLOCK_LEN - i) as u8;
        let in_padding = !distance.ct_gt(&pad);
        valid &= !in_padding | byte.ct_eq(&pad);
    }

    if bool::from(valid) {
        Ok(buf.len() - pad as usize)
    } else {
        Err(CipherError::Padding)
    }
}
