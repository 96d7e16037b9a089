use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use keycask_core::{SecretBytes, SecretSlot, SlotError};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::{
    cipher::{self, EncryptionKey},
    key_provider::{KeyError, KeyProvider},
};

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Single encrypted key file at a fixed path.
///
/// The file holds `IV || AES-256-CBC ciphertext` and nothing else. Writes go
/// through a temporary file in the same directory that is renamed over the
/// target, so readers see either the old blob or the new one.
pub struct KeyFileSlot<P: KeyProvider> {
    path: PathBuf,
    key_provider: P,
}

impl<P: KeyProvider> KeyFileSlot<P> {
    pub fn new(path: impl Into<PathBuf>, key_provider: P) -> Self {
        Self {
            path: path.into(),
            key_provider,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_key(&self) -> Result<EncryptionKey, SlotError> {
        self.key_provider.load().map_err(key_unavailable)
    }

    fn load_or_create_key(&self) -> Result<EncryptionKey, SlotError> {
        self.key_provider
            .load_or_create()
            .map_err(key_unavailable)
    }
}

impl<P: KeyProvider> SecretSlot for KeyFileSlot<P> {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn put(&self, secret: &[u8]) -> Result<(), SlotError> {
        let key = self.load_or_create_key()?;
        let sealed = cipher::seal(&key, secret)?;
        drop(key);

        write_sealed(&self.path, &sealed)?;
        debug!(bytes = sealed.len(), "key file written");
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn fetch(&self) -> Result<Option<SecretBytes>, SlotError> {
        let Some(sealed) = read_sealed(&self.path)? else {
            debug!("no key file");
            return Ok(None);
        };

        let key = self.load_key()?;
        let plaintext = cipher::open(&key, &sealed)?;
        Ok(Some(plaintext))
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn remove(&self) -> Result<bool, SlotError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(storage_err(err)),
        }
    }

    fn exists(&self) -> bool {
        match File::open(&self.path) {
            Ok(file) => file.metadata().map(|m| m.is_file()).unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Create `dir` (and missing parents) owner-only. An existing directory is
/// left as it is.
fn ensure_private_dir(dir: &Path) -> Result<(), SlotError> {
    if dir.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(dir).map_err(storage_err)?;

    // DirBuilder's mode is filtered through the umask; pin it explicitly.
    restrict(dir, DIR_MODE)?;
    Ok(())
}

fn write_sealed(path: &Path, sealed: &[u8]) -> Result<(), SlotError> {
    let parent = path.parent().ok_or_else(|| SlotError::Io {
        reason: "invalid storage path".to_string(),
    })?;
    ensure_private_dir(parent)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    restrict(tmp.path(), FILE_MODE)?;
    tmp.write_all(sealed).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;

    tighten_persisted(path);
    Ok(())
}

/// Re-assert 0600 on a key file that has already replaced the old one. The
/// rename kept the temp file's 0600, so a failure is logged, not returned.
fn tighten_persisted(path: &Path) -> bool {
    match restrict(path, FILE_MODE) {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "could not re-apply key file permissions");
            false
        }
    }
}

fn read_sealed(path: &Path) -> Result<Option<Zeroizing<Vec<u8>>>, SlotError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Zeroizing::new(Vec::new());
    file.read_to_end(&mut buf).map_err(storage_err)?;
    Ok(Some(buf))
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> Result<(), SlotError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(storage_err)
}

// No unix permission bits here; the platform's per-user data dir is relied on.
#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> Result<(), SlotError> {
    Ok(())
}

fn key_unavailable(err: KeyError) -> SlotError {
    SlotError::KeyUnavailable {
        reason: err.to_string(),
    }
}

fn storage_err<E: ToString>(err: E) -> SlotError {
    SlotError::Io {
        reason: err.to_string(),
    }
}
