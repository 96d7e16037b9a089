use std::{
    fs,
    io::{self, Write},
    sync::{Arc, Mutex},
};

use keycask_core::SlotError;
use keycask_storage::{
    config::{KeySource, StoreConfig},
    key_provider::InMemoryKeyProvider,
    open_store, open_store_with,
};
use tracing_subscriber::fmt::MakeWriter;

/// `s3cr3t-api-key` sealed under the legacy built-in key, as early releases wrote it.
const LEGACY_FILE: [u8; 32] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0xea, 0xa6, 0x7f, 0x39, 0xbe, 0x82, 0xa4, 0x3d, 0xc1, 0x54, 0x3c, 0xe7, 0x13, 0x26, 0x2d, 0xff,
];

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("lock")).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn secret_config(dir: &std::path::Path) -> StoreConfig {
    StoreConfig::new(
        dir.join("files"),
        KeySource::Secret {
            secret: "integration-secret".into(),
        },
    )
}

#[test]
fn store_get_delete_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&secret_config(dir.path())).expect("open");

    assert!(!store.has());
    assert!(store.store(b"s3cr3t-api-key"));
    assert_eq!(
        store.get_key_utf8().as_deref().map(String::as_str),
        Some("s3cr3t-api-key")
    );
    assert!(store.has());
    assert!(store.delete());
    assert_eq!(store.get_key(), None);
    assert!(!store.has());
    assert!(store.delete(), "deleting an absent key still reports success");
}

#[test]
fn overwrite_keeps_only_latest_secret() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&secret_config(dir.path())).expect("open");

    assert!(store.store(b"k1"));
    assert!(store.store(b"k2"));
    assert_eq!(store.get_key().expect("present").as_slice(), b"k2");
}

#[test]
fn reads_files_written_by_legacy_releases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StoreConfig::new(dir.path(), KeySource::Legacy).with_file_name("admore_key.dat");
    fs::write(config.key_path(), LEGACY_FILE).expect("write legacy file");

    let store = open_store(&config).expect("open");
    assert!(store.has());
    assert_eq!(
        store.get_key_utf8().as_deref().map(String::as_str),
        Some("s3cr3t-api-key")
    );
}

#[test]
fn corrupted_file_reads_as_absent_and_fetch_reports_rejection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = secret_config(dir.path());
    let store = open_store_with(&config, InMemoryKeyProvider::default()).expect("open");
    assert!(store.store(&[9u8; 16]));

    // Flip the high bit feeding the final pad byte so padding cannot validate.
    let mut bytes = fs::read(config.key_path()).expect("read");
    bytes[31] ^= 0x80;
    fs::write(config.key_path(), &bytes).expect("write");

    assert!(store.has(), "existence probe must not decrypt");
    assert_eq!(store.get_key(), None);
    assert_eq!(store.fetch(), Err(SlotError::Rejected));
}

#[test]
fn diagnostics_never_contain_secret_material() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = secret_config(dir.path());
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let store = open_store(&config).expect("open");
        assert!(store.store(b"s3cr3t-api-key"));
        assert!(store.get_key().is_some());

        fs::write(config.key_path(), [0u8; 7]).expect("corrupt");
        assert_eq!(store.get_key(), None);
        assert!(store.delete());
    });

    let output = logs.contents();
    assert!(output.contains("failed to read secret"), "logs: {output}");
    assert!(!output.contains("s3cr3t-api-key"));
    assert!(!output.contains("integration-secret"));
}

#[cfg(unix)]
#[test]
fn stored_file_is_private_to_owner() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");
    let config = secret_config(dir.path());
    let store = open_store(&config).expect("open");
    assert!(store.store(b"perm"));

    let mode = fs::metadata(config.key_path())
        .expect("meta")
        .permissions()
        .mode();
    assert_eq!(mode & 0o077, 0, "no group/other access expected, got {mode:o}");
}
