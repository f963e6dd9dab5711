use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use std::io::Read;
use tempfile::TempDir;

use vellum::convert::{ConvertFormat, WriteData};
use vellum::crypto::BackupCipher;
use vellum::governor::{GovernorPolicy, IoGovernor};
use vellum::secure_write::{
    SecureWriter, TargetSink, WriteError, WriteOptions, WritePolicy, BACKUP_FILE_EXT,
};

fn writer_in(dir: &TempDir) -> SecureWriter {
    let governor = Arc::new(IoGovernor::new(GovernorPolicy::default()));
    SecureWriter::new(dir.path().join("backups"), governor)
}

fn backup_files(dir: &Path) -> Vec<std::path::PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map_or(false, |ext| ext == BACKUP_FILE_EXT))
            .collect(),
        Err(_) => Vec::new(),
    }
}

// ── Sinks for failure injection ──────────────────────────────────────────────

struct FailingSink(io::ErrorKind);

impl TargetSink for FailingSink {
    fn persist(&self, _: &Path, _: &[u8]) -> io::Result<()> {
        Err(io::Error::new(self.0, "injected sink failure"))
    }
}

// ── Happy paths ──────────────────────────────────────────────────────────────

#[test]
fn test_fresh_target_writes_without_backup() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir);
    let target = dir.path().join("data").join("fresh.txt");

    let outcome = writer
        .write(&target, &WriteData::from("hello"), &WriteOptions::default())
        .unwrap();

    assert_eq!(fs::read(&target).unwrap(), b"hello");
    assert!(outcome.backup.is_none());
    assert!(backup_files(writer.backup_dir()).is_empty());
}

#[test]
fn test_overwrite_takes_a_backup() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir);
    let target = dir.path().join("config.json");
    fs::write(&target, b"old content").unwrap();

    let outcome = writer
        .write(&target, &WriteData::from("new content"), &WriteOptions::default())
        .unwrap();

    assert_eq!(fs::read(&target).unwrap(), b"new content");
    let backup = outcome.backup.expect("non-empty pre-image must be backed up");
    assert!(backup.path.is_file());
    assert_eq!(backup.pre_image_len, b"old content".len());

    // The backup file is the sealed pre-image, gzip-wrapped around the
    // ciphertext (seal-then-compress).
    let raw = fs::read(&backup.path).unwrap();
    let mut sealed = Vec::new();
    GzDecoder::new(raw.as_slice()).read_to_end(&mut sealed).unwrap();
    let recovered = BackupCipher::fixed().open(&sealed).unwrap();
    assert_eq!(recovered, b"old content");

    // Its name carries the pre-image hash.
    let name = backup.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.contains(&backup.content_hash));
    assert!(name.starts_with("config.json-"));
}

#[test]
fn test_insecure_mode_skips_backup() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir);
    let target = dir.path().join("scratch.txt");
    fs::write(&target, b"scratch").unwrap();

    let opts = WriteOptions { secure: false, ..WriteOptions::default() };
    let outcome = writer.write(&target, &WriteData::from("x"), &opts).unwrap();
    assert!(outcome.backup.is_none());
    assert!(backup_files(writer.backup_dir()).is_empty());
}

#[test]
fn test_append_mode_joins_with_delimiter() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir);
    let target = dir.path().join("log.txt");
    fs::write(&target, b"line one").unwrap();

    let opts = WriteOptions { append: true, ..WriteOptions::default() };
    writer.write(&target, &WriteData::from("line two"), &opts).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"line one\nline two");
}

#[test]
fn test_uncompressed_backup_policy() {
    let dir = TempDir::new().unwrap();
    let governor = Arc::new(IoGovernor::new(GovernorPolicy::default()));
    let writer = SecureWriter::with_options(
        dir.path().join("backups"),
        governor,
        BackupCipher::fixed(),
        WritePolicy { compress_backups: false, ..WritePolicy::default() },
        ConvertFormat::default(),
    );
    let target = dir.path().join("plain.txt");
    fs::write(&target, b"payload").unwrap();

    let outcome = writer
        .write(&target, &WriteData::from("replacement"), &WriteOptions::default())
        .unwrap();
    let backup = outcome.backup.unwrap();

    // No gzip wrapper: the file decrypts directly.
    let raw = fs::read(&backup.path).unwrap();
    assert_eq!(BackupCipher::fixed().open(&raw).unwrap(), b"payload");
}

// ── Failure & recovery paths ─────────────────────────────────────────────────

#[test]
fn test_failed_write_restores_original_bytes() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir).with_sink(Arc::new(FailingSink(io::ErrorKind::Other)));
    let target = dir.path().join("precious.txt");
    let original = b"precious original bytes";
    fs::write(&target, original).unwrap();

    let err = writer
        .write(&target, &WriteData::from("doomed"), &WriteOptions::default())
        .unwrap_err();

    assert!(matches!(err, WriteError::WriteFailedRecovered { .. }));
    // Byte-for-byte restoration from the backup.
    assert_eq!(fs::read(&target).unwrap(), original);
}

#[test]
fn test_permission_denied_skips_recovery() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir).with_sink(Arc::new(FailingSink(io::ErrorKind::PermissionDenied)));
    let target = dir.path().join("locked.txt");
    fs::write(&target, b"kept").unwrap();

    let err = writer
        .write(&target, &WriteData::from("denied"), &WriteOptions::default())
        .unwrap_err();

    assert!(matches!(err, WriteError::PermissionDenied { .. }));
    // The sink never wrote, so the original content stands untouched.
    assert_eq!(fs::read(&target).unwrap(), b"kept");
}

#[test]
fn test_failed_write_with_no_preimage_has_no_backup() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir).with_sink(Arc::new(FailingSink(io::ErrorKind::Other)));
    let target = dir.path().join("brand_new.txt");

    let err = writer
        .write(&target, &WriteData::from("doomed"), &WriteOptions::default())
        .unwrap_err();

    assert!(matches!(err, WriteError::WriteFailedNoBackup { .. }));
    assert!(backup_files(writer.backup_dir()).is_empty());
}

#[test]
fn test_missing_backup_file_is_unrecoverable() {
    let dir = TempDir::new().unwrap();

    // A sink that deletes every backup before failing, so restoration finds
    // the expected backup object absent.
    struct SabotagingSink {
        backup_dir: std::path::PathBuf,
    }
    impl TargetSink for SabotagingSink {
        fn persist(&self, _: &Path, _: &[u8]) -> io::Result<()> {
            for backup in fs::read_dir(&self.backup_dir)?.filter_map(|e| e.ok()) {
                fs::remove_file(backup.path())?;
            }
            Err(io::Error::new(io::ErrorKind::Other, "injected sink failure"))
        }
    }

    let writer = writer_in(&dir).with_sink(Arc::new(SabotagingSink {
        backup_dir: dir.path().join("backups"),
    }));
    let target = dir.path().join("victim.txt");
    fs::write(&target, b"original").unwrap();

    let err = writer
        .write(&target, &WriteData::from("doomed"), &WriteOptions::default())
        .unwrap_err();
    assert!(matches!(err, WriteError::WriteFailedRecoveryAlsoFailed { .. }));
}

// ── Read & detached paths ────────────────────────────────────────────────────

#[test]
fn test_read_records_event_and_reports_missing_source() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir);
    let target = dir.path().join("readable.txt");
    fs::write(&target, b"readable").unwrap();

    assert_eq!(writer.read(&target).unwrap(), b"readable");
    assert!(matches!(
        writer.read(&dir.path().join("absent.txt")).unwrap_err(),
        WriteError::SourceNotFound(_)
    ));
}

#[test]
fn test_detached_write_completes_without_result() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir);
    let target = dir.path().join("detached.txt");

    let handle = writer.write_detached(&target, WriteData::from("async"), WriteOptions::default());
    handle.join().unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"async");
}

#[test]
fn test_write_data_conversion_through_pipeline() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir);
    let target = dir.path().join("rendered.txt");

    let data = WriteData::Map(vec![
        ("retries".into(), WriteData::Integer(3)),
        ("verbose".into(), WriteData::Boolean(true)),
    ]);
    writer.write(&target, &data, &WriteOptions::default()).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"retries: 3, verbose: true");
}
