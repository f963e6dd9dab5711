//! Secure write pipeline — crash-safe persistence with backup-and-restore.
//!
//! # Write protocol
//!
//! A secure write is strictly sequential; each step's precondition depends
//! on the one before it:
//!
//! 1. record a write event with the IO governor (over-limit fails before
//!    any filesystem access);
//! 2. render the value to its canonical bytes;
//! 3. read the existing target content and capture its CRC32 + length (the
//!    pre-image used for recovery);
//! 4. when secure mode is on and the pre-image is non-empty, persist a
//!    [`BackupRecord`]: the existing bytes sealed with the backup cipher,
//!    then gzip-compressed.  No write proceeds without its backup;
//! 5. write the new bytes (append mode joins pre-image + delimiter + new);
//! 6. on failure, restore the pre-image from the backup and report the
//!    outcome — recovered, unrecoverable, or permission-denied.
//!
//! Restoration decompresses then decrypts (the reverse of seal-then-compress
//! on the way in — the order is load-bearing), CRC-checks the recovered
//! bytes against the pre-image (a mismatch is logged, recovery still
//! proceeds with best-effort data), rewrites the target, and verifies the
//! restored file's hash against the backup file name.
//!
//! # Concurrency
//!
//! Concurrent writers to the *same* target file are not serialized here;
//! callers must provide their own mutual exclusion.  [`SecureWriter::write_detached`]
//! is the explicit fire-and-forget variant — it returns a join handle and
//! delivers no result.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::Rng;
use thiserror::Error;

use crate::convert::{ConvertFormat, WriteData};
use crate::crypto::BackupCipher;
use crate::governor::{IoEvent, IoGovernor, RateLimitError};

/// File extension for secure-write backups.
pub const BACKUP_FILE_EXT: &str = "vbak";

// ── Policy & options ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePolicy {
    /// Gzip the sealed backup payload.
    pub compress_backups: bool,
    /// Gzip level for backup compression (0–9).
    pub gzip_level: u32,
    /// Attempts at generating an unused backup file name before giving up.
    pub max_name_attempts: u32,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            compress_backups:  true,
            gzip_level:        7,
            max_name_attempts: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Snapshot existing content before overwriting.  Leave on unless the
    /// target is genuinely disposable.
    pub secure: bool,
    /// Append to the existing content instead of replacing it.
    pub append: bool,
    /// Separator between existing and new bytes in append mode.
    pub append_delimiter: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            secure:           true,
            append:           false,
            append_delimiter: "\n".into(),
        }
    }
}

// ── Records ──────────────────────────────────────────────────────────────────

/// An on-disk snapshot of a file's pre-write bytes.
///
/// Named `{file_name}-{blake3_hex(content)}-{salt}.vbak`; the payload is the
/// sealed (and, by policy, gzip-compressed) original bytes.  Backups are
/// retained indefinitely — there is no automatic collection.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub path:            PathBuf,
    pub content_hash:    String,
    pub compressed:      bool,
    pub pre_image_crc32: u32,
    pub pre_image_len:   usize,
    pub created_at:      DateTime<Utc>,
}

/// Result of a completed secure write.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub bytes_written: usize,
    /// The backup taken before overwriting, when one was required.
    pub backup: Option<BackupRecord>,
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error("Backup creation failed: {detail}")]
    BackupCreationFailed { detail: String },
    #[error("Insufficient permission to write {}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Write to {} failed; previous content was restored from backup", path.display())]
    WriteFailedRecovered {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Write to {} failed and recovery failed too: {detail}", path.display())]
    WriteFailedRecoveryAlsoFailed { path: PathBuf, detail: String },
    #[error("Write to {} failed with no backup to restore", path.display())]
    WriteFailedNoBackup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("File not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Target sink ──────────────────────────────────────────────────────────────

/// Where new bytes land.  The filesystem in production; a failure-injecting
/// double in recovery tests.  Restoration bypasses the sink on purpose —
/// recovery always goes straight to the filesystem.
pub trait TargetSink: Send + Sync {
    fn persist(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// Default sink: create parent directories, then write.
pub struct FsSink;

impl TargetSink for FsSink {
    fn persist(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        write_direct(path, bytes)
    }
}

fn write_direct(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, bytes)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn blake3_hex(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

fn gzip(bytes: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn gunzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

// ── SecureWriter ─────────────────────────────────────────────────────────────

/// The write half of the persistence layer.
///
/// Cheap to clone; clones share the governor and sink.
#[derive(Clone)]
pub struct SecureWriter {
    backup_dir: PathBuf,
    cipher:     BackupCipher,
    governor:   Arc<IoGovernor>,
    policy:     WritePolicy,
    format:     ConvertFormat,
    sink:       Arc<dyn TargetSink>,
}

impl std::fmt::Debug for SecureWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureWriter")
            .field("backup_dir", &self.backup_dir)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SecureWriter {
    pub fn new(backup_dir: impl Into<PathBuf>, governor: Arc<IoGovernor>) -> Self {
        Self::with_options(
            backup_dir,
            governor,
            BackupCipher::fixed(),
            WritePolicy::default(),
            ConvertFormat::default(),
        )
    }

    pub fn with_options(
        backup_dir: impl Into<PathBuf>,
        governor:   Arc<IoGovernor>,
        cipher:     BackupCipher,
        policy:     WritePolicy,
        format:     ConvertFormat,
    ) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            cipher,
            governor,
            policy,
            format,
            sink: Arc::new(FsSink),
        }
    }

    /// Replace the target sink.  Test seam for deterministic write failures.
    pub fn with_sink(mut self, sink: Arc<dyn TargetSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    /// Read a file's bytes, recording a read event with the governor.
    pub fn read(&self, target: &Path) -> Result<Vec<u8>, WriteError> {
        self.governor.record(IoEvent::Read)?;
        if !target.is_file() {
            return Err(WriteError::SourceNotFound(target.to_owned()));
        }
        Ok(fs::read(target)?)
    }

    // ── Write ────────────────────────────────────────────────────────────────

    /// Write `data` to `target` under the secure-write protocol.
    ///
    /// Concurrent writers to the same target must be serialized by the
    /// caller; this method provides no cross-call mutual exclusion.
    pub fn write(
        &self,
        target: &Path,
        data:   &WriteData,
        opts:   &WriteOptions,
    ) -> Result<WriteOutcome, WriteError> {
        self.governor.record(IoEvent::Write)?;

        let new_bytes = data.to_bytes(&self.format);

        let existing = if target.is_file() {
            fs::read(target)?
        } else {
            Vec::new()
        };
        let pre_image_crc32 = crc32(&existing);
        let pre_image_len = existing.len();

        // Backup creation failure is fatal for the whole write: the target
        // is never touched without its snapshot.
        let backup = if opts.secure && pre_image_len > 0 {
            Some(self.create_backup(target, &existing, pre_image_crc32)?)
        } else {
            None
        };

        let payload = if opts.append {
            let mut joined = existing;
            joined.extend_from_slice(opts.append_delimiter.as_bytes());
            joined.extend_from_slice(&new_bytes);
            joined
        } else {
            drop(existing);
            new_bytes
        };

        match self.sink.persist(target, &payload) {
            Ok(()) => Ok(WriteOutcome {
                bytes_written: payload.len(),
                backup,
            }),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                // Nothing can be done about permissions here, and the prior
                // content was not necessarily disturbed; no restore attempt.
                tracing::error!(
                    path = %target.display(),
                    "secure write refused: insufficient permission"
                );
                Err(WriteError::PermissionDenied {
                    path:   target.to_owned(),
                    source: e,
                })
            }
            Err(e) => {
                tracing::error!(
                    path = %target.display(),
                    error = %e,
                    "secure write failed; attempting recovery"
                );
                match backup {
                    Some(record) => match self.restore_from_backup(target, &record) {
                        Ok(()) => Err(WriteError::WriteFailedRecovered {
                            path:   target.to_owned(),
                            source: e,
                        }),
                        Err(detail) => Err(WriteError::WriteFailedRecoveryAlsoFailed {
                            path: target.to_owned(),
                            detail,
                        }),
                    },
                    None if opts.secure && pre_image_len > 0 => {
                        // The call sequence above guarantees a backup in this
                        // state; reaching here is a lifecycle bug.
                        Err(WriteError::WriteFailedRecoveryAlsoFailed {
                            path:   target.to_owned(),
                            detail: "expected backup record is absent".into(),
                        })
                    }
                    None => Err(WriteError::WriteFailedNoBackup {
                        path:   target.to_owned(),
                        source: e,
                    }),
                }
            }
        }
    }

    /// Fire-and-forget variant of [`write`](SecureWriter::write).
    ///
    /// The write runs on its own thread; the returned handle joins on
    /// completion but carries no result.  Failures are logged only.
    /// Callers that need the outcome must use `write`.
    pub fn write_detached(
        &self,
        target: &Path,
        data:   WriteData,
        opts:   WriteOptions,
    ) -> thread::JoinHandle<()> {
        let writer = self.clone();
        let target = target.to_owned();
        thread::spawn(move || {
            if let Err(e) = writer.write(&target, &data, &opts) {
                tracing::error!(
                    path = %target.display(),
                    error = %e,
                    "detached secure write failed"
                );
            }
        })
    }

    // ── Backup creation ──────────────────────────────────────────────────────

    fn create_backup(
        &self,
        target:          &Path,
        content:         &[u8],
        pre_image_crc32: u32,
    ) -> Result<BackupRecord, WriteError> {
        let fail = |detail: String| WriteError::BackupCreationFailed { detail };

        fs::create_dir_all(&self.backup_dir)
            .map_err(|e| fail(format!("cannot create backup directory: {e}")))?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| fail(format!("target {} has no file name", target.display())))?;
        let content_hash = blake3_hex(content);

        let mut rng = rand::thread_rng();
        let mut path = None;
        for _ in 0..self.policy.max_name_attempts {
            let salt: u32 = rng.gen();
            let candidate = self
                .backup_dir
                .join(format!("{file_name}-{content_hash}-{salt}.{BACKUP_FILE_EXT}"));
            if !candidate.exists() {
                path = Some(candidate);
                break;
            }
        }
        let path = path.ok_or_else(|| {
            fail(format!(
                "backup name generation exhausted {} attempts",
                self.policy.max_name_attempts
            ))
        })?;

        // Seal first, then compress the ciphertext.  Restoration reverses
        // this exact order; existing backups depend on it.
        let sealed = self
            .cipher
            .seal(content)
            .map_err(|e| fail(format!("encryption failed: {e}")))?;
        let on_disk = if self.policy.compress_backups {
            gzip(&sealed, self.policy.gzip_level)
                .map_err(|e| fail(format!("compression failed: {e}")))?
        } else {
            sealed
        };

        fs::write(&path, on_disk).map_err(|e| fail(format!("cannot persist backup: {e}")))?;
        if !path.is_file() {
            return Err(fail(format!("backup {} did not land on disk", path.display())));
        }

        tracing::debug!(
            backup = %path.display(),
            bytes = content.len(),
            "secure write backup created"
        );

        Ok(BackupRecord {
            path,
            content_hash,
            compressed: self.policy.compress_backups,
            pre_image_crc32,
            pre_image_len: content.len(),
            created_at: Utc::now(),
        })
    }

    // ── Restoration ──────────────────────────────────────────────────────────

    /// Restore `target` from `backup`.  Returns a diagnostic string on
    /// failure (surfaced inside `WriteFailedRecoveryAlsoFailed`).
    fn restore_from_backup(&self, target: &Path, backup: &BackupRecord) -> Result<(), String> {
        if !backup.path.is_file() {
            return Err(format!("backup file {} is absent", backup.path.display()));
        }

        let raw = fs::read(&backup.path).map_err(|e| format!("cannot read backup: {e}"))?;
        let sealed = if backup.compressed {
            gunzip(&raw).map_err(|e| format!("cannot decompress backup: {e}"))?
        } else {
            raw
        };
        let recovered = self
            .cipher
            .open(&sealed)
            .map_err(|e| format!("cannot decrypt backup: {e}"))?;

        // Best-effort recovery: a CRC mismatch is reported, not fatal.
        let recovered_crc32 = crc32(&recovered);
        if recovered_crc32 != backup.pre_image_crc32 {
            tracing::warn!(
                expected = backup.pre_image_crc32,
                actual = recovered_crc32,
                "CRC32 of recovered data does not match the pre-image; data may have been lost"
            );
        } else {
            tracing::info!("backup validated with CRC32");
        }

        write_direct(target, &recovered)
            .map_err(|e| format!("cannot write recovered bytes: {e}"))?;

        // Verify by re-hashing the restored file against the backup name.
        let restored = fs::read(target).map_err(|e| format!("cannot re-read target: {e}"))?;
        let restored_hash = blake3_hex(&restored);
        let backup_name = backup.path.file_name().map(|n| n.to_string_lossy().into_owned());
        match backup_name {
            Some(name) if name.contains(&restored_hash) => {
                tracing::info!(hash = %restored_hash, "backup restoration verified");
            }
            _ => {
                tracing::warn!(
                    hash = %restored_hash,
                    "restored file hash not present in backup file name"
                );
            }
        }

        Ok(())
    }
}
