//! Fixed-width file header: magic bytes + format version + header version.
//!
//! Every vellum file starts with the same 8-byte header:
//!
//! | Offset | Length | Field          | Encoding            |
//! |--------|--------|----------------|---------------------|
//! | 0      | 4      | Magic bytes    | per-kind constant   |
//! | 4      | 2      | Format version | big-endian u16      |
//! | 6      | 2      | Header version | big-endian u16      |
//!
//! The magic value identifies the *logical* file kind; the version pair is
//! dispatched through an explicit allow-list (format 1 accepts header 1
//! only).  Decoding never mutates a header and never guesses: a reader that
//! cannot match the magic or the version pair MUST fail immediately.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

/// One named region of the fixed header.  Sections are contiguous,
/// non-overlapping and ordered by offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSection {
    pub name:   &'static str,
    pub offset: usize,
    pub len:    usize,
}

pub const SECTION_MAGIC: HeaderSection = HeaderSection { name: "MAGIC_BYTES",    offset: 0, len: 4 };
pub const SECTION_FORMAT_VERSION: HeaderSection = HeaderSection { name: "FORMAT_VERSION", offset: 4, len: 2 };
pub const SECTION_HEADER_VERSION: HeaderSection = HeaderSection { name: "HEADER_VERSION", offset: 6, len: 2 };

pub const HEADER_SECTIONS: [HeaderSection; 3] =
    [SECTION_MAGIC, SECTION_FORMAT_VERSION, SECTION_HEADER_VERSION];

/// Total header length = sum of all section lengths.
pub const HEADER_LEN: usize = 8;

/// Current format version written by this build.
pub const FORMAT_VERSION: u16 = 1;
/// Current header version written by this build.
pub const HEADER_VERSION: u16 = 1;

// ── File kinds ───────────────────────────────────────────────────────────────
//
// These magic values are permanent.  A value is NEVER reused for a different
// kind, and the mapping is injective by construction (exhaustive match both
// ways, checked in tests).

pub const MAGIC_QUIZ:   [u8; 4] = [0x01, 0xFF, 0x17, 0x10];
pub const MAGIC_ADMIN:  [u8; 4] = [0x01, 0xFF, 0x17, 0x11];
pub const MAGIC_THEME:  [u8; 4] = [0x01, 0xFF, 0x17, 0x12];
pub const MAGIC_BACKUP: [u8; 4] = [0x01, 0xFF, 0x17, 0x13];

/// Logical file kind carried by the magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    QuizFile,
    AdminFile,
    ThemeFile,
    SecureWriteBackup,
}

impl FileKind {
    /// The frozen 4-byte magic value for this kind.
    #[inline]
    pub fn magic(self) -> [u8; 4] {
        match self {
            FileKind::QuizFile          => MAGIC_QUIZ,
            FileKind::AdminFile         => MAGIC_ADMIN,
            FileKind::ThemeFile         => MAGIC_THEME,
            FileKind::SecureWriteBackup => MAGIC_BACKUP,
        }
    }

    /// Resolve magic bytes to a kind.  `None` for unknown values.
    pub fn from_magic(magic: &[u8; 4]) -> Option<Self> {
        match magic {
            m if m == &MAGIC_QUIZ   => Some(FileKind::QuizFile),
            m if m == &MAGIC_ADMIN  => Some(FileKind::AdminFile),
            m if m == &MAGIC_THEME  => Some(FileKind::ThemeFile),
            m if m == &MAGIC_BACKUP => Some(FileKind::SecureWriteBackup),
            _                       => None,
        }
    }

    /// Human-readable name (diagnostics only — never parsed).
    pub fn name(self) -> &'static str {
        match self {
            FileKind::QuizFile          => "quiz",
            FileKind::AdminFile         => "admin",
            FileKind::ThemeFile         => "theme",
            FileKind::SecureWriteBackup => "secure-write-backup",
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Truncated header: expected {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },
    #[error("Unknown magic bytes {found:02x?} (expected {expected:02x?} for {kind} files)")]
    UnknownMagicBytes {
        found:    [u8; 4],
        expected: [u8; 4],
        kind:     &'static str,
    },
    #[error("Unsupported version combination: format {format_version}, header {header_version}")]
    UnsupportedHeaderVersion {
        format_version: u16,
        header_version: u16,
    },
}

// ── Header data ──────────────────────────────────────────────────────────────

/// A parsed (or to-be-written) file header.  Parsed headers are never
/// mutated; encoding always produces the canonical current version pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic:          [u8; 4],
    pub format_version: u16,
    pub header_version: u16,
    pub kind:           FileKind,
}

impl FileHeader {
    /// The canonical header this build writes for `kind`.
    pub fn current(kind: FileKind) -> Self {
        Self {
            magic:          kind.magic(),
            format_version: FORMAT_VERSION,
            header_version: HEADER_VERSION,
            kind,
        }
    }
}

/// True when the version pair is in the allow-list.  Format version 1
/// accepts header version 1 only; there is no negotiation.
fn version_supported(format_version: u16, header_version: u16) -> bool {
    matches!((format_version, header_version), (1, 1))
}

/// Encode the canonical header for `kind`.
pub fn encode_header(format_version: u16, header_version: u16, kind: FileKind) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[SECTION_MAGIC.offset..SECTION_MAGIC.offset + SECTION_MAGIC.len]
        .copy_from_slice(&kind.magic());
    BigEndian::write_u16(
        &mut out[SECTION_FORMAT_VERSION.offset..SECTION_FORMAT_VERSION.offset + SECTION_FORMAT_VERSION.len],
        format_version,
    );
    BigEndian::write_u16(
        &mut out[SECTION_HEADER_VERSION.offset..SECTION_HEADER_VERSION.offset + SECTION_HEADER_VERSION.len],
        header_version,
    );
    out
}

/// Decode and validate a header, expecting the magic bytes of `expected`.
///
/// Reads exactly [`HEADER_LEN`] bytes off the front of `bytes`.
pub fn decode_header(bytes: &[u8], expected: FileKind) -> Result<FileHeader, HeaderError> {
    if bytes.len() < HEADER_LEN {
        return Err(HeaderError::TruncatedHeader {
            expected: HEADER_LEN,
            actual:   bytes.len(),
        });
    }

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&bytes[SECTION_MAGIC.offset..SECTION_MAGIC.offset + SECTION_MAGIC.len]);
    if magic != expected.magic() {
        return Err(HeaderError::UnknownMagicBytes {
            found:    magic,
            expected: expected.magic(),
            kind:     expected.name(),
        });
    }

    let format_version = BigEndian::read_u16(
        &bytes[SECTION_FORMAT_VERSION.offset..SECTION_FORMAT_VERSION.offset + SECTION_FORMAT_VERSION.len],
    );
    let header_version = BigEndian::read_u16(
        &bytes[SECTION_HEADER_VERSION.offset..SECTION_HEADER_VERSION.offset + SECTION_HEADER_VERSION.len],
    );

    if !version_supported(format_version, header_version) {
        return Err(HeaderError::UnsupportedHeaderVersion { format_version, header_version });
    }

    Ok(FileHeader {
        magic,
        format_version,
        header_version,
        kind: expected,
    })
}
