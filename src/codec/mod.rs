//! Theme file codec: header + JSON payload + embedded self-verification.
//!
//! # On-disk layout (format version 1)
//!
//! An 8-byte header (see [`crate::header`]) followed by a UTF-8 JSON payload
//! with exactly three top-level keys:
//!
//! - `meta`    — `{FormatVersion, HeaderVersion, Author, Collection}`
//! - `content` — one entry per theme, keyed by theme name, in the order the
//!   caller supplied the themes (insertion order, never sorted)
//! - `v`       — `{CRC32, Hash}` computed over the compact serialization of
//!   `{meta, content}` with `v` itself removed
//!
//! # Verification
//!
//! `v` is computed last on encode and recomputed on decode.  Any mismatch in
//! either value rejects the file — a payload that fails verification is not
//! trusted far enough to extract partial data from.
//!
//! # Theme codes
//!
//! Each decoded theme receives a content-address `code`: BLAKE3 + CRC32 of
//! its own compact serialization plus a process-random salt.  Codes are NOT
//! stable across decodes of identical content; they exist for cheap
//! human-readable disambiguation only.

use std::fmt;
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use rand::Rng;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::header::{
    decode_header, encode_header, FileHeader, FileKind, HeaderError, FORMAT_VERSION,
    HEADER_LEN, HEADER_VERSION,
};
use crate::theme::{HexColor, ThemeFileRecord, ThemeRecord};

// ── Error types ──────────────────────────────────────────────────────────────

/// The specific metadata check an encode rejected.  These sub-reasons are
/// part of the diagnostic contract and must stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaReason {
    Header,
    Author,
    ThemeName,
    ThemeCode,
    Collection,
    NoThemes,
}

impl fmt::Display for MetaReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetaReason::Header     => "header does not match the canonical version-1 theme header",
            MetaReason::Author     => "author is empty",
            MetaReason::ThemeName  => "theme name is empty",
            MetaReason::ThemeCode  => "theme code is empty (derive one before encoding)",
            MetaReason::Collection => "collection name is empty",
            MetaReason::NoThemes   => "theme list is empty",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum ThemeFileError {
    #[error("Bad header length: expected {expected} bytes, got {actual}")]
    BadHeaderLength { expected: usize, actual: usize },
    #[error("Unknown magic bytes {found:02x?} (expected {expected:02x?})")]
    UnknownMagicBytes { found: [u8; 4], expected: [u8; 4] },
    #[error("Unsupported version combination: format {format_version}, header {header_version}")]
    UnsupportedHeaderVersion { format_version: u16, header_version: u16 },
    #[error("Theme file not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("Invalid theme metadata: {0}")]
    InvalidThemeMeta(MetaReason),
    #[error(
        "Checksum mismatch: crc32 claimed {claimed_crc32} / computed {computed_crc32}, \
         hash claimed {claimed_hash} / computed {computed_hash}"
    )]
    ChecksumMismatch {
        claimed_crc32:  u32,
        computed_crc32: u32,
        claimed_hash:   String,
        computed_hash:  String,
    },
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HeaderError> for ThemeFileError {
    fn from(e: HeaderError) -> Self {
        match e {
            HeaderError::TruncatedHeader { expected, actual } => {
                ThemeFileError::BadHeaderLength { expected, actual }
            }
            HeaderError::UnknownMagicBytes { found, expected, .. } => {
                ThemeFileError::UnknownMagicBytes { found, expected }
            }
            HeaderError::UnsupportedHeaderVersion { format_version, header_version } => {
                ThemeFileError::UnsupportedHeaderVersion { format_version, header_version }
            }
        }
    }
}

// ── Checksums ────────────────────────────────────────────────────────────────

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn blake3_hex(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// Derive the content-address code for a theme.
///
/// `BLAKE3(serialized) + CRC32(serialized) + (random salt mod a secondary
/// random range)`.  The salt component makes the result non-deterministic by
/// design — never compare codes for equality.
pub fn derive_theme_code(theme: &ThemeRecord) -> String {
    let serialized = theme_value(theme).to_string().into_bytes();
    let mut rng = rand::thread_rng();
    let range: u32 = rng.gen_range(2..10_000);
    let salt = rng.gen::<u32>() % range;
    format!("{}-{}-{}", blake3_hex(&serialized), crc32(&serialized), salt)
}

// ── Payload construction ─────────────────────────────────────────────────────

/// The `content` entry for one theme, keys in the fixed schema order.
fn theme_value(theme: &ThemeRecord) -> Value {
    let mut font = Map::new();
    font.insert("TitleFace".into(),  Value::from(theme.title_font_face.clone()));
    font.insert("Face".into(),       Value::from(theme.font_face.clone()));
    font.insert("TitleSize".into(),  Value::from(theme.font_size_title));
    font.insert("LargeSize".into(),  Value::from(theme.font_size_large));
    font.insert("NormalSize".into(), Value::from(theme.font_size_normal));
    font.insert("SmallSize".into(),  Value::from(theme.font_size_small));

    let mut border = Map::new();
    border.insert("Color".into(),  Value::from(theme.border_color.as_str()));
    border.insert("Radius".into(), Value::from(theme.border_radius));

    let mut entry = Map::new();
    entry.insert("BG".into(), Value::from(theme.background.as_str()));
    entry.insert("FG".into(), Value::from(theme.foreground.as_str()));
    entry.insert("ER".into(), Value::from(theme.error.as_str()));
    entry.insert("WA".into(), Value::from(theme.warning.as_str()));
    entry.insert("OK".into(), Value::from(theme.success.as_str()));
    entry.insert("AC".into(), Value::from(theme.accent.as_str()));
    entry.insert("GR".into(), Value::from(theme.grey.as_str()));
    entry.insert("Font".into(),   Value::Object(font));
    entry.insert("Border".into(), Value::Object(border));
    Value::Object(entry)
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// Serialize a theme file record to its on-disk byte form.
///
/// Validates the record first; the stored `checksum`/`hash` fields of the
/// input are ignored and recomputed from the payload being produced.
pub fn encode(record: &ThemeFileRecord) -> Result<Vec<u8>, ThemeFileError> {
    if record.header != FileHeader::current(FileKind::ThemeFile) {
        return Err(ThemeFileError::InvalidThemeMeta(MetaReason::Header));
    }

    let author = record.author.trim();
    if author.is_empty() {
        return Err(ThemeFileError::InvalidThemeMeta(MetaReason::Author));
    }
    let collection = record.collection.trim();
    if collection.is_empty() {
        return Err(ThemeFileError::InvalidThemeMeta(MetaReason::Collection));
    }
    if record.themes.is_empty() {
        return Err(ThemeFileError::InvalidThemeMeta(MetaReason::NoThemes));
    }
    for theme in &record.themes {
        if theme.name.trim().is_empty() {
            return Err(ThemeFileError::InvalidThemeMeta(MetaReason::ThemeName));
        }
        if theme.code.trim().is_empty() {
            return Err(ThemeFileError::InvalidThemeMeta(MetaReason::ThemeCode));
        }
    }

    let mut meta = Map::new();
    meta.insert("FormatVersion".into(), Value::from(FORMAT_VERSION));
    meta.insert("HeaderVersion".into(), Value::from(HEADER_VERSION));
    meta.insert("Author".into(),        Value::from(author));
    meta.insert("Collection".into(),    Value::from(collection));

    // Content keys follow theme-list insertion order, never sorted.
    let mut content = Map::new();
    for theme in &record.themes {
        content.insert(theme.name.trim().to_owned(), theme_value(theme));
    }

    let mut payload = Map::new();
    payload.insert("meta".into(),    Value::Object(meta));
    payload.insert("content".into(), Value::Object(content));

    // Checksum + hash over the compact {meta, content} form, computed last.
    let canonical = Value::Object(payload.clone()).to_string().into_bytes();
    let checksum = crc32(&canonical);
    let hash = blake3_hex(&canonical);

    let mut v = Map::new();
    v.insert("CRC32".into(), Value::from(checksum));
    v.insert("Hash".into(),  Value::from(hash));
    payload.insert("v".into(), Value::Object(v));

    // The payload is human-inspectable; pretty-print it.
    let body = serde_json::to_string_pretty(&Value::Object(payload))
        .map_err(|e| ThemeFileError::MalformedPayload(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&encode_header(FORMAT_VERSION, HEADER_VERSION, FileKind::ThemeFile));
    out.extend_from_slice(body.as_bytes());
    Ok(out)
}

// ── Decode ───────────────────────────────────────────────────────────────────

fn require_str<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str, ThemeFileError> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ThemeFileError::MalformedPayload(format!("{key} must be a string")))
}

fn require_int(map: &Map<String, Value>, key: &str, scope: &str) -> Result<i64, ThemeFileError> {
    map.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| ThemeFileError::MalformedPayload(format!("{scope}: {key} must be an integer")))
}

fn require_color(map: &Map<String, Value>, key: &str, scope: &str) -> Result<HexColor, ThemeFileError> {
    let raw = map.get(key).and_then(Value::as_str).ok_or_else(|| {
        ThemeFileError::MalformedPayload(format!("{scope}: {key} must be a string"))
    })?;
    HexColor::new(raw)
        .map_err(|e| ThemeFileError::MalformedPayload(format!("{scope}: {key}: {e}")))
}

fn require_object<'a>(
    map:   &'a Map<String, Value>,
    key:   &str,
    scope: &str,
) -> Result<&'a Map<String, Value>, ThemeFileError> {
    map.get(key).and_then(Value::as_object).ok_or_else(|| {
        ThemeFileError::MalformedPayload(format!("{scope}: {key} must be an object"))
    })
}

fn parse_theme(name: &str, entry: &Value) -> Result<ThemeRecord, ThemeFileError> {
    let fields = entry
        .as_object()
        .ok_or_else(|| ThemeFileError::MalformedPayload(format!("theme {name:?} must be an object")))?;

    let font   = require_object(fields, "Font",   name)?;
    let border = require_object(fields, "Border", name)?;

    let mut theme = ThemeRecord {
        name: name.to_owned(),
        code: String::new(),

        background: require_color(fields, "BG", name)?,
        foreground: require_color(fields, "FG", name)?,
        error:      require_color(fields, "ER", name)?,
        warning:    require_color(fields, "WA", name)?,
        success:    require_color(fields, "OK", name)?,
        accent:     require_color(fields, "AC", name)?,
        grey:       require_color(fields, "GR", name)?,

        title_font_face: require_str(font, "TitleFace")?.to_owned(),
        font_face:       require_str(font, "Face")?.to_owned(),
        font_size_title:  require_int(font, "TitleSize",  name)?,
        font_size_large:  require_int(font, "LargeSize",  name)?,
        font_size_normal: require_int(font, "NormalSize", name)?,
        font_size_small:  require_int(font, "SmallSize",  name)?,

        border_radius: require_int(border, "Radius", name)?,
        border_color:  require_color(border, "Color", name)?,
    };
    theme.code = derive_theme_code(&theme);
    Ok(theme)
}

/// Parse and verify theme file bytes.
///
/// Input is untrusted: the header, the payload structure, the verification
/// block, and every theme field are all checked before a record is returned.
pub fn decode(bytes: &[u8], source: &Path) -> Result<ThemeFileRecord, ThemeFileError> {
    let header = decode_header(bytes, FileKind::ThemeFile)?;

    let root: Value = serde_json::from_slice(&bytes[HEADER_LEN..])
        .map_err(|e| ThemeFileError::MalformedPayload(e.to_string()))?;
    let mut root = match root {
        Value::Object(map) => map,
        _ => return Err(ThemeFileError::MalformedPayload("payload root must be an object".into())),
    };

    if root.len() != 3 || !root.contains_key("meta") || !root.contains_key("content") {
        return Err(ThemeFileError::MalformedPayload(
            "payload must have exactly the keys meta, content, v".into(),
        ));
    }
    let v = root.remove("v").ok_or_else(|| {
        ThemeFileError::MalformedPayload("payload must have exactly the keys meta, content, v".into())
    })?;

    // Structural checks come before any checksum work.
    {
        let meta = root
            .get("meta")
            .and_then(Value::as_object)
            .ok_or_else(|| ThemeFileError::MalformedPayload("meta must be an object".into()))?;
        if meta.len() != 4 {
            return Err(ThemeFileError::MalformedPayload(format!(
                "meta must have exactly 4 entries, found {}",
                meta.len()
            )));
        }
        let content = root
            .get("content")
            .and_then(Value::as_object)
            .ok_or_else(|| ThemeFileError::MalformedPayload("content must be an object".into()))?;
        if content.is_empty() {
            return Err(ThemeFileError::MalformedPayload("content must be non-empty".into()));
        }
    }

    // Recompute the verification values over {meta, content} in file order.
    let canonical = Value::Object(root.clone()).to_string().into_bytes();
    let computed_crc32 = crc32(&canonical);
    let computed_hash = blake3_hex(&canonical);

    let v = v
        .as_object()
        .ok_or_else(|| ThemeFileError::MalformedPayload("v must be an object".into()))?;
    let claimed_crc32 = v
        .get("CRC32")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| ThemeFileError::MalformedPayload("v.CRC32 must be a u32".into()))?;
    let claimed_hash = require_str(v, "Hash")?.to_owned();

    if claimed_crc32 != computed_crc32 || claimed_hash != computed_hash {
        return Err(ThemeFileError::ChecksumMismatch {
            claimed_crc32,
            computed_crc32,
            claimed_hash,
            computed_hash,
        });
    }

    let meta = root
        .get("meta")
        .and_then(Value::as_object)
        .ok_or_else(|| ThemeFileError::MalformedPayload("meta must be an object".into()))?;
    let meta_format = require_int(meta, "FormatVersion", "meta")?;
    let meta_header = require_int(meta, "HeaderVersion", "meta")?;
    if meta_format != i64::from(header.format_version)
        || meta_header != i64::from(header.header_version)
    {
        return Err(ThemeFileError::MalformedPayload(format!(
            "meta versions ({meta_format}, {meta_header}) disagree with header ({}, {})",
            header.format_version, header.header_version
        )));
    }
    let author = require_str(meta, "Author")?.to_owned();
    let collection = require_str(meta, "Collection")?.to_owned();

    let content = root
        .get("content")
        .and_then(Value::as_object)
        .ok_or_else(|| ThemeFileError::MalformedPayload("content must be an object".into()))?;

    let mut themes = Vec::with_capacity(content.len());
    for (name, entry) in content {
        themes.push(parse_theme(name, entry)?);
    }

    Ok(ThemeFileRecord {
        header,
        author,
        collection,
        source: source.to_owned(),
        themes,
        checksum: claimed_crc32,
        hash: claimed_hash,
    })
}

/// Read and decode a theme file from disk.
pub fn read_theme_file(path: &Path) -> Result<ThemeFileRecord, ThemeFileError> {
    if !path.is_file() {
        return Err(ThemeFileError::SourceNotFound(path.to_owned()));
    }
    let bytes = std::fs::read(path)?;
    decode(&bytes, path)
}
