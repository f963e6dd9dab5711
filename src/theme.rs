//! Theme data model: colors, typography, borders, and the on-disk aggregate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::header::FileHeader;

/// File extension for theme files.
pub const THEME_FILE_EXT: &str = "vtheme";

// ── HexColor ─────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
#[error("Invalid hex color {0:?} (expected #RGB or #RRGGBB)")]
pub struct HexColorError(pub String);

/// A validated `#RGB` / `#RRGGBB` color, stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(String);

impl HexColor {
    pub fn new(color: &str) -> Result<Self, HexColorError> {
        let color = color.trim();
        let hex = match color.strip_prefix('#') {
            Some(h) => h,
            None => return Err(HexColorError(color.to_owned())),
        };
        if !matches!(hex.len(), 3 | 6) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HexColorError(color.to_owned()));
        }
        Ok(Self(color.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HexColor {
    type Error = HexColorError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        HexColor::new(&s)
    }
}

impl From<HexColor> for String {
    fn from(c: HexColor) -> String {
        c.0
    }
}

// ── ThemeRecord ──────────────────────────────────────────────────────────────

/// One named color/typography/border profile.
///
/// `code` is a content-address: BLAKE3 + CRC32 of the theme's own serialized
/// form plus a process-random salt.  The salt makes the code non-reproducible
/// across loads of identical content — callers must treat it as a cheap
/// human-readable disambiguator, never as an equality key.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeRecord {
    pub name: String,
    pub code: String,

    pub background: HexColor,
    pub foreground: HexColor,
    pub success:    HexColor,
    pub error:      HexColor,
    pub warning:    HexColor,
    pub accent:     HexColor,
    pub grey:       HexColor,

    pub title_font_face: String,
    pub font_face:       String,
    pub font_size_title:  i64,
    pub font_size_large:  i64,
    pub font_size_normal: i64,
    pub font_size_small:  i64,

    pub border_radius: i64,
    pub border_color:  HexColor,
}

// ── ThemeFileRecord ──────────────────────────────────────────────────────────

/// A full theme file: header + authorship metadata + one or more themes +
/// the whole-payload verification block.
///
/// `checksum` and `hash` cover the canonical serialization of the
/// `{meta, content}` substructure (excluding themselves).  They are computed
/// last on encode and verified on decode; a mismatch rejects the whole file.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeFileRecord {
    pub header:     FileHeader,
    pub author:     String,
    pub collection: String,

    /// Where this record came from (or is destined for).
    pub source: PathBuf,

    /// Insertion-ordered; encoded content keys follow this order.
    pub themes: Vec<ThemeRecord>,

    pub checksum: u32,
    pub hash:     String,
}
