//! Application configuration, storage layout, and the persistent flag store.
//!
//! The flag store is a directory of counted flags, one file per flag.  Each
//! file holds `"{count}-{crc32(count ++ name)}"`; the CRC is verified on
//! every read, so a hand-edited or truncated flag file is rejected rather
//! than silently read as some count.  Lifecycle flags (notably `app_run`,
//! which the IO event governor's tick asserts) live here.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flag file extension.
pub const FLAG_FILE_EXT: &str = "vflag";

/// The flag the governor tick requires to be raised while the app runs.
pub const APP_RUN_FLAG: &str = "app_run";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Corrupt flag file for {name:?}: {detail}")]
    CorruptFlag { name: String, detail: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ── App configuration ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    Alpha,
    Beta,
    Stable,
}

/// Active text encoding for the configured locale.  Everything this crate
/// writes is UTF-8; the enum exists so the encoding is an explicit, queryable
/// property rather than an assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Locale {
    EnUs,
}

impl Locale {
    pub fn encoding(self) -> Encoding {
        match self {
            Locale::EnUs => Encoding::Utf8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub version:         String,
    pub build_type:      BuildType,
    pub build_id:        String,
    pub locale:          Locale,
    pub verbose_logging: bool,
}

impl AppConfig {
    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_owned()));
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

// ── Storage layout ───────────────────────────────────────────────────────────

/// Directory layout under one application data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub root:         PathBuf,
    pub backup_dir:   PathBuf,
    pub flag_dir:     PathBuf,
    pub theme_dir:    PathBuf,
    pub settings_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        Self {
            backup_dir:   root.join(".swb"),
            flag_dir:     root.join(".nvf"),
            theme_dir:    root.join(".tid"),
            settings_dir: root.join(".asd"),
            root,
        }
    }
}

// ── Flag store ───────────────────────────────────────────────────────────────

fn flag_checksum(count: u32, name: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(format!("{count}{name}").as_bytes());
    hasher.finalize()
}

/// Persistent counted flags.
#[derive(Debug, Clone)]
pub struct FlagStore {
    dir: PathBuf,
}

impl FlagStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn flag_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{FLAG_FILE_EXT}"))
    }

    /// Increment a flag's count (creating it at 1).  Returns the new count.
    pub fn raise(&self, name: &str) -> Result<u32, ConfigError> {
        fs::create_dir_all(&self.dir)?;
        let count = self.check(name)? + 1;
        self.store(name, count)?;
        Ok(count)
    }

    /// Current count for a flag; 0 when the flag file does not exist.
    pub fn check(&self, name: &str) -> Result<u32, ConfigError> {
        let path = self.flag_path(name);
        if !path.is_file() {
            return Ok(0);
        }
        let raw = fs::read_to_string(&path)?;
        let (count_part, crc_part) = raw.trim().split_once('-').ok_or_else(|| {
            ConfigError::CorruptFlag {
                name:   name.to_owned(),
                detail: "missing checksum separator".into(),
            }
        })?;
        let count: u32 = count_part.parse().map_err(|_| ConfigError::CorruptFlag {
            name:   name.to_owned(),
            detail: format!("bad count {count_part:?}"),
        })?;
        let claimed: u32 = crc_part.parse().map_err(|_| ConfigError::CorruptFlag {
            name:   name.to_owned(),
            detail: format!("bad checksum {crc_part:?}"),
        })?;
        let expected = flag_checksum(count, name);
        if claimed != expected {
            return Err(ConfigError::CorruptFlag {
                name:   name.to_owned(),
                detail: format!("checksum {claimed} != expected {expected}"),
            });
        }
        Ok(count)
    }

    /// Decrement a flag, or remove it entirely.  Returns the new count.
    pub fn clear(&self, name: &str, clear_all: bool) -> Result<u32, ConfigError> {
        let count = self.check(name)?;
        if count == 0 {
            return Ok(0);
        }
        if clear_all || count == 1 {
            fs::remove_file(self.flag_path(name))?;
            return Ok(0);
        }
        let count = count - 1;
        self.store(name, count)?;
        Ok(count)
    }

    fn store(&self, name: &str, count: u32) -> Result<(), ConfigError> {
        let body = format!("{count}-{}", flag_checksum(count, name));
        fs::write(self.flag_path(name), body)?;
        Ok(())
    }

    /// Snapshot of every readable flag in the store directory.
    pub fn all(&self) -> Result<HashMap<String, u32>, ConfigError> {
        let mut out = HashMap::new();
        if !self.dir.is_dir() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = match (path.file_stem(), path.extension()) {
                (Some(stem), Some(ext)) if ext == FLAG_FILE_EXT => {
                    stem.to_string_lossy().into_owned()
                }
                _ => continue,
            };
            out.insert(name.clone(), self.check(&name)?);
        }
        Ok(out)
    }
}
