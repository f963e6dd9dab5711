pub mod config;
pub mod convert;
pub mod codec;
pub mod crypto;
pub mod governor;
pub mod header;
pub mod secure_write;
pub mod theme;

pub use codec::{decode, derive_theme_code, encode, read_theme_file, ThemeFileError};
pub use config::{AppConfig, FlagStore, StorageLayout, APP_RUN_FLAG};
pub use convert::{ConvertFormat, WriteData};
pub use governor::{GovernorPolicy, IoEvent, IoGovernor};
pub use header::{decode_header, encode_header, FileHeader, FileKind};
pub use secure_write::{SecureWriter, WriteError, WriteOptions, WriteOutcome};
pub use theme::{HexColor, ThemeFileRecord, ThemeRecord};
