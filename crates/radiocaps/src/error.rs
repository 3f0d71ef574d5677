use thiserror::Error;

use crate::raf::UnknownAccessMode;
use crate::request::UnknownDataRole;

/// Errors returned by [`crate::manager::RadioCapsManager`] API calls.
///
/// Failures inside a running transaction never surface here; they end in a
/// `TxAborted` event instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapsError {
    #[error("slot {0} is already registered")]
    DuplicateSlot(usize),
    #[error("unknown slot {0}")]
    UnknownSlot(usize),
}

/// Errors from loading a [`crate::config::CapsConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    Version(u32),
    #[error(transparent)]
    AccessMode(#[from] UnknownAccessMode),
    #[error(transparent)]
    Role(#[from] UnknownDataRole),
}
