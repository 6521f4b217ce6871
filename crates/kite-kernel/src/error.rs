//! Crate-level error types for `kite-kernel`.
//!
//! Two families live here:
//!
//! - [`HostError`]: the guest-visible taxonomy. Every failure a host call can
//!   produce is reduced to one [`HostErrorKind`] with a stable numeric code
//!   before it crosses the sandbox boundary.
//! - [`KernelError`]: host-side failures of kernel operations (manifest and
//!   config validation, config loading), carried through
//!   [`error_stack::Report`] for context-rich propagation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kite_kernel::error::{KernelError, KernelResult};
//! use error_stack::ResultExt;
//!
//! fn read_manifest(bytes: &[u8]) -> KernelResult<Manifest> {
//!     let manifest = serde_json::from_slice(bytes)
//!         .map_err(KernelError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach("decoding guest manifest")?;
//!     Ok(manifest)
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error kinds surfaced to guests.
///
/// The numeric code is the wire representation; unknown codes decode to
/// [`HostErrorKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostErrorKind {
    Unknown,
    Timeout,
    Canceled,
    Unimplemented,
    ValidationFailed,
    MissingAccess,
    DiscordUnknown,
    DiscordGuildNotFound,
    DiscordChannelNotFound,
    DiscordMessageNotFound,
    DiscordBanNotFound,
    KvUnknown,
    KvKeyNotFound,
    KvValueTypeMismatch,
}

impl HostErrorKind {
    pub fn code(self) -> u32 {
        match self {
            HostErrorKind::Unknown => 0,
            HostErrorKind::Timeout => 1,
            HostErrorKind::Canceled => 2,
            HostErrorKind::Unimplemented => 3,
            HostErrorKind::ValidationFailed => 4,
            HostErrorKind::MissingAccess => 5,
            HostErrorKind::DiscordUnknown => 100,
            HostErrorKind::DiscordGuildNotFound => 101,
            HostErrorKind::DiscordChannelNotFound => 102,
            HostErrorKind::DiscordMessageNotFound => 103,
            HostErrorKind::DiscordBanNotFound => 104,
            HostErrorKind::KvUnknown => 200,
            HostErrorKind::KvKeyNotFound => 201,
            HostErrorKind::KvValueTypeMismatch => 202,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => HostErrorKind::Timeout,
            2 => HostErrorKind::Canceled,
            3 => HostErrorKind::Unimplemented,
            4 => HostErrorKind::ValidationFailed,
            5 => HostErrorKind::MissingAccess,
            100 => HostErrorKind::DiscordUnknown,
            101 => HostErrorKind::DiscordGuildNotFound,
            102 => HostErrorKind::DiscordChannelNotFound,
            103 => HostErrorKind::DiscordMessageNotFound,
            104 => HostErrorKind::DiscordBanNotFound,
            200 => HostErrorKind::KvUnknown,
            201 => HostErrorKind::KvKeyNotFound,
            202 => HostErrorKind::KvValueTypeMismatch,
            _ => HostErrorKind::Unknown,
        }
    }

    /// Platform-side not-found and unknown errors.
    pub fn is_discord(self) -> bool {
        matches!(self.code(), 100..=199)
    }

    pub fn is_kv(self) -> bool {
        matches!(self.code(), 200..=299)
    }
}

impl From<u32> for HostErrorKind {
    fn from(code: u32) -> Self {
        Self::from_code(code)
    }
}

impl From<HostErrorKind> for u32 {
    fn from(kind: HostErrorKind) -> Self {
        kind.code()
    }
}

impl Serialize for HostErrorKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.code())
    }
}

impl<'de> Deserialize<'de> for HostErrorKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(HostErrorKind::from_code)
    }
}

/// A coded error returned to the guest in a call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostError {
    #[serde(rename = "code")]
    pub kind: HostErrorKind,
    pub message: String,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.kind.code())
    }
}

impl std::error::Error for HostError {}

impl HostError {
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Unknown, message)
    }

    pub fn timeout() -> Self {
        Self::new(HostErrorKind::Timeout, "call deadline exceeded")
    }

    pub fn canceled() -> Self {
        Self::new(HostErrorKind::Canceled, "call canceled")
    }

    pub fn unimplemented(call_type: &str) -> Self {
        Self::new(
            HostErrorKind::Unimplemented,
            format!("unknown call type: {}", call_type),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::ValidationFailed, message)
    }

    pub fn code(&self) -> u32 {
        self.kind.code()
    }
}

/// Crate-level error type for `kite-kernel`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// A configuration-related error (requires the `config` feature).
    #[cfg(feature = "config")]
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A value failed validation against a declared schema.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Result alias that wraps errors in an [`error_stack::Report`].
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;
