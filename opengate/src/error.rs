//! Crate-wide error type.

use std::io;

/// Errors surfaced by the monitor and its collaborators.
///
/// Only [`PermissionDenied`](Error::PermissionDenied) is fatal to a
/// monitoring session. Everything else is contained where it happens and
/// logged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Location access was refused or revoked.
    #[error("location permission denied")]
    PermissionDenied,

    /// No position fix could be obtained.
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    /// Reading or writing persisted settings failed.
    #[error("settings store error: {0}")]
    Store(String),

    /// Runtime configuration is malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
