#![forbid(unsafe_code)]
//! Error types for Permacheck.
//!
//! Defines `PmckError` and a `Result<T>` alias used throughout the
//! workspace. The checker's event path records recoverable conditions
//! internally and surfaces them only through the reporter; the variants
//! here are the few conditions that escape that model.

use thiserror::Error;

/// Unified error type for all Permacheck operations.
#[derive(Debug, Error)]
pub enum PmckError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("trace parse error at line {line}: {detail}")]
    TraceParse { line: usize, detail: String },

    /// The overwrite-record list hit its hard cap. This is the only fatal
    /// condition the event path can raise; callers must treat it as
    /// terminal and exit non-zero.
    #[error("the number of overwritten stores exceeded {cap}")]
    OverwriteFlood { cap: usize },

    #[error("unknown client request code {code:#x}")]
    UnknownRequest { code: u64 },
}

/// Result alias using `PmckError`.
pub type Result<T> = std::result::Result<T, PmckError>;
