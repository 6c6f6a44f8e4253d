#![forbid(unsafe_code)]
//! Permacheck public API facade.
//!
//! Re-exports the checker engine through a stable external interface.
//! This is the crate downstream consumers (CLI, harness) depend on.

pub use pmck_engine::*;
