//! Checker configuration and cache-line discovery.
//!
//! Configuration is read-only after engine construction; it is threaded
//! through [`crate::Checker::new`] rather than held in global state.

use pmck_types::FlushAlign;
use std::fs;
use std::path::Path;

/// Hard cap on recorded overwrite events. Exceeding it aborts the run.
pub const MAX_MULT_OVERWRITES: usize = 10_000;

/// Hard cap on recorded multi-flush events. Excess records are dropped.
pub const MAX_FLUSH_ERROR_EVENTS: usize = 10_000;

/// Process-wide checker configuration, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerConfig {
    /// Record stores overwritten before they were made persistent.
    pub track_multiple_stores: bool,
    /// Emit the event log.
    pub log_stores: bool,
    /// Print the summary at teardown.
    pub print_summary: bool,
    /// Record flushes that target a store which is not `DIRTY`.
    pub check_flush: bool,
    /// Within this many superblocks a same-address same-value rewrite is
    /// not considered an overwrite.
    pub store_sb_indiff: u64,
    /// Cache-line granularity flushes are aligned to.
    pub flush_align: FlushAlign,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            track_multiple_stores: false,
            log_stores: false,
            print_summary: true,
            check_flush: false,
            store_sb_indiff: 0,
            flush_align: FlushAlign::DEFAULT,
        }
    }
}

/// Discover the host cache-line size from `/proc/cpuinfo`.
///
/// Falls back to [`FlushAlign::DEFAULT`] when the file is unreadable, the
/// `clflush size` field is absent, or the reported value is not a power of
/// two. The file handle lives only for the duration of this call.
#[must_use]
pub fn probe_flush_align() -> FlushAlign {
    probe_flush_align_at(Path::new("/proc/cpuinfo"))
}

fn probe_flush_align_at(path: &Path) -> FlushAlign {
    let Ok(text) = fs::read_to_string(path) else {
        return FlushAlign::DEFAULT;
    };
    parse_clflush_size(&text)
        .and_then(|v| FlushAlign::new(v).ok())
        .unwrap_or(FlushAlign::DEFAULT)
}

fn parse_clflush_size(cpuinfo: &str) -> Option<u64> {
    cpuinfo
        .lines()
        .find(|line| line.starts_with("clflush size"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|value| value.trim().parse().ok())
}
