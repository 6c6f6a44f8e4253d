//! End-of-run reporting.
//!
//! The reporter reads terminal checker state: every store still in the
//! tracker (never made persistent, whatever its state), plus the recorded
//! multi-flush and overwrite events. Reports render both as aligned text
//! and as JSON through `serde`.

use crate::tracker::TrackedStore;
use pmck_types::{CallStack, MemSpan, SbTick, StoreState};
use serde::Serialize;
use std::io::{self, Write};

/// Reportable detail of a single store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreDetail {
    pub addr: u64,
    pub size: u64,
    pub value: u64,
    pub block: SbTick,
    pub state: StoreState,
    pub context: CallStack,
}

impl From<TrackedStore> for StoreDetail {
    fn from(store: TrackedStore) -> Self {
        Self {
            addr: store.span.addr(),
            size: store.span.size(),
            value: store.value,
            block: store.block,
            state: store.state,
            context: store.context,
        }
    }
}

/// The checker's findings at teardown (or on demand).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// Stores never made persistent, in address order.
    pub stores_not_persisted: Vec<StoreDetail>,
    /// Total bytes covered by `stores_not_persisted`.
    pub bytes_not_persisted: u64,
    /// Flushes that targeted a store which was not `DIRTY`.
    pub multi_flush: Vec<StoreDetail>,
    /// Stores overwritten before they were made persistent.
    pub overwrites: Vec<StoreDetail>,
}

impl CheckReport {
    /// True iff the run produced no findings at all.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.stores_not_persisted.is_empty()
            && self.multi_flush.is_empty()
            && self.overwrites.is_empty()
    }

    /// Render the report as human-readable text.
    pub fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "Number of stores not made persistent: {}",
            self.stores_not_persisted.len()
        )?;
        if !self.stores_not_persisted.is_empty() {
            writeln!(out, "Stores not made persistent properly:")?;
            for (i, detail) in self.stores_not_persisted.iter().enumerate() {
                render_detail(out, i, detail)?;
            }
            writeln!(
                out,
                "Total memory not made persistent: {}",
                self.bytes_not_persisted
            )?;
        }

        if !self.multi_flush.is_empty() {
            writeln!(
                out,
                "\nNumber of multiply flushed stores: {}",
                self.multi_flush.len()
            )?;
            writeln!(out, "Stores flushed multiple times:")?;
            for (i, detail) in self.multi_flush.iter().enumerate() {
                render_detail(out, i, detail)?;
            }
        }

        if !self.overwrites.is_empty() {
            writeln!(
                out,
                "\nNumber of overwritten stores: {}",
                self.overwrites.len()
            )?;
            writeln!(out, "Overwritten stores before they were made persistent:")?;
            for (i, detail) in self.overwrites.iter().enumerate() {
                render_detail(out, i, detail)?;
            }
        }

        Ok(())
    }
}

fn render_detail(out: &mut dyn Write, index: usize, detail: &StoreDetail) -> io::Result<()> {
    writeln!(out, "[{index}] at {}", detail.context)?;
    writeln!(
        out,
        "\tAddress: {:#x}\tsize: {}\tstate: {}",
        detail.addr, detail.size, detail.state
    )
}

/// Render a registry dump (persistent or loggable regions).
pub fn render_regions(out: &mut dyn Write, header: &str, regions: &[MemSpan]) -> io::Result<()> {
    writeln!(out, "{header}")?;
    for (i, region) in regions.iter().enumerate() {
        writeln!(
            out,
            "[{i}] Mapping base: {:#x}\tsize: {}",
            region.addr(),
            region.size()
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(addr: u64, size: u64, state: StoreState) -> StoreDetail {
        StoreDetail {
            addr,
            size,
            value: 0,
            block: SbTick(0),
            state,
            context: CallStack::new(vec![0x4010, 0x4200]),
        }
    }

    #[test]
    fn clean_report_renders_zero_line_only() {
        let report = CheckReport {
            stores_not_persisted: vec![],
            bytes_not_persisted: 0,
            multi_flush: vec![],
            overwrites: vec![],
        };
        assert!(report.is_clean());

        let mut out = Vec::new();
        report.render(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Number of stores not made persistent: 0\n"
        );
    }

    #[test]
    fn report_lists_details_with_context() {
        let report = CheckReport {
            stores_not_persisted: vec![detail(0x1000, 8, StoreState::Dirty)],
            bytes_not_persisted: 8,
            multi_flush: vec![detail(0x1000, 8, StoreState::Flushed)],
            overwrites: vec![],
        };
        assert!(!report.is_clean());

        let mut out = Vec::new();
        report.render(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Number of stores not made persistent: 1"));
        assert!(text.contains("[0] at 0x4010 <- 0x4200"));
        assert!(text.contains("\tAddress: 0x1000\tsize: 8\tstate: DIRTY"));
        assert!(text.contains("Total memory not made persistent: 8"));
        assert!(text.contains("Number of multiply flushed stores: 1"));
        assert!(text.contains("state: FLUSHED"));
    }

    #[test]
    fn report_serializes_to_json() {
        let report = CheckReport {
            stores_not_persisted: vec![detail(0x1000, 8, StoreState::Dirty)],
            bytes_not_persisted: 8,
            multi_flush: vec![],
            overwrites: vec![],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"bytes_not_persisted\":8"));
        assert!(json.contains("\"Dirty\""));
    }

    #[test]
    fn region_dump_format() {
        let regions = vec![MemSpan::new(0x1000, 64).unwrap()];
        let mut out = Vec::new();
        render_regions(&mut out, "Registered persistent memory regions:", &regions).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Registered persistent memory regions:\n"));
        assert!(text.contains("[0] Mapping base: 0x1000\tsize: 64"));
    }
}
