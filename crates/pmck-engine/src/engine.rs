//! The checker engine: store ingestion and the durability state machine.
//!
//! All events arrive on one logical stream and run to completion; the
//! engine does no locking of its own. The valid transition graph is
//! `DIRTY → FLUSHED → FENCED → COMMITTED → retired`: a fence both promotes
//! `FLUSHED` stores and retires `COMMITTED` ones, while a commit only
//! promotes `FENCED` stores.

use crate::config::{CheckerConfig, MAX_FLUSH_ERROR_EVENTS, MAX_MULT_OVERWRITES};
use crate::log::{EventLog, ReorderMarker};
use crate::registry::RegionRegistry;
use crate::report::{CheckReport, StoreDetail};
use crate::tracker::{StoreTracker, TrackedStore};
use pmck_error::{PmckError, Result};
use pmck_interval::Overlap;
use pmck_types::{CallStack, MemSpan, SbTick, StoreState};
use std::fs;
use std::io::Write;
use tracing::debug;

/// The persistent-memory store checker.
#[derive(Debug)]
pub struct Checker {
    config: CheckerConfig,
    registry: RegionRegistry,
    tracker: StoreTracker,
    log: EventLog,
    tick: SbTick,
    overwrites: Vec<TrackedStore>,
    multi_flush: Vec<TrackedStore>,
    multi_flush_dropped: u64,
}

impl Checker {
    /// Create a checker with no log sink attached.
    #[must_use]
    pub fn new(config: CheckerConfig) -> Self {
        Self::with_log_sink(config, None)
    }

    /// Create a checker writing event-log records to `sink`.
    ///
    /// Emits the `START` session marker when `config.log_stores` is set.
    #[must_use]
    pub fn with_log_sink(config: CheckerConfig, sink: Option<Box<dyn Write>>) -> Self {
        let log = EventLog::new(config.log_stores, sink);
        Self {
            config,
            registry: RegionRegistry::new(),
            tracker: StoreTracker::new(),
            log,
            tick: SbTick::default(),
            overwrites: Vec::new(),
            multi_flush: Vec::new(),
            multi_flush_dropped: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Current superblock tick.
    #[must_use]
    pub fn sb_tick(&self) -> SbTick {
        self.tick
    }

    /// Advance the superblock counter. Called once per translated
    /// basic-block entry; this is the counter's only writer.
    pub fn on_sb_enter(&mut self) {
        self.tick = self.tick.next();
    }

    // ── Region registration ─────────────────────────────────────────────

    pub fn register_mapping(&mut self, addr: u64, size: u64) {
        self.registry.register(addr, size);
    }

    pub fn remove_mapping(&mut self, addr: u64, size: u64) {
        self.registry.deregister(addr, size);
    }

    #[must_use]
    pub fn check_mapping(&self, addr: u64, size: u64) -> Overlap {
        self.registry.classify(addr, size)
    }

    pub fn add_log_region(&mut self, addr: u64, size: u64) {
        self.registry.add_loggable(addr, size);
    }

    pub fn remove_log_region(&mut self, addr: u64, size: u64) {
        self.registry.remove_loggable(addr, size);
    }

    #[must_use]
    pub fn persistent_mappings(&self) -> Vec<MemSpan> {
        self.registry.persistent_regions().collect()
    }

    #[must_use]
    pub fn loggable_regions(&self) -> Vec<MemSpan> {
        self.registry.loggable_regions().collect()
    }

    // ── Logging control ─────────────────────────────────────────────────

    /// Flip the runtime logging toggle.
    pub fn set_logging(&mut self, on: bool) {
        self.log.set_toggle(on);
    }

    /// Emit a reordering marker. Markers have no state-machine effect.
    pub fn reorder_marker(&mut self, marker: ReorderMarker) {
        let any_loggable = self.registry.has_loggable();
        self.log.marker(marker, any_loggable);
    }

    /// Resolve `fd` to a pathname and log the file registration.
    ///
    /// Returns true on success, false when the descriptor cannot be
    /// resolved. The record is gated on `log_stores` alone; the runtime
    /// toggle does not apply.
    pub fn register_file(&mut self, fd: i64, addr: u64, size: u64, offset: u64) -> bool {
        let Some(span) = MemSpan::new(addr, size) else {
            return false;
        };
        match fs::read_link(format!("/proc/self/fd/{fd}")) {
            Ok(path) => {
                self.log
                    .register_file(&path.to_string_lossy(), span, offset);
                true
            }
            Err(_) => false,
        }
    }

    // ── Store ingestion ─────────────────────────────────────────────────

    /// Trace a store with no call-stack attribution.
    ///
    /// See [`Self::on_store_at`] for the error contract.
    pub fn on_store(&mut self, addr: u64, size: u64, value: u64) -> Result<()> {
        self.on_store_at(addr, size, value, CallStack::default())
    }

    /// Trace a store to `[addr, addr+size)` carrying `value`.
    ///
    /// Stores outside every registered persistent mapping are ignored.
    /// A store overlapping an in-flight entry evicts it: silently unless
    /// overwrite tracking is on, in which case the evicted store is saved
    /// as an overwrite record — except for benign rewrites (same span and
    /// value within the superblock indifference window).
    ///
    /// The only error is [`PmckError::OverwriteFlood`], raised when the
    /// overwrite-record list is already at its hard cap; callers must
    /// treat it as fatal.
    pub fn on_store_at(
        &mut self,
        addr: u64,
        size: u64,
        value: u64,
        context: CallStack,
    ) -> Result<()> {
        let Some(span) = MemSpan::new(addr, size) else {
            return Ok(());
        };
        if !self.registry.contains_any(span) {
            return Ok(());
        }

        // Log before the eviction scan: an overwritten store still logs.
        let hits_loggable = self.registry.is_loggable(span);
        self.log.store(span, value, hits_loggable);

        while let Some(old) = self.tracker.remove_first_overlap(span) {
            if !self.config.track_multiple_stores {
                continue;
            }
            let benign = self.tick.since(old.block) < self.config.store_sb_indiff
                && old.span == span
                && old.value == value;
            if benign {
                continue;
            }
            if self.overwrites.len() == MAX_MULT_OVERWRITES {
                return Err(PmckError::OverwriteFlood {
                    cap: MAX_MULT_OVERWRITES,
                });
            }
            self.overwrites.push(old);
        }

        self.tracker.insert(TrackedStore {
            span,
            value,
            block: self.tick,
            context,
            state: StoreState::Dirty,
        });
        Ok(())
    }

    // ── Durability state machine ────────────────────────────────────────

    /// Flush the cache lines covering `[addr, addr+size)`.
    ///
    /// `DIRTY` stores inside the aligned window become `FLUSHED`; the parts
    /// of a store outside the window split off as new `DIRTY` fragments
    /// (head first, then tail, so at most two fragments per store). A flush
    /// targeting a store in any other state records a multi-flush event
    /// when `check_flush` is on and otherwise changes nothing.
    pub fn flush(&mut self, addr: u64, size: u64) {
        let Some(window) = self.config.flush_align.window(addr, size) else {
            return;
        };
        let any_loggable = self.registry.has_loggable();
        self.log.flush(window, any_loggable);

        let mut cursor = 0_u64;
        while let Some((span, state)) = self.tracker.peek_overlap_at_or_after(window, cursor) {
            if state != StoreState::Dirty {
                if self.config.check_flush {
                    self.record_multi_flush(span.addr());
                }
                cursor = span.end();
                continue;
            }

            let old = self
                .tracker
                .remove_exact(span.addr())
                .expect("entry just observed");
            if let Some(head) = old.span.slice(old.span.addr(), window.addr()) {
                self.tracker.insert(old.refit(head, StoreState::Dirty));
            }
            if let Some(tail) = old.span.slice(window.end(), old.span.end()) {
                self.tracker.insert(old.refit(tail, StoreState::Dirty));
            }
            let mid_lo = old.span.addr().max(window.addr());
            let mid_hi = old.span.end().min(window.end());
            let mid = old.span.slice(mid_lo, mid_hi).expect("overlap is non-empty");
            self.tracker.insert(old.refit(mid, StoreState::Flushed));
            cursor = mid_hi;
        }
    }

    /// Fence: promote `FLUSHED` stores to `FENCED` and retire `COMMITTED`
    /// ones.
    pub fn fence(&mut self) {
        let any_loggable = self.registry.has_loggable();
        self.log.fence(any_loggable);

        let mut retired = 0_u64;
        let mut cursor = 0_u64;
        while let Some((span, state)) = self.tracker.peek_at_or_after(cursor) {
            match state {
                StoreState::Flushed => self.tracker.set_state(span.addr(), StoreState::Fenced),
                StoreState::Committed => {
                    self.tracker.remove_exact(span.addr());
                    retired += 1;
                }
                StoreState::Dirty | StoreState::Fenced => {}
            }
            cursor = span.end();
        }
        if retired > 0 {
            debug!(retired, "fence retired committed stores");
        }
    }

    /// Commit: promote `FENCED` stores to `COMMITTED`. A fence is still
    /// needed afterwards to retire them.
    pub fn commit(&mut self) {
        let any_loggable = self.registry.has_loggable();
        self.log.commit(any_loggable);

        let mut cursor = 0_u64;
        while let Some((span, state)) = self.tracker.peek_at_or_after(cursor) {
            if state == StoreState::Fenced {
                self.tracker.set_state(span.addr(), StoreState::Committed);
            }
            cursor = span.end();
        }
    }

    fn record_multi_flush(&mut self, start: u64) {
        if self.multi_flush.len() == MAX_FLUSH_ERROR_EVENTS {
            if self.multi_flush_dropped == 0 {
                debug!(
                    cap = MAX_FLUSH_ERROR_EVENTS,
                    "multi-flush record cap reached, dropping further records"
                );
            }
            self.multi_flush_dropped += 1;
            return;
        }
        if let Some(snapshot) = self.tracker.snapshot(start) {
            self.multi_flush.push(snapshot);
        }
    }

    // ── Reporting ───────────────────────────────────────────────────────

    /// Snapshot the checker's findings.
    #[must_use]
    pub fn report(&self) -> CheckReport {
        CheckReport {
            stores_not_persisted: self.tracker.iter().map(StoreDetail::from).collect(),
            bytes_not_persisted: self.tracker.total_bytes(),
            multi_flush: self
                .multi_flush
                .iter()
                .cloned()
                .map(StoreDetail::from)
                .collect(),
            overwrites: self
                .overwrites
                .iter()
                .cloned()
                .map(StoreDetail::from)
                .collect(),
        }
    }

    /// End the session: emit the `|STOP` marker and return the final report.
    #[must_use]
    pub fn finish(mut self) -> CheckReport {
        self.log.stop();
        self.report()
    }
}
