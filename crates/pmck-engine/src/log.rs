//! The persistence event log.
//!
//! A sink over any byte stream emitting fixed-format, `|`-prefixed
//! records. Logging is a side effect only: it never affects the state
//! machine, and write failures are swallowed so the store ingestion path
//! cannot fail on normal input.
//!
//! Gating (everything except the session markers and `REGISTER_FILE`):
//! records are emitted only while logging is compiled in via the
//! `log_stores` configuration *and* either the runtime toggle is on or the
//! gate passed by the caller says a loggable region is in play. `STORE`
//! records gate on the specific store hitting a loggable region; all other
//! records gate on at least one loggable region being registered.

use pmck_types::MemSpan;
use std::io::Write;

/// Marker records for the offline reordering consumer. They carry no
/// state-machine meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderMarker {
    FullReorder,
    PartialReorder,
    OnlyFault,
    StopReorderFault,
}

impl ReorderMarker {
    fn record(self) -> &'static str {
        match self {
            Self::FullReorder => "|FREORDER",
            Self::PartialReorder => "|PREORDER",
            Self::OnlyFault => "|FAULT_ONLY",
            Self::StopReorderFault => "|NO_REORDER_FAULT",
        }
    }
}

pub struct EventLog {
    sink: Option<Box<dyn Write>>,
    /// The `log_stores` configuration flag.
    enabled: bool,
    /// The runtime toggle driven by client requests.
    toggle: bool,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("sink", &self.sink.is_some())
            .field("enabled", &self.enabled)
            .field("toggle", &self.toggle)
            .finish()
    }
}

impl EventLog {
    /// Create the log. Emits the `START` session marker when logging is
    /// requested and a sink is attached.
    pub fn new(enabled: bool, sink: Option<Box<dyn Write>>) -> Self {
        let mut log = Self {
            sink,
            enabled,
            toggle: false,
        };
        if log.enabled {
            log.emit("START");
        }
        log
    }

    /// Disabled log with no sink.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sink: None,
            enabled: false,
            toggle: false,
        }
    }

    pub fn set_toggle(&mut self, on: bool) {
        self.toggle = on;
    }

    fn gate(&self, loggable: bool) -> bool {
        self.enabled && (self.toggle || loggable)
    }

    fn emit(&mut self, record: &str) {
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.write_all(record.as_bytes());
        }
    }

    /// `hits_loggable`: whether this specific store overlaps a loggable region.
    pub fn store(&mut self, span: MemSpan, value: u64, hits_loggable: bool) {
        if self.gate(hits_loggable) {
            self.emit(&format!(
                "|STORE;{:#x};{value:#x};{:#x}",
                span.addr(),
                span.size()
            ));
        }
    }

    /// `window` is the already cache-line-aligned flush window.
    pub fn flush(&mut self, window: MemSpan, any_loggable: bool) {
        if self.gate(any_loggable) {
            self.emit(&format!(
                "|FLUSH;{:#x};{:#x}",
                window.addr(),
                window.size()
            ));
        }
    }

    pub fn fence(&mut self, any_loggable: bool) {
        if self.gate(any_loggable) {
            self.emit("|FENCE");
        }
    }

    pub fn commit(&mut self, any_loggable: bool) {
        if self.gate(any_loggable) {
            self.emit("|COMMIT");
        }
    }

    pub fn marker(&mut self, marker: ReorderMarker, any_loggable: bool) {
        if self.gate(any_loggable) {
            self.emit(marker.record());
        }
    }

    /// File registrations log whenever logging is enabled; the runtime
    /// toggle does not apply to them.
    pub fn register_file(&mut self, path: &str, span: MemSpan, offset: u64) {
        if self.enabled {
            self.emit(&format!(
                "|REGISTER_FILE;{path};{:#x};{:#x};{offset:#x}",
                span.addr(),
                span.size()
            ));
        }
    }

    /// End-of-session marker.
    pub fn stop(&mut self) {
        if self.enabled {
            self.emit("|STOP\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn span(addr: u64, size: u64) -> MemSpan {
        MemSpan::new(addr, size).unwrap()
    }

    #[test]
    fn session_markers() {
        let buf = SharedBuf::default();
        let mut log = EventLog::new(true, Some(Box::new(buf.clone())));
        log.stop();
        assert_eq!(buf.contents(), "START|STOP\n");
    }

    #[test]
    fn disabled_log_emits_nothing() {
        let buf = SharedBuf::default();
        let mut log = EventLog::new(false, Some(Box::new(buf.clone())));
        log.set_toggle(true);
        log.store(span(0x1000, 8), 0xAA, true);
        log.fence(true);
        log.stop();
        assert_eq!(buf.contents(), "");
    }

    #[test]
    fn store_record_format_and_field_order() {
        let buf = SharedBuf::default();
        let mut log = EventLog::new(true, Some(Box::new(buf.clone())));
        log.set_toggle(true);
        // Value comes before size.
        log.store(span(0x1000, 8), 0xDEAD, false);
        assert_eq!(buf.contents(), "START|STORE;0x1000;0xdead;0x8");
    }

    #[test]
    fn store_gates_on_toggle_or_region_hit() {
        let buf = SharedBuf::default();
        let mut log = EventLog::new(true, Some(Box::new(buf.clone())));

        // Toggle off, no hit: nothing.
        log.store(span(0x1000, 8), 1, false);
        assert_eq!(buf.contents(), "START");

        // Toggle off, loggable hit: emitted.
        log.store(span(0x1000, 8), 1, true);
        assert_eq!(buf.contents(), "START|STORE;0x1000;0x1;0x8");
    }

    #[test]
    fn state_machine_records() {
        let buf = SharedBuf::default();
        let mut log = EventLog::new(true, Some(Box::new(buf.clone())));
        log.set_toggle(true);
        log.flush(span(0x1000, 64), false);
        log.fence(false);
        log.commit(false);
        log.marker(ReorderMarker::FullReorder, false);
        log.marker(ReorderMarker::PartialReorder, false);
        log.marker(ReorderMarker::OnlyFault, false);
        log.marker(ReorderMarker::StopReorderFault, false);
        assert_eq!(
            buf.contents(),
            "START|FLUSH;0x1000;0x40|FENCE|COMMIT|FREORDER|PREORDER|FAULT_ONLY|NO_REORDER_FAULT"
        );
    }

    #[test]
    fn register_file_ignores_toggle() {
        let buf = SharedBuf::default();
        let mut log = EventLog::new(true, Some(Box::new(buf.clone())));
        log.register_file("/mnt/pmem/pool", span(0x1000, 0x1000), 0x40);
        assert_eq!(
            buf.contents(),
            "START|REGISTER_FILE;/mnt/pmem/pool;0x1000;0x1000;0x40"
        );
    }
}
