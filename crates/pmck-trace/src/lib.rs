#![forbid(unsafe_code)]
//! Textual event traces for the checker.
//!
//! A trace is a line-oriented recording of the event stream the
//! instrumentation host would deliver live: one event per line, `#` to end
//! of line is a comment, blank lines are ignored. Numbers accept `0x` hex
//! or decimal.
//!
//! ```text
//! map 0x1000 0x40          # register persistent mapping
//! store 0x1000 0x8 0xdead  # addr size value
//! flush 0x1000 0x40
//! fence
//! commit
//! ```
//!
//! [`replay`] feeds a parsed trace to a [`Checker`] in order, which is how
//! the CLI and the conformance tests drive the engine.

use pmck_engine::{Checker, ReorderMarker};
use pmck_error::{PmckError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

/// One event in a trace, mirroring the host-delivered event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Map { addr: u64, size: u64 },
    Unmap { addr: u64, size: u64 },
    SbEnter,
    Store { addr: u64, size: u64, value: u64 },
    Flush { addr: u64, size: u64 },
    Fence,
    Commit,
    LogOn,
    LogOff,
    LogRegion { addr: u64, size: u64 },
    UnlogRegion { addr: u64, size: u64 },
    FullReorder,
    PartialReorder,
    OnlyFault,
    StopReorderFault,
    Stats,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Map { addr, size } => write!(f, "map {addr:#x} {size:#x}"),
            Self::Unmap { addr, size } => write!(f, "unmap {addr:#x} {size:#x}"),
            Self::SbEnter => f.write_str("sb"),
            Self::Store { addr, size, value } => {
                write!(f, "store {addr:#x} {size:#x} {value:#x}")
            }
            Self::Flush { addr, size } => write!(f, "flush {addr:#x} {size:#x}"),
            Self::Fence => f.write_str("fence"),
            Self::Commit => f.write_str("commit"),
            Self::LogOn => f.write_str("logon"),
            Self::LogOff => f.write_str("logoff"),
            Self::LogRegion { addr, size } => write!(f, "logreg {addr:#x} {size:#x}"),
            Self::UnlogRegion { addr, size } => write!(f, "logunreg {addr:#x} {size:#x}"),
            Self::FullReorder => f.write_str("freorder"),
            Self::PartialReorder => f.write_str("preorder"),
            Self::OnlyFault => f.write_str("faultonly"),
            Self::StopReorderFault => f.write_str("noreorderfault"),
            Self::Stats => f.write_str("stats"),
        }
    }
}

/// Parse a whole trace, reporting the first malformed line.
pub fn parse_trace(text: &str) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if let Some(event) = parse_line(line).map_err(|detail| PmckError::TraceParse {
            line: line_no,
            detail,
        })? {
            events.push(event);
        }
    }
    Ok(events)
}

/// Parse one line. Comments and blank lines yield `None`.
fn parse_line(line: &str) -> std::result::Result<Option<TraceEvent>, String> {
    let content = line.split('#').next().unwrap_or("").trim();
    if content.is_empty() {
        return Ok(None);
    }

    let mut tokens = content.split_whitespace();
    let Some(keyword) = tokens.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = tokens.collect();

    let event = match keyword {
        "map" => span_event(&args, |addr, size| TraceEvent::Map { addr, size })?,
        "unmap" => span_event(&args, |addr, size| TraceEvent::Unmap { addr, size })?,
        "sb" => bare_event(&args, TraceEvent::SbEnter)?,
        "store" => {
            let [addr, size, value] = parse_args::<3>(&args)?;
            TraceEvent::Store { addr, size, value }
        }
        "flush" => span_event(&args, |addr, size| TraceEvent::Flush { addr, size })?,
        "fence" => bare_event(&args, TraceEvent::Fence)?,
        "commit" => bare_event(&args, TraceEvent::Commit)?,
        "logon" => bare_event(&args, TraceEvent::LogOn)?,
        "logoff" => bare_event(&args, TraceEvent::LogOff)?,
        "logreg" => span_event(&args, |addr, size| TraceEvent::LogRegion { addr, size })?,
        "logunreg" => span_event(&args, |addr, size| TraceEvent::UnlogRegion { addr, size })?,
        "freorder" => bare_event(&args, TraceEvent::FullReorder)?,
        "preorder" => bare_event(&args, TraceEvent::PartialReorder)?,
        "faultonly" => bare_event(&args, TraceEvent::OnlyFault)?,
        "noreorderfault" => bare_event(&args, TraceEvent::StopReorderFault)?,
        "stats" => bare_event(&args, TraceEvent::Stats)?,
        other => return Err(format!("unknown event keyword `{other}`")),
    };
    Ok(Some(event))
}

fn bare_event(args: &[&str], event: TraceEvent) -> std::result::Result<TraceEvent, String> {
    if args.is_empty() {
        Ok(event)
    } else {
        Err(format!("expected no arguments, got {}", args.len()))
    }
}

fn span_event(
    args: &[&str],
    build: impl FnOnce(u64, u64) -> TraceEvent,
) -> std::result::Result<TraceEvent, String> {
    let [addr, size] = parse_args::<2>(args)?;
    Ok(build(addr, size))
}

fn parse_args<const N: usize>(args: &[&str]) -> std::result::Result<[u64; N], String> {
    if args.len() != N {
        return Err(format!("expected {N} arguments, got {}", args.len()));
    }
    let mut out = [0_u64; N];
    for (slot, token) in out.iter_mut().zip(args) {
        *slot = parse_u64(token)?;
    }
    Ok(out)
}

fn parse_u64(token: &str) -> std::result::Result<u64, String> {
    let parsed = match token.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| format!("invalid number `{token}`"))
}

/// Render events in the canonical line format. Parsing the result yields
/// the same events back.
#[must_use]
pub fn render_trace(events: &[TraceEvent]) -> String {
    let mut out = String::new();
    for event in events {
        out.push_str(&event.to_string());
        out.push('\n');
    }
    out
}

/// Feed a trace to the checker in order.
///
/// `out` receives the output of in-trace `stats` events. The overwrite
/// flood surfaces as an error; everything else is recorded inside the
/// checker for the final report.
pub fn replay(checker: &mut Checker, events: &[TraceEvent], out: &mut dyn Write) -> Result<()> {
    for event in events {
        match *event {
            TraceEvent::Map { addr, size } => checker.register_mapping(addr, size),
            TraceEvent::Unmap { addr, size } => checker.remove_mapping(addr, size),
            TraceEvent::SbEnter => checker.on_sb_enter(),
            TraceEvent::Store { addr, size, value } => checker.on_store(addr, size, value)?,
            TraceEvent::Flush { addr, size } => checker.flush(addr, size),
            TraceEvent::Fence => checker.fence(),
            TraceEvent::Commit => checker.commit(),
            TraceEvent::LogOn => checker.set_logging(true),
            TraceEvent::LogOff => checker.set_logging(false),
            TraceEvent::LogRegion { addr, size } => checker.add_log_region(addr, size),
            TraceEvent::UnlogRegion { addr, size } => checker.remove_log_region(addr, size),
            TraceEvent::FullReorder => checker.reorder_marker(ReorderMarker::FullReorder),
            TraceEvent::PartialReorder => checker.reorder_marker(ReorderMarker::PartialReorder),
            TraceEvent::OnlyFault => checker.reorder_marker(ReorderMarker::OnlyFault),
            TraceEvent::StopReorderFault => {
                checker.reorder_marker(ReorderMarker::StopReorderFault);
            }
            TraceEvent::Stats => checker.report().render(out)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmck_engine::CheckerConfig;

    #[test]
    fn parses_full_event_vocabulary() {
        let text = "\
            # a comment line\n\
            map 0x1000 0x40\n\
            sb\n\
            store 0x1000 8 0xdead\n\
            flush 0x1000 0x40\n\
            fence\n\
            commit\n\
            \n\
            logon\n\
            logreg 0x1000 0x40 # trailing comment\n\
            logunreg 0x1000 0x40\n\
            logoff\n\
            freorder\n\
            preorder\n\
            faultonly\n\
            noreorderfault\n\
            stats\n\
            unmap 0x1000 0x40\n";
        let events = parse_trace(text).unwrap();
        assert_eq!(events.len(), 16);
        assert_eq!(events[0], TraceEvent::Map {
            addr: 0x1000,
            size: 0x40
        });
        assert_eq!(events[2], TraceEvent::Store {
            addr: 0x1000,
            size: 8,
            value: 0xDEAD
        });
        assert_eq!(events[15], TraceEvent::Unmap {
            addr: 0x1000,
            size: 0x40
        });
    }

    #[test]
    fn error_carries_line_number() {
        let text = "map 0x1000 0x40\nstore 0x1000\n";
        let err = parse_trace(text).unwrap_err();
        match err {
            PmckError::TraceParse { line, detail } => {
                assert_eq!(line, 2);
                assert!(detail.contains("expected 3 arguments"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_unknown_keyword_and_bad_numbers() {
        assert!(parse_trace("warble\n").is_err());
        assert!(parse_trace("store 0x1000 8 zebra\n").is_err());
        assert!(parse_trace("fence now\n").is_err());
    }

    #[test]
    fn render_round_trips() {
        let events = vec![
            TraceEvent::Map {
                addr: 0x1000,
                size: 0x40,
            },
            TraceEvent::Store {
                addr: 0x1000,
                size: 8,
                value: 0xA,
            },
            TraceEvent::Flush {
                addr: 0x1000,
                size: 0x40,
            },
            TraceEvent::Fence,
            TraceEvent::Commit,
            TraceEvent::Stats,
        ];
        let text = render_trace(&events);
        assert_eq!(parse_trace(&text).unwrap(), events);
    }

    #[test]
    fn replay_drives_the_state_machine() {
        let text = "\
            map 0x1000 0x40\n\
            store 0x1000 8 0xaa\n\
            flush 0x1000 0x40\n\
            fence\n\
            commit\n\
            fence\n";
        let events = parse_trace(text).unwrap();

        let mut checker = Checker::new(CheckerConfig::default());
        let mut out = Vec::new();
        replay(&mut checker, &events, &mut out).unwrap();
        assert!(checker.finish().is_clean());
    }

    #[test]
    fn replay_stats_event_writes_summary() {
        let text = "map 0x1000 0x40\nstore 0x1000 8 0xaa\nstats\n";
        let events = parse_trace(text).unwrap();

        let mut checker = Checker::new(CheckerConfig::default());
        let mut out = Vec::new();
        replay(&mut checker, &events, &mut out).unwrap();
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("Number of stores not made persistent: 1"));
    }
}
