//! Client-request routing.
//!
//! The host forwards numbered requests with up to four word-sized
//! arguments; the router maps them onto checker operations. Unknown
//! opcodes warn and return [`RequestOutcome::NotHandled`] so the host can
//! fall through to other handlers.
//!
//! The router also accepts the textual debugger-command subprotocol
//! (`help`, `print_stats`, `print_pmem_regions`, `print_log_regions`) with
//! unique-prefix matching.

use crate::engine::Checker;
use crate::log::ReorderMarker;
use crate::report::render_regions;
use std::io::{self, Write};
use tracing::warn;

/// Request-code namespace (`'P' 'C'` in the two high bytes).
pub const REQUEST_BASE: u64 = 0x5043_0000;

/// Numbered client-request opcodes.
pub mod opcode {
    use super::REQUEST_BASE;

    pub const REGISTER_MAPPING: u64 = REQUEST_BASE;
    pub const REGISTER_FILE: u64 = REQUEST_BASE + 1;
    pub const REMOVE_MAPPING: u64 = REQUEST_BASE + 2;
    pub const CHECK_IS_MAPPING: u64 = REQUEST_BASE + 3;
    pub const DO_FLUSH: u64 = REQUEST_BASE + 4;
    pub const DO_FENCE: u64 = REQUEST_BASE + 5;
    pub const DO_COMMIT: u64 = REQUEST_BASE + 6;
    pub const WRITE_STATS: u64 = REQUEST_BASE + 7;
    pub const PRINT_PMEM_MAPPINGS: u64 = REQUEST_BASE + 8;
    pub const LOG_STORES: u64 = REQUEST_BASE + 9;
    pub const NO_LOG_STORES: u64 = REQUEST_BASE + 10;
    pub const ADD_LOG_REGION: u64 = REQUEST_BASE + 11;
    pub const REMOVE_LOG_REGION: u64 = REQUEST_BASE + 12;
    pub const FULL_REORDER: u64 = REQUEST_BASE + 13;
    pub const PARTIAL_REORDER: u64 = REQUEST_BASE + 14;
    pub const ONLY_FAULT: u64 = REQUEST_BASE + 15;
    pub const STOP_REORDER_FAULT: u64 = REQUEST_BASE + 16;
}

/// Outcome of routing a client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The request was recognized; the value is returned to the client.
    Handled(u64),
    /// Not a request this tool recognizes.
    NotHandled,
}

const MONITOR_COMMANDS: [&str; 4] = [
    "help",
    "print_stats",
    "print_pmem_regions",
    "print_log_regions",
];

const MONITOR_HELP: &str = "\nchecker monitor commands:\n  \
    print_stats\n        prints the summary\n  \
    print_pmem_regions\n        prints the registered persistent memory regions\n  \
    print_log_regions\n        prints the registered loggable persistent memory regions\n\n";

impl Checker {
    /// Route a numbered client request.
    ///
    /// `out` receives the textual output of the reporting requests.
    pub fn handle_request(
        &mut self,
        code: u64,
        args: [u64; 4],
        out: &mut dyn Write,
    ) -> io::Result<RequestOutcome> {
        let ret = match code {
            opcode::REGISTER_MAPPING => {
                self.register_mapping(args[0], args[1]);
                1
            }
            opcode::REMOVE_MAPPING => {
                self.remove_mapping(args[0], args[1]);
                1
            }
            opcode::REGISTER_FILE => match i64::try_from(args[0]) {
                Ok(fd) if fd >= 0 => u64::from(self.register_file(fd, args[1], args[2], args[3])),
                _ => 0,
            },
            opcode::CHECK_IS_MAPPING => self.check_mapping(args[0], args[1]).as_code(),
            opcode::DO_FLUSH => {
                self.flush(args[0], args[1]);
                1
            }
            opcode::DO_FENCE => {
                self.fence();
                1
            }
            opcode::DO_COMMIT => {
                self.commit();
                1
            }
            opcode::WRITE_STATS => {
                self.report().render(out)?;
                1
            }
            opcode::PRINT_PMEM_MAPPINGS => {
                render_regions(
                    out,
                    "Registered persistent memory regions:",
                    &self.persistent_mappings(),
                )?;
                1
            }
            opcode::LOG_STORES => {
                self.set_logging(true);
                1
            }
            opcode::NO_LOG_STORES => {
                self.set_logging(false);
                1
            }
            opcode::ADD_LOG_REGION => {
                self.add_log_region(args[0], args[1]);
                1
            }
            opcode::REMOVE_LOG_REGION => {
                self.remove_log_region(args[0], args[1]);
                1
            }
            opcode::FULL_REORDER => {
                self.reorder_marker(ReorderMarker::FullReorder);
                1
            }
            opcode::PARTIAL_REORDER => {
                self.reorder_marker(ReorderMarker::PartialReorder);
                1
            }
            opcode::ONLY_FAULT => {
                self.reorder_marker(ReorderMarker::OnlyFault);
                1
            }
            opcode::STOP_REORDER_FAULT => {
                self.reorder_marker(ReorderMarker::StopReorderFault);
                1
            }
            _ => {
                warn!("unknown client request code {code:#x}");
                return Ok(RequestOutcome::NotHandled);
            }
        };
        Ok(RequestOutcome::Handled(ret))
    }

    /// Handle a textual debugger command.
    ///
    /// Commands match on unique prefixes; an ambiguous prefix reports the
    /// candidates and counts as handled. Returns false for commands this
    /// tool does not recognize.
    pub fn handle_monitor_command(&mut self, line: &str, out: &mut dyn Write) -> io::Result<bool> {
        let Some(word) = line.split_whitespace().next() else {
            return Ok(false);
        };

        let matches: Vec<&str> = MONITOR_COMMANDS
            .iter()
            .copied()
            .filter(|cmd| cmd.starts_with(word))
            .collect();

        let command = match matches.as_slice() {
            [] => return Ok(false),
            [single] => *single,
            many => {
                writeln!(out, "{word} can match: {}", many.join(" "))?;
                return Ok(true);
            }
        };

        match command {
            "help" => out.write_all(MONITOR_HELP.as_bytes())?,
            "print_stats" => self.report().render(out)?,
            "print_pmem_regions" => render_regions(
                out,
                "Registered persistent memory regions:",
                &self.persistent_mappings(),
            )?,
            "print_log_regions" => render_regions(
                out,
                "Registered loggable persistent memory regions:",
                &self.loggable_regions(),
            )?,
            _ => unreachable!("filtered against the command table"),
        }
        Ok(true)
    }
}
