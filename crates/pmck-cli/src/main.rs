#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pmck::{Checker, CheckerConfig, FlushAlign, MemSpan, PmckError, probe_flush_align};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "pmck", about = "Permacheck — persistent-memory store checker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay an event trace and report persistence findings.
    Check {
        /// Path to the trace file.
        trace: PathBuf,
        /// Track multiple stores to the same address.
        #[arg(long, value_parser = parse_yes_no, action = clap::ArgAction::Set, default_value = "no")]
        mult_stores: bool,
        /// Multiple-store indifference window, in superblocks.
        #[arg(long, default_value_t = 0)]
        indiff: u64,
        /// Log all stores to persistence on standard output.
        #[arg(long, value_parser = parse_yes_no, action = clap::ArgAction::Set, default_value = "no")]
        log_stores: bool,
        /// Print the summary on exit.
        #[arg(long, value_parser = parse_yes_no, action = clap::ArgAction::Set, default_value = "yes")]
        print_summary: bool,
        /// Register multiple flushes of stores.
        #[arg(long, value_parser = parse_yes_no, action = clap::ArgAction::Set, default_value = "no")]
        flush_check: bool,
        /// Override the probed cache-line size (power of two).
        #[arg(long)]
        flush_align: Option<u64>,
        /// Output the summary in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Replay a trace and dump the registered persistent regions.
    Regions {
        /// Path to the trace file.
        trace: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

fn parse_yes_no(value: &str) -> std::result::Result<bool, String> {
    match value {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(format!("expected `yes` or `no`, got `{other}`")),
    }
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RegionsOutput {
    regions: Vec<RegionOutput>,
}

#[derive(Debug, Serialize)]
struct RegionOutput {
    addr: u64,
    size: u64,
}

impl From<MemSpan> for RegionOutput {
    fn from(span: MemSpan) -> Self {
        Self {
            addr: span.addr(),
            size: span.size(),
        }
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Check {
            trace,
            mult_stores,
            indiff,
            log_stores,
            print_summary,
            flush_check,
            flush_align,
            json,
        } => check(
            &trace,
            &CheckOptions {
                mult_stores,
                indiff,
                log_stores,
                print_summary,
                flush_check,
                flush_align,
                json,
            },
        ),
        Command::Regions { trace, json } => regions(&trace, json),
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("pmck: {err:#}");
            ExitCode::FAILURE
        }
    }
}

struct CheckOptions {
    mult_stores: bool,
    indiff: u64,
    log_stores: bool,
    print_summary: bool,
    flush_check: bool,
    flush_align: Option<u64>,
    json: bool,
}

fn build_config(options: &CheckOptions) -> Result<CheckerConfig> {
    let flush_align = match options.flush_align {
        Some(value) => {
            FlushAlign::new(value).with_context(|| format!("invalid --flush-align {value}"))?
        }
        None => probe_flush_align(),
    };
    Ok(CheckerConfig {
        track_multiple_stores: options.mult_stores,
        log_stores: options.log_stores,
        print_summary: options.print_summary,
        check_flush: options.flush_check,
        store_sb_indiff: options.indiff,
        flush_align,
    })
}

fn load_events(trace: &Path) -> Result<Vec<pmck_trace::TraceEvent>> {
    let text = fs::read_to_string(trace)
        .with_context(|| format!("failed to read trace {}", trace.display()))?;
    pmck_trace::parse_trace(&text).context("trace did not parse")
}

fn check(trace: &Path, options: &CheckOptions) -> Result<ExitCode> {
    let events = load_events(trace)?;
    let config = build_config(options)?;

    let sink: Option<Box<dyn Write>> = options
        .log_stores
        .then(|| Box::new(io::stdout()) as Box<dyn Write>);
    let mut checker = Checker::with_log_sink(config, sink);

    let mut stdout = io::stdout();
    if let Err(err) = pmck_trace::replay(&mut checker, &events, &mut stdout) {
        if let PmckError::OverwriteFlood { cap } = err {
            eprintln!("The number of overwritten stores exceeded {cap}\n");
            eprintln!(
                "This either means there is something fundamentally wrong with your program,\n\
                 or you are using your persistent memory as volatile memory."
            );
            return Ok(ExitCode::FAILURE);
        }
        return Err(err.into());
    }

    let report = checker.finish();
    if options.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
    } else if options.print_summary {
        report.render(&mut stdout).context("write summary")?;
    }

    Ok(ExitCode::SUCCESS)
}

fn regions(trace: &Path, json: bool) -> Result<ExitCode> {
    let events = load_events(trace)?;
    let mut checker = Checker::new(CheckerConfig::default());
    let mut sink = io::sink();
    pmck_trace::replay(&mut checker, &events, &mut sink).context("replay failed")?;

    let mappings = checker.persistent_mappings();
    if json {
        let output = RegionsOutput {
            regions: mappings.into_iter().map(RegionOutput::from).collect(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize regions")?
        );
    } else {
        let mut stdout = io::stdout();
        pmck::render_regions(
            &mut stdout,
            "Registered persistent memory regions:",
            &mappings,
        )
        .context("write regions")?;
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_parser() {
        assert_eq!(parse_yes_no("yes"), Ok(true));
        assert_eq!(parse_yes_no("no"), Ok(false));
        assert!(parse_yes_no("maybe").is_err());
    }

    #[test]
    fn cli_parses_check_flags() {
        let cli = Cli::try_parse_from([
            "pmck",
            "check",
            "run.trace",
            "--mult-stores=yes",
            "--indiff=100",
            "--flush-check=yes",
            "--flush-align=128",
            "--json",
        ])
        .expect("valid invocation");

        match cli.command {
            Command::Check {
                mult_stores,
                indiff,
                flush_check,
                flush_align,
                json,
                print_summary,
                log_stores,
                ..
            } => {
                assert!(mult_stores);
                assert_eq!(indiff, 100);
                assert!(flush_check);
                assert_eq!(flush_align, Some(128));
                assert!(json);
                assert!(print_summary);
                assert!(!log_stores);
            }
            Command::Regions { .. } => panic!("expected check"),
        }
    }

    #[test]
    fn cli_rejects_invalid_flag_value() {
        assert!(Cli::try_parse_from(["pmck", "check", "run.trace", "--mult-stores=maybe"]).is_err());
    }

    #[test]
    fn config_uses_injected_alignment() {
        let options = CheckOptions {
            mult_stores: false,
            indiff: 0,
            log_stores: false,
            print_summary: true,
            flush_check: false,
            flush_align: Some(128),
            json: false,
        };
        let config = build_config(&options).unwrap();
        assert_eq!(config.flush_align.get(), 128);

        let bad = CheckOptions {
            flush_align: Some(48),
            ..options
        };
        assert!(build_config(&bad).is_err());
    }
}
