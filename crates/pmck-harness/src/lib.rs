#![forbid(unsafe_code)]
//! Fixture loading and scenario drivers for checker tests.
//!
//! Fixtures are JSON files pairing a checker configuration with an event
//! list; [`run_fixture`] and [`run_trace`] replay them and return the
//! final report for assertions.

use anyhow::{Context, Result};
use pmck_engine::{CheckReport, Checker, CheckerConfig, FlushAlign};
use pmck_trace::TraceEvent;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Checker configuration as it appears in fixture files. Field names
/// mirror the CLI flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureConfig {
    #[serde(default)]
    pub mult_stores: bool,
    #[serde(default)]
    pub indiff: u64,
    #[serde(default)]
    pub log_stores: bool,
    #[serde(default)]
    pub flush_check: bool,
    #[serde(default)]
    pub flush_align: Option<u64>,
}

impl FixtureConfig {
    pub fn to_checker_config(&self) -> Result<CheckerConfig> {
        let flush_align = match self.flush_align {
            Some(value) => FlushAlign::new(value)
                .with_context(|| format!("fixture flush_align {value} is invalid"))?,
            None => FlushAlign::DEFAULT,
        };
        Ok(CheckerConfig {
            track_multiple_stores: self.mult_stores,
            log_stores: self.log_stores,
            print_summary: true,
            check_flush: self.flush_check,
            store_sb_indiff: self.indiff,
            flush_align,
        })
    }
}

/// A named trace fixture: configuration plus event list.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceFixture {
    pub name: String,
    #[serde(default)]
    pub config: FixtureConfig,
    pub events: Vec<TraceEvent>,
}

/// Load a JSON trace fixture from disk.
pub fn load_trace_fixture(path: &Path) -> Result<TraceFixture> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid fixture json {}", path.display()))
}

/// Replay a fixture and return the final report.
pub fn run_fixture(fixture: &TraceFixture) -> Result<CheckReport> {
    let mut checker = Checker::new(fixture.config.to_checker_config()?);
    let mut out = Vec::new();
    pmck_trace::replay(&mut checker, &fixture.events, &mut out)
        .with_context(|| format!("replay failed for fixture {}", fixture.name))?;
    Ok(checker.finish())
}

/// Parse and replay a textual trace under the given configuration.
pub fn run_trace(config: CheckerConfig, text: &str) -> Result<CheckReport> {
    let events = pmck_trace::parse_trace(text).context("trace did not parse")?;
    let mut checker = Checker::new(config);
    let mut out = Vec::new();
    pmck_trace::replay(&mut checker, &events, &mut out).context("replay failed")?;
    Ok(checker.finish())
}
