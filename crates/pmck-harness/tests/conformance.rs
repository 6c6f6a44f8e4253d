#![forbid(unsafe_code)]

use pmck_engine::{CheckerConfig, StoreState};
use pmck_harness::{load_trace_fixture, run_fixture, run_trace};
use std::path::Path;

fn fixture_path(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .expect("workspace root")
        .join("conformance")
        .join("fixtures")
        .join(name)
}

fn default_config() -> CheckerConfig {
    CheckerConfig::default()
}

#[test]
fn unflushed_store_is_reported() {
    let report = run_trace(
        default_config(),
        "map 0x1000 0x40\n\
         store 0x1000 8 0xdead\n",
    )
    .expect("replay");

    assert_eq!(report.stores_not_persisted.len(), 1);
    let detail = &report.stores_not_persisted[0];
    assert_eq!(detail.addr, 0x1000);
    assert_eq!(detail.size, 8);
    assert_eq!(detail.state, StoreState::Dirty);
    assert_eq!(report.bytes_not_persisted, 8);
}

#[test]
fn full_persistence_cycle_is_clean() {
    let report = run_trace(
        default_config(),
        "map 0x1000 0x40\n\
         store 0x1000 8 0xaa\n\
         flush 0x1000 64\n\
         fence\n\
         commit\n\
         fence\n",
    )
    .expect("replay");

    assert!(report.is_clean());
    assert_eq!(report.bytes_not_persisted, 0);
}

#[test]
fn overwrite_is_flagged() {
    let config = CheckerConfig {
        track_multiple_stores: true,
        store_sb_indiff: 0,
        ..default_config()
    };
    let report = run_trace(
        config,
        "map 0x1000 0x40\n\
         store 0x1000 8 0xa\n\
         store 0x1000 8 0xb\n",
    )
    .expect("replay");

    assert_eq!(report.overwrites.len(), 1);
    assert_eq!(report.overwrites[0].value, 0xA);
    assert_eq!(report.stores_not_persisted.len(), 1);
    assert_eq!(report.stores_not_persisted[0].value, 0xB);
}

#[test]
fn overwrite_suppressed_inside_indifference_window() {
    let config = CheckerConfig {
        track_multiple_stores: true,
        store_sb_indiff: 1000,
        ..default_config()
    };
    let report = run_trace(
        config,
        "map 0x1000 0x40\n\
         store 0x1000 8 0xa\n\
         store 0x1000 8 0xa\n",
    )
    .expect("replay");

    assert!(report.overwrites.is_empty());
    assert_eq!(report.stores_not_persisted.len(), 1);
}

#[test]
fn redundant_flush_is_recorded() {
    let config = CheckerConfig {
        check_flush: true,
        ..default_config()
    };
    let report = run_trace(
        config,
        "map 0x1000 0x40\n\
         store 0x1000 8 0xaa\n\
         flush 0x1000 64\n\
         flush 0x1000 64\n",
    )
    .expect("replay");

    assert_eq!(report.multi_flush.len(), 1);
    assert_eq!(report.stores_not_persisted.len(), 1);
    assert_eq!(report.stores_not_persisted[0].state, StoreState::Flushed);
}

#[test]
fn partial_flush_leaves_dirty_fragment() {
    let report = run_trace(
        default_config(),
        "map 0x1000 0x100\n\
         store 0x1000 128 0x0\n\
         flush 0x1000 64\n\
         fence\n\
         commit\n\
         fence\n",
    )
    .expect("replay");

    assert_eq!(report.stores_not_persisted.len(), 1);
    let remaining = &report.stores_not_persisted[0];
    assert_eq!(remaining.addr, 0x1040);
    assert_eq!(remaining.size, 64);
    assert_eq!(remaining.state, StoreState::Dirty);
    assert!(report.overwrites.is_empty());
    assert!(report.multi_flush.is_empty());
}

#[test]
fn fixtures_replay_to_expected_reports() {
    let unflushed =
        load_trace_fixture(&fixture_path("unflushed_store.json")).expect("unflushed fixture");
    let report = run_fixture(&unflushed).expect("unflushed replay");
    assert_eq!(report.stores_not_persisted.len(), 1);
    assert_eq!(report.bytes_not_persisted, 8);

    let cycle =
        load_trace_fixture(&fixture_path("persistence_cycle.json")).expect("cycle fixture");
    let report = run_fixture(&cycle).expect("cycle replay");
    assert!(report.is_clean());

    let overwrite =
        load_trace_fixture(&fixture_path("tracked_overwrite.json")).expect("overwrite fixture");
    let report = run_fixture(&overwrite).expect("overwrite replay");
    assert_eq!(report.overwrites.len(), 1);
}
