//! Cache store lifecycle through the pipeline
//!
//! Eviction bounds and corruption self-healing, exercised end-to-end
//! rather than against the store in isolation.

mod fixtures;

use std::fs;
use std::thread;
use std::time::Duration;

use fixtures::{FixtureWorkspace, TARGET};

use xcodecache::orchestrator::{post, pre, printenv};
use xcodecache::store::PRODUCT_TAR;

fn run_miss_cycle(ws: &FixtureWorkspace, cache_count: usize) {
    let report = pre::run(
        &mut ws.run_context_with_cache_count(cache_count),
        &ws.build_args(),
    )
    .unwrap();
    assert_eq!(report.misses, 1);

    ws.simulate_compile();
    printenv::run(TARGET, &ws.project_dir(), &ws.build_env()).unwrap();

    post::run(
        &mut ws.run_context_with_cache_count(cache_count),
        &ws.build_args(),
    )
    .unwrap();
}

// =============================================================================
// S5 / property 5: entry count is bounded, oldest evicted first
// =============================================================================

#[test]
fn test_eviction_keeps_newest_entries() {
    let ws = FixtureWorkspace::new();

    run_miss_cycle(&ws, 2);
    let first_entry = entry_names(&ws);
    assert_eq!(first_entry.len(), 1);

    thread::sleep(Duration::from_millis(20));
    ws.touch_source("v2");
    run_miss_cycle(&ws, 2);
    assert_eq!(ws.cache_entry_count(), 2);

    thread::sleep(Duration::from_millis(20));
    ws.touch_source("v3");
    run_miss_cycle(&ws, 2);

    // Bound holds and the oldest-by-mtime entry is the one that went.
    assert_eq!(ws.cache_entry_count(), 2);
    let remaining = entry_names(&ws);
    assert!(
        !remaining.contains(&first_entry[0]),
        "oldest entry {} should have been evicted, kept {:?}",
        first_entry[0],
        remaining
    );
}

// =============================================================================
// Property 7: a corrupted archive self-heals into a miss
// =============================================================================

#[test]
fn test_corrupt_entry_heals_to_miss() {
    let ws = FixtureWorkspace::new();
    run_miss_cycle(&ws, 100);

    // Hand-corrupt the archived product.
    let entry = fs::read_dir(ws.cache_root())
        .unwrap()
        .filter_map(Result::ok)
        .find(|e| e.path().is_dir())
        .unwrap()
        .path();
    fs::write(entry.join(PRODUCT_TAR), "corrupted bytes").unwrap();

    // The next pre deletes the entry on encounter and reports a miss.
    let report = pre::run(&mut ws.run_context(), &ws.build_args()).unwrap();
    assert_eq!(report.misses, 1);
    assert_eq!(report.hits, 0);
    assert!(!entry.exists(), "corrupt entry must be removed");
}

// =============================================================================
// Hits refresh mtimes so warm targets survive eviction pressure
// =============================================================================

#[test]
fn test_hit_refreshes_entry_mtime() {
    let ws = FixtureWorkspace::new();
    run_miss_cycle(&ws, 100);

    let entry = fs::read_dir(ws.cache_root())
        .unwrap()
        .filter_map(Result::ok)
        .find(|e| e.path().is_dir())
        .unwrap()
        .path();
    let before = fs::metadata(&entry).unwrap().modified().unwrap();

    thread::sleep(Duration::from_millis(50));
    let report = pre::run(&mut ws.run_context(), &ws.build_args()).unwrap();
    assert_eq!(report.hits, 1);

    let after = fs::metadata(&entry).unwrap().modified().unwrap();
    assert!(after > before, "binding a hit must refresh the entry mtime");
}

fn entry_names(ws: &FixtureWorkspace) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(ws.cache_root())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
