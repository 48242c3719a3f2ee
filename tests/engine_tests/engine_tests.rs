//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put/delete operations
//! - Last-writer-wins across flushes and compactions
//! - Tombstones before and after flush, compaction and restart
//! - Half-open range queries with every bound combination
//! - Compaction idempotence and space reclamation
//! - Engine lifecycle (open/close/reopen, in-memory mode)
//! - Deferred table swaps while the flush slot is occupied

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use strata::config::Config;
use strata::engine::Engine;
use strata::{Entry, StrataError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_engine(path: &Path) -> Engine {
    let config = Config::builder()
        .data_dir(path)
        .flush_threshold_bytes(1024 * 1024) // 1 MB
        .build();
    Engine::open(config).unwrap()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());
    (temp_dir, engine)
}

fn setup_temp_engine_with_small_threshold() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .flush_threshold_bytes(256) // Very small to trigger hand-offs
        .build();
    let engine = Engine::open(config).unwrap();
    (temp_dir, engine)
}

fn get_string(engine: &Engine, key: &str) -> Option<String> {
    engine
        .get_value(key.as_bytes())
        .unwrap()
        .map(|v| String::from_utf8(v.to_vec()).unwrap())
}

fn scan(engine: &Engine, from: Option<&str>, to: Option<&str>) -> Vec<(String, String)> {
    engine
        .get_range(from.map(str::as_bytes), to.map(str::as_bytes))
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (
                String::from_utf8(entry.key().to_vec()).unwrap(),
                String::from_utf8(entry.value().unwrap().to_vec()).unwrap(),
            )
        })
        .collect()
}

fn scan_keys(engine: &Engine, from: Option<&str>, to: Option<&str>) -> Vec<String> {
    scan(engine, from, to).into_iter().map(|(k, _)| k).collect()
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

/// Hand the active table off and wait until it is a segment
fn flush_and_wait(engine: &Engine) {
    engine.flush().unwrap();
    wait_until("flush", || engine.unflushed_table_count() == 0);
}

fn compact_and_wait(engine: &Engine) {
    engine.compact().unwrap();
    wait_until("compaction", || engine.is_compacted());
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let engine = Engine::open(Config::builder().data_dir(&data_dir).build()).unwrap();

    assert!(data_dir.is_dir());
    assert_eq!(engine.data_dir(), Some(data_dir.as_path()));
    assert_eq!(engine.segment_count(), 0);
}

#[test]
fn test_engine_open_rejects_zero_threshold() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .flush_threshold_bytes(0)
        .build();

    assert!(matches!(Engine::open(config), Err(StrataError::Config(_))));
}

#[test]
fn test_engine_put_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key1", b"value1").unwrap();

    assert_eq!(get_string(&engine, "key1"), Some("value1".to_string()));
    let entry = engine.get(b"key1").unwrap().unwrap();
    assert_eq!(entry.key().as_ref(), b"key1");
}

#[test]
fn test_engine_get_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();

    assert!(engine.get(b"missing").unwrap().is_none());
}

#[test]
fn test_engine_upsert_entry() {
    let (_temp, engine) = setup_temp_engine();

    engine.upsert(Entry::new(&b"k"[..], &b"v"[..])).unwrap();
    assert_eq!(get_string(&engine, "k"), Some("v".to_string()));

    engine.upsert(Entry::tombstone(&b"k"[..])).unwrap();
    assert!(engine.get(b"k").unwrap().is_none());
}

#[test]
fn test_engine_put_overwrite() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"v1").unwrap();
    engine.put(b"key", b"v2").unwrap();

    assert_eq!(get_string(&engine, "key"), Some("v2".to_string()));
}

#[test]
fn test_engine_delete_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();

    engine.delete(b"ghost").unwrap();

    assert!(engine.get(b"ghost").unwrap().is_none());
    assert!(scan(&engine, None, None).is_empty());
}

#[test]
fn test_engine_active_size_accounting() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"value").unwrap();
    engine.delete(b"other").unwrap();

    // (8 + 3 + 5) + (8 + 5)
    assert_eq!(engine.active_size(), 29);
    assert_eq!(engine.active_entry_count(), 2);
}

// =============================================================================
// Last-Writer-Wins Tests
// =============================================================================

#[test]
fn test_last_writer_wins_across_flushes() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"v1").unwrap();
    flush_and_wait(&engine);
    engine.put(b"key", b"v2").unwrap();
    flush_and_wait(&engine);
    engine.put(b"key", b"v3").unwrap();

    assert_eq!(engine.segment_count(), 2);
    assert_eq!(get_string(&engine, "key"), Some("v3".to_string()));

    flush_and_wait(&engine);
    assert_eq!(get_string(&engine, "key"), Some("v3".to_string()));
}

#[test]
fn test_last_writer_wins_across_compaction() {
    let (_temp, engine) = setup_temp_engine();

    for round in 0..4 {
        engine.put(b"key", format!("v{}", round).as_bytes()).unwrap();
        flush_and_wait(&engine);
    }
    compact_and_wait(&engine);

    assert_eq!(engine.segment_count(), 1);
    assert_eq!(get_string(&engine, "key"), Some("v3".to_string()));
}

#[test]
fn test_threshold_hands_off_tables() {
    let (temp, engine) = setup_temp_engine_with_small_threshold();

    for i in 0..200 {
        engine
            .put(format!("key_{:03}", i).as_bytes(), b"some value bytes")
            .unwrap();
    }

    // Every write stays readable while tables move through the pipeline
    for i in 0..200 {
        assert_eq!(
            get_string(&engine, &format!("key_{:03}", i)),
            Some("some value bytes".to_string())
        );
    }
    assert_eq!(scan(&engine, None, None).len(), 200);
    assert!(engine.active_entry_count() < 200);

    engine.close().unwrap();

    let engine = open_engine(temp.path());
    assert!(engine.segment_count() > 1);
    assert_eq!(scan(&engine, None, None).len(), 200);
}

#[test]
fn test_occupied_slot_defers_swap_without_blocking() {
    let temp_dir = TempDir::new().unwrap();
    let threshold = 1024;
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .flush_threshold_bytes(threshold)
        .build();
    let engine = Engine::open(config).unwrap();

    // A large table keeps the flush worker busy saving it, so the next
    // hand-off fills the slot and later swaps are deferred
    engine.put(b"big", &vec![b'x'; 16 * 1024 * 1024]).unwrap();
    engine.put(b"key_0000", b"value").unwrap();

    let mut max_active = 0;
    for i in 1..2000 {
        let started = Instant::now();
        engine
            .put(format!("key_{:04}", i).as_bytes(), b"value")
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1), "put blocked");

        max_active = max_active.max(engine.active_size());
        assert!(engine.unflushed_table_count() <= 2);
    }

    // The active table grew past the threshold instead of being swapped
    assert!(max_active > threshold);

    for i in 0..2000 {
        assert_eq!(
            get_string(&engine, &format!("key_{:04}", i)),
            Some("value".to_string())
        );
    }
    assert_eq!(scan_keys(&engine, Some("key_"), Some("key`")).len(), 2000);

    flush_and_wait(&engine);
    assert_eq!(scan_keys(&engine, Some("key_"), Some("key`")).len(), 2000);
    assert_eq!(engine.get_value(b"big").unwrap().unwrap().len(), 16 * 1024 * 1024);
}

// =============================================================================
// Tombstone Tests
// =============================================================================

#[test]
fn test_delete_before_flush() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"value").unwrap();
    engine.delete(b"key").unwrap();

    assert!(engine.get(b"key").unwrap().is_none());
}

#[test]
fn test_delete_hides_flushed_value() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"value").unwrap();
    flush_and_wait(&engine);
    engine.delete(b"key").unwrap();

    // Tombstone in the active table, value in a segment
    assert!(engine.get(b"key").unwrap().is_none());

    flush_and_wait(&engine);
    // Tombstone and value both on disk
    assert!(engine.get(b"key").unwrap().is_none());
    assert!(scan(&engine, None, None).is_empty());
}

#[test]
fn test_delete_survives_compaction_and_restart() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_engine(temp_dir.path());
        engine.put(b"keep", b"1").unwrap();
        engine.put(b"gone", b"1").unwrap();
        flush_and_wait(&engine);
        engine.delete(b"gone").unwrap();
        flush_and_wait(&engine);
        compact_and_wait(&engine);

        assert!(engine.get(b"gone").unwrap().is_none());
        engine.close().unwrap();
    }

    let engine = open_engine(temp_dir.path());
    assert!(engine.get(b"gone").unwrap().is_none());
    assert_eq!(get_string(&engine, "keep"), Some("1".to_string()));
    assert_eq!(scan_keys(&engine, None, None), vec!["keep"]);
}

#[test]
fn test_put_after_delete_across_segments() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"v1").unwrap();
    flush_and_wait(&engine);
    engine.delete(b"key").unwrap();
    flush_and_wait(&engine);
    engine.put(b"key", b"v2").unwrap();

    assert_eq!(get_string(&engine, "key"), Some("v2".to_string()));
    assert_eq!(scan(&engine, None, None), vec![("key".to_string(), "v2".to_string())]);
}

// =============================================================================
// Range Tests
// =============================================================================

/// Keys a..h spread over two segments and the active table, with c and f deleted
fn setup_range_engine() -> (TempDir, Engine) {
    let (temp, engine) = setup_temp_engine();

    for key in ["a", "c", "e", "g"] {
        engine.put(key.as_bytes(), b"old").unwrap();
    }
    flush_and_wait(&engine);

    for key in ["b", "d", "f", "h"] {
        engine.put(key.as_bytes(), b"mid").unwrap();
    }
    engine.put(b"a", b"mid").unwrap();
    flush_and_wait(&engine);

    engine.delete(b"c").unwrap();
    engine.delete(b"f").unwrap();
    engine.put(b"e", b"new").unwrap();

    (temp, engine)
}

#[test]
fn test_range_unbounded() {
    let (_temp, engine) = setup_range_engine();

    assert_eq!(
        scan(&engine, None, None),
        vec![
            ("a".to_string(), "mid".to_string()),
            ("b".to_string(), "mid".to_string()),
            ("d".to_string(), "mid".to_string()),
            ("e".to_string(), "new".to_string()),
            ("g".to_string(), "old".to_string()),
            ("h".to_string(), "mid".to_string()),
        ]
    );
}

#[test]
fn test_range_lower_bound_only() {
    let (_temp, engine) = setup_range_engine();

    assert_eq!(scan_keys(&engine, Some("d"), None), vec!["d", "e", "g", "h"]);
    assert_eq!(scan_keys(&engine, Some("c"), None), vec!["d", "e", "g", "h"]);
}

#[test]
fn test_range_upper_bound_only() {
    let (_temp, engine) = setup_range_engine();

    assert_eq!(scan_keys(&engine, None, Some("e")), vec!["a", "b", "d"]);
    assert_eq!(scan_keys(&engine, None, Some("a")), Vec::<String>::new());
}

#[test]
fn test_range_both_bounds() {
    let (_temp, engine) = setup_range_engine();

    assert_eq!(scan_keys(&engine, Some("b"), Some("g")), vec!["b", "d", "e"]);
    assert_eq!(scan_keys(&engine, Some("bb"), Some("gg")), vec!["d", "e", "g"]);
    assert!(scan_keys(&engine, Some("g"), Some("b")).is_empty());
}

#[test]
fn test_range_matches_after_compaction() {
    let (_temp, engine) = setup_range_engine();
    let before = scan(&engine, None, None);

    flush_and_wait(&engine);
    compact_and_wait(&engine);

    assert_eq!(scan(&engine, None, None), before);
    assert_eq!(scan_keys(&engine, Some("b"), Some("g")), vec!["b", "d", "e"]);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_close_persists_active_table() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_engine(temp_dir.path());
        engine.put(b"key", b"value").unwrap();
        assert_eq!(engine.segment_count(), 0);
        engine.close().unwrap();
    }

    let engine = open_engine(temp_dir.path());
    assert_eq!(engine.segment_count(), 1);
    assert_eq!(get_string(&engine, "key"), Some("value".to_string()));
}

#[test]
fn test_reopen_round_trip() {
    let temp_dir = TempDir::new().unwrap();

    let expected = {
        let engine = open_engine(temp_dir.path());
        for i in 0..50 {
            engine.put(format!("k{:02}", i).as_bytes(), format!("v{}", i).as_bytes()).unwrap();
            if i % 10 == 9 {
                flush_and_wait(&engine);
            }
        }
        for i in (0..50).step_by(7) {
            engine.delete(format!("k{:02}", i).as_bytes()).unwrap();
        }
        let snapshot = scan(&engine, None, None);
        engine.close().unwrap();
        snapshot
    };

    let engine = open_engine(temp_dir.path());
    assert_eq!(scan(&engine, None, None), expected);
    assert_eq!(scan(&engine, Some("k10"), Some("k30")).len(), 17);
    assert!(engine.get(b"k07").unwrap().is_none());
    assert_eq!(get_string(&engine, "k08"), Some("v8".to_string()));
}

#[test]
fn test_close_without_writes_creates_no_segment() {
    let temp_dir = TempDir::new().unwrap();

    open_engine(temp_dir.path()).close().unwrap();

    let engine = open_engine(temp_dir.path());
    assert_eq!(engine.segment_count(), 0);
}

#[test]
fn test_drop_closes_engine() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_engine(temp_dir.path());
        engine.put(b"key", b"value").unwrap();
    }

    let engine = open_engine(temp_dir.path());
    assert_eq!(get_string(&engine, "key"), Some("value".to_string()));
}

#[test]
fn test_engine_open_path_convenience() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = Engine::open_path(temp_dir.path()).unwrap();
        engine.put(b"key", b"value").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open_path(temp_dir.path()).unwrap();
    assert_eq!(get_string(&engine, "key"), Some("value".to_string()));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_close_twice() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_engine(temp_dir.path());
        engine.put(b"key", b"value").unwrap();
        engine.close().unwrap();
        engine.close().unwrap();
        assert!(engine.is_closed());
    }

    // Second close neither failed nor wrote a duplicate segment
    let engine = open_engine(temp_dir.path());
    assert_eq!(engine.segment_count(), 1);
    assert_eq!(get_string(&engine, "key"), Some("value".to_string()));
    engine.close().unwrap();
    engine.close().unwrap();

    let engine = open_engine(temp_dir.path());
    assert_eq!(engine.segment_count(), 1);
    assert_eq!(scan(&engine, None, None), vec![("key".to_string(), "value".to_string())]);
}

#[test]
fn test_operations_after_close_fail() {
    let (_temp, engine) = setup_temp_engine();
    engine.close().unwrap();

    assert!(matches!(engine.get(b"k"), Err(StrataError::Closed)));
    assert!(matches!(engine.get_range(None, None), Err(StrataError::Closed)));
    assert!(matches!(engine.put(b"k", b"v"), Err(StrataError::Closed)));
    assert!(matches!(engine.delete(b"k"), Err(StrataError::Closed)));
    assert!(matches!(engine.flush(), Err(StrataError::Closed)));
    assert!(matches!(engine.compact(), Err(StrataError::Closed)));
}

#[test]
fn test_range_iterator_outlives_close() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"a", b"1").unwrap();
    flush_and_wait(&engine);
    engine.put(b"b", b"2").unwrap();

    let iter = engine.get_range(None, None).unwrap();
    engine.close().unwrap();

    assert_eq!(iter.count(), 2);
}

#[test]
fn test_flush_empty_active_table() {
    let (_temp, engine) = setup_temp_engine();

    engine.flush().unwrap();

    assert_eq!(engine.unflushed_table_count(), 0);
    assert_eq!(engine.segment_count(), 0);
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_compaction_idempotent() {
    let (_temp, engine) = setup_temp_engine();

    for i in 0..3 {
        engine.put(format!("k{}", i).as_bytes(), b"v").unwrap();
        flush_and_wait(&engine);
    }
    assert!(!engine.is_compacted());

    compact_and_wait(&engine);
    let after_first = scan(&engine, None, None);
    let size_after_first = engine.disk_size().unwrap();

    engine.compact().unwrap();
    // Closing joins the worker, so the second request has been served
    let path = engine.data_dir().unwrap().to_path_buf();
    engine.close().unwrap();

    let engine = open_engine(&path);
    assert!(engine.is_compacted());
    assert_eq!(engine.segment_count(), 1);
    assert_eq!(scan(&engine, None, None), after_first);
    assert_eq!(engine.disk_size().unwrap(), size_after_first);
}

#[test]
fn test_compaction_reclaims_space() {
    let (_temp, engine) = setup_temp_engine();
    const KEYS: usize = 100;
    const ROUNDS: usize = 5;

    let mut one_round = 0;
    for round in 0..ROUNDS {
        for k in 0..KEYS {
            engine
                .put(format!("key_{:03}", k).as_bytes(), format!("value_{:03}_{}", k, round).as_bytes())
                .unwrap();
        }
        flush_and_wait(&engine);
        if round == 0 {
            one_round = engine.disk_size().unwrap();
        }
    }

    let before = engine.disk_size().unwrap();
    assert!(before >= one_round * ROUNDS as u64);

    compact_and_wait(&engine);

    let after = engine.disk_size().unwrap();
    assert!(after <= one_round * 2, "after={} one_round={}", after, one_round);
    assert_eq!(scan(&engine, None, None).len(), KEYS);
    assert_eq!(get_string(&engine, "key_042"), Some("value_042_4".to_string()));
}

#[test]
fn test_writes_during_compaction_keep_precedence() {
    let (_temp, engine) = setup_temp_engine();

    for round in 0..3 {
        engine.put(b"key", format!("old{}", round).as_bytes()).unwrap();
        flush_and_wait(&engine);
    }

    engine.compact().unwrap();
    engine.put(b"key", b"newest").unwrap();
    flush_and_wait(&engine);
    wait_until("compaction", || engine.segment_count() <= 2);

    assert_eq!(get_string(&engine, "key"), Some("newest".to_string()));
}

// =============================================================================
// In-Memory Mode Tests
// =============================================================================

#[test]
fn test_in_memory_engine() {
    let engine = Engine::open(Config::builder().in_memory().build()).unwrap();

    engine.put(b"b", b"2").unwrap();
    engine.put(b"a", b"1").unwrap();
    engine.put(b"c", b"3").unwrap();
    engine.delete(b"b").unwrap();

    assert!(engine.data_dir().is_none());
    assert_eq!(get_string(&engine, "a"), Some("1".to_string()));
    assert!(engine.get(b"b").unwrap().is_none());
    assert_eq!(scan_keys(&engine, None, None), vec!["a", "c"]);
    assert_eq!(scan_keys(&engine, Some("b"), None), vec!["c"]);

    engine.flush().unwrap();
    engine.compact().unwrap();
    assert_eq!(engine.segment_count(), 0);
    assert!(engine.is_compacted());
    assert_eq!(engine.disk_size().unwrap(), 0);
    assert_eq!(get_string(&engine, "c"), Some("3".to_string()));

    engine.close().unwrap();
    assert!(matches!(engine.get(b"a"), Err(StrataError::Closed)));
}

#[test]
fn test_in_memory_ignores_threshold() {
    let engine = Engine::open(
        Config::builder()
            .in_memory()
            .flush_threshold_bytes(16)
            .build(),
    )
    .unwrap();

    for i in 0..100 {
        engine.put(format!("k{:03}", i).as_bytes(), b"value").unwrap();
    }

    assert_eq!(engine.active_entry_count(), 100);
    assert_eq!(scan(&engine, None, None).len(), 100);
}
