//! Integration tests for the public `Engine` API.
//!
//! These tests exercise the full storage stack (WAL → memtable → SSTable →
//! compaction) through the public `aeternusdb::{Engine, EngineConfig,
//! EngineError}` surface only. No internal modules are referenced.
//!
//! ## Coverage areas
//! - **Lifecycle**: open, close, idempotent close, Drop-based cleanup
//! - **CRUD**: put, get, delete, delete_range, overwrite, nonexistent keys
//! - **Scan**: range queries, empty ranges, tombstone filtering
//! - **Persistence**: data survives close → reopen, deletes survive reopen
//! - **Background compaction**: many small writes still read back correctly
//!   after flush and merge compaction run behind the scenes
//! - **Concurrency**: multi-thread writes, concurrent readers during writes
//!
//! ## See also
//! - [`engine::tests`] — internal engine-level unit tests
//! - [`integration_hardening`] — `EngineConfig` boundary values
//! - [`integration_coverage`] — snapshots, write batches, locking

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aeternusdb::{Engine, EngineConfig};
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Small write buffer to trigger frequent memtable rotation and flush.
fn small_buffer_config() -> EngineConfig {
    EngineConfig {
        write_buffer_size: 64 * 1024,
        max_file_size: 256 * 1024,
        ..EngineConfig::default()
    }
}

/// Reopen a database at the same path with default config.
fn reopen(path: &std::path::Path) -> Engine {
    Engine::open(path, EngineConfig::default()).expect("reopen")
}

/// Give the background worker a chance to flush and compact. There is no
/// public signal for "background work finished"; callers re-verify data
/// integrity afterward regardless of how far compaction actually got.
fn wait_for_flush(_engine: &Engine) {
    thread::sleep(Duration::from_millis(300));
}

// ================================================================================================
// Lifecycle
// ================================================================================================

/// # Scenario
/// Open a fresh database and immediately close it.
///
/// # Starting environment
/// Empty temporary directory — no prior data.
///
/// # Actions
/// 1. `Engine::open` with default config.
/// 2. `engine.close()`.
///
/// # Expected behavior
/// Both operations succeed without error.
#[test]
fn open_close_empty() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// Calling `close()` twice must not panic or return an error.
///
/// # Starting environment
/// Freshly opened database with default config.
///
/// # Actions
/// 1. `engine.close()` — first close.
/// 2. `engine.close()` — second close (should be a no-op).
///
/// # Expected behavior
/// Both calls return `Ok(())`.
#[test]
fn close_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    engine.close().unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// Dropping the handle without calling `close()` must still persist data.
///
/// # Starting environment
/// Freshly opened database with default config.
///
/// # Actions
/// 1. Put key `"key"` → `"value"`.
/// 2. `drop(engine)` without calling `close()`.
/// 3. Reopen database from the same directory.
/// 4. `get("key")`.
///
/// # Expected behavior
/// The `Drop` impl flushes state; reopened `get` returns `Some("value")`.
#[test]
fn drop_without_close() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    engine.put(b"key".to_vec(), b"value".to_vec()).unwrap();
    drop(engine);

    let engine = reopen(dir.path());
    assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));
    engine.close().unwrap();
}

// ================================================================================================
// Basic CRUD
// ================================================================================================

/// # Scenario
/// Basic put/get round-trip for a single key.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put `"hello"` → `"world"`.
/// 2. `get("hello")`.
///
/// # Expected behavior
/// `get` returns `Some("world")`.
#[test]
fn put_get_single() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
    assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));

    engine.close().unwrap();
}

/// # Scenario
/// Overwriting a key must return the latest value.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put `"key"` → `"v1"`.
/// 2. Put `"key"` → `"v2"` (overwrite).
/// 3. `get("key")`.
///
/// # Expected behavior
/// `get` returns `Some("v2")` — the second write wins.
#[test]
fn put_overwrite() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"key".to_vec(), b"v1".to_vec()).unwrap();
    engine.put(b"key".to_vec(), b"v2".to_vec()).unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Some(b"v2".to_vec()));

    engine.close().unwrap();
}

/// # Scenario
/// Deleting a key makes it invisible to subsequent reads.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put `"key"` → `"value"`.
/// 2. Verify `get("key")` returns `Some("value")`.
/// 3. `delete("key")`.
/// 4. `get("key")`.
///
/// # Expected behavior
/// After deletion, `get` returns `None`.
#[test]
fn delete_key() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"key".to_vec(), b"value".to_vec()).unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));

    engine.delete(b"key".to_vec()).unwrap();
    assert_eq!(engine.get(b"key").unwrap(), None);

    engine.close().unwrap();
}

/// # Scenario
/// Range-delete hides keys in `[start, end)` while leaving others intact.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put keys `"a"` through `"e"` with single-byte values.
/// 2. `delete_range("b", "d")` — removes `"b"` and `"c"`.
/// 3. Get each key.
///
/// # Expected behavior
/// `"a"`, `"d"`, `"e"` survive; `"b"` and `"c"` return `None`.
#[test]
fn delete_range_basic() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    for c in b'a'..=b'e' {
        engine.put(vec![c], vec![c]).unwrap();
    }

    engine.delete_range(b"b", b"d").unwrap();

    assert_eq!(engine.get(b"a").unwrap(), Some(vec![b'a']));
    assert_eq!(engine.get(b"b").unwrap(), None);
    assert_eq!(engine.get(b"c").unwrap(), None);
    assert_eq!(engine.get(b"d").unwrap(), Some(vec![b'd']));
    assert_eq!(engine.get(b"e").unwrap(), Some(vec![b'e']));

    engine.close().unwrap();
}

/// # Scenario
/// Getting a key that was never inserted returns `None`.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. `get("missing")` without any prior writes.
///
/// # Expected behavior
/// Returns `Ok(None)` — not an error.
#[test]
fn get_nonexistent_key() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    assert_eq!(engine.get(b"missing").unwrap(), None);

    engine.close().unwrap();
}

// ================================================================================================
// Scan
// ================================================================================================

/// # Scenario
/// Scan returns key-value pairs in the half-open range `[start, end)`,
/// sorted by key.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put keys `"a"` through `"d"` with values `"1"` through `"4"`.
/// 2. `scan("b", "d")` — should return `"b"` and `"c"` only.
///
/// # Expected behavior
/// Two key-value pairs returned in sorted order; `"a"` and `"d"` excluded.
#[test]
fn scan_basic() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
    engine.put(b"c".to_vec(), b"3".to_vec()).unwrap();
    engine.put(b"d".to_vec(), b"4".to_vec()).unwrap();

    let results: Vec<_> = engine.scan(b"b", b"d").unwrap().collect();
    assert_eq!(
        results,
        vec![(b"b".to_vec(), b"2".to_vec()), (b"c".to_vec(), b"3".to_vec())]
    );

    engine.close().unwrap();
}

/// # Scenario
/// Scanning an empty or inverted range returns an empty result.
///
/// # Starting environment
/// Database with one key `"a"` → `"1"`.
///
/// # Actions
/// 1. `scan("z", "a")` — start > end (inverted).
/// 2. `scan("x", "z")` — valid range but no keys fall within it.
///
/// # Expected behavior
/// Both scans return an empty iterator.
#[test]
fn scan_empty_range() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();

    let results: Vec<_> = engine.scan(b"z", b"a").unwrap().collect();
    assert!(results.is_empty());

    let results: Vec<_> = engine.scan(b"x", b"z").unwrap().collect();
    assert!(results.is_empty());

    engine.close().unwrap();
}

/// # Scenario
/// Scan must exclude keys hidden by a point-delete tombstone.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put `"a"`, `"b"`, `"c"`.
/// 2. `delete("b")`.
/// 3. `scan("a", "d")`.
///
/// # Expected behavior
/// Only `"a"` and `"c"` appear; `"b"` is filtered out.
#[test]
fn scan_excludes_deleted_keys() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
    engine.put(b"c".to_vec(), b"3".to_vec()).unwrap();
    engine.delete(b"b".to_vec()).unwrap();

    let results: Vec<_> = engine.scan(b"a", b"d").unwrap().collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, b"a".to_vec());
    assert_eq!(results[1].0, b"c".to_vec());

    engine.close().unwrap();
}

// ================================================================================================
// Persistence
// ================================================================================================

/// # Scenario
/// Data written before `close()` is readable after reopening.
///
/// # Starting environment
/// Empty temporary directory.
///
/// # Actions
/// 1. Open database, put `"persist_key"` → `"persist_value"`, close.
/// 2. Reopen database from the same directory.
/// 3. `get("persist_key")`.
///
/// # Expected behavior
/// The reopened database returns `Some("persist_value")`.
#[test]
fn persistence_across_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        engine.put(b"persist_key".to_vec(), b"persist_value".to_vec()).unwrap();
        engine.close().unwrap();
    }

    {
        let engine = reopen(dir.path());
        assert_eq!(engine.get(b"persist_key").unwrap(), Some(b"persist_value".to_vec()));
        engine.close().unwrap();
    }
}

/// # Scenario
/// Hundreds of writes survive close → reopen with a small write buffer
/// that triggers multiple flushes.
///
/// # Starting environment
/// Empty temporary directory, tiny write buffer (forces frequent flushes).
///
/// # Actions
/// 1. Write 500 sequentially-named keys, close.
/// 2. Reopen and verify all 500 keys.
///
/// # Expected behavior
/// Every key is present with its original value after reopen.
#[test]
fn persistence_many_writes() {
    let dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(dir.path(), small_buffer_config()).unwrap();
        for i in 0..500u32 {
            let key = format!("key_{i:04}");
            let val = format!("val_{i:04}");
            engine.put(key.into_bytes(), val.into_bytes()).unwrap();
        }
        engine.close().unwrap();
    }

    {
        let engine = Engine::open(dir.path(), small_buffer_config()).unwrap();
        for i in 0..500u32 {
            let key = format!("key_{i:04}");
            let val = format!("val_{i:04}");
            assert_eq!(
                engine.get(key.as_bytes()).unwrap(),
                Some(val.into_bytes()),
                "key_{i:04} should be present after reopen"
            );
        }
        engine.close().unwrap();
    }
}

/// # Scenario
/// Point-delete tombstones survive close → reopen.
///
/// # Starting environment
/// Empty temporary directory.
///
/// # Actions
/// 1. Put `"alive"` → `"yes"` and `"dead"` → `"soon"`, then `delete("dead")`, close.
/// 2. Reopen and get both keys.
///
/// # Expected behavior
/// `"alive"` returns `Some("yes")`; `"dead"` returns `None`.
#[test]
fn persistence_deletes_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        engine.put(b"alive".to_vec(), b"yes".to_vec()).unwrap();
        engine.put(b"dead".to_vec(), b"soon".to_vec()).unwrap();
        engine.delete(b"dead".to_vec()).unwrap();
        engine.close().unwrap();
    }

    {
        let engine = reopen(dir.path());
        assert_eq!(engine.get(b"alive").unwrap(), Some(b"yes".to_vec()));
        assert_eq!(engine.get(b"dead").unwrap(), None);
        engine.close().unwrap();
    }
}

// ================================================================================================
// Background compaction
// ================================================================================================

/// # Scenario
/// Many small writes against a tiny write buffer rotate the memtable and
/// flush repeatedly; every key must still be readable once the background
/// worker catches up.
///
/// # Starting environment
/// Tiny write buffer — a handful of writes already forces a rotation.
///
/// # Actions
/// 1. Write 300 keys.
/// 2. Wait for the background worker to flush at least once.
/// 3. Read every key back, from the memtable, an immutable memtable, or an
///    on-disk table, whichever currently holds it.
///
/// # Expected behavior
/// All keys are present with their original values regardless of which
/// layer currently stores them.
#[test]
fn background_flush_preserves_all_data() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), small_buffer_config()).unwrap();

    for i in 0..300u32 {
        let key = format!("mc_{i:04}");
        let val = format!("val_{i:04}");
        engine.put(key.into_bytes(), val.into_bytes()).unwrap();
    }
    wait_for_flush(&engine);

    for i in 0..300u32 {
        let key = format!("mc_{i:04}");
        let val = format!("val_{i:04}");
        assert_eq!(
            engine.get(key.as_bytes()).unwrap(),
            Some(val.into_bytes()),
            "mc_{i:04} should survive background flush"
        );
    }

    engine.close().unwrap();
}

/// # Scenario
/// Deletes interleaved with enough writes to force a flush are not
/// resurrected by compaction.
///
/// # Starting environment
/// Tiny write buffer.
///
/// # Actions
/// 1. Write 100 keys, delete the even-indexed half, write more to force a
///    flush, close, and reopen.
/// 2. Verify even keys return `None`, odd keys return their values.
///
/// # Expected behavior
/// Tombstones survive flush/reopen; deleted keys never come back.
#[test]
fn background_flush_removes_deleted_keys() {
    let dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(dir.path(), small_buffer_config()).unwrap();
        for i in 0..100u32 {
            let key = format!("del_{i:04}");
            let val = format!("val_{i:04}");
            engine.put(key.into_bytes(), val.into_bytes()).unwrap();
        }
        for i in (0..100u32).step_by(2) {
            let key = format!("del_{i:04}");
            engine.delete(key.into_bytes()).unwrap();
        }
        for i in 100..200u32 {
            let key = format!("del_{i:04}");
            let val = format!("val_{i:04}");
            engine.put(key.into_bytes(), val.into_bytes()).unwrap();
        }
        engine.close().unwrap();
    }

    {
        let engine = reopen(dir.path());
        for i in 0..100u32 {
            let key = format!("del_{i:04}");
            if i % 2 == 0 {
                assert_eq!(engine.get(key.as_bytes()).unwrap(), None);
            } else {
                let val = format!("val_{i:04}");
                assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(val.into_bytes()));
            }
        }
        engine.close().unwrap();
    }
}

// ================================================================================================
// Concurrency
// ================================================================================================

/// # Scenario
/// Four threads write 100 disjoint keys each; all 400 are readable
/// after the threads join.
///
/// # Starting environment
/// Freshly opened database shared via `Arc<Engine>`.
///
/// # Actions
/// 1. Spawn 4 writer threads, each writing `t{id}_k{0..99}`.
/// 2. Join all threads.
/// 3. Read all 400 keys from the main thread.
///
/// # Expected behavior
/// All 400 keys return their corresponding values — no data loss.
#[test]
fn concurrent_writes_and_reads() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(Engine::open(dir.path(), EngineConfig::default()).unwrap());

    let mut handles = vec![];

    for t in 0..4u32 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..100u32 {
                let key = format!("t{t}_k{i:04}");
                let val = format!("t{t}_v{i:04}");
                engine.put(key.into_bytes(), val.into_bytes()).unwrap();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for t in 0..4u32 {
        for i in 0..100u32 {
            let key = format!("t{t}_k{i:04}");
            let val = format!("t{t}_v{i:04}");
            assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(val.into_bytes()), "missing: {key}");
        }
    }

    engine.close().unwrap();
}

/// # Scenario
/// A reader thread polling `get` concurrently with an active writer thread
/// never observes a torn write (a value that matches neither the old nor
/// the new write for a key).
///
/// # Starting environment
/// Freshly opened database with one key pre-populated.
///
/// # Actions
/// 1. Spawn a writer thread that overwrites `"shared"` 200 times.
/// 2. Concurrently, poll `get("shared")` from the main thread.
///
/// # Expected behavior
/// Every observed value is one of the values the writer actually wrote.
#[test]
fn concurrent_reads_during_writes_see_consistent_values() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(Engine::open(dir.path(), EngineConfig::default()).unwrap());
    engine.put(b"shared".to_vec(), b"v0000".to_vec()).unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for i in 1..200u32 {
                let val = format!("v{i:04}");
                engine.put(b"shared".to_vec(), val.into_bytes()).unwrap();
            }
        })
    };

    for _ in 0..500 {
        if let Some(value) = engine.get(b"shared").unwrap() {
            let text = String::from_utf8(value).unwrap();
            assert!(text.starts_with('v') && text.len() == 5, "unexpected value: {text}");
        }
    }

    writer.join().unwrap();
    assert_eq!(engine.get(b"shared").unwrap(), Some(b"v0199".to_vec()));
    engine.close().unwrap();
}
