//! Extra integration tests targeting public-API surface not covered by
//! `integration.rs` or `integration_hardening.rs`:
//! - Snapshot isolation against a live writer, including multiple
//!   concurrent snapshots and snapshot release.
//! - `WriteBatch` applied directly through `Engine::write`.
//! - `delete_range` edge cases (empty range, no matches, full-database range).
//! - Reopen-after-many-rotations recovery.

use std::sync::Arc;
use std::thread;

use aeternusdb::write_batch::WriteBatch;
use aeternusdb::{Engine, EngineConfig};
use tempfile::TempDir;

// ================================================================================================
// Snapshots
// ================================================================================================

/// # Scenario
/// A snapshot taken before a write sees the pre-write value, while a
/// fresh read sees the post-write value.
#[test]
fn snapshot_isolates_a_single_later_write() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"k".to_vec(), b"before".to_vec()).unwrap();
    let snap = engine.get_snapshot();
    engine.put(b"k".to_vec(), b"after".to_vec()).unwrap();

    assert_eq!(engine.get_at(b"k", snap.sequence()).unwrap(), Some(b"before".to_vec()));
    assert_eq!(engine.get(b"k").unwrap(), Some(b"after".to_vec()));
}

/// # Scenario
/// Two snapshots taken at different points each see their own
/// point-in-time view, independent of each other and of later writes.
#[test]
fn multiple_snapshots_see_independent_views() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
    let snap1 = engine.get_snapshot();
    engine.put(b"k".to_vec(), b"v2".to_vec()).unwrap();
    let snap2 = engine.get_snapshot();
    engine.put(b"k".to_vec(), b"v3".to_vec()).unwrap();

    assert_eq!(engine.get_at(b"k", snap1.sequence()).unwrap(), Some(b"v1".to_vec()));
    assert_eq!(engine.get_at(b"k", snap2.sequence()).unwrap(), Some(b"v2".to_vec()));
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v3".to_vec()));
}

/// # Scenario
/// A snapshot taken over a delete still sees the value that existed
/// before the delete.
#[test]
fn snapshot_survives_a_later_delete() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();
    let snap = engine.get_snapshot();
    engine.delete(b"k".to_vec()).unwrap();

    assert_eq!(engine.get_at(b"k", snap.sequence()).unwrap(), Some(b"v".to_vec()));
    assert_eq!(engine.get(b"k").unwrap(), None);
}

/// # Scenario
/// Dropping a snapshot releases its retained sequence number; subsequent
/// snapshots and reads are unaffected.
#[test]
fn dropping_a_snapshot_does_not_affect_other_reads() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
    let snap = engine.get_snapshot();
    drop(snap);

    engine.put(b"k".to_vec(), b"v2".to_vec()).unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v2".to_vec()));
}

/// # Scenario
/// A reader thread holding a snapshot keeps seeing the original value
/// while a writer thread races ahead, concurrently.
#[test]
fn snapshot_held_across_threads_stays_stable() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(Engine::open(dir.path(), EngineConfig::default()).unwrap());
    engine.put(b"k".to_vec(), b"original".to_vec()).unwrap();
    let snap = engine.get_snapshot();
    let snap_seq = snap.sequence();

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for i in 0..100u32 {
                engine.put(b"k".to_vec(), format!("v{i:04}").into_bytes()).unwrap();
            }
        })
    };
    writer.join().unwrap();

    assert_eq!(engine.get_at(b"k", snap_seq).unwrap(), Some(b"original".to_vec()));
    drop(snap);
}

// ================================================================================================
// WriteBatch
// ================================================================================================

/// # Scenario
/// A `WriteBatch` combining puts and a delete is applied atomically: all
/// of its effects are visible together, with later ops within the batch
/// winning over earlier ones for the same key.
#[test]
fn write_batch_applies_puts_and_deletes_atomically() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    let mut batch = WriteBatch::new();
    batch.put(b"a".to_vec(), b"1".to_vec());
    batch.put(b"b".to_vec(), b"2".to_vec());
    batch.delete(b"c".to_vec());
    engine.write(batch).unwrap();

    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.get(b"c").unwrap(), None);
}

/// # Scenario
/// Within a single batch, a later `put` for the same key wins over an
/// earlier one.
#[test]
fn write_batch_later_op_on_same_key_wins() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    let mut batch = WriteBatch::new();
    batch.put(b"k".to_vec(), b"first".to_vec());
    batch.put(b"k".to_vec(), b"second".to_vec());
    engine.write(batch).unwrap();

    assert_eq!(engine.get(b"k").unwrap(), Some(b"second".to_vec()));
}

/// # Scenario
/// An empty `WriteBatch` is a harmless no-op.
#[test]
fn empty_write_batch_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.write(WriteBatch::new()).unwrap();
    assert_eq!(engine.get(b"anything").unwrap(), None);
}

/// # Scenario
/// A batch applied after a prior single-key write is assigned sequence
/// numbers strictly after that write's, so reads after the batch see its
/// effects, not the older single write.
#[test]
fn write_batch_sequences_after_prior_writes() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
    let mut batch = WriteBatch::new();
    batch.put(b"k".to_vec(), b"v2".to_vec());
    engine.write(batch).unwrap();

    assert_eq!(engine.get(b"k").unwrap(), Some(b"v2".to_vec()));
}

// ================================================================================================
// delete_range edge cases
// ================================================================================================

/// # Scenario
/// `delete_range` over a range with no matching keys is a harmless no-op.
#[test]
fn delete_range_with_no_matches_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    engine.delete_range(b"x", b"z").unwrap();

    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
}

/// # Scenario
/// `delete_range` over an inverted range (`start >= end`) matches nothing,
/// since the underlying scan is itself empty for such a range.
#[test]
fn delete_range_with_inverted_bounds_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    engine.delete_range(b"z", b"a").unwrap();

    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
}

/// # Scenario
/// `delete_range` spanning every key in the database removes all of them.
#[test]
fn delete_range_covering_the_whole_keyspace_removes_everything() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    for key in ["a", "b", "c", "d"] {
        engine.put(key.as_bytes().to_vec(), key.as_bytes().to_vec()).unwrap();
    }
    engine.delete_range(b"a", b"z").unwrap();

    for key in ["a", "b", "c", "d"] {
        assert_eq!(engine.get(key.as_bytes()).unwrap(), None);
    }
    let results: Vec<_> = engine.scan(b"a", b"z").unwrap().collect();
    assert!(results.is_empty());
}

// ================================================================================================
// Recovery after many rotations
// ================================================================================================

/// # Scenario
/// A database that has rotated through many memtable generations (small
/// write buffer, thousands of writes) recovers every key after an
/// unclean-looking close/reopen cycle.
#[test]
fn reopen_after_many_memtable_rotations_recovers_everything() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        write_buffer_size: 64 * 1024,
        max_file_size: 256 * 1024,
        ..EngineConfig::default()
    };

    {
        let engine = Engine::open(dir.path(), config.clone()).unwrap();
        for i in 0..3000u32 {
            let key = format!("rot-{i:06}");
            engine.put(key.into_bytes(), vec![9u8; 48]).unwrap();
        }
        engine.close().unwrap();
    }

    let engine = Engine::open(dir.path(), config).unwrap();
    for i in 0..3000u32 {
        let key = format!("rot-{i:06}");
        assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(vec![9u8; 48]), "missing {key}");
    }
    engine.close().unwrap();
}
