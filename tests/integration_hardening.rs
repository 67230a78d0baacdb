//! Public API hardening tests.
//!
//! These tests exercise exact boundary values for every validated
//! `EngineConfig` field (the smallest valid, smallest invalid, largest
//! valid, largest invalid) plus the `create_if_missing`/`error_if_exists`
//! open-time error paths.
//!
//! ## See also
//! - [`integration`] — basic CRUD, scan, persistence, concurrency

use aeternusdb::{Engine, EngineConfig, ErrorKind};
use tempfile::TempDir;

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;
const GIB: usize = 1024 * 1024 * 1024;

// ================================================================================================
// write_buffer_size — [64 KiB, 1 GiB]
// ================================================================================================

/// # Scenario
/// `write_buffer_size` at the exact minimum (64 KiB) is accepted.
#[test]
fn config_write_buffer_size_exact_min_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { write_buffer_size: 64 * KIB, ..EngineConfig::default() };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `write_buffer_size` one below the minimum is rejected.
#[test]
fn config_write_buffer_size_below_min_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { write_buffer_size: 64 * KIB - 1, ..EngineConfig::default() };
    let err = Engine::open(dir.path(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

/// # Scenario
/// `write_buffer_size` at the exact maximum (1 GiB) is accepted.
#[test]
fn config_write_buffer_size_exact_max_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { write_buffer_size: GIB, ..EngineConfig::default() };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `write_buffer_size` one above the maximum is rejected.
#[test]
fn config_write_buffer_size_above_max_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { write_buffer_size: GIB + 1, ..EngineConfig::default() };
    let err = Engine::open(dir.path(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

// ================================================================================================
// max_open_files — [74, 50000]
// ================================================================================================

/// # Scenario
/// `max_open_files` at the exact minimum (74) is accepted.
#[test]
fn config_max_open_files_exact_min_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { max_open_files: 74, ..EngineConfig::default() };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `max_open_files` one below the minimum is rejected.
#[test]
fn config_max_open_files_below_min_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { max_open_files: 73, ..EngineConfig::default() };
    let err = Engine::open(dir.path(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

/// # Scenario
/// `max_open_files` at the exact maximum (50000) is accepted.
#[test]
fn config_max_open_files_exact_max_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { max_open_files: 50_000, ..EngineConfig::default() };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `max_open_files` one above the maximum is rejected.
#[test]
fn config_max_open_files_above_max_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { max_open_files: 50_001, ..EngineConfig::default() };
    let err = Engine::open(dir.path(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

// ================================================================================================
// max_file_size — [1 MiB, 1 GiB]
// ================================================================================================

/// # Scenario
/// `max_file_size` at the exact minimum (1 MiB) is accepted.
#[test]
fn config_max_file_size_exact_min_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { max_file_size: MIB as u64, ..EngineConfig::default() };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `max_file_size` one below the minimum is rejected.
#[test]
fn config_max_file_size_below_min_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { max_file_size: MIB as u64 - 1, ..EngineConfig::default() };
    let err = Engine::open(dir.path(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

/// # Scenario
/// `max_file_size` at the exact maximum (1 GiB) is accepted.
#[test]
fn config_max_file_size_exact_max_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { max_file_size: GIB as u64, ..EngineConfig::default() };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `max_file_size` one above the maximum is rejected.
#[test]
fn config_max_file_size_above_max_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { max_file_size: GIB as u64 + 1, ..EngineConfig::default() };
    let err = Engine::open(dir.path(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

// ================================================================================================
// block_size — [1 KiB, 4 MiB]
// ================================================================================================

/// # Scenario
/// `block_size` at the exact minimum (1 KiB) is accepted.
#[test]
fn config_block_size_exact_min_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { block_size: KIB, ..EngineConfig::default() };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `block_size` one below the minimum is rejected.
#[test]
fn config_block_size_below_min_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { block_size: KIB - 1, ..EngineConfig::default() };
    let err = Engine::open(dir.path(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

/// # Scenario
/// `block_size` at the exact maximum (4 MiB) is accepted.
#[test]
fn config_block_size_exact_max_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { block_size: 4 * MIB, ..EngineConfig::default() };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

/// # Scenario
/// `block_size` one above the maximum is rejected.
#[test]
fn config_block_size_above_max_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { block_size: 4 * MIB + 1, ..EngineConfig::default() };
    let err = Engine::open(dir.path(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

// ================================================================================================
// block_restart_interval — nonzero
// ================================================================================================

/// # Scenario
/// `block_restart_interval` of zero is rejected.
#[test]
fn config_block_restart_interval_zero_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { block_restart_interval: 0, ..EngineConfig::default() };
    let err = Engine::open(dir.path(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

/// # Scenario
/// `block_restart_interval` of one (the smallest valid value) is accepted.
#[test]
fn config_block_restart_interval_one_accepted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { block_restart_interval: 1, ..EngineConfig::default() };
    let engine = Engine::open(dir.path(), config).unwrap();
    engine.close().unwrap();
}

// ================================================================================================
// create_if_missing / error_if_exists
// ================================================================================================

/// # Scenario
/// Opening a nonexistent directory with `create_if_missing: false` fails
/// without creating anything on disk.
#[test]
fn missing_database_without_create_if_missing_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig { create_if_missing: false, ..EngineConfig::default() };
    let err = Engine::open(dir.path(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(!dir.path().join("CURRENT").exists());
}

/// # Scenario
/// Reopening a live database with `error_if_exists: true` is rejected, but
/// the original handle is unaffected and keeps working.
#[test]
fn error_if_exists_rejects_reopening_a_live_database() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();

    let config = EngineConfig { error_if_exists: true, ..EngineConfig::default() };
    let err = Engine::open(dir.path(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
    engine.close().unwrap();
}

/// # Scenario
/// A second `Engine::open` on the same directory, while the first handle
/// is still open in this process, is rejected rather than silently
/// sharing state.
#[test]
fn second_open_of_the_same_directory_in_process_is_rejected() {
    let dir = TempDir::new().unwrap();
    let first = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    let err = Engine::open(dir.path(), EngineConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoError);

    first.close().unwrap();
    drop(first);

    // Once the first handle (and its lock) is dropped, reopening succeeds.
    let second = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    second.close().unwrap();
}
