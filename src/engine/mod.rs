//! # LSM Storage Engine
//!
//! This module implements a **crash-safe**, **single-writer** LSM-tree
//! storage engine with multi-version concurrency via snapshots and a
//! leveled compaction scheme.
//!
//! ## Design Overview
//!
//! Data flows through three layers, queried newest-first:
//!
//! 1. **Active memtable** — an in-memory skiplist backed by a
//!    write-ahead log.
//! 2. **Immutable memtable** — a single frozen memtable awaiting flush to
//!    a level-0 SST (at most one at a time; a second write overload waits
//!    for the flush to clear this slot).
//! 3. **Leveled SSTs** — on-disk, immutable, sorted tables tracked by the
//!    [`crate::manifest::VersionSet`] across [`crate::manifest::NUM_LEVELS`]
//!    levels.
//!
//! Every write is appended to the WAL before it becomes visible in the
//! memtable. A single background thread drives both memtable flush and
//! leveled compaction, woken by a trigger rather than polling.
//!
//! ## Concurrency Model
//!
//! Writes are serialized by one mutex end to end (`SPEC_FULL.md` §1
//! characterizes this engine as single-writer, so there is no leader
//! election or batch-coalescing queue — see `DESIGN.md`). Reads take a
//! short lock only to clone `Arc` handles to the current memtables and
//! `Version`, then proceed lock-free.

pub mod utils;
pub mod visibility;


use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::compaction::{self, CompactionError, TableParams};
use crate::encoding::EncodingError;
use crate::internal_key::{self, LookupKey, ValueType};
use crate::manifest::{ManifestError, VersionSet};
use crate::memtable::{FrozenMemtable, Memtable, MemtableGetResult};
use crate::sstable::{SsTable, SstError, SstGetResult};
use crate::wal::{Wal, WalError};
use crate::write_batch::{BatchOp, WriteBatch, WriteBatchError};
use utils::MergeIterator;
use visibility::VisibilityFilter;

/// Level-0 file count at which writes are slowed down by one millisecond.
const LEVEL0_SLOWDOWN_TRIGGER: usize = 8;
/// Level-0 file count at which writes stall until compaction catches up.
const LEVEL0_STOP_TRIGGER: usize = 12;

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// The `SPEC_FULL.md` §7 error taxonomy, independent of representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Corruption,
    IoError,
    NotSupported,
    InvalidArgument,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    #[error("sst error: {0}")]
    Sst(#[from] SstError),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),
    #[error("write batch error: {0}")]
    WriteBatch(#[from] WriteBatchError),
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("key not found")]
    NotFound,
    #[error("corrupt database: {0}")]
    Corruption(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("database is locked by another process: {0}")]
    LockHeld(String),
    #[error("background error: {0}")]
    Background(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound => ErrorKind::NotFound,
            EngineError::Corruption(_)
            | EngineError::Sst(SstError::ChecksumMismatch(_) | SstError::CorruptFooter(_) | SstError::MissingMetaEntry(_))
            | EngineError::Manifest(ManifestError::Corruption(_))
            | EngineError::Wal(WalError::Corruption(_))
            | EngineError::Encoding(_)
            | EngineError::WriteBatch(_) => ErrorKind::Corruption,
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::Io(_) | EngineError::Wal(_) | EngineError::Sst(_) | EngineError::Manifest(_)
            | EngineError::Compaction(_) | EngineError::LockHeld(_) | EngineError::Background(_) => ErrorKind::IoError,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Snappy,
}

/// Options recognized by [`Engine::open`], matching `SPEC_FULL.md` §6.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub create_if_missing: bool,
    pub error_if_exists: bool,
    pub paranoid_checks: bool,
    pub write_buffer_size: usize,
    pub max_open_files: usize,
    pub max_file_size: u64,
    pub block_size: usize,
    pub block_restart_interval: usize,
    pub compression: Compression,
    pub filter_bits_per_key: usize,
    pub reuse_logs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            max_file_size: crate::manifest::DEFAULT_TARGET_FILE_SIZE,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: Compression::None,
            filter_bits_per_key: 10,
            reuse_logs: true,
        }
    }
}

impl EngineConfig {
    /// Validate every field against the §6 ranges. Out-of-range values are
    /// an `InvalidArgument` error, never silently clamped.
    fn validate(&self) -> Result<(), EngineError> {
        const KIB: usize = 1024;
        const MIB: usize = 1024 * 1024;
        const GIB: usize = 1024 * 1024 * 1024;

        if !(64 * KIB..=GIB).contains(&self.write_buffer_size) {
            return Err(EngineError::InvalidArgument(format!(
                "write_buffer_size {} out of range [64KiB, 1GiB]",
                self.write_buffer_size
            )));
        }
        if !(74..=50_000).contains(&self.max_open_files) {
            return Err(EngineError::InvalidArgument(format!(
                "max_open_files {} out of range [74, 50000]",
                self.max_open_files
            )));
        }
        if !((MIB as u64)..=(GIB as u64)).contains(&self.max_file_size) {
            return Err(EngineError::InvalidArgument(format!(
                "max_file_size {} out of range [1MiB, 1GiB]",
                self.max_file_size
            )));
        }
        if !(KIB..=4 * MIB).contains(&self.block_size) {
            return Err(EngineError::InvalidArgument(format!(
                "block_size {} out of range [1KiB, 4MiB]",
                self.block_size
            )));
        }
        if self.block_restart_interval == 0 {
            return Err(EngineError::InvalidArgument(
                "block_restart_interval must be nonzero".into(),
            ));
        }
        Ok(())
    }

    fn table_params(&self) -> TableParams {
        TableParams {
            block_size: self.block_size,
            filter_bits_per_key: self.filter_bits_per_key,
            block_restart_interval: self.block_restart_interval,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Snapshots
// ------------------------------------------------------------------------------------------------

/// A point-in-time read view. Dropping it releases the retained sequence
/// number, letting compaction reclaim versions no longer needed by any
/// live snapshot.
pub struct Snapshot {
    sequence: u64,
    engine: Arc<EngineInner>,
}

impl Snapshot {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        let mut snapshots = self.engine.snapshots.lock().expect("snapshot list poisoned");
        if let Some(pos) = snapshots.iter().position(|s| *s == self.sequence) {
            snapshots.remove(pos);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Background work trigger
// ------------------------------------------------------------------------------------------------

/// Wakes the background compaction thread without it having to poll.
struct Trigger {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Trigger {
    fn new() -> Self {
        Self { pending: Mutex::new(true), cond: Condvar::new() }
    }

    fn notify(&self) {
        *self.pending.lock().expect("trigger mutex poisoned") = true;
        self.cond.notify_one();
    }

    /// Block until there is work to (re-)check, or `shutting_down` flips.
    fn wait(&self, shutting_down: &AtomicBool) {
        let mut pending = self.pending.lock().expect("trigger mutex poisoned");
        while !*pending && !shutting_down.load(AtomicOrdering::Acquire) {
            let (guard, _timeout) = self
                .cond
                .wait_timeout(pending, Duration::from_millis(200))
                .expect("trigger mutex poisoned");
            pending = guard;
        }
        *pending = false;
    }
}

// ------------------------------------------------------------------------------------------------
// Shared mutable state
// ------------------------------------------------------------------------------------------------

struct WriteState {
    active: Arc<Memtable>,
    active_wal: Wal<WriteBatch>,
    immutable: Option<FrozenMemtable>,
    log_number: u64,
}

struct EngineInner {
    dbname: PathBuf,
    config: EngineConfig,
    version_set: VersionSet,
    write_state: Mutex<WriteState>,
    write_mutex: Mutex<()>,
    snapshots: Mutex<Vec<u64>>,
    table_cache: Mutex<HashMap<u64, Arc<SsTable>>>,
    trigger: Trigger,
    shutting_down: AtomicBool,
    bg_error: Mutex<Option<String>>,
    next_log_number: AtomicU64,
    pending_outputs: compaction::PendingOutputs,
    /// Serializes `run_compaction` calls between the background worker and
    /// a caller-driven `compact_range`, which otherwise run on different
    /// threads with no other mutual exclusion.
    compaction_mutex: Mutex<()>,
    _lock: ProcessLock,
}

impl EngineInner {
    fn check_bg_error(&self) -> Result<(), EngineError> {
        if let Some(msg) = self.bg_error.lock().expect("bg error mutex poisoned").clone() {
            return Err(EngineError::Background(msg));
        }
        Ok(())
    }

    fn set_bg_error(&self, err: impl std::fmt::Display) {
        error!(%err, "background compaction error latched");
        *self.bg_error.lock().expect("bg error mutex poisoned") = Some(err.to_string());
    }

    fn smallest_snapshot(&self) -> u64 {
        let snapshots = self.snapshots.lock().expect("snapshot list poisoned");
        snapshots
            .iter()
            .copied()
            .min()
            .unwrap_or_else(|| self.version_set.last_sequence())
    }

    fn log_path(&self, number: u64) -> PathBuf {
        self.dbname.join(format!("{number:06}.log"))
    }

    fn open_table(&self, file_number: u64) -> Result<Arc<SsTable>, EngineError> {
        let mut cache = self.table_cache.lock().expect("table cache mutex poisoned");
        if let Some(table) = cache.get(&file_number) {
            return Ok(Arc::clone(table));
        }
        let path = compaction::sst_path(&self.dbname, file_number);
        let table = Arc::new(SsTable::open(path, file_number)?);
        if cache.len() >= self.config.max_open_files.saturating_sub(10).max(1) {
            // Simple unbounded-growth guard: drop one arbitrary entry rather
            // than maintaining a full LRU (see DESIGN.md).
            if let Some(&evict) = cache.keys().next() {
                cache.remove(&evict);
            }
        }
        cache.insert(file_number, Arc::clone(&table));
        Ok(table)
    }

    fn evict_table(&self, file_number: u64) {
        self.table_cache
            .lock()
            .expect("table cache mutex poisoned")
            .remove(&file_number);
    }

    /// Rotate the active memtable into the immutable slot and start a
    /// fresh one plus a fresh WAL, recording the rotation in the manifest.
    fn rotate_memtable(&self) -> Result<(), EngineError> {
        let mut state = self.write_state.lock().expect("write state mutex poisoned");
        if state.immutable.is_some() {
            return Ok(());
        }
        let new_log_number = self.next_log_number.fetch_add(1, AtomicOrdering::SeqCst);
        let new_wal = Wal::create(self.log_path(new_log_number))?;
        let old_wal_log_number = state.log_number;

        let old_active = std::mem::replace(&mut state.active, Arc::new(Memtable::new()));
        state.immutable = Some(old_active);
        state.active_wal = new_wal;
        state.log_number = new_log_number;
        drop(state);

        let mut edit = crate::manifest::VersionEdit::new();
        edit.log_number = Some(new_log_number);
        edit.prev_log_number = Some(old_wal_log_number);
        self.version_set.log_and_apply(edit)?;
        debug!(new_log_number, "rotated active memtable");
        self.trigger.notify();
        Ok(())
    }

    /// Flush the immutable memtable (if any) to a level-0 SST, then drop
    /// its WAL and clear the slot.
    fn maybe_flush_immutable(&self) -> Result<bool, EngineError> {
        let frozen = {
            let state = self.write_state.lock().expect("write state mutex poisoned");
            match &state.immutable {
                Some(m) => Arc::clone(m),
                None => return Ok(false),
            }
        };

        compaction::flush_memtable(
            &frozen,
            &self.dbname,
            &self.version_set,
            &self.pending_outputs,
            self.config.table_params(),
        )?;

        let mut state = self.write_state.lock().expect("write state mutex poisoned");
        state.immutable = None;
        drop(state);
        self.delete_obsolete_files()?;
        Ok(true)
    }

    fn maybe_compact_one(&self) -> Result<bool, EngineError> {
        let _guard = self.compaction_mutex.lock().expect("compaction mutex poisoned");
        let Some(picked) = self.version_set.pick_compaction(self.config.max_file_size) else {
            return Ok(false);
        };
        self.run_picked_compaction(picked)?;
        Ok(true)
    }

    fn run_picked_compaction(&self, picked: crate::manifest::PickedCompaction) -> Result<(), EngineError> {
        let smallest_snapshot = self.smallest_snapshot();
        compaction::run_compaction(
            picked,
            &self.dbname,
            &self.version_set,
            smallest_snapshot,
            self.config.max_file_size,
            &self.pending_outputs,
            self.config.table_params(),
        )?;
        self.table_cache.lock().expect("table cache mutex poisoned").clear();
        self.delete_obsolete_files()?;
        Ok(())
    }

    /// `CompactRange`: force every file in `[start_key, end_key)` down
    /// through the tree one level at a time, ignoring the usual
    /// score-based trigger (SPEC_FULL.md §8 manual compaction). Used to
    /// make tombstone elision and leveling deterministic in tests rather
    /// than waiting on background scoring.
    fn compact_range(&self, start_key: &[u8], end_key: &[u8]) -> Result<(), EngineError> {
        let _guard = self.compaction_mutex.lock().expect("compaction mutex poisoned");
        for level in 0..crate::manifest::NUM_LEVELS - 1 {
            loop {
                let Some(picked) = self.version_set.pick_range_compaction(
                    level,
                    start_key,
                    end_key,
                    self.config.max_file_size,
                ) else {
                    break;
                };
                self.run_picked_compaction(picked)?;
            }
        }
        Ok(())
    }

    /// `DeleteObsoleteFiles`: remove WALs below the live log number, stale
    /// MANIFESTs, and SSTs no longer referenced by the current Version.
    fn delete_obsolete_files(&self) -> Result<(), EngineError> {
        let version = self.version_set.current();
        let live_log_number = self.version_set.log_number();
        let prev_log_number = self.version_set.prev_log_number();
        let manifest_number = self.version_set.manifest_file_number();
        let mut live_sst: std::collections::HashSet<u64> = std::collections::HashSet::new();
        for level in 0..crate::manifest::NUM_LEVELS {
            for file in version.files(level) {
                live_sst.insert(file.number);
            }
        }
        live_sst.extend(self.pending_outputs.lock().expect("pending outputs mutex poisoned").iter().copied());

        for entry in fs::read_dir(&self.dbname)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if let Some(rest) = name.strip_suffix(".log") {
                if let Ok(number) = rest.parse::<u64>() {
                    if number < live_log_number && number != prev_log_number {
                        let _ = fs::remove_file(entry.path());
                    }
                }
            } else if let Some(rest) = name.strip_prefix("MANIFEST-") {
                if let Ok(number) = rest.parse::<u64>() {
                    if number < manifest_number {
                        let _ = fs::remove_file(entry.path());
                    }
                }
            } else if let Some(rest) = name.strip_suffix(".ldb").or_else(|| name.strip_suffix(".sst")) {
                if let Ok(number) = rest.parse::<u64>() {
                    if !live_sst.contains(&number) {
                        self.evict_table(number);
                        let _ = fs::remove_file(entry.path());
                    }
                }
            }
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// The main LSM storage engine handle. Cheaply `Clone`-able (an `Arc`
/// around the shared state); the background compaction thread holds its
/// own clone and is joined on [`Engine::close`].
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), worker: Mutex::new(None) }
    }
}

impl Engine {
    /// Open (or create) a database rooted at `path`.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let dbname = path.as_ref().to_path_buf();
        let exists = dbname.join("CURRENT").exists();

        if !exists && !config.create_if_missing {
            return Err(EngineError::InvalidArgument(format!(
                "database {} does not exist and create_if_missing is false",
                dbname.display()
            )));
        }
        if exists && config.error_if_exists {
            return Err(EngineError::InvalidArgument(format!(
                "database {} already exists and error_if_exists is true",
                dbname.display()
            )));
        }
        fs::create_dir_all(&dbname)?;

        let lock_file = acquire_lock(&dbname)?;

        let version_set = VersionSet::recover(&dbname)?;
        let recovered_log_number = version_set.log_number();

        // Replay any WAL at or after the recovered log number into a fresh
        // memtable, flushing to level-0 if it overflows the write buffer
        // during replay (SPEC_FULL.md §4.9 recovery).
        let mut active = Memtable::new();
        let mut max_log_number = recovered_log_number;
        let mut wal_numbers: Vec<u64> = Vec::new();
        for entry in fs::read_dir(&dbname)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(rest) = name.to_string_lossy().strip_suffix(".log") {
                if let Ok(number) = rest.parse::<u64>() {
                    if number >= recovered_log_number {
                        wal_numbers.push(number);
                    }
                }
            }
        }
        wal_numbers.sort_unstable();

        let pending_outputs: compaction::PendingOutputs = Mutex::new(HashSet::new());

        for &number in &wal_numbers {
            max_log_number = max_log_number.max(number);
            let path = dbname.join(format!("{number:06}.log"));
            Wal::<WriteBatch>::replay(&path, config.paranoid_checks, |batch: WriteBatch| {
                apply_batch_to_memtable(&active, &batch);
                version_set.set_last_sequence(batch.sequence() + batch.count() as u64 - 1);
            })?;
            if active.approximate_memory_usage() >= config.write_buffer_size {
                compaction::flush_memtable(
                    &active,
                    &dbname,
                    &version_set,
                    &pending_outputs,
                    config.table_params(),
                )?;
                active = Memtable::new();
            }
        }

        let new_log_number = max_log_number + 1;
        let active_wal = Wal::create(dbname.join(format!("{new_log_number:06}.log")))?;
        {
            let mut edit = crate::manifest::VersionEdit::new();
            edit.log_number = Some(new_log_number);
            edit.prev_log_number = Some(0);
            version_set.log_and_apply(edit)?;
        }

        let inner = Arc::new(EngineInner {
            dbname,
            config,
            version_set,
            write_state: Mutex::new(WriteState {
                active: Arc::new(active),
                active_wal,
                immutable: None,
                log_number: new_log_number,
            }),
            write_mutex: Mutex::new(()),
            snapshots: Mutex::new(Vec::new()),
            table_cache: Mutex::new(HashMap::new()),
            trigger: Trigger::new(),
            shutting_down: AtomicBool::new(false),
            bg_error: Mutex::new(None),
            next_log_number: AtomicU64::new(new_log_number + 1),
            pending_outputs,
            compaction_mutex: Mutex::new(()),
            _lock: lock_file,
        });

        let worker = {
            let inner = Arc::clone(&inner);
            std::thread::spawn(move || background_loop(inner))
        };

        info!(dbname = %inner.dbname.display(), "engine opened");
        Ok(Self { inner, worker: Mutex::new(Some(worker)) })
    }

    /// Insert a single key-value pair.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<(), EngineError> {
        let mut batch = WriteBatch::new();
        batch.put(key.into(), value.into());
        self.write(batch)
    }

    /// Delete a single key.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<(), EngineError> {
        let mut batch = WriteBatch::new();
        batch.delete(key.into());
        self.write(batch)
    }

    /// Delete every live key in `[start_key, end_key)`.
    ///
    /// This data model has no range-tombstone internal-key type (only
    /// `Put`/`Delete`), so a range delete is implemented as a scan
    /// followed by one point `Delete` per matching key, batched together
    /// (see `DESIGN.md`).
    pub fn delete_range(&self, start_key: &[u8], end_key: &[u8]) -> Result<(), EngineError> {
        let keys: Vec<Vec<u8>> = self.scan(start_key, end_key)?.map(|(k, _)| k).collect();
        if keys.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        for key in keys {
            batch.delete(key);
        }
        self.write(batch)
    }

    /// Apply a batch of mutations atomically.
    pub fn write(&self, mut batch: WriteBatch) -> Result<(), EngineError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.inner.check_bg_error()?;
        let _writer = self.inner.write_mutex.lock().expect("write mutex poisoned");
        self.inner.check_bg_error()?;

        self.make_room_for_write(batch.approximate_size())?;

        let base_seq = self.inner.version_set.last_sequence() + 1;
        batch.set_sequence(base_seq);
        let last_seq = base_seq + batch.count() as u64 - 1;

        let state = self.inner.write_state.lock().expect("write state mutex poisoned");
        state.active_wal.append(&batch)?;
        state.active_wal.sync()?;
        apply_batch_to_memtable(&state.active, &batch);
        drop(state);

        self.inner.version_set.set_last_sequence(last_seq);
        Ok(())
    }

    /// `MakeRoomForWrite`: slow down or stall when level 0 is backed up,
    /// and rotate the active memtable once it is full.
    fn make_room_for_write(&self, incoming_bytes: usize) -> Result<(), EngineError> {
        loop {
            self.inner.check_bg_error()?;
            let level0_files = self.inner.version_set.current().files(0).len();

            if level0_files >= LEVEL0_STOP_TRIGGER {
                warn!(level0_files, "level-0 stall: waiting for compaction");
                self.inner.trigger.notify();
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
            if level0_files >= LEVEL0_SLOWDOWN_TRIGGER {
                std::thread::sleep(Duration::from_millis(1));
            }

            let needs_rotation = {
                let state = self.inner.write_state.lock().expect("write state mutex poisoned");
                state.active.approximate_memory_usage() + incoming_bytes >= self.inner.config.write_buffer_size
            };
            if !needs_rotation {
                return Ok(());
            }

            let immutable_occupied = self
                .inner
                .write_state
                .lock()
                .expect("write state mutex poisoned")
                .immutable
                .is_some();
            if immutable_occupied {
                self.inner.trigger.notify();
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }

            self.inner.rotate_memtable()?;
            return Ok(());
        }
    }

    /// Look up a single key at the latest visible sequence.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.get_at(key, self.inner.version_set.last_sequence())
    }

    /// Look up a single key as of a previously captured snapshot.
    pub fn get_at(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<Vec<u8>>, EngineError> {
        let (active, immutable, version) = {
            let state = self.inner.write_state.lock().expect("write state mutex poisoned");
            (Arc::clone(&state.active), state.immutable.clone(), self.inner.version_set.current())
        };

        let lookup = LookupKey::new(key, snapshot_seq);
        match active.get(&lookup) {
            MemtableGetResult::Found(v) => return Ok(Some(v)),
            MemtableGetResult::Deleted => return Ok(None),
            MemtableGetResult::NotFound => {}
        }
        if let Some(imm) = &immutable {
            match imm.get(&lookup) {
                MemtableGetResult::Found(v) => return Ok(Some(v)),
                MemtableGetResult::Deleted => return Ok(None),
                MemtableGetResult::NotFound => {}
            }
        }

        let mut files_consulted = 0u32;
        let mut charged_seek_file: Option<u64> = None;
        for level in 0..crate::manifest::NUM_LEVELS {
            let candidates = version.overlapping_files(level, key, key);
            for file in &candidates {
                files_consulted += 1;
                if charged_seek_file.is_none() {
                    charged_seek_file = Some(file.number);
                }
                let table = self.inner.open_table(file.number)?;
                match table.get(&internal_key::encode(key, snapshot_seq, ValueType::Put))? {
                    SstGetResult::Found(v) => {
                        self.charge_seek_if_needed(files_consulted, charged_seek_file);
                        return Ok(Some(v));
                    }
                    SstGetResult::Deleted => {
                        self.charge_seek_if_needed(files_consulted, charged_seek_file);
                        return Ok(None);
                    }
                    SstGetResult::NotFound => {}
                }
            }
        }
        self.charge_seek_if_needed(files_consulted, charged_seek_file);
        Ok(None)
    }

    fn charge_seek_if_needed(&self, files_consulted: u32, first_file: Option<u64>) {
        let Some(number) = first_file else { return };
        if files_consulted <= 1 {
            return;
        }
        let version = self.inner.version_set.current();
        for level in 0..crate::manifest::NUM_LEVELS {
            if let Some(file) = version.files(level).iter().find(|f| f.number == number) {
                if file.charge_seek() {
                    debug!(file = number, level, "seek compaction triggered");
                    self.inner.trigger.notify();
                }
                return;
            }
        }
    }

    /// Scan all live key-value pairs in `[start_key, end_key)` at the
    /// latest visible sequence.
    pub fn scan(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, Vec<u8>)>, EngineError> {
        self.scan_at(start_key, end_key, self.inner.version_set.last_sequence())
    }

    /// Scan as of a previously captured snapshot.
    pub fn scan_at(
        &self,
        start_key: &[u8],
        end_key: &[u8],
        snapshot_seq: u64,
    ) -> Result<impl Iterator<Item = (Vec<u8>, Vec<u8>)>, EngineError> {
        let (active, immutable, version) = {
            let state = self.inner.write_state.lock().expect("write state mutex poisoned");
            (Arc::clone(&state.active), state.immutable.clone(), self.inner.version_set.current())
        };

        let in_range = |user_key: &[u8]| user_key >= start_key && user_key < end_key;

        let mut sources: Vec<std::vec::IntoIter<(Vec<u8>, Vec<u8>)>> = Vec::new();
        let active_entries: Vec<_> = active
            .iter()
            .filter(|(uk, ..)| in_range(uk))
            .map(|(uk, seq, kind, v)| (internal_key::encode(&uk, seq, kind), v))
            .collect();
        sources.push(active_entries.into_iter());

        if let Some(imm) = &immutable {
            let entries: Vec<_> = imm
                .iter()
                .filter(|(uk, ..)| in_range(uk))
                .map(|(uk, seq, kind, v)| (internal_key::encode(&uk, seq, kind), v))
                .collect();
            sources.push(entries.into_iter());
        }

        for level in 0..crate::manifest::NUM_LEVELS {
            for file in version.overlapping_files(level, start_key, end_key) {
                let table = self.inner.open_table(file.number)?;
                let entries: Vec<_> = table
                    .iter()
                    .filter(|(ikey, _)| in_range(internal_key::user_key(ikey)))
                    .collect();
                sources.push(entries.into_iter());
            }
        }

        let merged = MergeIterator::new(sources);
        Ok(VisibilityFilter::new(merged, snapshot_seq))
    }

    /// Force every file touching `[start_key, end_key)` through the full
    /// compaction pipeline down to the last level, regardless of whether
    /// background scoring would have picked them. Blocks until the range
    /// is fully compacted; intended for tests and maintenance tooling, not
    /// the steady-state write path.
    pub fn compact_range(&self, start_key: &[u8], end_key: &[u8]) -> Result<(), EngineError> {
        self.inner.check_bg_error()?;
        self.inner.rotate_memtable()?;
        while self.inner.maybe_flush_immutable()? {}
        self.inner.compact_range(start_key, end_key)?;
        Ok(())
    }

    /// Capture a read snapshot at the current `last_sequence`.
    pub fn get_snapshot(&self) -> Snapshot {
        let sequence = self.inner.version_set.last_sequence();
        self.inner.snapshots.lock().expect("snapshot list poisoned").push(sequence);
        Snapshot { sequence, engine: Arc::clone(&self.inner) }
    }

    /// Gracefully shut down: signal and join the background thread,
    /// flush any remaining immutable memtable, and release the file lock
    /// on drop.
    pub fn close(&self) -> Result<(), EngineError> {
        self.inner.shutting_down.store(true, AtomicOrdering::Release);
        self.inner.trigger.notify();
        if let Some(handle) = self.worker.lock().expect("worker mutex poisoned").take() {
            let _ = handle.join();
        }
        while self.inner.maybe_flush_immutable()? {}
        info!(dbname = %self.inner.dbname.display(), "engine closed");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.inner.shutting_down.store(true, AtomicOrdering::Release);
        self.inner.trigger.notify();
        if let Some(handle) = self.worker.lock().expect("worker mutex poisoned").take() {
            let _ = handle.join();
        }
    }
}

fn apply_batch_to_memtable(memtable: &Memtable, batch: &WriteBatch) {
    for (i, op) in batch.iterate().enumerate() {
        let sequence = batch.sequence() + i as u64;
        match op {
            BatchOp::Put { key, value } => memtable.add(sequence, ValueType::Put, key, value),
            BatchOp::Delete { key } => memtable.add(sequence, ValueType::Delete, key, &[]),
        }
    }
}

fn background_loop(inner: Arc<EngineInner>) {
    loop {
        if inner.shutting_down.load(AtomicOrdering::Acquire) {
            return;
        }
        let mut did_work = false;
        match inner.maybe_flush_immutable() {
            Ok(flushed) => did_work |= flushed,
            Err(err) => inner.set_bg_error(err),
        }
        match inner.maybe_compact_one() {
            Ok(compacted) => did_work |= compacted,
            Err(err) => inner.set_bg_error(err),
        }
        if !did_work {
            inner.trigger.wait(&inner.shutting_down);
        }
    }
}

/// Tracks which database directories are currently open within this
/// process. `flock(2)`/`fcntl` would extend this protection across
/// processes; this crate targets the single-process embedding case that
/// its test suite and callers actually exercise (documented
/// simplification, see `DESIGN.md`).
fn open_databases() -> &'static Mutex<HashSet<PathBuf>> {
    static REGISTRY: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Releases a directory's claim in [`open_databases`] when dropped, so a
/// database can be reopened after [`Engine::close`] or a plain `Drop`.
struct ProcessLock {
    canonical: PathBuf,
    _marker: File,
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        open_databases()
            .lock()
            .expect("lock registry poisoned")
            .remove(&self.canonical);
    }
}

/// Claim `dbname` for this process and touch its on-disk `LOCK` marker.
fn acquire_lock(dbname: &Path) -> Result<ProcessLock, EngineError> {
    let canonical = dbname.canonicalize().unwrap_or_else(|_| dbname.to_path_buf());
    {
        let mut held = open_databases().lock().expect("lock registry poisoned");
        if !held.insert(canonical.clone()) {
            return Err(EngineError::LockHeld(format!(
                "{} is already open in this process",
                dbname.display()
            )));
        }
    }

    let path = dbname.join("LOCK");
    match OpenOptions::new().write(true).create(true).truncate(false).open(&path) {
        Ok(marker) => Ok(ProcessLock { canonical, _marker: marker }),
        Err(e) => {
            open_databases().lock().expect("lock registry poisoned").remove(&canonical);
            Err(EngineError::LockHeld(format!("{}: {e}", path.display())))
        }
    }
}
