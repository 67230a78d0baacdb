//! Background compaction: memtable flush, trivial move, and merge
//! compaction with snapshot-aware tombstone elision.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

use crate::engine::utils::MergeIterator;
use crate::internal_key::{self, ValueType};
use crate::manifest::{FileMetaData, PickedCompaction, Version, VersionEdit, VersionSet, NUM_LEVELS};
use crate::memtable::Memtable;
use crate::sstable::builder::SstWriter;
use crate::sstable::{SsTable, SstError};

/// File numbers allocated for an in-flight flush or compaction output but
/// not yet installed into a `Version` — the DB-mutex-protected set
/// `delete_obsolete_files` (SPEC_FULL.md §5, §4.11/§8) must also treat as
/// live, so it never races a sweep into deleting a file it just created.
pub type PendingOutputs = Mutex<HashSet<u64>>;

/// Claims a freshly allocated output file number in `pending_outputs` for
/// the lifetime of this guard, releasing it on drop regardless of whether
/// the output ever made it into a `Version`.
struct PendingOutputGuard<'a> {
    pending_outputs: &'a PendingOutputs,
    number: u64,
}

impl<'a> PendingOutputGuard<'a> {
    fn new(pending_outputs: &'a PendingOutputs, number: u64) -> Self {
        pending_outputs.lock().expect("pending outputs mutex poisoned").insert(number);
        Self { pending_outputs, number }
    }
}

impl Drop for PendingOutputGuard<'_> {
    fn drop(&mut self) {
        self.pending_outputs.lock().expect("pending outputs mutex poisoned").remove(&self.number);
    }
}

/// Level beyond which a memtable flush never lands directly (mirrors the
/// original source's `kMaxMemCompactLevel`).
const MAX_MEM_COMPACT_LEVEL: usize = 2;

/// SST construction knobs threaded through from `EngineConfig`.
#[derive(Clone, Copy)]
pub struct TableParams {
    pub block_size: usize,
    pub filter_bits_per_key: usize,
    pub block_restart_interval: usize,
}

impl TableParams {
    fn writer(self, path: impl AsRef<Path>) -> SstWriter {
        SstWriter::create_with_restart_interval(
            path,
            self.block_size,
            self.filter_bits_per_key,
            self.block_restart_interval,
        )
    }
}

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sst error: {0}")]
    Sst(#[from] SstError),
    #[error("manifest error: {0}")]
    Manifest(#[from] crate::manifest::ManifestError),
}

pub fn sst_path(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.ldb"))
}

/// `10 * target file size`: the grandparent-overlap budget an output file
/// is allowed to accumulate before a merge starts a fresh one, and the
/// bound a trivial move must stay under to avoid creating a parent file
/// that would make a later level+1 merge read too much level+2 data.
fn max_grandparent_overlap_bytes(max_file_size: u64) -> u64 {
    10 * max_file_size
}

/// Answers, incrementally and in increasing-user-key order, "does any file
/// at a level ≥ `start_level` hold this user key?" — `run_compaction`'s
/// tombstone elision is only sound once the answer is no (SPEC_FULL.md
/// §4.10 rule 2). Each level keeps its own cursor so a full scan of the
/// compaction's merged output costs one linear pass per level, not one
/// per key.
struct BaseLevelChecker<'a> {
    version: &'a Version,
    start_level: usize,
    cursors: Vec<usize>,
}

impl<'a> BaseLevelChecker<'a> {
    fn new(version: &'a Version, start_level: usize) -> Self {
        let cursors = vec![0; NUM_LEVELS.saturating_sub(start_level)];
        Self { version, start_level, cursors }
    }

    fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        for level in self.start_level..NUM_LEVELS {
            let files = self.version.files(level);
            let cursor = &mut self.cursors[level - self.start_level];
            while *cursor < files.len() {
                let file = &files[*cursor];
                let file_largest = internal_key::user_key(&file.largest);
                if user_key <= file_largest {
                    let file_smallest = internal_key::user_key(&file.smallest);
                    if user_key >= file_smallest {
                        return false;
                    }
                    break;
                }
                *cursor += 1;
            }
        }
        true
    }
}

/// Tracks how many grandparent (level+2) bytes the current output file's
/// key range has swept over, so a merge can roll to a new output before a
/// single file ends up overlapping too much of the level below.
struct GrandparentOverlap<'a> {
    grandparents: &'a [Arc<FileMetaData>],
    index: usize,
    overlapped_bytes: u64,
    seen_key: bool,
}

impl<'a> GrandparentOverlap<'a> {
    fn new(grandparents: &'a [Arc<FileMetaData>]) -> Self {
        Self { grandparents, index: 0, overlapped_bytes: 0, seen_key: false }
    }

    fn should_stop_before(&mut self, ikey: &[u8], limit: u64) -> bool {
        while self.index < self.grandparents.len()
            && internal_key::compare(ikey, &self.grandparents[self.index].largest)
                == std::cmp::Ordering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.index].file_size;
            }
            self.index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > limit {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }
}

/// Freeze-and-flush: write an immutable memtable's entries to a new SST
/// and install it into the version via a `VersionEdit`.
pub fn flush_memtable(
    memtable: &Memtable,
    dbname: &Path,
    version_set: &VersionSet,
    pending_outputs: &PendingOutputs,
    params: TableParams,
) -> Result<(), CompactionError> {
    if memtable.is_empty() {
        return Ok(());
    }

    let file_number = version_set.new_file_number();
    let _pending = PendingOutputGuard::new(pending_outputs, file_number);
    let path = sst_path(dbname, file_number);
    let mut writer = params.writer(&path);
    let mut count = 0u64;
    for (user_key, seq, kind, value) in memtable.iter() {
        writer.add(&internal_key::encode(&user_key, seq, kind), &value);
        count += 1;
    }
    let sst_info = writer.finish()?;

    let version = version_set.current();
    let smallest_user = internal_key::user_key(&sst_info.smallest_key).to_vec();
    let largest_user = internal_key::user_key(&sst_info.largest_key).to_vec();

    let mut level = 0;
    if version.overlapping_files(0, &smallest_user, &largest_user).is_empty() {
        while level < MAX_MEM_COMPACT_LEVEL
            && version
                .overlapping_files(level + 1, &smallest_user, &largest_user)
                .is_empty()
        {
            level += 1;
        }
    }

    let meta = FileMetaData::new(
        file_number,
        sst_info.file_size,
        sst_info.smallest_key,
        sst_info.largest_key,
    );
    let mut edit = VersionEdit::new();
    edit.add_file(level, meta);
    version_set.log_and_apply(edit)?;
    info!(file_number, level, entries = count, "flushed memtable to sst");
    Ok(())
}

/// Run one compaction job already chosen by `VersionSet::pick_compaction`.
pub fn run_compaction(
    picked: PickedCompaction,
    dbname: &Path,
    version_set: &VersionSet,
    smallest_snapshot: u64,
    max_file_size: u64,
    pending_outputs: &PendingOutputs,
    params: TableParams,
) -> Result<(), CompactionError> {
    let level = picked.level;
    let grandparent_overlap_limit = max_grandparent_overlap_bytes(max_file_size);
    let grandparents_size: u64 = picked.grandparents.iter().map(|f| f.file_size).sum();

    if picked.inputs.len() == 1
        && picked.level_plus_one_inputs.is_empty()
        && grandparents_size <= grandparent_overlap_limit
    {
        let file = &picked.inputs[0];
        let mut edit = VersionEdit::new();
        edit.delete_file(level, file.number);
        edit.add_file(level + 1, clone_meta(file));
        edit.compact_pointers.push((level, file.largest.clone()));
        version_set.log_and_apply(edit)?;
        info!(level, file = file.number, "trivial move to next level");
        return Ok(());
    }

    // A Delete tombstone with sequence <= smallest_snapshot is only safe to
    // drop once no file at a level >= L+2 could still hold an older version
    // of that key (SPEC_FULL.md §4.10 rule 2); `BaseLevelChecker` answers
    // that per key against the version this compaction was picked from.
    let version_for_elision = version_set.current();
    let mut base_level_checker = BaseLevelChecker::new(&version_for_elision, level + 2);
    let mut grandparent_overlap = GrandparentOverlap::new(&picked.grandparents);

    // Each input table is already internal-key sorted; merging them
    // (rather than a plain sort) keeps the newest version of a
    // duplicated key first, which the elision walk below depends on.
    let mut per_table: Vec<std::vec::IntoIter<(Vec<u8>, Vec<u8>)>> = Vec::new();
    for file in picked.inputs.iter().chain(picked.level_plus_one_inputs.iter()) {
        let table = SsTable::open(sst_path(dbname, file.number), file.number)?;
        let collected: Vec<(Vec<u8>, Vec<u8>)> = table.iter().collect();
        per_table.push(collected.into_iter());
    }
    let entries: Vec<(Vec<u8>, Vec<u8>)> = MergeIterator::new(per_table).collect();

    let mut new_files: Vec<FileMetaData> = Vec::new();
    let mut writer: Option<SstWriter> = None;
    let mut current_number = 0u64;
    let mut current_smallest: Option<Vec<u8>> = None;
    let mut current_largest: Vec<u8> = Vec::new();
    let mut pending_guards: Vec<PendingOutputGuard<'_>> = Vec::new();

    let mut last_user_key: Option<Vec<u8>> = None;
    let mut shadowed = false;

    macro_rules! roll_output {
        () => {
            if let Some(w) = writer.take() {
                let info = w.finish()?;
                new_files.push(FileMetaData::new(
                    current_number,
                    info.file_size,
                    current_smallest.take().unwrap_or(info.smallest_key),
                    current_largest.clone(),
                ));
            }
        };
    }

    for (ikey, value) in entries {
        if writer.is_some() && grandparent_overlap.should_stop_before(&ikey, grandparent_overlap_limit) {
            roll_output!();
        }

        let (user_key, sequence, kind) = internal_key::decode(&ikey);
        let same_key = last_user_key.as_deref() == Some(user_key);
        if !same_key {
            last_user_key = Some(user_key.to_vec());
            shadowed = false;
        }

        let mut drop_entry = false;
        if same_key && shadowed {
            drop_entry = true;
        } else if kind == ValueType::Delete
            && sequence <= smallest_snapshot
            && base_level_checker.is_base_level_for_key(user_key)
        {
            drop_entry = true;
            shadowed = true;
        } else if sequence <= smallest_snapshot {
            shadowed = true;
        }

        if drop_entry {
            continue;
        }

        if writer.is_none() {
            current_number = version_set.new_file_number();
            pending_guards.push(PendingOutputGuard::new(pending_outputs, current_number));
            current_smallest = Some(ikey.clone());
            writer = Some(params.writer(sst_path(dbname, current_number)));
        }
        let w = writer.as_mut().expect("writer initialized above");
        w.add(&ikey, &value);
        current_largest = ikey;

        if w.approx_size() >= max_file_size {
            roll_output!();
        }
    }
    roll_output!();

    let mut edit = VersionEdit::new();
    for file in &picked.inputs {
        edit.delete_file(level, file.number);
    }
    for file in &picked.level_plus_one_inputs {
        edit.delete_file(level + 1, file.number);
    }
    if let Some(last_input) = picked.inputs.iter().max_by(|a, b| {
        internal_key::compare(&a.largest, &b.largest)
    }) {
        edit.compact_pointers.push((level, last_input.largest.clone()));
    }
    let output_count = new_files.len();
    for meta in new_files {
        edit.add_file(level + 1, meta);
    }

    version_set.log_and_apply(edit)?;
    info!(
        level,
        inputs = picked.inputs.len() + picked.level_plus_one_inputs.len(),
        outputs = output_count,
        "merge compaction complete"
    );
    Ok(())
}

fn clone_meta(file: &FileMetaData) -> FileMetaData {
    FileMetaData::new(file.number, file.file_size, file.smallest.clone(), file.largest.clone())
}
