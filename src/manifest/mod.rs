//! Persistent metadata authority: the per-level file catalog (`Version`),
//! its mutation log (`VersionEdit`), and the manifest file that carries
//! that log (`VersionSet`).
//!
//! The manifest is itself a [`crate::wal::Wal`] of `VersionEdit` records:
//! applying every edit from the beginning yields the live `Version`. A
//! one-line `CURRENT` file names the active `MANIFEST-<n>`; recovery reads
//! `CURRENT`, replays that manifest, and installs the result.


use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use crate::encoding::{
    get_varbytes, get_varint_u64, get_varint_usize, put_varbytes, put_varint_u64,
    put_varint_usize, Decode, Encode, EncodingError,
};
use crate::internal_key;
use crate::wal::{Wal, WalError};

/// Number of levels in the LSM tree, level 0 through level 6.
pub const NUM_LEVELS: usize = 7;

/// Target SST size used to turn a score into a needs-compaction signal;
/// overridable by `EngineConfig::max_file_size` at the call site.
pub const DEFAULT_TARGET_FILE_SIZE: u64 = 2 * 1024 * 1024;

fn max_bytes_for_level(level: usize) -> f64 {
    // Level 1 gets 10 MiB; each level after that is 10x larger, matching
    // the original source's `MaxBytesForLevel`.
    let mut result = 10.0 * 1024.0 * 1024.0;
    let mut l = level;
    while l > 1 {
        result *= 10.0;
        l -= 1;
    }
    result
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("corrupt manifest: {0}")]
    Corruption(String),
}

// ------------------------------------------------------------------------------------------------
// FileMetaData
// ------------------------------------------------------------------------------------------------

/// Describes one SST file tracked by a `Version`.
#[derive(Debug, Clone)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: Vec<u8>,
    pub largest: Vec<u8>,
    /// Remaining reads allowed against this file before it is nominated
    /// for a seek-driven compaction; seeded from file size at `AddFile`.
    pub allowed_seeks: Arc<AtomicU64>,
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: Vec<u8>, largest: Vec<u8>) -> Self {
        let allowed_seeks = (file_size / 16384).max(100);
        Self {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: Arc::new(AtomicU64::new(allowed_seeks)),
        }
    }

    /// Charge one seek against this file; returns `true` the first time
    /// its allowance is exhausted (caller should schedule compaction).
    pub fn charge_seek(&self) -> bool {
        let prev = self.allowed_seeks.fetch_update(
            AtomicOrdering::SeqCst,
            AtomicOrdering::SeqCst,
            |v| if v == 0 { None } else { Some(v - 1) },
        );
        matches!(prev, Ok(1))
    }
}

// ------------------------------------------------------------------------------------------------
// VersionEdit
// ------------------------------------------------------------------------------------------------

const TAG_COMPARATOR: u8 = 1;
const TAG_LOG_NUMBER: u8 = 2;
const TAG_PREV_LOG_NUMBER: u8 = 3;
const TAG_NEXT_FILE_NUMBER: u8 = 4;
const TAG_LAST_SEQUENCE: u8 = 5;
const TAG_COMPACT_POINTER: u8 = 6;
const TAG_DELETED_FILE: u8 = 7;
const TAG_NEW_FILE: u8 = 8;

/// One mutation to the file catalog. A sequence of edits, applied in
/// order from an empty builder, reconstructs the live `Version`.
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    pub comparator: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<u64>,
    pub compact_pointers: Vec<(usize, Vec<u8>)>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, level: usize, meta: FileMetaData) {
        self.new_files.push((level, meta));
    }

    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.push((level, number));
    }
}

impl Encode for VersionEdit {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        if let Some(ref name) = self.comparator {
            buf.push(TAG_COMPARATOR);
            put_varbytes(buf, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            buf.push(TAG_LOG_NUMBER);
            put_varint_u64(buf, n);
        }
        if let Some(n) = self.prev_log_number {
            buf.push(TAG_PREV_LOG_NUMBER);
            put_varint_u64(buf, n);
        }
        if let Some(n) = self.next_file_number {
            buf.push(TAG_NEXT_FILE_NUMBER);
            put_varint_u64(buf, n);
        }
        if let Some(n) = self.last_sequence {
            buf.push(TAG_LAST_SEQUENCE);
            put_varint_u64(buf, n);
        }
        for (level, key) in &self.compact_pointers {
            buf.push(TAG_COMPACT_POINTER);
            put_varint_usize(buf, *level);
            put_varbytes(buf, key);
        }
        for (level, number) in &self.deleted_files {
            buf.push(TAG_DELETED_FILE);
            put_varint_usize(buf, *level);
            put_varint_u64(buf, *number);
        }
        for (level, meta) in &self.new_files {
            buf.push(TAG_NEW_FILE);
            put_varint_usize(buf, *level);
            put_varint_u64(buf, meta.number);
            put_varint_u64(buf, meta.file_size);
            put_varbytes(buf, &meta.smallest);
            put_varbytes(buf, &meta.largest);
        }
        Ok(())
    }
}

impl Decode for VersionEdit {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut edit = VersionEdit::new();
        let mut off = 0;
        while off < buf.len() {
            let tag = buf[off];
            off += 1;
            match tag {
                TAG_COMPARATOR => {
                    let (bytes, n) = get_varbytes(&buf[off..])?;
                    off += n;
                    edit.comparator = Some(String::from_utf8(bytes)?);
                }
                TAG_LOG_NUMBER => {
                    let (v, n) = get_varint_u64(&buf[off..])?;
                    off += n;
                    edit.log_number = Some(v);
                }
                TAG_PREV_LOG_NUMBER => {
                    let (v, n) = get_varint_u64(&buf[off..])?;
                    off += n;
                    edit.prev_log_number = Some(v);
                }
                TAG_NEXT_FILE_NUMBER => {
                    let (v, n) = get_varint_u64(&buf[off..])?;
                    off += n;
                    edit.next_file_number = Some(v);
                }
                TAG_LAST_SEQUENCE => {
                    let (v, n) = get_varint_u64(&buf[off..])?;
                    off += n;
                    edit.last_sequence = Some(v);
                }
                TAG_COMPACT_POINTER => {
                    let (level, n) = get_varint_usize(&buf[off..])?;
                    off += n;
                    let (key, n) = get_varbytes(&buf[off..])?;
                    off += n;
                    edit.compact_pointers.push((level, key));
                }
                TAG_DELETED_FILE => {
                    let (level, n) = get_varint_usize(&buf[off..])?;
                    off += n;
                    let (number, n) = get_varint_u64(&buf[off..])?;
                    off += n;
                    edit.deleted_files.push((level, number));
                }
                TAG_NEW_FILE => {
                    let (level, n) = get_varint_usize(&buf[off..])?;
                    off += n;
                    let (number, n) = get_varint_u64(&buf[off..])?;
                    off += n;
                    let (file_size, n) = get_varint_u64(&buf[off..])?;
                    off += n;
                    let (smallest, n) = get_varbytes(&buf[off..])?;
                    off += n;
                    let (largest, n) = get_varbytes(&buf[off..])?;
                    off += n;
                    edit.new_files.push((
                        level,
                        FileMetaData::new(number, file_size, smallest, largest),
                    ));
                }
                other => {
                    return Err(EncodingError::InvalidTag {
                        tag: other as u32,
                        type_name: "VersionEdit",
                    })
                }
            }
        }
        Ok((edit, off))
    }
}

// ------------------------------------------------------------------------------------------------
// Version
// ------------------------------------------------------------------------------------------------

/// A point-in-time, immutable file catalog: `NUM_LEVELS` sorted lists of
/// [`FileMetaData`]. Shared by `Arc` between the `VersionSet` and any
/// reader that captured it before a later `LogAndApply` installed a new
/// one.
#[derive(Debug, Clone, Default)]
pub struct Version {
    pub levels: [Vec<Arc<FileMetaData>>; NUM_LEVELS],
}

impl Version {
    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.levels[level]
    }

    /// Files at `level` whose key range overlaps `[smallest, largest]`
    /// (user keys, not internal keys).
    pub fn overlapping_files(&self, level: usize, smallest: &[u8], largest: &[u8]) -> Vec<Arc<FileMetaData>> {
        self.levels[level]
            .iter()
            .filter(|f| {
                let f_smallest = internal_key::user_key(&f.smallest);
                let f_largest = internal_key::user_key(&f.largest);
                !(f_largest < smallest || f_smallest > largest)
            })
            .cloned()
            .collect()
    }

    /// Score for each level: level 0 by file count / 4, others by total
    /// bytes / max bytes for that level.
    pub fn compaction_score(&self, level: usize) -> f64 {
        if level == 0 {
            self.levels[0].len() as f64 / 4.0
        } else {
            let total: u64 = self.levels[level].iter().map(|f| f.file_size).sum();
            total as f64 / max_bytes_for_level(level)
        }
    }

    /// The level with the highest compaction score, if any score ≥ 1.
    pub fn size_compaction_level(&self) -> Option<usize> {
        (0..NUM_LEVELS - 1)
            .map(|l| (l, self.compaction_score(l)))
            .filter(|(_, score)| *score >= 1.0)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(l, _)| l)
    }

    pub fn total_file_count(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }
}

/// A level + set of input files chosen by the compaction picker.
pub struct PickedCompaction {
    pub level: usize,
    pub inputs: Vec<Arc<FileMetaData>>,
    pub level_plus_one_inputs: Vec<Arc<FileMetaData>>,
    pub grandparents: Vec<Arc<FileMetaData>>,
}

// ------------------------------------------------------------------------------------------------
// Builder: folds a sequence of edits into a new Version
// ------------------------------------------------------------------------------------------------

struct Builder {
    base: Version,
    deleted: [std::collections::HashSet<u64>; NUM_LEVELS],
    added: [Vec<Arc<FileMetaData>>; NUM_LEVELS],
}

impl Builder {
    fn new(base: Version) -> Self {
        Self {
            base,
            deleted: Default::default(),
            added: Default::default(),
        }
    }

    fn apply(&mut self, edit: &VersionEdit) {
        for (level, number) in &edit.deleted_files {
            self.deleted[*level].insert(*number);
        }
        for (level, meta) in &edit.new_files {
            self.added[*level].push(Arc::new(meta.clone()));
        }
    }

    fn finish(mut self) -> Version {
        let mut out = Version::default();
        for level in 0..NUM_LEVELS {
            let mut files: Vec<Arc<FileMetaData>> = self.base.levels[level]
                .iter()
                .filter(|f| !self.deleted[level].contains(&f.number))
                .cloned()
                .collect();
            files.append(&mut self.added[level]);
            if level == 0 {
                files.sort_by_key(|f| f.number);
            } else {
                files.sort_by(|a, b| internal_key::compare(&a.smallest, &b.smallest));
            }
            out.levels[level] = files;
        }
        out
    }
}

// ------------------------------------------------------------------------------------------------
// VersionSet
// ------------------------------------------------------------------------------------------------

/// Owns the installed `Version`, the MANIFEST file, and the allocators
/// for file and sequence numbers. Every mutation goes through
/// [`VersionSet::log_and_apply`]; callers serialize access to it with
/// the engine's DB mutex (`SPEC_FULL.md` §4.9/§5).
pub struct VersionSet {
    dbname: PathBuf,
    current: Mutex<Arc<Version>>,
    manifest: Mutex<Wal<VersionEdit>>,
    manifest_file_number: AtomicU64,
    next_file_number: AtomicU64,
    last_sequence: AtomicU64,
    log_number: AtomicU64,
    prev_log_number: AtomicU64,
    compact_pointer: Mutex<[Vec<u8>; NUM_LEVELS]>,
}

fn current_file(dbname: &Path) -> PathBuf {
    dbname.join("CURRENT")
}

fn manifest_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("MANIFEST-{number:06}"))
}

impl VersionSet {
    /// Recover (or create) the manifest for `dbname`. If `CURRENT` exists,
    /// its named manifest is replayed into a fresh `Version`; otherwise a
    /// brand-new manifest is created with file number 1.
    pub fn recover(dbname: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let dbname = dbname.as_ref().to_path_buf();
        let current_path = current_file(&dbname);

        if current_path.exists() {
            let contents = std::fs::read_to_string(&current_path)?;
            let name = contents.trim();
            if name.is_empty() {
                return Err(ManifestError::Corruption("CURRENT file is empty".into()));
            }
            let manifest_path = dbname.join(name);
            let mut builder = Builder::new(Version::default());
            let mut next_file_number = 2u64;
            let mut last_sequence = 0u64;
            let mut log_number = 0u64;
            let mut prev_log_number = 0u64;
            let mut edits = 0u64;

            Wal::<VersionEdit>::replay(&manifest_path, false, |edit: VersionEdit| {
                if let Some(n) = edit.next_file_number {
                    next_file_number = n;
                }
                if let Some(n) = edit.last_sequence {
                    last_sequence = n;
                }
                if let Some(n) = edit.log_number {
                    log_number = n;
                }
                if let Some(n) = edit.prev_log_number {
                    prev_log_number = n;
                }
                builder.apply(&edit);
                edits += 1;
            })?;

            info!(edits, manifest = name, "recovered manifest");

            let version = builder.finish();
            let manifest_number: u64 = name
                .trim_start_matches("MANIFEST-")
                .parse()
                .map_err(|_| ManifestError::Corruption(format!("bad manifest name {name}")))?;

            let vs = Self {
                dbname,
                current: Mutex::new(Arc::new(version)),
                manifest: Mutex::new(Wal::create(&manifest_path)?),
                manifest_file_number: AtomicU64::new(manifest_number),
                next_file_number: AtomicU64::new(next_file_number.max(manifest_number + 1)),
                last_sequence: AtomicU64::new(last_sequence),
                log_number: AtomicU64::new(log_number),
                prev_log_number: AtomicU64::new(prev_log_number),
                compact_pointer: Mutex::new(Default::default()),
            };
            Ok(vs)
        } else {
            let manifest_number = 1u64;
            let manifest_path = manifest_file_name(&dbname, manifest_number);
            let wal = Wal::create(&manifest_path)?;

            let mut initial = VersionEdit::new();
            initial.comparator = Some("internal_key_comparator".to_string());
            initial.next_file_number = Some(2);
            initial.last_sequence = Some(0);
            initial.log_number = Some(0);
            wal.append(&initial)?;
            wal.sync()?;

            write_current(&dbname, manifest_number)?;
            debug!(dbname = %dbname.display(), "created fresh manifest");

            Ok(Self {
                dbname,
                current: Mutex::new(Arc::new(Version::default())),
                manifest: Mutex::new(wal),
                manifest_file_number: AtomicU64::new(manifest_number),
                next_file_number: AtomicU64::new(2),
                last_sequence: AtomicU64::new(0),
                log_number: AtomicU64::new(0),
                prev_log_number: AtomicU64::new(0),
                compact_pointer: Mutex::new(Default::default()),
            })
        }
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current.lock().expect("version mutex poisoned"))
    }

    pub fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, AtomicOrdering::SeqCst)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(AtomicOrdering::SeqCst)
    }

    pub fn set_last_sequence(&self, seq: u64) {
        self.last_sequence.fetch_max(seq, AtomicOrdering::SeqCst);
    }

    pub fn log_number(&self) -> u64 {
        self.log_number.load(AtomicOrdering::SeqCst)
    }

    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number.load(AtomicOrdering::SeqCst)
    }

    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number.load(AtomicOrdering::SeqCst)
    }

    pub fn compact_pointer(&self, level: usize) -> Vec<u8> {
        self.compact_pointer.lock().expect("compact pointer mutex poisoned")[level].clone()
    }

    /// Apply `edit` to the installed version, append it to the manifest,
    /// and fsync. Callers must serialize calls to this (the engine's DB
    /// mutex provides that in practice).
    pub fn log_and_apply(&self, mut edit: VersionEdit) -> Result<(), ManifestError> {
        if let Some(n) = edit.log_number {
            self.log_number.store(n, AtomicOrdering::SeqCst);
        }
        if let Some(n) = edit.prev_log_number {
            self.prev_log_number.store(n, AtomicOrdering::SeqCst);
        }
        if let Some(n) = edit.last_sequence {
            self.set_last_sequence(n);
        }
        edit.next_file_number = Some(self.next_file_number.load(AtomicOrdering::SeqCst));

        {
            let mut pointers = self.compact_pointer.lock().expect("compact pointer mutex poisoned");
            for (level, key) in &edit.compact_pointers {
                pointers[*level] = key.clone();
            }
        }

        let base = self.current();
        let mut builder = Builder::new((*base).clone());
        builder.apply(&edit);
        let new_version = builder.finish();

        let manifest = self.manifest.lock().expect("manifest mutex poisoned");
        manifest.append(&edit)?;
        manifest.sync()?;
        drop(manifest);

        *self.current.lock().expect("version mutex poisoned") = Arc::new(new_version);
        Ok(())
    }

    pub fn dbname(&self) -> &Path {
        &self.dbname
    }

    /// Pick the highest-scoring level needing compaction, if any, and
    /// assemble its input file set per `SPEC_FULL.md` §4.9.
    ///
    /// `max_file_size` bounds the input-set expansion below: growing the
    /// level-L side is only attempted while the combined level-L +
    /// level-(L+1) size stays under 25x it.
    pub fn pick_compaction(&self, max_file_size: u64) -> Option<PickedCompaction> {
        let version = self.current();
        let level = version.size_compaction_level()?;

        let pointer = self.compact_pointer(level);
        let candidates = version.files(level);
        if candidates.is_empty() {
            return None;
        }
        // An unset pointer (no compaction has touched this level yet) has
        // no tag suffix for `internal_key::compare` to read; start from
        // the first file rather than comparing against it.
        let start = if pointer.is_empty() {
            0
        } else {
            candidates
                .iter()
                .position(|f| internal_key::compare(&f.largest, &pointer) == std::cmp::Ordering::Greater)
                .unwrap_or(0)
        };

        let mut inputs = vec![Arc::clone(&candidates[start])];
        if level == 0 {
            // Level 0 files may overlap; pull in every other level-0 file
            // touching the combined range.
            let (mut smallest, mut largest) = (
                internal_key::user_key(&inputs[0].smallest).to_vec(),
                internal_key::user_key(&inputs[0].largest).to_vec(),
            );
            loop {
                let overlaps = version.overlapping_files(0, &smallest, &largest);
                if overlaps.len() == inputs.len() {
                    break;
                }
                inputs = overlaps;
                smallest = inputs
                    .iter()
                    .map(|f| internal_key::user_key(&f.smallest))
                    .min()
                    .unwrap_or(&smallest)
                    .to_vec();
                largest = inputs
                    .iter()
                    .map(|f| internal_key::user_key(&f.largest))
                    .max()
                    .unwrap_or(&largest)
                    .to_vec();
            }
        }

        Some(Self::assemble_compaction(&version, level, inputs, max_file_size))
    }

    /// Pick a compaction for a manually requested `[start, end)` range at
    /// `level`, bypassing the score-based picker and its compaction
    /// pointer entirely (`SPEC_FULL.md` §8 manual compaction). The caller
    /// is expected to call this once per level, advancing to the next
    /// level after this one stops returning a compaction, to drive a
    /// whole range down through the tree.
    pub fn pick_range_compaction(
        &self,
        level: usize,
        start: &[u8],
        end: &[u8],
        max_file_size: u64,
    ) -> Option<PickedCompaction> {
        if level + 1 >= NUM_LEVELS {
            return None;
        }
        let version = self.current();
        let inputs = version.overlapping_files(level, start, end);
        if inputs.is_empty() {
            return None;
        }
        Some(Self::assemble_compaction(&version, level, inputs, max_file_size))
    }

    /// Shared tail of compaction picking: grow the level-L input set
    /// without growing level-(L+1) (`SPEC_FULL.md` §4.9), then compute the
    /// level+2 grandparent range used for tombstone elision and output
    /// rollover (§4.10).
    fn assemble_compaction(
        version: &Version,
        level: usize,
        mut inputs: Vec<Arc<FileMetaData>>,
        max_file_size: u64,
    ) -> PickedCompaction {
        let (smallest, largest) = range_of(&inputs);
        let mut level_plus_one_inputs = version.overlapping_files(level + 1, &smallest, &largest);

        // Try to grow the level-L side without pulling in any more
        // level-(L+1) files than we already picked up: a wider level-L
        // input set for the same level-(L+1) output range is free.
        if !level_plus_one_inputs.is_empty() {
            let (all_start, all_limit) = range_of_combined(&inputs, &level_plus_one_inputs);
            let expanded_inputs = version.overlapping_files(level, &all_start, &all_limit);
            let level_plus_one_size: u64 = level_plus_one_inputs.iter().map(|f| f.file_size).sum();
            let expanded_size: u64 = expanded_inputs.iter().map(|f| f.file_size).sum();

            if expanded_inputs.len() > inputs.len()
                && level_plus_one_size + expanded_size < 25 * max_file_size
            {
                let (new_start, new_limit) = range_of(&expanded_inputs);
                let re_expanded_level_plus_one =
                    version.overlapping_files(level + 1, &new_start, &new_limit);
                if re_expanded_level_plus_one.len() == level_plus_one_inputs.len() {
                    debug!(
                        level,
                        from = inputs.len(),
                        to = expanded_inputs.len(),
                        "expanded compaction input set"
                    );
                    inputs = expanded_inputs;
                    level_plus_one_inputs = re_expanded_level_plus_one;
                }
            }
        }

        let grandparents = if level + 2 < NUM_LEVELS {
            let (s2, l2) = range_of_combined(&inputs, &level_plus_one_inputs);
            version.overlapping_files(level + 2, &s2, &l2)
        } else {
            Vec::new()
        };

        PickedCompaction {
            level,
            inputs,
            level_plus_one_inputs,
            grandparents,
        }
    }
}

fn range_of(files: &[Arc<FileMetaData>]) -> (Vec<u8>, Vec<u8>) {
    let smallest: Vec<u8> = files
        .iter()
        .map(|f| internal_key::user_key(&f.smallest))
        .min()
        .map(|k| k.to_vec())
        .unwrap_or_default();
    let largest: Vec<u8> = files
        .iter()
        .map(|f| internal_key::user_key(&f.largest))
        .max()
        .map(|k| k.to_vec())
        .unwrap_or_default();
    (smallest, largest)
}

fn range_of_combined(a: &[Arc<FileMetaData>], b: &[Arc<FileMetaData>]) -> (Vec<u8>, Vec<u8>) {
    let all: Vec<Arc<FileMetaData>> = a.iter().cloned().chain(b.iter().cloned()).collect();
    range_of(&all)
}

fn write_current(dbname: &Path, manifest_number: u64) -> Result<(), ManifestError> {
    let tmp = dbname.join(format!("{manifest_number}.dbtmp"));
    std::fs::write(&tmp, format!("MANIFEST-{manifest_number:06}\n"))?;
    std::fs::rename(&tmp, current_file(dbname))?;
    Ok(())
}
