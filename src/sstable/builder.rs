//! Builds one SST from a strictly increasing stream of internal keys.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::block::{BlockBuilder, DEFAULT_RESTART_INTERVAL};
use crate::filter::FilterBlockBuilder;

use super::{write_block_with_trailer, BlockHandle, Footer, SstError, FOOTER_SIZE};

/// Summary returned by [`SstWriter::finish`].
pub struct SstInfo {
    pub file_size: u64,
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
    pub num_entries: u64,
}

/// Accumulates `(internal_key, value)` pairs in increasing key order and
/// writes a complete SST file on [`SstWriter::finish`].
pub struct SstWriter {
    path: PathBuf,
    block_size: usize,
    restart_interval: usize,
    out: Vec<u8>,
    data_block: BlockBuilder,
    filter: FilterBlockBuilder,
    index_block: BlockBuilder,
    pending_index_entry: Option<(Vec<u8>, BlockHandle)>,
    last_key: Vec<u8>,
    smallest_key: Option<Vec<u8>>,
    num_entries: u64,
}

impl SstWriter {
    pub fn create(path: impl AsRef<Path>, block_size: usize, filter_bits_per_key: usize) -> Self {
        Self::create_with_restart_interval(path, block_size, filter_bits_per_key, DEFAULT_RESTART_INTERVAL)
    }

    pub fn create_with_restart_interval(
        path: impl AsRef<Path>,
        block_size: usize,
        filter_bits_per_key: usize,
        restart_interval: usize,
    ) -> Self {
        let mut filter = FilterBlockBuilder::new(crate::filter::DEFAULT_BASE_LG, filter_bits_per_key);
        filter.start_block(0);
        Self {
            path: path.as_ref().to_path_buf(),
            block_size,
            restart_interval,
            out: Vec::new(),
            data_block: BlockBuilder::new(restart_interval),
            filter,
            index_block: BlockBuilder::new(restart_interval),
            pending_index_entry: None,
            last_key: Vec::new(),
            smallest_key: None,
            num_entries: 0,
        }
    }

    /// Append one entry. `internal_key` must be strictly greater than the
    /// previous key added.
    pub fn add(&mut self, internal_key: &[u8], value: &[u8]) {
        if let Some((separator, handle)) = self.pending_index_entry.take() {
            self.index_block.add(&separator, &handle_bytes(&handle));
        }

        if self.smallest_key.is_none() {
            self.smallest_key = Some(internal_key.to_vec());
        }
        self.filter.add_key(crate::internal_key::user_key(internal_key));
        self.data_block.add(internal_key, value);
        self.last_key.clear();
        self.last_key.extend_from_slice(internal_key);
        self.num_entries += 1;

        if self.data_block.current_size_estimate() >= self.block_size {
            self.flush_data_block();
        }
    }

    fn flush_data_block(&mut self) {
        if self.data_block.is_empty() {
            return;
        }
        let finished =
            std::mem::replace(&mut self.data_block, BlockBuilder::new(self.restart_interval));
        let handle = write_block_with_trailer(&mut self.out, &finished.finish());
        self.filter.start_block(self.out.len() as u64);
        self.pending_index_entry = Some((separator_for(&self.last_key), handle));
    }

    /// Approximate bytes written to disk so far (flushed blocks plus the
    /// data block currently being built), used by compaction to decide
    /// when to roll over to a new output file.
    pub fn approx_size(&self) -> u64 {
        self.out.len() as u64 + self.data_block.current_size_estimate() as u64
    }

    /// Finish the table: flush any pending data block, write the filter,
    /// metaindex, and index blocks, and the fixed footer.
    pub fn finish(mut self) -> Result<SstInfo, SstError> {
        self.flush_data_block();
        if let Some((separator, handle)) = self.pending_index_entry.take() {
            self.index_block.add(&separator, &handle_bytes(&handle));
        }

        let filter_bytes = self.filter.finish();
        let filter_handle = write_block_with_trailer(&mut self.out, &filter_bytes);

        let mut metaindex_block = BlockBuilder::new(self.restart_interval);
        metaindex_block.add(b"filter.bloom", &handle_bytes(&filter_handle));
        let metaindex_handle = write_block_with_trailer(&mut self.out, &metaindex_block.finish());

        let index_handle = write_block_with_trailer(&mut self.out, &self.index_block.finish());

        let footer = Footer {
            metaindex: metaindex_handle,
            index: index_handle,
        };
        self.out.extend_from_slice(&footer.encode());
        debug_assert!(self.out.len() >= FOOTER_SIZE);

        let mut file = File::create(&self.path)?;
        file.write_all(&self.out)?;
        file.sync_all()?;

        Ok(SstInfo {
            file_size: self.out.len() as u64,
            smallest_key: self.smallest_key.unwrap_or_default(),
            largest_key: self.last_key,
            num_entries: self.num_entries,
        })
    }
}

fn handle_bytes(handle: &BlockHandle) -> Vec<u8> {
    let mut buf = Vec::new();
    handle.encode(&mut buf);
    buf
}

/// Choose a short separator key `>= last_key_of_block`. A full
/// implementation shortens this against the next block's first key; we
/// keep the full key, which is always correct (merely larger than
/// strictly necessary).
fn separator_for(last_key_of_block: &[u8]) -> Vec<u8> {
    last_key_of_block.to_vec()
}
