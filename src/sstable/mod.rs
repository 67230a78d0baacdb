//! Sorted String Table (SST): an immutable, disk-backed, internal-key
//! ordered run of entries with an optional per-table Bloom filter.
//!
//! # On-disk layout
//!
//! ```text
//! [data block 0][trailer][data block 1][trailer]...[data block N-1][trailer]
//! [filter block][trailer]           (optional)
//! [metaindex block][trailer]
//! [index block][trailer]
//! [footer]                          (48 bytes, fixed)
//! ```
//!
//! `trailer` is `compression_type(1) || masked_crc32(4)` covering
//! `block_bytes || compression_type`. Data blocks and the metaindex/index
//! blocks are all [`crate::block::Block`]s; metaindex and index block
//! values are varint-encoded [`BlockHandle`]s.
//!
//! Compression is out of scope (`compression_type` is always `0`
//! uncompressed) but the trailer byte is still written so the on-disk
//! format matches the footer's bit-exact contract.

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use builder::SstWriter;
pub use iterator::TableIterator;

use std::fs::File;
use std::io;
use std::path::Path;

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;

use crate::block::{Block, BlockError};
use crate::encoding::{get_varint_u64, put_varint_u64, EncodingError};
use crate::filter::{FilterBlockError, FilterBlockReader};
use crate::internal_key;

pub const FOOTER_SIZE: usize = 48;
pub const FOOTER_MAGIC: u64 = 0xdb4775248b80fb57;
pub const TRAILER_SIZE: usize = 5;
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

const COMPRESSION_NONE: u8 = 0;

fn mask_crc(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}

fn unmask_crc(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(0xa282_ead8);
    (rot >> 17) | (rot << 15)
}

#[derive(Debug, Error)]
pub enum SstError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("block error: {0}")]
    Block(#[from] BlockError),
    #[error("filter block error: {0}")]
    Filter(#[from] FilterBlockError),
    #[error("checksum mismatch in block at offset {0}")]
    ChecksumMismatch(u64),
    #[error("corrupt footer: {0}")]
    CorruptFooter(String),
    #[error("missing required metaindex entry: {0}")]
    MissingMetaEntry(String),
}

/// `varint(offset) || varint(size)`. `size` excludes the 5-byte trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    fn encode(&self, buf: &mut Vec<u8>) {
        put_varint_u64(buf, self.offset);
        put_varint_u64(buf, self.size);
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (offset, n1) = get_varint_u64(buf)?;
        let (size, n2) = get_varint_u64(&buf[n1..])?;
        Ok((Self { offset, size }, n1 + n2))
    }
}

struct Footer {
    metaindex: BlockHandle,
    index: BlockHandle,
}

impl Footer {
    fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        self.metaindex.encode(&mut buf);
        self.index.encode(&mut buf);
        buf.resize(40, 0);
        buf.extend_from_slice(&FOOTER_MAGIC.to_le_bytes());
        let mut out = [0u8; FOOTER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    fn decode(buf: &[u8]) -> Result<Self, SstError> {
        if buf.len() != FOOTER_SIZE {
            return Err(SstError::CorruptFooter("wrong footer size".into()));
        }
        let magic = u64::from_le_bytes(buf[40..48].try_into().expect("8 bytes"));
        if magic != FOOTER_MAGIC {
            return Err(SstError::CorruptFooter("bad magic".into()));
        }
        let (metaindex, n) = BlockHandle::decode(buf)?;
        let (index, _) = BlockHandle::decode(&buf[n..])?;
        Ok(Self { metaindex, index })
    }
}

/// Write one block plus its 5-byte trailer to `out`, returning the
/// handle to the block (size excludes the trailer).
fn write_block_with_trailer(out: &mut Vec<u8>, block_bytes: &[u8]) -> BlockHandle {
    let offset = out.len() as u64;
    out.extend_from_slice(block_bytes);
    let mut hasher = Crc32::new();
    hasher.update(block_bytes);
    hasher.update(&[COMPRESSION_NONE]);
    let crc = mask_crc(hasher.finalize());
    out.push(COMPRESSION_NONE);
    out.extend_from_slice(&crc.to_le_bytes());
    BlockHandle {
        offset,
        size: block_bytes.len() as u64,
    }
}

/// Read and checksum-verify the raw bytes of a block, without
/// interpreting them as a restart-point [`Block`] (used for the filter
/// block, which has its own internal layout).
fn read_raw_block(mmap: &Mmap, handle: &BlockHandle) -> Result<Vec<u8>, SstError> {
    let start = handle.offset as usize;
    let size = handle.size as usize;
    let trailer_start = start + size;
    let trailer_end = trailer_start + TRAILER_SIZE;
    if trailer_end > mmap.len() {
        return Err(SstError::CorruptFooter("block handle out of range".into()));
    }
    let block_bytes = &mmap[start..trailer_start];
    let compression_type = mmap[trailer_start];
    let stored_crc = u32::from_le_bytes(
        mmap[trailer_start + 1..trailer_end].try_into().expect("4 bytes"),
    );

    let mut hasher = Crc32::new();
    hasher.update(block_bytes);
    hasher.update(&[compression_type]);
    if unmask_crc(stored_crc) != hasher.finalize() {
        return Err(SstError::ChecksumMismatch(handle.offset));
    }

    Ok(block_bytes.to_vec())
}

fn read_block(mmap: &Mmap, handle: &BlockHandle) -> Result<Block, SstError> {
    Ok(Block::new(read_raw_block(mmap, handle)?)?)
}

/// Result of a point lookup against a single SST.
pub enum SstGetResult {
    Found(Vec<u8>),
    Deleted,
    NotFound,
}

/// An immutable, memory-mapped SST.
pub struct SsTable {
    pub file_number: u64,
    mmap: Mmap,
    index: Block,
    filter: Option<FilterBlockReader>,
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
    pub file_size: u64,
}

impl SsTable {
    pub fn open(path: impl AsRef<Path>, file_number: u64) -> Result<Self, SstError> {
        let file = File::open(path.as_ref())?;
        let file_size = file.metadata()?.len();
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < FOOTER_SIZE {
            return Err(SstError::CorruptFooter("file smaller than footer".into()));
        }

        let footer = Footer::decode(&mmap[mmap.len() - FOOTER_SIZE..])?;
        let index = read_block(&mmap, &footer.index)?;
        let metaindex = read_block(&mmap, &footer.metaindex)?;

        let mut filter = None;
        let mut it = metaindex.iter();
        it.seek_to_first();
        while it.valid() {
            if it.key().starts_with(b"filter.") {
                let (handle, _) = BlockHandle::decode(it.value())?;
                let raw = read_raw_block(&mmap, &handle)?;
                filter = Some(FilterBlockReader::new(raw)?);
            }
            it.next();
        }

        let mut index_iter = index.iter();
        index_iter.seek_to_first();
        let smallest_key = if index_iter.valid() {
            let (handle, _) = BlockHandle::decode(index_iter.value())?;
            let first_block = read_block(&mmap, &handle)?;
            let mut fi = first_block.iter();
            fi.seek_to_first();
            fi.key().to_vec()
        } else {
            Vec::new()
        };

        let mut largest_key = Vec::new();
        index_iter.seek_to_last();
        if index_iter.valid() {
            let (handle, _) = BlockHandle::decode(index_iter.value())?;
            let last_block = read_block(&mmap, &handle)?;
            let mut li = last_block.iter();
            li.seek_to_last();
            if li.valid() {
                largest_key = li.key().to_vec();
            }
        }

        Ok(Self {
            file_number,
            mmap,
            index,
            filter,
            smallest_key,
            largest_key,
            file_size,
        })
    }

    /// Look up `internal_key` (already encoded `user_key || tag`) within
    /// this table, returning the newest version at or before the encoded
    /// sequence.
    pub fn get(&self, lookup_internal_key: &[u8]) -> Result<SstGetResult, SstError> {
        let user_key = internal_key::user_key(lookup_internal_key);

        let mut idx = self.index.iter();
        idx.seek(lookup_internal_key);
        if !idx.valid() {
            return Ok(SstGetResult::NotFound);
        }
        let (handle, _) = BlockHandle::decode(idx.value())?;

        if let Some(filter) = &self.filter {
            if !filter.may_contain(handle.offset, user_key) {
                return Ok(SstGetResult::NotFound);
            }
        }

        let block = read_block(&self.mmap, &handle)?;
        let mut it = block.iter();
        it.seek(lookup_internal_key);
        if !it.valid() {
            return Ok(SstGetResult::NotFound);
        }
        let (found_user_key, _seq, kind) = internal_key::decode(it.key());
        if found_user_key != user_key {
            return Ok(SstGetResult::NotFound);
        }
        Ok(match kind {
            internal_key::ValueType::Put => SstGetResult::Found(it.value().to_vec()),
            internal_key::ValueType::Delete => SstGetResult::Deleted,
        })
    }

    /// A full-table, internal-key-ordered iterator.
    pub fn iter(&self) -> TableIterator<'_> {
        TableIterator::new(self)
    }

    pub(crate) fn mmap(&self) -> &Mmap {
        &self.mmap
    }

    pub(crate) fn index_block(&self) -> &Block {
        &self.index
    }
}
