//! Prefix-compressed key/value block: the unit data blocks and index
//! blocks are both built from.
//!
//! Entries are stored in increasing key order as
//! `varint(shared_len) || varint(unshared_len) || varint(value_len) ||
//! key_suffix || value`. Every `restart_interval`-th entry is a restart
//! point (`shared_len == 0`, full key stored) so a reader can binary
//! search the restart array before falling back to a linear scan.

use std::cmp::Ordering;

use crate::encoding::{get_varint_u64, put_varint_u64, EncodingError};

pub const DEFAULT_RESTART_INTERVAL: usize = 16;

/// Builds one block's worth of entries, in strictly increasing key order.
pub struct BlockBuilder {
    restart_interval: usize,
    buf: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        Self {
            restart_interval,
            buf: Vec::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
            finished: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current estimated size of the block if finished now.
    pub fn current_size_estimate(&self) -> usize {
        self.buf.len() + self.restarts.len() * 4 + 4
    }

    /// Append one entry. `key` must be strictly greater than the previous
    /// key added (the caller — the SST builder — guarantees this).
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        let shared = if self.counter < self.restart_interval {
            shared_prefix_len(&self.last_key, key)
        } else {
            0
        };

        if self.counter >= self.restart_interval {
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
        }

        let unshared = &key[shared..];
        put_varint_u64(&mut self.buf, shared as u64);
        put_varint_u64(&mut self.buf, unshared.len() as u64);
        put_varint_u64(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(unshared);
        self.buf.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Append the restart array and count, returning the frozen bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.finished = true;
        for restart in &self.restarts {
            self.buf.extend_from_slice(&restart.to_le_bytes());
        }
        self.buf
            .extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
        self.buf
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// A parsed (but not yet positioned) block, ready for iteration.
pub struct Block {
    data: Vec<u8>,
    restarts_offset: usize,
    num_restarts: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("block too small to contain a restart trailer")]
    Truncated,
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("corrupt block entry")]
    CorruptEntry,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Result<Self, BlockError> {
        if data.len() < 4 {
            return Err(BlockError::Truncated);
        }
        let num_restarts =
            u32::from_le_bytes(data[data.len() - 4..].try_into().expect("4 bytes")) as usize;
        let restarts_size = num_restarts * 4 + 4;
        if data.len() < restarts_size {
            return Err(BlockError::Truncated);
        }
        let restarts_offset = data.len() - restarts_size;
        Ok(Self {
            data,
            restarts_offset,
            num_restarts,
        })
    }

    fn restart_point(&self, index: usize) -> usize {
        let start = self.restarts_offset + index * 4;
        u32::from_le_bytes(self.data[start..start + 4].try_into().expect("4 bytes")) as usize
    }

    pub fn iter(&self) -> BlockIterator<'_> {
        BlockIterator {
            block: self,
            restart_index: 0,
            entry_start: self.restarts_offset,
            next_offset: self.restarts_offset,
            key: Vec::new(),
            value_range: 0..0,
            valid: false,
        }
    }
}

/// Decoded entry header at some offset: `(shared, unshared, value_len, header_end)`.
fn decode_entry(data: &[u8], offset: usize) -> Result<(usize, usize, usize, usize), BlockError> {
    let (shared, n1) = get_varint_u64(&data[offset..]).map_err(BlockError::Encoding)?;
    let (unshared, n2) = get_varint_u64(&data[offset + n1..]).map_err(BlockError::Encoding)?;
    let (value_len, n3) =
        get_varint_u64(&data[offset + n1 + n2..]).map_err(BlockError::Encoding)?;
    Ok((shared as usize, unshared as usize, value_len as usize, offset + n1 + n2 + n3))
}

/// A forward/backward iterator over a [`Block`]'s entries.
///
/// `entry_start` is the byte offset where the *current* entry's header
/// begins; `next_offset` is where the following entry (if any) begins.
/// `prev` needs `entry_start` to know which restart segment to rescan and
/// where to stop.
pub struct BlockIterator<'a> {
    block: &'a Block,
    restart_index: usize,
    entry_start: usize,
    next_offset: usize,
    key: Vec<u8>,
    value_range: std::ops::Range<usize>,
    valid: bool,
}

impl<'a> BlockIterator<'a> {
    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &'a [u8] {
        &self.block.data[self.value_range.clone()]
    }

    pub fn seek_to_first(&mut self) {
        self.seek_to_restart(0);
        self.parse_at(self.block.restart_point(0));
    }

    pub fn seek_to_last(&mut self) {
        self.seek_to_restart(self.block.num_restarts - 1);
        let mut offset = self.block.restart_point(self.block.num_restarts - 1);
        loop {
            self.parse_at(offset);
            if !self.valid || self.next_offset >= self.block.restarts_offset {
                break;
            }
            offset = self.next_offset;
        }
    }

    fn seek_to_restart(&mut self, index: usize) {
        self.restart_index = index;
        self.key.clear();
        self.valid = false;
    }

    fn parse_at(&mut self, offset: usize) {
        if offset >= self.block.restarts_offset {
            self.valid = false;
            return;
        }
        match decode_entry(&self.block.data, offset) {
            Ok((shared, unshared, value_len, header_end)) => {
                self.key.truncate(shared);
                self.key
                    .extend_from_slice(&self.block.data[header_end..header_end + unshared]);
                let value_start = header_end + unshared;
                self.entry_start = offset;
                self.value_range = value_start..value_start + value_len;
                self.next_offset = value_start + value_len;
                self.valid = true;
            }
            Err(_) => self.valid = false,
        }
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid);
        // A restart point's index is only meaningful for `prev`; advancing
        // past it onto a non-restart entry is fine since `prev` recomputes
        // `restart_index` by scanning from scratch.
        let next = self.next_offset;
        self.parse_at(next);
    }

    /// Binary search the restart array, then linearly scan for the first
    /// entry `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        let mut left = 0usize;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = left + (right - left + 1) / 2;
            let offset = self.block.restart_point(mid);
            match decode_entry(&self.block.data, offset) {
                Ok((_, unshared, _, header_end)) => {
                    let restart_key = &self.block.data[header_end..header_end + unshared];
                    if restart_key.cmp(target) == Ordering::Less {
                        left = mid;
                    } else {
                        right = mid - 1;
                    }
                }
                Err(_) => break,
            }
        }

        self.seek_to_restart(left);
        self.parse_at(self.block.restart_point(left));
        while self.valid && self.key.as_slice() < target {
            self.next();
        }
    }

    /// Rescan forward from the restart point before the current entry to
    /// find the entry immediately preceding it.
    pub fn prev(&mut self) {
        debug_assert!(self.valid);
        let original_start = self.entry_start;

        let mut restart_index = self.restart_index;
        while self.block.restart_point(restart_index) >= original_start {
            if restart_index == 0 {
                self.valid = false;
                return;
            }
            restart_index -= 1;
        }

        self.seek_to_restart(restart_index);
        let mut offset = self.block.restart_point(restart_index);
        loop {
            self.parse_at(offset);
            if !self.valid || self.next_offset >= original_start {
                break;
            }
            offset = self.next_offset;
        }
    }
}
