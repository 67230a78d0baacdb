//! Two-level iterator: walks index-block entries, materializing the
//! referenced data block for each.

use crate::block::{Block, BlockIterator};

use super::{read_block, BlockHandle, SsTable};

/// Full-table, internal-key-ordered iterator over an [`SsTable`].
///
/// The outer cursor walks the index block; for each entry it opens the
/// referenced data block and exposes its entries until exhausted, then
/// advances the outer cursor — matching the original table format's
/// "index of data blocks" indirection.
pub struct TableIterator<'a> {
    table: &'a SsTable,
    index_iter: BlockIterator<'a>,
    data_block: Option<Block>,
    data_pos: usize,
}

impl<'a> TableIterator<'a> {
    pub(super) fn new(table: &'a SsTable) -> Self {
        let mut index_iter = table.index_block().iter();
        index_iter.seek_to_first();
        let mut it = Self {
            table,
            index_iter,
            data_block: None,
            data_pos: 0,
        };
        it.load_current_block();
        it
    }

    fn load_current_block(&mut self) {
        self.data_block = None;
        if !self.index_iter.valid() {
            return;
        }
        let handle = match BlockHandle::decode(self.index_iter.value()) {
            Ok((h, _)) => h,
            Err(_) => return,
        };
        self.data_block = read_block(self.table.mmap(), &handle).ok();
        self.data_pos = 0;
    }

    /// Advance the outer index cursor until a non-empty data block is
    /// found or the table is exhausted.
    fn advance_outer(&mut self) {
        loop {
            self.index_iter.next();
            self.load_current_block();
            if self.data_block.is_none() && self.index_iter.valid() {
                continue;
            }
            break;
        }
    }
}

impl<'a> Iterator for TableIterator<'a> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let block = self.data_block.as_ref()?;
            let mut it = block.iter();
            it.seek_to_first();
            let mut pos = 0;
            while pos < self.data_pos && it.valid() {
                it.next();
                pos += 1;
            }
            if it.valid() {
                let item = (it.key().to_vec(), it.value().to_vec());
                self.data_pos += 1;
                return Some(item);
            }
            if !self.index_iter.valid() {
                return None;
            }
            self.advance_outer();
            if self.data_block.is_none() {
                return None;
            }
        }
    }
}

