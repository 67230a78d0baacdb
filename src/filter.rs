//! Per-SST filter block: an array of Bloom filters, one per `2^base_lg`
//! byte range of data-block offsets.
//!
//! Filter *i* summarizes every key added while the data block being built
//! started at a file offset in `[i * 2^base_lg, (i+1) * 2^base_lg)`. A
//! reader computes `i = block_offset >> base_lg` and consults filter *i*
//! alone — no need to know which data block boundary a key falls in.

use bloomfilter::Bloom;

pub const DEFAULT_BASE_LG: u8 = 11; // 2 KiB ranges
const DEFAULT_BITS_PER_KEY: usize = 10;

/// Accumulates keys per data block and emits one Bloom filter per
/// `2^base_lg`-byte file-offset range.
pub struct FilterBlockBuilder {
    base_lg: u8,
    bits_per_key: usize,
    keys: Vec<Vec<u8>>,
    filter_offsets: Vec<u32>,
    result: Vec<u8>,
}

impl FilterBlockBuilder {
    pub fn new(base_lg: u8, bits_per_key: usize) -> Self {
        Self {
            base_lg,
            bits_per_key,
            keys: Vec::new(),
            filter_offsets: Vec::new(),
            result: Vec::new(),
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.keys.push(key.to_vec());
    }

    /// Called when a new data block starts at `block_offset`; flushes a
    /// filter (possibly empty) for every range index up to and including
    /// this block's, so the filter-index-to-range mapping stays dense.
    pub fn start_block(&mut self, block_offset: u64) {
        let index = block_offset >> self.base_lg;
        while (self.filter_offsets.len() as u64) < index {
            self.emit_filter();
        }
    }

    fn emit_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.keys.is_empty() {
            return;
        }
        let fp_rate = 1.0 / (1u64 << self.bits_per_key.min(30)) as f64;
        let Ok(mut bloom) = Bloom::<Vec<u8>>::new_for_fp_rate(self.keys.len(), fp_rate) else {
            self.keys.clear();
            return;
        };
        for key in self.keys.drain(..) {
            bloom.set(&key);
        }
        self.result.extend_from_slice(bloom.as_slice());
    }

    /// Emit the final filter and the trailing offset array.
    pub fn finish(mut self) -> Vec<u8> {
        if !self.keys.is_empty() {
            self.emit_filter();
        }
        let array_start = self.result.len() as u32;
        for offset in &self.filter_offsets {
            self.result.extend_from_slice(&offset.to_le_bytes());
        }
        self.result.extend_from_slice(&array_start.to_le_bytes());
        self.result.push(self.base_lg);
        self.result
    }
}

impl Default for FilterBlockBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_LG, DEFAULT_BITS_PER_KEY)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FilterBlockError {
    #[error("filter block too small")]
    Truncated,
}

/// Reads a finished filter block produced by [`FilterBlockBuilder`].
pub struct FilterBlockReader {
    data: Vec<u8>,
    offsets_start: usize,
    num_filters: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    pub fn new(data: Vec<u8>) -> Result<Self, FilterBlockError> {
        if data.len() < 5 {
            return Err(FilterBlockError::Truncated);
        }
        let base_lg = data[data.len() - 1];
        let array_start =
            u32::from_le_bytes(data[data.len() - 5..data.len() - 1].try_into().expect("4 bytes"))
                as usize;
        if array_start > data.len() - 5 {
            return Err(FilterBlockError::Truncated);
        }
        let num_filters = (data.len() - 5 - array_start) / 4;
        Ok(Self {
            data,
            offsets_start: array_start,
            num_filters,
            base_lg,
        })
    }

    fn filter_range(&self, index: usize) -> Option<std::ops::Range<usize>> {
        if index >= self.num_filters {
            return None;
        }
        let read_u32 = |pos: usize| {
            u32::from_le_bytes(self.data[pos..pos + 4].try_into().expect("4 bytes")) as usize
        };
        let start = read_u32(self.offsets_start + index * 4);
        let end = if index + 1 < self.num_filters {
            read_u32(self.offsets_start + (index + 1) * 4)
        } else {
            self.offsets_start
        };
        Some(start..end)
    }

    /// Whether `key` may be present in the data block starting at
    /// `block_offset`. Conservative: out-of-range or corrupt lookups
    /// return `true`.
    pub fn may_contain(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        let Some(range) = self.filter_range(index) else {
            return true;
        };
        if range.is_empty() {
            return false; // no keys were ever added to this range
        }
        match Bloom::<Vec<u8>>::from_slice(&self.data[range]) {
            Ok(bloom) => bloom.check(&key.to_vec()),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_reports_added_keys_as_maybe_present() {
        let mut builder = FilterBlockBuilder::new(DEFAULT_BASE_LG, DEFAULT_BITS_PER_KEY);
        builder.start_block(0);
        builder.add_key(b"alpha");
        builder.add_key(b"beta");
        let bytes = builder.finish();

        let reader = FilterBlockReader::new(bytes).unwrap();
        assert!(reader.may_contain(0, b"alpha"));
        assert!(reader.may_contain(0, b"beta"));
    }

    #[test]
    fn out_of_range_offset_is_conservative() {
        let mut builder = FilterBlockBuilder::new(DEFAULT_BASE_LG, DEFAULT_BITS_PER_KEY);
        builder.start_block(0);
        builder.add_key(b"alpha");
        let bytes = builder.finish();

        let reader = FilterBlockReader::new(bytes).unwrap();
        assert!(reader.may_contain(1 << 20, b"anything"));
    }

    #[test]
    fn separate_block_ranges_get_separate_filters() {
        let mut builder = FilterBlockBuilder::new(DEFAULT_BASE_LG, DEFAULT_BITS_PER_KEY);
        builder.start_block(0);
        builder.add_key(b"first-range-key");
        builder.start_block(1 << DEFAULT_BASE_LG);
        builder.add_key(b"second-range-key");
        let bytes = builder.finish();

        let reader = FilterBlockReader::new(bytes).unwrap();
        assert!(reader.may_contain(0, b"first-range-key"));
        assert!(reader.may_contain(1 << DEFAULT_BASE_LG, b"second-range-key"));
    }
}
