//! Snapshot- and tombstone-aware filtering of a merged internal-key stream.

use crate::internal_key::{self, ValueType};

/// Wraps a [`super::utils::MergeIterator`] (or any internal-key-ordered
/// `(key, value)` stream) and yields only the live, snapshot-visible
/// `(user_key, value)` pairs.
///
/// For each user key, only the newest entry with `sequence <= snapshot`
/// is considered; older versions of the same key are skipped. A `DELETE`
/// entry hides the key entirely (advance past, per `SPEC_FULL.md` §4.11).
pub struct VisibilityFilter<I> {
    input: I,
    snapshot: u64,
    last_user_key: Option<Vec<u8>>,
}

impl<I> VisibilityFilter<I> {
    pub fn new(input: I, snapshot: u64) -> Self {
        Self {
            input,
            snapshot,
            last_user_key: None,
        }
    }
}

impl<I: Iterator<Item = (Vec<u8>, Vec<u8>)>> Iterator for VisibilityFilter<I> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        for (internal, value) in self.input.by_ref() {
            let (user_key, sequence, kind) = internal_key::decode(&internal);
            if sequence > self.snapshot {
                continue;
            }
            if self.last_user_key.as_deref() == Some(user_key) {
                continue;
            }
            self.last_user_key = Some(user_key.to_vec());
            match kind {
                ValueType::Put => return Some((user_key.to_vec(), value)),
                ValueType::Delete => continue,
            }
        }
        None
    }
}
