//! Internal-key encoding shared by the memtable, SST blocks, and compaction.
//!
//! An internal key is `user_key || tag` where `tag = (sequence << 8) |
//! value_type`. Keys compare ascending by user key; for equal user keys,
//! descending by tag, so a forward scan for `(user_key, snapshot_seq)`
//! lands on the newest visible version first. See `SPEC_FULL.md` §3.

use std::cmp::Ordering;

/// `PUT` or `DELETE`, the low byte of an internal key's tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Put = 1,
    Delete = 0,
}

impl ValueType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Delete),
            1 => Some(Self::Put),
            _ => None,
        }
    }
}

/// Sequence numbers are 56-bit; 0 is reserved (never assigned to a write).
pub const MAX_SEQUENCE_NUMBER: u64 = (1u64 << 56) - 1;

fn pack_tag(sequence: u64, kind: ValueType) -> u64 {
    (sequence << 8) | kind as u64
}

fn unpack_tag(tag: u64) -> (u64, ValueType) {
    let sequence = tag >> 8;
    let kind = ValueType::from_byte((tag & 0xff) as u8).unwrap_or(ValueType::Delete);
    (sequence, kind)
}

/// Build an internal key: `user_key || tag(8, little-endian)`.
pub fn encode(user_key: &[u8], sequence: u64, kind: ValueType) -> Vec<u8> {
    let mut out = Vec::with_capacity(user_key.len() + 8);
    out.extend_from_slice(user_key);
    out.extend_from_slice(&pack_tag(sequence, kind).to_le_bytes());
    out
}

/// Split an internal key into `(user_key, sequence, kind)`.
///
/// Panics if `key` is shorter than 8 bytes — callers only ever pass
/// previously-encoded internal keys.
pub fn decode(key: &[u8]) -> (&[u8], u64, ValueType) {
    let split = key.len() - 8;
    let (user_key, tag_bytes) = key.split_at(split);
    let tag = u64::from_le_bytes(tag_bytes.try_into().expect("internal key tag is 8 bytes"));
    let (sequence, kind) = unpack_tag(tag);
    (user_key, sequence, kind)
}

/// The user-key portion of an internal key.
pub fn user_key(key: &[u8]) -> &[u8] {
    &key[..key.len() - 8]
}

/// Compare two internal keys: ascending by user key, then descending by
/// tag (newest sequence first).
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    let (a_user, a_tag) = (user_key(a), &a[a.len() - 8..]);
    let (b_user, b_tag) = (user_key(b), &b[b.len() - 8..]);
    match a_user.cmp(b_user) {
        Ordering::Equal => {
            let a_tag = u64::from_le_bytes(a_tag.try_into().unwrap());
            let b_tag = u64::from_le_bytes(b_tag.try_into().unwrap());
            b_tag.cmp(&a_tag)
        }
        other => other,
    }
}

/// A byte buffer holding an internal key, ordered per [`compare`].
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct InternalKey(pub Vec<u8>);

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: u64, kind: ValueType) -> Self {
        Self(encode(user_key, sequence, kind))
    }

    pub fn user_key(&self) -> &[u8] {
        user_key(&self.0)
    }

    pub fn decoded(&self) -> (&[u8], u64, ValueType) {
        decode(&self.0)
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(&self.0, &other.0)
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A lookup key: `(user_key, snapshot_seq)`, encoded once and shared
/// between memtable and SST lookups (the snapshot sequence acts as an
/// upper bound so the engine's descending-tag ordering lands on the
/// newest entry not newer than the snapshot).
pub struct LookupKey {
    memtable_key: Vec<u8>,
}

impl LookupKey {
    pub fn new(user_key: &[u8], snapshot_seq: u64) -> Self {
        // Use the maximum value-type byte so this synthetic internal key
        // sorts before any real internal key with the same user key and
        // `snapshot_seq`, letting `find_greater_or_equal` land exactly on
        // the newest entry visible at `snapshot_seq`.
        Self {
            memtable_key: encode(user_key, snapshot_seq, ValueType::Put),
        }
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.memtable_key
    }

    pub fn user_key(&self) -> &[u8] {
        user_key(&self.memtable_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_user_key_then_descending_sequence() {
        let a = InternalKey::new(b"k", 5, ValueType::Put);
        let b = InternalKey::new(b"k", 10, ValueType::Put);
        assert_eq!(a.cmp(&b), Ordering::Greater); // newer sequence sorts first
        let c = InternalKey::new(b"z", 1, ValueType::Put);
        assert_eq!(a.cmp(&c), Ordering::Less);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let key = encode(b"hello", 42, ValueType::Delete);
        let (uk, seq, kind) = decode(&key);
        assert_eq!(uk, b"hello");
        assert_eq!(seq, 42);
        assert_eq!(kind, ValueType::Delete);
    }

    #[test]
    fn lookup_key_lands_on_exact_sequence_match() {
        // Entries are sorted ascending by user key then descending by
        // sequence (newest first), matching skiplist iteration order.
        let newest = InternalKey::new(b"k", 9, ValueType::Put);
        let match_ = InternalKey::new(b"k", 7, ValueType::Put);
        let oldest = InternalKey::new(b"k", 3, ValueType::Put);
        assert!(newest < match_);
        assert!(match_ < oldest);

        let lookup = LookupKey::new(b"k", 7);
        assert_eq!(compare(lookup.internal_key(), &match_.0), Ordering::Equal);
        // The lookup key sorts after the newer entry and before the older one,
        // so a forward scan for >= lookup lands exactly on `match_`.
        assert_eq!(newest.cmp(&InternalKey(lookup.internal_key().to_vec())), Ordering::Less);
    }
}
