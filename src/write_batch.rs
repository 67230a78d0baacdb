//! Atomic, in-memory batch of mutations applied together under one
//! sequence-number range.
//!
//! Wire format: `sequence(8, little-endian) || count(4, little-endian) ||
//! records`, where each record is `tag(1) || varstring(key) [||
//! varstring(value) if PUT]` and `varstring := varint(len) || bytes`.
//! This is the payload the engine hands to [`crate::wal::Wal::append`].

use thiserror::Error;

use crate::encoding::{get_varbytes, put_varbytes, Decode, Encode, EncodingError};
use crate::internal_key::ValueType;

const TAG_PUT: u8 = 1;
const TAG_DELETE: u8 = 0;

#[derive(Debug, Error)]
pub enum WriteBatchError {
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("unknown record tag {0}")]
    UnknownTag(u8),
}

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } => key,
            Self::Delete { key } => key,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Put { .. } => ValueType::Put,
            Self::Delete { .. } => ValueType::Delete,
        }
    }
}

/// An ordered set of mutations applied atomically, starting at a single
/// assigned `sequence` number (each op consumes the next sequence number
/// in order).
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    sequence: u64,
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Append every op of `other` to `self`.
    pub fn append(&mut self, other: &WriteBatch) {
        self.ops.extend(other.ops.iter().cloned());
    }

    pub fn iterate(&self) -> impl Iterator<Item = &BatchOp> {
        self.ops.iter()
    }

    pub fn count(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Approximate encoded size in bytes, used by the engine to decide
    /// when a batch alone should trigger a memtable rotation.
    pub fn approximate_size(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => 1 + 5 + key.len() + 5 + value.len(),
                BatchOp::Delete { key } => 1 + 5 + key.len(),
            })
            .sum::<usize>()
            + 12
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }
}

impl Encode for WriteBatch {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&(self.ops.len() as u32).to_le_bytes());
        for op in &self.ops {
            match op {
                BatchOp::Put { key, value } => {
                    buf.push(TAG_PUT);
                    put_varbytes(buf, key);
                    put_varbytes(buf, value);
                }
                BatchOp::Delete { key } => {
                    buf.push(TAG_DELETE);
                    put_varbytes(buf, key);
                }
            }
        }
        Ok(())
    }
}

impl Decode for WriteBatch {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let sequence = u64::from_le_bytes(
            buf.get(0..8)
                .ok_or(EncodingError::UnexpectedEof { needed: 8, available: buf.len() })?
                .try_into()
                .expect("8 bytes"),
        );
        off += 8;
        let count = u32::from_le_bytes(
            buf.get(off..off + 4)
                .ok_or(EncodingError::UnexpectedEof { needed: 4, available: buf.len() - off })?
                .try_into()
                .expect("4 bytes"),
        );
        off += 4;

        let mut ops = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = *buf
                .get(off)
                .ok_or(EncodingError::UnexpectedEof { needed: 1, available: buf.len() - off })?;
            off += 1;
            let (key, n) = get_varbytes(&buf[off..])?;
            off += n;
            let op = match tag {
                TAG_PUT => {
                    let (value, n) = get_varbytes(&buf[off..])?;
                    off += n;
                    BatchOp::Put { key, value }
                }
                TAG_DELETE => BatchOp::Delete { key },
                other => {
                    return Err(EncodingError::InvalidTag {
                        tag: other as u32,
                        type_name: "WriteBatch::BatchOp",
                    })
                }
            };
            ops.push(op);
        }

        Ok((Self { sequence, ops }, off))
    }
}
