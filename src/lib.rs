//! # AeternusDB
//!
//! An embeddable, single-writer, ordered key-value storage engine built on
//! a **Log-Structured Merge Tree (LSM-tree)** architecture. Designed for
//! fast sequential writes and crash-safe recovery.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Engine                           │
//! │  ┌────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │  Active     │  │   Frozen     │  │  SSTables   │  │
//! │  │  Memtable   │  │  Memtable    │  │  (on disk,  │  │
//! │  │  + WAL      │  │  + WAL       │  │  7 levels)  │  │
//! │  └─────┬───────┘  └──────┬───────┘  └──────┬──────┘  │
//! │        │   rotate        │   flush         │         │
//! │        └─────────►       └────────►        │         │
//! │                                            │         │
//! │  ┌──────────────────────────────────────────┘         │
//! │  │  Background compaction (flush, trivial move,      │
//! │  │  snapshot-aware tombstone elision)                │
//! │  └───────────────────────────────────────────────────┘│
//! │                                                      │
//! │  ┌──────────────────────────────────────────────────┐ │
//! │  │     Manifest / VersionSet (WAL of VersionEdits)  │ │
//! │  └──────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, get, write, scan, snapshots, close |
//! | [`memtable`] | In-memory write buffer ordered by internal key |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`sstable`] | Immutable, sorted, on-disk tables with bloom filters and block indices |
//! | [`manifest`] | Persistent metadata manager (file catalog + its own WAL) |
//! | [`compaction`] | Memtable flush, trivial move, and leveled merge compaction |
//! | [`write_batch`] | Atomic multi-key mutation batches |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL before
//!   becoming visible in the memtable, guaranteeing durability and crash
//!   recovery.
//! - **Snapshot isolation** — [`engine::Snapshot`] pins a sequence number so
//!   reads observe a consistent point in time regardless of concurrent
//!   writes.
//! - **Leveled compaction** — seven levels with size-ratio-driven and
//!   seek-driven compaction triggers, and snapshot-aware tombstone elision.
//! - **Bloom filter lookups** — each SST carries a per-block bloom filter
//!   for fast negative point-lookup responses.
//! - **Block-level CRC32 integrity** — every on-disk block (WAL records,
//!   SST data blocks, headers, footers) is checksummed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aeternusdb::{Engine, EngineConfig};
//!
//! let engine = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! // Write
//! engine.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! engine.delete(b"hello".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//!
//! // Scan
//! engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
//! engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
//! let results: Vec<_> = engine.scan(b"a", b"c").unwrap().collect();
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod arena;
pub mod block;
pub mod compaction;
pub mod encoding;
pub mod engine;
pub mod filter;
pub mod internal_key;
pub mod manifest;
pub mod memtable;
pub mod skiplist;
pub mod sstable;
pub mod wal;
pub mod write_batch;

pub use engine::{Engine, EngineConfig, EngineError, ErrorKind, Snapshot};
