//! # valedb
//!
//! An embeddable, persistent key-value storage engine in the **WiscKey**
//! style: keys and value *pointers* are organised into a leveled
//! **Log-Structured Merge tree** on disk, while the value bytes themselves
//! live out-of-line in a single append-only **value log** that is reclaimed
//! by punching filesystem holes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Engine                           │
//! │  ┌────────────┐   ┌──────────────────────────────────┐  │
//! │  │  Memtable  │   │  Levels of SSTs (on disk)        │  │
//! │  │ (skip list)│   │  L0: 0-0.sst 0-1.sst …           │  │
//! │  └─────┬──────┘   │  L1: 1-0.sst 1-1.sst …           │  │
//! │        │  flush   │  L2: …                           │  │
//! │        └────────► │                                  │  │
//! │                   └───────────────┬──────────────────┘  │
//! │                                   │ key → (offset, len) │
//! │  ┌────────────────────────────────▼────────────────────┐│
//! │  │   Value log (append-only, hole-punched from tail)   ││
//! │  └─────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Top-level coordinator — open, put, get, del, scan, gc, reset |
//! | [`memtable`] | In-memory write buffer (probabilistic skip list) |
//! | [`vlog`] | Append-only value log with checksummed frames and hole-punch GC |
//! | [`sstable`] | Immutable 16 KiB sorted tables: header, bloom filter, index |
//! | [`compaction`] | Leveled compaction with timestamp-aware merging |
//! | [`bloom`] | Fixed-size bloom filter embedded in every SST |
//! | [`checksum`] | Record checksum and seeded bloom-probe hashing |
//! | [`encoding`] | Deterministic little-endian wire primitives |
//!
//! ## Key properties
//!
//! - **Key separation** — SSTs store only `(key, offset, len)` triples, so
//!   compaction rewrites indices, never value bytes.
//! - **Timestamped versions** — each flushed SST carries a monotone sequence
//!   number; it is the sole tiebreaker between versions of a key.
//! - **Tombstone deletes** — a delete is a marker that shadows older
//!   versions on deeper levels until compaction collects it.
//! - **Crash recovery** — on open, the value log is scanned from its first
//!   allocated byte and torn trailing writes are excluded by checksum.
//! - **Online GC** — still-live values near the log tail are rewritten at
//!   the head and the scanned prefix is hole-punched.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use valedb::engine::Engine;
//!
//! let mut engine = Engine::open("/tmp/valedb-data", "/tmp/valedb-data/vlog").unwrap();
//!
//! engine.put(1, b"hello".to_vec()).unwrap();
//! assert_eq!(engine.get(1).unwrap(), Some(b"hello".to_vec()));
//!
//! assert!(engine.del(1).unwrap());
//! assert_eq!(engine.get(1).unwrap(), None);
//!
//! for (key, value) in engine.scan(0, 100).unwrap() {
//!     println!("{key} => {} bytes", value.len());
//! }
//!
//! engine.gc(1 << 20).unwrap();
//! engine.close().unwrap();
//! ```

pub mod bloom;
pub mod checksum;
pub mod compaction;
pub mod encoding;
pub mod engine;
pub mod memtable;
pub mod sstable;
pub mod vlog;

pub use engine::{Engine, EngineError};
