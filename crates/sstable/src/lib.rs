//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk sorted runs for the StrataKV storage engine.
//!
//! When a memtable fills up the engine flushes it into an SSTable; compaction
//! later merges tables of one level into a single table of the next level.
//! Tables are *write-once, read-many*: never modified, only replaced.
//!
//! ## Segments
//!
//! | Segment  | Contents                                             |
//! |----------|------------------------------------------------------|
//! | Data     | Records in key order, each with its own CRC32        |
//! | Index    | Every key with its Data offset                       |
//! | Summary  | Key range plus every N-th Index entry                |
//! | Filter   | Bloom filter over all keys                           |
//! | Metadata | Level byte, Merkle chunk size, Merkle tree over Data |
//!
//! See [`format`] for byte layouts of both the directory-per-table and the
//! single-file variants.
//!
//! ## Lookup
//!
//! [`SSTable::search`] consults the Bloom filter, the key range, the
//! Summary, one Index block and finally the Data record, verifying its CRC.
//! Corruption surfaces as an [`SSTableError`] inside the returned
//! `anyhow::Error`.

pub mod format;

mod cursor;
mod error;
mod merge;
mod reader;
mod writer;

pub use cursor::SSTableCursor;
pub use error::SSTableError;
pub use format::{parse_table_name, table_name, Layout, TMP_SUFFIX};
pub use merge::{merge_runs, MultiCursor};
pub use reader::{SSTable, Validation};
pub use writer::{SSTableWriter, WriterOptions};

#[cfg(test)]
mod tests;
