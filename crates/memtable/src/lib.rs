//! In-memory write buffers.
//!
//! A memtable holds the newest [`Record`] for each key written since the last
//! flush. Three interchangeable backends implement the [`Memtable`] trait:
//!
//! - [`HashMapMemtable`]: unordered map, sorted on flush and cursor creation.
//! - [`SkipListMemtable`]: arena-backed skip list with seeded level promotion.
//! - [`BTreeMemtable`]: arena-backed B-tree with proactive splits and
//!   sibling rotation.
//!
//! All three behave identically: a newer write to a key replaces the older
//! one, a delete leaves a tombstone in place until flush, and adding a new
//! key to a full table fails with [`MemtableError::Full`].

mod btree;
mod hash;
mod skiplist;

pub use btree::BTreeMemtable;
pub use hash::HashMapMemtable;
pub use skiplist::SkipListMemtable;

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use wal::{Record, Timestamp};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemtableError {
    /// The table holds `max_size` keys; flush before adding new ones.
    #[error("memtable is full ({0} entries)")]
    Full(usize),
}

/// Forward iterator over records in ascending key order.
///
/// Implemented by every memtable backend and by SSTable readers, so range
/// scans can merge both kinds of source.
pub trait Cursor {
    /// Positions the cursor on the first record whose key is `>= min`.
    fn seek(&mut self, min: &[u8]) -> anyhow::Result<()>;

    /// The record under the cursor, or `None` once exhausted.
    fn current(&self) -> Option<&Record>;

    /// Moves to the next record.
    fn advance(&mut self) -> anyhow::Result<()>;
}

/// Common contract of the in-memory write buffers.
pub trait Memtable: Send + Sync {
    /// Inserts or replaces the record for `key`.
    ///
    /// An existing record is replaced unless it is newer than `timestamp`.
    /// Adding a key that is not yet present fails once the table is full.
    fn add(
        &mut self,
        timestamp: Timestamp,
        tombstone: bool,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), MemtableError>;

    /// Turns the entry for `key` into a tombstone, keeping its timestamp.
    ///
    /// Returns `false` if the key is not present.
    fn delete(&mut self, key: &[u8]) -> bool;

    /// The newest record for `key`, tombstones included.
    fn get(&self, key: &[u8]) -> Option<&Record>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of distinct keys.
    fn capacity(&self) -> usize;

    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Drains every record in ascending key order and resets the table,
    /// watermark included.
    fn flush(&mut self) -> Vec<Record>;

    /// Records the highest WAL index absorbed so far. Never moves backwards.
    fn set_watermark(&mut self, index: u64);

    fn watermark(&self) -> Option<u64>;

    /// A cursor positioned on the smallest key.
    fn cursor(&self) -> Box<dyn Cursor + '_>;

    fn kind(&self) -> MemtableKind;
}

/// Backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemtableKind {
    HashMap,
    #[default]
    SkipList,
    BTree,
}

impl fmt::Display for MemtableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemtableKind::HashMap => "hashmap",
            MemtableKind::SkipList => "skiplist",
            MemtableKind::BTree => "btree",
        };
        f.write_str(name)
    }
}

impl FromStr for MemtableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hashmap" | "hash" => Ok(MemtableKind::HashMap),
            "skiplist" | "skip_list" => Ok(MemtableKind::SkipList),
            "btree" | "b-tree" => Ok(MemtableKind::BTree),
            other => Err(format!("unknown memtable structure '{}'", other)),
        }
    }
}

/// Sizing knobs shared by all backends; each reads the ones it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemtableOptions {
    pub max_size: usize,
    pub skip_list_levels: usize,
    pub btree_degree: usize,
    /// Seed for the skip list's level generator.
    pub seed: u64,
}

impl Default for MemtableOptions {
    fn default() -> Self {
        Self {
            max_size: 1024,
            skip_list_levels: 12,
            btree_degree: 8,
            seed: 0x5eed,
        }
    }
}

/// Builds an empty memtable of the requested kind.
pub fn new_memtable(kind: MemtableKind, opts: MemtableOptions) -> Box<dyn Memtable> {
    match kind {
        MemtableKind::HashMap => Box::new(HashMapMemtable::new(opts.max_size)),
        MemtableKind::SkipList => Box::new(SkipListMemtable::new(
            opts.max_size,
            opts.skip_list_levels,
            opts.seed,
        )),
        MemtableKind::BTree => Box::new(BTreeMemtable::new(opts.max_size, opts.btree_degree)),
    }
}

/// Newest-wins rule shared by the backends: equal timestamps replace, so a
/// replayed WAL record rewrites itself.
fn supersedes(incoming: Timestamp, existing: &Record) -> bool {
    incoming >= existing.timestamp
}

/// Rewrites `slot` in place as a tombstone.
fn mark_tombstone(slot: &mut Record) {
    *slot = Record::tombstone(slot.timestamp, std::mem::take(&mut slot.key));
}
