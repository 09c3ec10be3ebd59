//! # Engine - StrataKV Storage Engine
//!
//! The orchestrator that ties the [`wal`], [`memtable`] and [`sstable`]
//! crates into an LSM-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌────────────────────────────────────────────────────┐
//! │                      ENGINE                        │
//! │                                                    │
//! │ write.rs → WAL append → active memtable            │
//! │              |                                     │
//! │              |  (active full?) seal, rotate WAL    │
//! │              v                                     │
//! │           sealed memtables (oldest first)          │
//! │              |  (too many sealed?)                 │
//! │              v                                     │
//! │           flush → level-0 SSTable, prune WAL       │
//! │              |  (level over its table limit?)      │
//! │              v                                     │
//! │           compaction.rs → merged level+1 SSTable   │
//! │              (background thread, writers move on)  │
//! │                                                    │
//! │ read.rs → LRU cache → memtables → SSTables         │
//! │            (newest first, first match wins)        │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module            | Purpose                                              |
//! |-------------------|------------------------------------------------------|
//! | `lib.rs`          | `Engine`, shared state, accessors, `Debug`           |
//! | [`recovery`]      | Startup: tmp cleanup, table loading, WAL replay      |
//! | [`write`]         | `put()`, `delete()`, sealing, `flush()`              |
//! | [`read`]          | `get()`, `scan()`, `validate()`                      |
//! | [`compaction`]    | Size-tiered compaction, background compaction thread |
//! | [`probabilistic`] | `FullKv` and persistence of sketches under internal keys |
//!
//! ## Levels
//!
//! Flushes produce level-0 tables; compacting level `n` produces one table
//! at level `n + 1`. A table at a lower level is always newer than every
//! table at a higher level, and inside a level a larger id is newer, so the
//! read order is `(level asc, id desc)`.
//!
//! ## Crash Safety
//!
//! Every write reaches the WAL before the memtable. A WAL segment is
//! deleted only after the memtable holding its records has been flushed to
//! an SSTable, which is itself written to a temporary name and renamed.
//!
//! ## Concurrency
//!
//! `Engine` is a cheap handle (`Clone`) over shared state. Writers are
//! serialized by the WAL mutex. Locks are always taken in the order
//! WAL, memtables, SSTables, read cache.

mod compaction;
pub mod probabilistic;
mod read;
mod recovery;
mod write;

pub use config::Config;
pub use probabilistic::{FullKv, ProbabilisticStore, Structure, INTERNAL_PREFIX};
pub use read::ValidationReport;

use block::{BlockManager, LruCache};
use memtable::{new_memtable, Memtable, MemtableOptions};
use parking_lot::{Mutex, RwLock};
use sstable::{SSTable, WriterOptions};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use wal::Wal;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// Outcome of a point lookup.
///
/// A read that failed is an `Err`, so "no value", "deleted value" and
/// "read failed" are three different answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(Vec<u8>),
    /// The newest record for the key is a tombstone.
    Deleted,
    Missing,
}

impl Lookup {
    /// The value, if the key is live.
    #[must_use]
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::Deleted | Lookup::Missing => None,
        }
    }

    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// The active memtable plus sealed ones waiting for flush.
pub(crate) struct MemtableSet {
    pub(crate) active: Box<dyn Memtable>,
    /// Oldest at the front.
    pub(crate) sealed: VecDeque<Box<dyn Memtable>>,
    /// Flushed memtables kept for reuse.
    pub(crate) spare: Vec<Box<dyn Memtable>>,
}

impl MemtableSet {
    /// Active first, then sealed from newest to oldest.
    pub(crate) fn newest_first(&self) -> impl Iterator<Item = &Box<dyn Memtable>> + '_ {
        std::iter::once(&self.active).chain(self.sealed.iter().rev())
    }
}

pub(crate) struct Inner {
    pub(crate) config: Config,
    pub(crate) blocks: Arc<BlockManager>,
    pub(crate) wal: Mutex<Wal>,
    pub(crate) memtables: RwLock<MemtableSet>,
    /// Ordered newest first: level ascending, then id descending.
    pub(crate) sstables: RwLock<Vec<Arc<SSTable>>>,
    pub(crate) cache: Mutex<LruCache<Vec<u8>, Lookup>>,
    /// Serializes flushes so sealed memtables leave in order.
    pub(crate) flush_lock: Mutex<()>,
    pub(crate) compaction_lock: Mutex<()>,
    pub(crate) compactor: Mutex<compaction::Compactor>,
    pub(crate) next_table_id: AtomicU64,
    pub(crate) memtable_opts: MemtableOptions,
    pub(crate) writer_opts: WriterOptions,
}

/// Handle to an open store. Clones share the same underlying engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<Inner>,
}

/// Point-in-time counters, mostly for the CLI and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub active_entries: usize,
    pub sealed_memtables: usize,
    /// Table count per level.
    pub levels: BTreeMap<u8, usize>,
    pub cached_blocks: usize,
    pub cached_lookups: usize,
    pub wal_segment: u32,
}

impl Engine {
    /// Opens (or creates) the store described by `config`, recovering any
    /// state left on disk.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        recovery::open(config)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let wal_segment = self.inner.wal.lock().active_segment();
        let (active_entries, sealed_memtables) = {
            let mems = self.inner.memtables.read();
            (mems.active.len(), mems.sealed.len())
        };
        let mut levels = BTreeMap::new();
        for t in self.inner.sstables.read().iter() {
            *levels.entry(t.level()).or_insert(0) += 1;
        }
        EngineStats {
            active_entries,
            sealed_memtables,
            levels,
            cached_blocks: self.inner.blocks.cached_blocks(),
            cached_lookups: self.inner.cache.lock().len(),
            wal_segment,
        }
    }

    /// Number of SSTables across all levels.
    #[must_use]
    pub fn sstable_count(&self) -> usize {
        self.inner.sstables.read().len()
    }

    /// Ids of the tables at `level`, newest first.
    #[must_use]
    pub fn tables_at_level(&self, level: u8) -> Vec<u64> {
        self.inner
            .sstables
            .read()
            .iter()
            .filter(|t| t.level() == level)
            .map(|t| t.id())
            .collect()
    }
}

impl Inner {
    pub(crate) fn fresh_memtable(&self) -> Box<dyn Memtable> {
        new_memtable(self.config.memtable_struct, self.memtable_opts)
    }

    pub(crate) fn allocate_table_id(&self) -> u64 {
        self.next_table_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Newest-first ordering of tables.
pub(crate) fn sort_tables(tables: &mut [Arc<SSTable>]) {
    tables.sort_by(|a, b| a.level().cmp(&b.level()).then(b.id().cmp(&a.id())));
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Engine")
            .field("data_dir", &self.inner.config.data_dir)
            .field("memtable_struct", &self.inner.config.memtable_struct)
            .field("active_entries", &stats.active_entries)
            .field("sealed_memtables", &stats.sealed_memtables)
            .field("levels", &stats.levels)
            .field("wal_segment", &stats.wal_segment)
            .finish()
    }
}

#[cfg(test)]
mod tests;
