/// Read path: `get()`, `scan()` and `validate()`.
///
/// Point lookups go cache, active memtable, sealed memtables (newest first),
/// then SSTables in `(level asc, id desc)` order. The first record found for
/// the key decides the answer; a tombstone hides every older value.
///
/// Range scans merge all of those sources through a `MultiCursor`, which
/// keeps the newest record per key, and drop tombstones before returning.
use anyhow::Result;
use memtable::Cursor;
use sstable::{MultiCursor, Validation};
use std::path::PathBuf;
use tracing::warn;
use wal::Record;

use crate::{Engine, Lookup};

impl Lookup {
    fn of(record: &Record) -> Self {
        if record.tombstone {
            Lookup::Deleted
        } else {
            Lookup::Found(record.value.clone())
        }
    }
}

/// Merkle check result for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub id: u64,
    pub level: u8,
    pub path: PathBuf,
    pub validation: Validation,
}

impl Engine {
    /// Looks up `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if an SSTable read fails, including a CRC mismatch
    /// on the record (downcastable to [`sstable::SSTableError`]).
    pub fn get(&self, key: &[u8]) -> Result<Lookup> {
        let cache_key = key.to_vec();
        if let Some(hit) = self.inner.cache.lock().get(&cache_key) {
            return Ok(hit.clone());
        }

        // Holding the memtable lock until the cache is filled keeps a
        // concurrent write from being shadowed by this answer.
        let mems = self.inner.memtables.read();
        let lookup = match mems.newest_first().find_map(|m| m.get(key)) {
            Some(record) => Lookup::of(record),
            None => self.search_tables(key)?,
        };
        self.inner.cache.lock().insert(cache_key, lookup.clone());
        drop(mems);
        Ok(lookup)
    }

    fn search_tables(&self, key: &[u8]) -> Result<Lookup> {
        for table in self.inner.sstables.read().iter() {
            if let Some(record) = table.search(key)? {
                return Ok(Lookup::of(&record));
            }
        }
        Ok(Lookup::Missing)
    }

    /// Live key-value pairs with `min <= key <= max`, in key order. With no
    /// `max` the scan runs to the last key.
    pub fn scan(&self, min: &[u8], max: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mems = self.inner.memtables.read();
        let tables = self.inner.sstables.read();

        let mut children: Vec<Box<dyn Cursor + '_>> =
            mems.newest_first().map(|m| m.cursor()).collect();
        for table in tables.iter() {
            if max.is_some_and(|max| table.min_key() > max) || table.max_key() < min {
                continue;
            }
            children.push(Box::new(table.cursor()?));
        }

        let mut merged = MultiCursor::new(children, min, max)?;
        let mut out = Vec::new();
        while let Some(record) = merged.next_record()? {
            if !record.tombstone {
                out.push((record.key, record.value));
            }
        }
        Ok(out)
    }

    /// Recomputes the Merkle tree of every table and compares it with the
    /// stored one.
    pub fn validate(&self) -> Result<Vec<ValidationReport>> {
        let tables = self.inner.sstables.read();
        let mut reports = Vec::with_capacity(tables.len());
        for table in tables.iter() {
            let validation = table.validate_merkle()?;
            if !validation.is_ok() {
                warn!(
                    id = table.id(),
                    chunks = ?validation.corrupted_chunks,
                    "SSTable data does not match its Merkle tree"
                );
            }
            reports.push(ValidationReport {
                id: table.id(),
                level: table.level(),
                path: table.path().to_path_buf(),
                validation,
            });
        }
        Ok(reports)
    }
}
