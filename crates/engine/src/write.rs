//! Write path: `put()`, `delete()`, sealing, and flushing memtables.
//!
//! Every mutation is appended to the WAL before it reaches the active
//! memtable. When the active memtable is full and the key is new, it is
//! sealed: the WAL rotates so the sealed memtable owns whole segments, and
//! an empty memtable takes its place. Once `num_memtables` memtables are
//! sealed the oldest one is written out as a level-0 SSTable and the WAL
//! segments it covered are deleted.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};
use wal::Timestamp;

use sstable::{SSTable, SSTableWriter};

use crate::{sort_tables, Engine, MemtableSet, MAX_KEY_SIZE, MAX_VALUE_SIZE};

impl MemtableSet {
    /// Moves the active memtable to the back of the sealed queue and makes
    /// a spare (or freshly built) one active.
    pub(crate) fn seal(&mut self, fresh: impl FnOnce() -> Box<dyn memtable::Memtable>) {
        let next = self.spare.pop().unwrap_or_else(fresh);
        let sealed = std::mem::replace(&mut self.active, next);
        self.sealed.push_back(sealed);
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    anyhow::ensure!(!key.is_empty(), "key must not be empty");
    anyhow::ensure!(
        key.len() <= MAX_KEY_SIZE,
        "key too large: {} bytes (max {})",
        key.len(),
        MAX_KEY_SIZE
    );
    Ok(())
}

impl Engine {
    /// Stores `value` under `key` and returns the timestamp the write was
    /// given.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<Timestamp> {
        check_key(key)?;
        anyhow::ensure!(
            value.len() <= MAX_VALUE_SIZE,
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        );
        self.apply(false, key, value)
    }

    /// Deletes `key` by writing a tombstone.
    ///
    /// The tombstone is written even when the key is not visible, since an
    /// older value may still sit in an SSTable.
    pub fn delete(&self, key: &[u8]) -> Result<Timestamp> {
        check_key(key)?;
        self.apply(true, key, &[])
    }

    fn apply(&self, tombstone: bool, key: &[u8], value: &[u8]) -> Result<Timestamp> {
        let inner = &self.inner;
        let limit = inner.config.num_memtables;
        let (timestamp, flush_due) = {
            let mut wal = inner.wal.lock();

            let must_seal = {
                let mems = inner.memtables.read();
                mems.active.is_full() && mems.active.get(key).is_none()
            };
            if must_seal {
                wal.rotate()?;
                inner.memtables.write().seal(|| inner.fresh_memtable());
                debug!(segment = wal.active_segment(), "sealed active memtable");
            }

            let timestamp = wal.append_record(tombstone, key, value)?;
            let index = wal
                .last_index()
                .context("WAL reported no index after an append")?;

            let mut mems = inner.memtables.write();
            mems.active.add(timestamp, tombstone, key, value)?;
            mems.active.set_watermark(index);
            inner.cache.lock().remove(&key.to_vec());
            (timestamp, mems.sealed.len() >= limit)
        };

        if flush_due {
            while self.flush_oldest(limit, true)? {}
            self.schedule_compaction()?;
        }
        Ok(timestamp)
    }

    /// Writes every memtable holding data to SSTables, then prunes the WAL.
    ///
    /// A no-op when all memtables are empty.
    pub fn flush(&self) -> Result<()> {
        {
            let mut wal = self.inner.wal.lock();
            let empty = self.inner.memtables.read().active.is_empty();
            if !empty {
                wal.rotate()?;
                self.inner
                    .memtables
                    .write()
                    .seal(|| self.inner.fresh_memtable());
            }
        }
        let mut flushed = false;
        while self.flush_oldest(1, true)? {
            flushed = true;
        }
        if flushed {
            self.schedule_compaction()?;
        }
        Ok(())
    }

    /// Flushes the oldest sealed memtable if at least `min_sealed` are
    /// queued. Returns whether anything was flushed.
    ///
    /// With `prune` set, WAL segments up to the memtable's watermark are
    /// deleted once the SSTable is published.
    pub(crate) fn flush_oldest(&self, min_sealed: usize, prune: bool) -> Result<bool> {
        let inner = &self.inner;
        let _flushing = inner.flush_lock.lock();

        let (records, watermark) = {
            let mems = inner.memtables.read();
            if mems.sealed.len() < min_sealed.max(1) {
                return Ok(false);
            }
            let Some(oldest) = mems.sealed.front() else {
                return Ok(false);
            };
            let mut records = Vec::with_capacity(oldest.len());
            let mut cursor = oldest.cursor();
            while let Some(record) = cursor.current() {
                records.push(record.clone());
                cursor.advance()?;
            }
            (records, oldest.watermark())
        };

        let table = if records.is_empty() {
            None
        } else {
            let id = inner.allocate_table_id();
            let count = records.len();
            let path = SSTableWriter::write(
                &inner.config.sstable_dir(),
                id,
                0,
                records,
                &inner.writer_opts,
            )?;
            info!(id, records = count, path = %path.display(), "flushed memtable");
            Some(Arc::new(SSTable::open(&path, Arc::clone(&inner.blocks))?))
        };

        {
            let mut mems = inner.memtables.write();
            let mut tables = inner.sstables.write();
            if let Some(table) = table {
                tables.push(table);
                sort_tables(&mut tables);
            }
            if let Some(mut retired) = mems.sealed.pop_front() {
                retired.flush();
                if mems.spare.len() < inner.config.num_memtables {
                    mems.spare.push(retired);
                }
            }
        }

        if prune {
            if let Some(watermark) = watermark {
                let removed = inner.wal.lock().mark_segments_persisted(watermark)?;
                debug!(watermark, removed, "pruned WAL segments");
            }
        }
        Ok(true)
    }
}
