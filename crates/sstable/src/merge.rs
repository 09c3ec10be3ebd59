//! Merging sorted sources.
//!
//! A [`MultiCursor`] merges memtable and SSTable cursors into one ascending
//! stream with one record per key. Children are given newest source first;
//! when several hold the same key the record with the highest timestamp
//! wins, and on equal timestamps the earlier child wins.
//!
//! [`merge_runs`] is the compaction primitive: a heap-based k-way merge of
//! fully materialized runs with the same newest-wins rule.

use anyhow::Result;
use memtable::Cursor;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use wal::Record;

pub struct MultiCursor<'a> {
    children: Vec<Box<dyn Cursor + 'a>>,
    max: Option<Vec<u8>>,
}

impl<'a> MultiCursor<'a> {
    /// Seeks every child to the first key `>= min`. Keys past `max` are
    /// never returned.
    pub fn new(
        mut children: Vec<Box<dyn Cursor + 'a>>,
        min: &[u8],
        max: Option<&[u8]>,
    ) -> Result<Self> {
        for child in &mut children {
            child.seek(min)?;
        }
        Ok(Self {
            children,
            max: max.map(<[u8]>::to_vec),
        })
    }

    /// The next record in key order, tombstones included.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let mut best: Option<&Record> = None;
        for child in &self.children {
            let Some(r) = child.current() else {
                continue;
            };
            if self.max.as_deref().is_some_and(|max| r.key.as_slice() > max) {
                continue;
            }
            best = match best {
                None => Some(r),
                Some(b) if r.key < b.key => Some(r),
                Some(b) if r.key == b.key && r.timestamp > b.timestamp => Some(r),
                keep => keep,
            };
        }
        let Some(winner) = best.cloned() else {
            return Ok(None);
        };

        // step every source past this key so it is emitted once
        for child in &mut self.children {
            while child.current().is_some_and(|r| r.key == winner.key) {
                child.advance()?;
            }
        }
        Ok(Some(winner))
    }

    /// Drains the remaining records.
    pub fn collect_all(&mut self) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        while let Some(r) = self.next_record()? {
            out.push(r);
        }
        Ok(out)
    }
}

/// Head of one run in the compaction heap.
struct HeapEntry {
    record: Record,
    /// Which run it came from.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: smallest key first, then the newest timestamp, then the
        // lowest source index
        other
            .record
            .key
            .cmp(&self.record.key)
            .then_with(|| self.record.timestamp.cmp(&other.record.timestamp))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// K-way merge of key-sorted runs into one sorted run with a single record
/// per key: the one with the largest timestamp.
///
/// When `drop_tombstones` is set, keys whose winning record is a tombstone
/// are left out entirely.
pub fn merge_runs(runs: Vec<Vec<Record>>, drop_tombstones: bool) -> Vec<Record> {
    let total = runs.iter().map(Vec::len).sum();
    let mut iters: Vec<std::vec::IntoIter<Record>> =
        runs.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());
    for (source, it) in iters.iter_mut().enumerate() {
        if let Some(record) = it.next() {
            heap.push(HeapEntry { record, source });
        }
    }

    let mut out: Vec<Record> = Vec::with_capacity(total);
    let mut last_key: Option<Vec<u8>> = None;
    while let Some(HeapEntry { record, source }) = heap.pop() {
        if let Some(next) = iters[source].next() {
            heap.push(HeapEntry {
                record: next,
                source,
            });
        }
        // the first pop of each key is its newest record
        if last_key.as_deref() == Some(record.key.as_slice()) {
            continue;
        }
        last_key = Some(record.key.clone());
        if drop_tombstones && record.tombstone {
            continue;
        }
        out.push(record);
    }
    out
}
