use crate::{mark_tombstone, supersedes, Cursor, Memtable, MemtableError, MemtableKind};
use std::collections::HashMap;
use wal::{Record, Timestamp};

/// Unordered backend. Ordering is paid for on flush and cursor creation.
#[derive(Debug)]
pub struct HashMapMemtable {
    map: HashMap<Vec<u8>, Record>,
    max_size: usize,
    watermark: Option<u64>,
}

impl HashMapMemtable {
    pub fn new(max_size: usize) -> Self {
        Self {
            map: HashMap::with_capacity(max_size.min(1 << 16)),
            max_size,
            watermark: None,
        }
    }
}

impl Memtable for HashMapMemtable {
    fn add(
        &mut self,
        timestamp: Timestamp,
        tombstone: bool,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), MemtableError> {
        let value = if tombstone { Vec::new() } else { value.to_vec() };
        let len = self.map.len();
        match self.map.get_mut(key) {
            Some(existing) => {
                if supersedes(timestamp, existing) {
                    *existing = Record::new(timestamp, tombstone, key.to_vec(), value);
                }
                Ok(())
            }
            None if len >= self.max_size => Err(MemtableError::Full(self.max_size)),
            None => {
                self.map
                    .insert(key.to_vec(), Record::new(timestamp, tombstone, key.to_vec(), value));
                Ok(())
            }
        }
    }

    fn delete(&mut self, key: &[u8]) -> bool {
        match self.map.get_mut(key) {
            Some(r) => {
                mark_tombstone(r);
                true
            }
            None => false,
        }
    }

    fn get(&self, key: &[u8]) -> Option<&Record> {
        self.map.get(key)
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn capacity(&self) -> usize {
        self.max_size
    }

    fn flush(&mut self) -> Vec<Record> {
        let mut records: Vec<Record> = self.map.drain().map(|(_, r)| r).collect();
        records.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        self.watermark = None;
        records
    }

    fn set_watermark(&mut self, index: u64) {
        self.watermark = Some(self.watermark.map_or(index, |w| w.max(index)));
    }

    fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    fn cursor(&self) -> Box<dyn Cursor + '_> {
        let mut sorted: Vec<&Record> = self.map.values().collect();
        sorted.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        Box::new(SortedCursor { sorted, pos: 0 })
    }

    fn kind(&self) -> MemtableKind {
        MemtableKind::HashMap
    }
}

/// Cursor over a key-sorted snapshot of the map's values.
struct SortedCursor<'a> {
    sorted: Vec<&'a Record>,
    pos: usize,
}

impl Cursor for SortedCursor<'_> {
    fn seek(&mut self, min: &[u8]) -> anyhow::Result<()> {
        self.pos = self.sorted.partition_point(|r| r.key.as_slice() < min);
        Ok(())
    }

    fn current(&self) -> Option<&Record> {
        self.sorted.get(self.pos).copied()
    }

    fn advance(&mut self) -> anyhow::Result<()> {
        if self.pos < self.sorted.len() {
            self.pos += 1;
        }
        Ok(())
    }
}
