//! Skip list over an arena of nodes.
//!
//! Nodes are never removed before flush, so indices into `nodes` stay valid
//! for the life of the table. The head tower lives in `head`; `None` in a
//! predecessor slot stands for the head.

use crate::{mark_tombstone, supersedes, Cursor, Memtable, MemtableError, MemtableKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use wal::{Record, Timestamp};

struct Node {
    record: Record,
    forward: Vec<Option<usize>>,
}

pub struct SkipListMemtable {
    nodes: Vec<Node>,
    head: Vec<Option<usize>>,
    /// Levels currently in use (1..=max_levels).
    height: usize,
    max_levels: usize,
    max_size: usize,
    rng: StdRng,
    watermark: Option<u64>,
}

impl SkipListMemtable {
    /// # Panics
    ///
    /// Panics if `max_levels` is 0.
    pub fn new(max_size: usize, max_levels: usize, seed: u64) -> Self {
        assert!(max_levels > 0, "skip list needs at least one level");
        Self {
            nodes: Vec::new(),
            head: vec![None; max_levels],
            height: 1,
            max_levels,
            max_size,
            rng: StdRng::seed_from_u64(seed),
            watermark: None,
        }
    }

    /// Number of levels the tallest tower reaches.
    pub fn height(&self) -> usize {
        self.height
    }

    fn next(&self, at: Option<usize>, level: usize) -> Option<usize> {
        match at {
            None => self.head[level],
            Some(i) => self.nodes[i].forward[level],
        }
    }

    fn set_next(&mut self, at: Option<usize>, level: usize, to: Option<usize>) {
        match at {
            None => self.head[level] = to,
            Some(i) => self.nodes[i].forward[level] = to,
        }
    }

    /// Rightmost node with key `< key` on every level, top-down.
    fn predecessors(&self, key: &[u8]) -> Vec<Option<usize>> {
        let mut preds = vec![None; self.max_levels];
        let mut at = None;
        for level in (0..self.height).rev() {
            while let Some(n) = self.next(at, level) {
                if self.nodes[n].record.key.as_slice() < key {
                    at = Some(n);
                } else {
                    break;
                }
            }
            preds[level] = at;
        }
        preds
    }

    /// First node with key `>= key`.
    fn lower_bound(&self, key: &[u8]) -> Option<usize> {
        let preds = self.predecessors(key);
        self.next(preds[0], 0)
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        self.lower_bound(key)
            .filter(|&n| self.nodes[n].record.key.as_slice() == key)
    }

    /// Coin flips: each extra level with probability 1/2.
    fn random_height(&mut self) -> usize {
        let mut h = 1;
        while h < self.max_levels && self.rng.gen_bool(0.5) {
            h += 1;
        }
        h
    }
}

impl Memtable for SkipListMemtable {
    fn add(
        &mut self,
        timestamp: Timestamp,
        tombstone: bool,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), MemtableError> {
        let value = if tombstone { Vec::new() } else { value.to_vec() };
        let preds = self.predecessors(key);

        if let Some(n) = self.next(preds[0], 0) {
            let existing = &mut self.nodes[n].record;
            if existing.key.as_slice() == key {
                if supersedes(timestamp, existing) {
                    *existing = Record::new(timestamp, tombstone, key.to_vec(), value);
                }
                return Ok(());
            }
        }
        if self.nodes.len() >= self.max_size {
            return Err(MemtableError::Full(self.max_size));
        }

        let height = self.random_height();
        let idx = self.nodes.len();
        let forward = (0..height).map(|l| self.next(preds[l], l)).collect();
        self.nodes.push(Node {
            record: Record::new(timestamp, tombstone, key.to_vec(), value),
            forward,
        });
        for (level, &pred) in preds.iter().enumerate().take(height) {
            self.set_next(pred, level, Some(idx));
        }
        self.height = self.height.max(height);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> bool {
        match self.find(key) {
            Some(n) => {
                mark_tombstone(&mut self.nodes[n].record);
                true
            }
            None => false,
        }
    }

    fn get(&self, key: &[u8]) -> Option<&Record> {
        self.find(key).map(|n| &self.nodes[n].record)
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn capacity(&self) -> usize {
        self.max_size
    }

    fn flush(&mut self) -> Vec<Record> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut at = self.head[0];
        while let Some(n) = at {
            order.push(n);
            at = self.nodes[n].forward[0];
        }

        let mut slots: Vec<Option<Record>> = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(|n| Some(n.record))
            .collect();
        let records = order.into_iter().filter_map(|n| slots[n].take()).collect();

        self.head.iter_mut().for_each(|h| *h = None);
        self.height = 1;
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
        Box::new(SkipListCursor {
            list: self,
            at: self.head[0],
        })
    }

    fn kind(&self) -> MemtableKind {
        MemtableKind::SkipList
    }
}

impl fmt::Debug for SkipListMemtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipListMemtable")
            .field("len", &self.nodes.len())
            .field("height", &self.height)
            .field("max_levels", &self.max_levels)
            .field("max_size", &self.max_size)
            .finish()
    }
}

struct SkipListCursor<'a> {
    list: &'a SkipListMemtable,
    at: Option<usize>,
}

impl Cursor for SkipListCursor<'_> {
    fn seek(&mut self, min: &[u8]) -> anyhow::Result<()> {
        self.at = self.list.lower_bound(min);
        Ok(())
    }

    fn current(&self) -> Option<&Record> {
        self.at.map(|n| &self.list.nodes[n].record)
    }

    fn advance(&mut self) -> anyhow::Result<()> {
        if let Some(n) = self.at {
            self.at = self.list.nodes[n].forward[0];
        }
        Ok(())
    }
}
