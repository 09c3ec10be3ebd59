//! B-tree over an arena of nodes.
//!
//! Minimum degree `t`: every node holds at most `2t - 1` records. Inserts
//! split full children on the way down so a split never propagates upward;
//! before splitting, a full child first tries to hand one record to a
//! sibling through the parent. Deletes only flip the tombstone flag, so the
//! tree never shrinks before flush.

use crate::{mark_tombstone, supersedes, Cursor, Memtable, MemtableError, MemtableKind};
use std::fmt;
use wal::{Record, Timestamp};

#[derive(Default)]
struct Node {
    records: Vec<Record>,
    /// Empty for leaves, `records.len() + 1` entries otherwise.
    children: Vec<usize>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Position of the first record with key `>= key`, and whether it matches.
    fn search(&self, key: &[u8]) -> (usize, bool) {
        match self.records.binary_search_by(|r| r.key.as_slice().cmp(key)) {
            Ok(i) => (i, true),
            Err(i) => (i, false),
        }
    }
}

pub struct BTreeMemtable {
    nodes: Vec<Node>,
    root: usize,
    degree: usize,
    len: usize,
    max_size: usize,
    watermark: Option<u64>,
}

impl BTreeMemtable {
    /// # Panics
    ///
    /// Panics if `degree < 2`.
    pub fn new(max_size: usize, degree: usize) -> Self {
        assert!(degree >= 2, "b-tree degree must be >= 2");
        Self {
            nodes: vec![Node::default()],
            root: 0,
            degree,
            len: 0,
            max_size,
            watermark: None,
        }
    }

    fn max_keys(&self) -> usize {
        2 * self.degree - 1
    }

    fn is_full_node(&self, n: usize) -> bool {
        self.nodes[n].records.len() >= self.max_keys()
    }

    /// Depth of the tree (a lone root is 1).
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut n = self.root;
        while let Some(&child) = self.nodes[n].children.first() {
            n = child;
            depth += 1;
        }
        depth
    }

    /// Node and slot holding `key`.
    fn locate(&self, key: &[u8]) -> Option<(usize, usize)> {
        let mut n = self.root;
        loop {
            let node = &self.nodes[n];
            let (i, found) = node.search(key);
            if found {
                return Some((n, i));
            }
            if node.is_leaf() {
                return None;
            }
            n = node.children[i];
        }
    }

    fn alloc(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Splits the full child at `parent.children[i]` around its median.
    fn split_child(&mut self, parent: usize, i: usize) {
        let t = self.degree;
        let child = self.nodes[parent].children[i];

        let right_records = self.nodes[child].records.split_off(t);
        let right_children = if self.nodes[child].is_leaf() {
            Vec::new()
        } else {
            self.nodes[child].children.split_off(t)
        };
        let median = self.nodes[child].records.pop();
        let right = self.alloc(Node {
            records: right_records,
            children: right_children,
        });

        if let Some(median) = median {
            let p = &mut self.nodes[parent];
            p.records.insert(i, median);
            p.children.insert(i + 1, right);
        }
    }

    /// Moves one record from the full child `i` into a sibling with room,
    /// rotating through the parent's separator. Returns `false` if neither
    /// neighbour has spare room.
    fn rotate_into_sibling(&mut self, parent: usize, i: usize) -> bool {
        let roomy = 2 * self.degree - 2;
        let child = self.nodes[parent].children[i];
        let siblings = self.nodes[parent].children.len();

        if i > 0 {
            let left = self.nodes[parent].children[i - 1];
            if self.nodes[left].records.len() < roomy {
                let up = self.nodes[child].records.remove(0);
                let moved_child = if self.nodes[child].is_leaf() {
                    None
                } else {
                    Some(self.nodes[child].children.remove(0))
                };
                let down = std::mem::replace(&mut self.nodes[parent].records[i - 1], up);
                let l = &mut self.nodes[left];
                l.records.push(down);
                l.children.extend(moved_child);
                return true;
            }
        }

        if i + 1 < siblings {
            let right = self.nodes[parent].children[i + 1];
            if self.nodes[right].records.len() < roomy {
                let up = self.nodes[child].records.pop();
                let moved_child = self.nodes[child].children.pop();
                if let Some(up) = up {
                    let down = std::mem::replace(&mut self.nodes[parent].records[i], up);
                    let r = &mut self.nodes[right];
                    r.records.insert(0, down);
                    if let Some(c) = moved_child {
                        r.children.insert(0, c);
                    }
                    return true;
                }
            }
        }
        false
    }

    /// Inserts a key known to be absent.
    fn insert_new(&mut self, record: Record) {
        if self.is_full_node(self.root) {
            let old = self.root;
            self.root = self.alloc(Node {
                records: Vec::new(),
                children: vec![old],
            });
            self.split_child(self.root, 0);
        }

        let mut n = self.root;
        loop {
            let (i, _) = self.nodes[n].search(&record.key);
            if self.nodes[n].is_leaf() {
                self.nodes[n].records.insert(i, record);
                return;
            }
            let child = self.nodes[n].children[i];
            if self.is_full_node(child) {
                if !self.rotate_into_sibling(n, i) {
                    self.split_child(n, i);
                }
                // separators moved; pick the child again
                continue;
            }
            n = child;
        }
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(Node::default());
        self.root = 0;
        self.len = 0;
    }
}

impl Memtable for BTreeMemtable {
    fn add(
        &mut self,
        timestamp: Timestamp,
        tombstone: bool,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), MemtableError> {
        let value = if tombstone { Vec::new() } else { value.to_vec() };
        if let Some((n, i)) = self.locate(key) {
            let existing = &mut self.nodes[n].records[i];
            if supersedes(timestamp, existing) {
                *existing = Record::new(timestamp, tombstone, key.to_vec(), value);
            }
            return Ok(());
        }
        if self.len >= self.max_size {
            return Err(MemtableError::Full(self.max_size));
        }
        self.insert_new(Record::new(timestamp, tombstone, key.to_vec(), value));
        self.len += 1;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> bool {
        match self.locate(key) {
            Some((n, i)) => {
                mark_tombstone(&mut self.nodes[n].records[i]);
                true
            }
            None => false,
        }
    }

    fn get(&self, key: &[u8]) -> Option<&Record> {
        self.locate(key).map(|(n, i)| &self.nodes[n].records[i])
    }

    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        self.max_size
    }

    fn flush(&mut self) -> Vec<Record> {
        // in-order walk over node indices, then move the records out
        let mut order: Vec<(usize, usize)> = Vec::with_capacity(self.len);
        let mut cursor = BTreeCursor::new(self);
        while let Some(pos) = cursor.position() {
            order.push(pos);
            cursor.step();
        }

        let mut nodes: Vec<Vec<Option<Record>>> = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(|n| n.records.into_iter().map(Some).collect())
            .collect();
        let records = order
            .into_iter()
            .filter_map(|(n, i)| nodes[n][i].take())
            .collect();

        self.clear();
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
        Box::new(BTreeCursor::new(self))
    }

    fn kind(&self) -> MemtableKind {
        MemtableKind::BTree
    }
}

impl fmt::Debug for BTreeMemtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BTreeMemtable")
            .field("len", &self.len)
            .field("degree", &self.degree)
            .field("nodes", &self.nodes.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

/// In-order traversal as a stack of `(node, slot)` frames.
///
/// The top frame names the current record. A lower frame `(n, i)` means
/// `children[i]` of `n` is being walked and `records[i]` comes next.
struct BTreeCursor<'a> {
    tree: &'a BTreeMemtable,
    stack: Vec<(usize, usize)>,
}

impl<'a> BTreeCursor<'a> {
    fn new(tree: &'a BTreeMemtable) -> Self {
        let mut c = Self {
            tree,
            stack: Vec::new(),
        };
        c.descend_from(tree.root, &[]);
        c
    }

    /// Pushes the path from `n` to the first record `>= min`.
    fn descend_from(&mut self, mut n: usize, min: &[u8]) {
        let tree = self.tree;
        loop {
            let node = &tree.nodes[n];
            let (i, _) = node.search(min);
            self.stack.push((n, i));
            if node.is_leaf() {
                break;
            }
            n = node.children[i];
        }
        self.normalize();
    }

    fn normalize(&mut self) {
        let tree = self.tree;
        while let Some(&(n, i)) = self.stack.last() {
            if i < tree.nodes[n].records.len() {
                break;
            }
            self.stack.pop();
        }
    }

    fn position(&self) -> Option<(usize, usize)> {
        self.stack.last().copied()
    }

    fn step(&mut self) {
        let Some(top) = self.stack.last_mut() else {
            return;
        };
        let (n, i) = *top;
        top.1 = i + 1;
        let tree = self.tree;
        let node = &tree.nodes[n];
        if node.is_leaf() {
            self.normalize();
        } else {
            self.descend_from(node.children[i + 1], &[]);
        }
    }
}

impl Cursor for BTreeCursor<'_> {
    fn seek(&mut self, min: &[u8]) -> anyhow::Result<()> {
        self.stack.clear();
        self.descend_from(self.tree.root, min);
        Ok(())
    }

    fn current(&self) -> Option<&Record> {
        self.position().map(|(n, i)| &self.tree.nodes[n].records[i])
    }

    fn advance(&mut self) -> anyhow::Result<()> {
        self.step();
        Ok(())
    }
}
