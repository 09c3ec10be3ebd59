
use block::BlockManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wal::{Record, Timestamp};

use crate::{Layout, SSTableWriter, WriterOptions};

pub(crate) fn blocks() -> Arc<BlockManager> {
    Arc::new(BlockManager::new(256, 64))
}

pub(crate) fn put(ts: u128, key: &str, value: &str) -> Record {
    Record::put(
        Timestamp::from_nanos(ts),
        key.as_bytes().to_vec(),
        value.as_bytes().to_vec(),
    )
}

pub(crate) fn del(ts: u128, key: &str) -> Record {
    Record::tombstone(Timestamp::from_nanos(ts), key.as_bytes().to_vec())
}

pub(crate) fn opts(layout: Layout) -> WriterOptions {
    WriterOptions {
        summary_step: 3,
        bloom_false_positive_rate: 0.01,
        bloom_seed: Some(17),
        merkle_chunk_size: 64,
        layout,
    }
}

/// `count` records `key00000..` with values `value-N`.
pub(crate) fn numbered(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| put(i as u128 + 1, &format!("key{:05}", i), &format!("value-{}", i)))
        .collect()
}

pub(crate) fn write(dir: &Path, id: u64, records: Vec<Record>, layout: Layout) -> PathBuf {
    SSTableWriter::write(dir, id, 0, records, &opts(layout)).unwrap()
}

pub(crate) const LAYOUTS: [Layout; 2] = [Layout::MultiFile, Layout::SingleFile];
