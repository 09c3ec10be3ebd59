mod recovery_tests;
mod write_tests;

use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::{Config, Engine};

/// Small memtables and segments so tests cross every boundary quickly.
///
/// Four keys per memtable, two memtables before a flush, eight records per
/// WAL segment, and a table limit high enough that compaction only runs
/// when a test asks for it.
pub(crate) fn config(dir: &Path) -> Config {
    Config {
        max_memtable_size: 4,
        num_memtables: 2,
        block_size: 256,
        block_cache_size: 32,
        lru_cache_size: 16,
        wal_max_records_per_segment: 8,
        wal_blocks_per_segment: 16,
        summary_step: 2,
        merkle_chunk_size: 64,
        max_tables_per_level: 64,
        seed: Some(7),
        ..Config::with_data_dir(dir)
    }
}

pub(crate) fn open(dir: &Path) -> Result<Engine> {
    Engine::open(config(dir))
}

pub(crate) fn key(i: usize) -> Vec<u8> {
    format!("key{:04}", i).into_bytes()
}

pub(crate) fn value(i: usize) -> Vec<u8> {
    format!("value-{}", i).into_bytes()
}

pub(crate) fn put_range(engine: &Engine, range: std::ops::Range<usize>) -> Result<()> {
    for i in range {
        engine.put(&key(i), &value(i))?;
    }
    Ok(())
}

pub(crate) fn wal_segments(dir: &Path) -> Result<usize> {
    count_entries(&dir.join("wal"), "wal_")
}

/// Published tables on disk, leftovers excluded.
pub(crate) fn table_files(dir: &Path) -> Result<usize> {
    let mut n = 0;
    for entry in fs::read_dir(dir.join("sstables"))? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("sstable_") && !name.ends_with(".tmp") {
            n += 1;
        }
    }
    Ok(n)
}

fn count_entries(dir: &Path, prefix: &str) -> Result<usize> {
    let mut n = 0;
    for entry in fs::read_dir(dir)? {
        if entry?.file_name().to_string_lossy().starts_with(prefix) {
            n += 1;
        }
    }
    Ok(n)
}
