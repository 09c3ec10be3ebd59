/// Cold start: leftover cleanup, SSTable loading and WAL replay.
///
/// Replayed records are fed into memtables in WAL order, sealing a memtable
/// whenever it fills, exactly as the write path would. If replay needed
/// more than one memtable, all of them are flushed before the engine is
/// handed out: the old segment boundaries need not line up with the
/// replayed memtables, so segments are pruned only once every replayed
/// record is in an SSTable.
use anyhow::{Context, Result};
use block::{BlockManager, LruCache};
use memtable::MemtableOptions;
use parking_lot::{Mutex, RwLock};
use sstable::{parse_table_name, Layout, SSTable, WriterOptions, TMP_SUFFIX};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wal::{Wal, WalError, WalOptions};

use crate::compaction::Compactor;
use crate::{sort_tables, Config, Engine, Inner, MemtableSet};

pub(crate) fn open(config: Config) -> Result<Engine> {
    config.validate()?;
    let sst_dir = config.sstable_dir();
    fs::create_dir_all(&sst_dir)
        .with_context(|| format!("creating {}", sst_dir.display()))?;
    cleanup_tmp_files(&sst_dir)?;

    let blocks = Arc::new(BlockManager::new(config.block_size, config.block_cache_size));
    let mut tables = load_tables(&sst_dir, &blocks)?;
    sort_tables(&mut tables);
    let next_table_id = tables.iter().map(|t| t.id()).max().map_or(1, |id| id + 1);

    let mut wal = Wal::open(
        config.wal_dir(),
        Arc::clone(&blocks),
        WalOptions {
            max_records_per_segment: config.wal_max_records_per_segment,
            blocks_per_segment: config.wal_blocks_per_segment,
            sync: config.wal_sync,
        },
    )?;
    let entries = wal.read_records()?;
    if entries.is_empty() {
        drop_empty_segments(&mut wal)?;
    }

    let memtable_opts = MemtableOptions {
        max_size: config.max_memtable_size,
        skip_list_levels: config.skip_list_level_num,
        btree_degree: config.btree_degree,
        seed: config.seed.unwrap_or_else(bloom::clock_seed),
    };
    let writer_opts = WriterOptions {
        summary_step: config.summary_step,
        bloom_false_positive_rate: config.bloom_false_positive_rate,
        bloom_seed: config.seed,
        merkle_chunk_size: config.merkle_chunk_size,
        layout: if config.sstable_single_file {
            Layout::SingleFile
        } else {
            Layout::MultiFile
        },
    };
    let fresh = || memtable::new_memtable(config.memtable_struct, memtable_opts);

    let mut mems = MemtableSet {
        active: fresh(),
        sealed: VecDeque::new(),
        spare: Vec::new(),
    };
    let replayed = entries.len();
    let last_index = entries.last().map(|e| e.index);
    for entry in entries {
        let record = entry.record;
        if mems.active.is_full() && mems.active.get(&record.key).is_none() {
            mems.seal(fresh);
        }
        mems.active
            .add(record.timestamp, record.tombstone, &record.key, &record.value)?;
        mems.active.set_watermark(entry.index);
    }
    let overflowed = !mems.sealed.is_empty();

    info!(
        dir = %config.data_dir.display(),
        tables = tables.len(),
        replayed,
        "opened store"
    );

    let cache = LruCache::new(config.lru_cache_size);
    let engine = Engine {
        inner: Arc::new(Inner {
            config,
            blocks,
            wal: Mutex::new(wal),
            memtables: RwLock::new(mems),
            sstables: RwLock::new(tables),
            cache: Mutex::new(cache),
            flush_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            compactor: Mutex::new(Compactor::default()),
            next_table_id: AtomicU64::new(next_table_id),
            memtable_opts,
            writer_opts,
        }),
    };

    if overflowed {
        engine.flush_replayed(last_index)?;
    }
    Ok(engine)
}

impl Engine {
    /// Writes every replayed memtable out, then drops the segments they
    /// came from.
    fn flush_replayed(&self, last_index: Option<u64>) -> Result<()> {
        self.inner
            .memtables
            .write()
            .seal(|| self.inner.fresh_memtable());
        while self.flush_oldest(1, false)? {}
        if let Some(index) = last_index {
            let removed = self.inner.wal.lock().mark_segments_persisted(index)?;
            debug!(removed, "pruned replayed WAL segments");
        }
        self.schedule_compaction()
    }
}

/// Opens every table in `dir`, in directory order.
fn load_tables(dir: &Path, blocks: &Arc<BlockManager>) -> Result<Vec<Arc<SSTable>>> {
    let mut tables = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if parse_table_name(name).is_none() {
            continue;
        }
        let table = SSTable::open(entry.path(), Arc::clone(blocks))
            .with_context(|| format!("opening SSTable {}", name))?;
        debug!(id = table.id(), level = table.level(), layout = ?table.layout(), "loaded SSTable");
        tables.push(Arc::new(table));
    }
    Ok(tables)
}

/// Segments left by a previous run that replayed nothing hold no records.
fn drop_empty_segments(wal: &mut Wal) -> Result<()> {
    for path in wal.segment_paths()? {
        match wal.mark_segment_as_persisted(&path) {
            Ok(()) | Err(WalError::ActiveSegment(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Removes `.tmp` files and directories left by an interrupted write.
fn cleanup_tmp_files(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_tmp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(TMP_SUFFIX));
        if !is_tmp {
            continue;
        }
        warn!(path = %path.display(), "removing unfinished SSTable");
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
