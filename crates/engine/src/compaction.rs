/// Size-tiered compaction.
///
/// Tables are bucketed by the level stored in their Metadata. Whenever a
/// level holds more than `max_tables_per_level` tables, all of them are
/// merged into one table at the next level, and the check repeats until no
/// level is over its limit.
///
/// Flushes never compact on the writer's thread. They hand the work to a
/// single background worker; requests made while it runs are folded into
/// its next pass.
///
/// Inputs stay readable until the merged table is durable and swapped in;
/// their files are deleted only after the swap.
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use sstable::{merge_runs, SSTable, SSTableWriter};

use crate::{sort_tables, Engine};

/// State of the background compaction worker.
#[derive(Debug, Default)]
pub(crate) struct Compactor {
    running: bool,
    /// Another pass was asked for since the worker last checked.
    requested: bool,
    handle: Option<JoinHandle<()>>,
}

impl Engine {
    /// Runs compaction to a fixed point and returns the number of levels
    /// merged.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if an input table is corrupt; the
    /// table set is left unchanged in that case.
    pub fn compact(&self) -> Result<usize> {
        let _compacting = self.inner.compaction_lock.lock();
        let mut merged = 0;
        while let Some(level) = self.level_over_limit() {
            self.compact_level(level)?;
            merged += 1;
        }
        Ok(merged)
    }

    /// Runs [`compact`](Self::compact) on a background thread.
    pub fn spawn_compaction(&self) -> Result<JoinHandle<Result<usize>>> {
        let engine = self.clone();
        let handle = thread::Builder::new()
            .name("strata-compaction".into())
            .spawn(move || engine.compact())?;
        Ok(handle)
    }

    /// Blocks until the background worker has no compaction left to do.
    pub fn wait_for_compaction(&self) {
        let handle = self.inner.compactor.lock().handle.take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("background compaction thread panicked");
            }
        }
    }

    /// Asks the background worker for a pass if some level is over its
    /// limit, starting the worker when it is idle.
    pub(crate) fn schedule_compaction(&self) -> Result<()> {
        if self.level_over_limit().is_none() {
            return Ok(());
        }
        let mut state = self.inner.compactor.lock();
        state.requested = true;
        if state.running {
            return Ok(());
        }
        // an idle worker has already released the lock for the last time
        if let Some(finished) = state.handle.take() {
            let _ = finished.join();
        }

        let engine = self.clone();
        let handle = thread::Builder::new()
            .name("strata-compaction".into())
            .spawn(move || engine.run_compactor())?;
        state.running = true;
        state.handle = Some(handle);
        debug!("background compaction scheduled");
        Ok(())
    }

    fn run_compactor(&self) {
        loop {
            {
                let mut state = self.inner.compactor.lock();
                if !state.requested {
                    state.running = false;
                    return;
                }
                state.requested = false;
            }
            match self.compact() {
                Ok(0) => {}
                Ok(merged) => debug!(merged, "background compaction pass finished"),
                Err(e) => warn!(error = %format!("{:#}", e), "background compaction failed"),
            }
        }
    }

    /// Lowest level holding more tables than allowed.
    fn level_over_limit(&self) -> Option<u8> {
        let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
        for table in self.inner.sstables.read().iter() {
            *counts.entry(table.level()).or_default() += 1;
        }
        let limit = self.inner.config.max_tables_per_level;
        counts
            .into_iter()
            .find(|&(level, count)| count > limit && level < u8::MAX)
            .map(|(level, _)| level)
    }

    fn compact_level(&self, level: u8) -> Result<()> {
        let inner = &self.inner;
        let (inputs, deeper_exists) = {
            let tables = inner.sstables.read();
            let inputs: Vec<Arc<SSTable>> = tables
                .iter()
                .filter(|t| t.level() == level)
                .cloned()
                .collect();
            (inputs, tables.iter().any(|t| t.level() > level))
        };
        debug!(level, inputs = inputs.len(), deeper_exists, "compacting level");

        let runs = inputs
            .iter()
            .map(|t| t.records())
            .collect::<Result<Vec<_>>>()?;
        // Tombstones may only go once nothing older can be shadowed.
        let merged = merge_runs(runs, !deeper_exists);

        let output = if merged.is_empty() {
            None
        } else {
            let id = inner.allocate_table_id();
            let path = SSTableWriter::write(
                &inner.config.sstable_dir(),
                id,
                level + 1,
                merged,
                &inner.writer_opts,
            )?;
            Some(Arc::new(SSTable::open(&path, Arc::clone(&inner.blocks))?))
        };
        let output_id = output.as_ref().map(|t| t.id());

        {
            let mut tables = inner.sstables.write();
            tables.retain(|t| !inputs.iter().any(|input| Arc::ptr_eq(input, t)));
            if let Some(table) = output {
                tables.push(table);
            }
            sort_tables(&mut tables);
            inner.cache.lock().clear();
        }

        for table in &inputs {
            table.delete_files()?;
            debug!(id = table.id(), "removed compacted SSTable");
        }
        info!(
            level,
            inputs = inputs.len(),
            output = ?output_id,
            "compacted level"
        );
        Ok(())
    }
}
