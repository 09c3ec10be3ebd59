use anyhow::{bail, Context, Result};
use bloom::BloomFilter;
use merkle::MerkleTree;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use wal::Record;

use crate::format::{
    table_name, write_index_entry, Footer, Layout, Metadata, Segment, Summary, TMP_SUFFIX,
};

/// Knobs for building a table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriterOptions {
    /// One summary entry per this many index entries.
    pub summary_step: usize,
    pub bloom_false_positive_rate: f64,
    /// Bloom hash seed; time-derived when `None`.
    pub bloom_seed: Option<u64>,
    pub merkle_chunk_size: usize,
    pub layout: Layout,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            summary_step: 16,
            bloom_false_positive_rate: 0.01,
            bloom_seed: None,
            merkle_chunk_size: 4096,
            layout: Layout::MultiFile,
        }
    }
}

/// Builds immutable tables from records.
///
/// Writes land under a `.tmp` name, are fsynced, and are then renamed into
/// place, so a crash leaves either a complete table or a temporary artifact
/// that recovery removes.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Writes `records` as table `id` at `level` inside `dir` and returns the
    /// final path (a directory or a single file, depending on the layout).
    ///
    /// Records are sorted by key; if a key appears more than once only its
    /// newest record is kept.
    ///
    /// # Errors
    ///
    /// Refuses to write an empty table; propagates any I/O failure.
    pub fn write(
        dir: &Path,
        id: u64,
        level: u8,
        mut records: Vec<Record>,
        opts: &WriterOptions,
    ) -> Result<PathBuf> {
        if records.is_empty() {
            bail!("refusing to write an empty SSTable");
        }
        if opts.summary_step == 0 || opts.merkle_chunk_size == 0 {
            bail!("summary_step and merkle_chunk_size must be > 0");
        }

        records.sort_by(|a, b| a.key.cmp(&b.key).then(b.timestamp.cmp(&a.timestamp)));
        records.dedup_by(|later, first| later.key == first.key);

        let segments = Self::encode_segments(level, &records, opts)?;
        let name = table_name(id, opts.layout);
        let final_path = dir.join(&name);
        let tmp_path = dir.join(format!("{}{}", name, TMP_SUFFIX));

        fs::create_dir_all(dir)?;
        match opts.layout {
            Layout::MultiFile => write_multi_file(&tmp_path, &segments)?,
            Layout::SingleFile => write_single_file(&tmp_path, &segments)?,
        }
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("renaming {} into place", tmp_path.display()))?;
        sync_dir(dir);

        debug!(
            table = %final_path.display(),
            records = records.len(),
            level,
            "sstable written"
        );
        Ok(final_path)
    }

    /// Encodes the five segments of a table, in [`Segment::ALL`] order.
    fn encode_segments(level: u8, records: &[Record], opts: &WriterOptions) -> Result<[Vec<u8>; 5]> {
        let seed = opts.bloom_seed.unwrap_or_else(bloom::clock_seed);
        let mut bloom = BloomFilter::with_seed(records.len(), opts.bloom_false_positive_rate, seed);

        let mut data = Vec::new();
        let mut index = Vec::new();
        let mut summary = Summary::default();

        for (n, record) in records.iter().enumerate() {
            let data_offset = data.len() as u64;
            record.encode_into(&mut data);

            if n % opts.summary_step == 0 {
                summary.entries.push((record.key.clone(), index.len() as u64));
            }
            write_index_entry(&mut index, &record.key, data_offset);
            bloom.insert(&record.key);
        }

        // records is non-empty
        if let (Some(first), Some(last)) = (records.first(), records.last()) {
            summary.min_key = first.key.clone();
            summary.max_key = last.key.clone();
        }

        let chunk_size = u32::try_from(opts.merkle_chunk_size).context("merkle chunk size")?;
        let metadata = Metadata {
            level,
            chunk_size,
            merkle: MerkleTree::build(&data, opts.merkle_chunk_size),
        };

        Ok([
            data,
            index,
            summary.encode(),
            bloom.to_bytes(),
            metadata.encode(),
        ])
    }
}

fn write_multi_file(tmp_dir: &Path, segments: &[Vec<u8>; 5]) -> Result<()> {
    if tmp_dir.exists() {
        fs::remove_dir_all(tmp_dir)?;
    }
    fs::create_dir_all(tmp_dir)?;
    for (segment, bytes) in Segment::ALL.iter().zip(segments) {
        let path = tmp_dir.join(segment.file_name());
        let mut f = BufWriter::new(create_truncated(&path)?);
        f.write_all(bytes)?;
        f.flush()?;
        f.into_inner()?.sync_all()?;
    }
    sync_dir(tmp_dir);
    Ok(())
}

fn write_single_file(tmp_path: &Path, segments: &[Vec<u8>; 5]) -> Result<()> {
    let mut f = BufWriter::new(create_truncated(tmp_path)?);
    let mut offsets = [0u64; 5];
    let mut pos = 0u64;
    for (off, bytes) in offsets.iter_mut().zip(segments) {
        *off = pos;
        f.write_all(bytes)?;
        pos += bytes.len() as u64;
    }
    Footer { offsets }.write_to(&mut f)?;
    f.flush()?;
    f.into_inner()?.sync_all()?;
    Ok(())
}

fn create_truncated(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}

/// Best-effort fsync of a directory so a rename inside it is durable.
fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}
