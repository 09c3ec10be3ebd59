//! # WAL - Write-Ahead Log
//!
//! Provides crash-safe durability for the StrataKV storage engine.
//!
//! Every mutation (put or delete) is serialized into a [`Record`] and
//! appended to the WAL **before** the corresponding memtable update. On
//! restart the WAL is replayed to reconstruct the memtables, so no
//! acknowledged write is lost.
//!
//! ## Segments and blocks
//!
//! The log is a numbered sequence of segment files `wal_00001.log`,
//! `wal_00002.log`, ... Each segment is an array of fixed-size blocks written
//! through the shared [`BlockManager`]:
//!
//! ```text
//! block 0                         block 1                    block 2
//! ┌──────────────────────────────┬──────────────────────────┬───────────────┐
//! │"WAL" seg:u32 │ rec 1 │ rec 2…│…rec 2 (cont.) │ rec 3 │… │ rec 4 │ 0 0 0 │
//! └──────────────────────────────┴──────────────────────────┴───────────────┘
//! ```
//!
//! Records are packed back to back and may span block boundaries. The block
//! being filled is rewritten on every append (zero-padded), so the tail of
//! the last block of a segment may hold zero bytes. A segment rotates once it
//! holds `max_records_per_segment` records or `blocks_per_segment` blocks.
//!
//! An append that fails part way is rolled back: the tail block is rewritten
//! without it and the next append opens a new segment. Replay skips over
//! damaged bytes by searching forward for the next record with a valid CRC.
//!
//! ## Record indices and watermarks
//!
//! Each record gets a global index `(segment << 32) | n`, where `n` is its
//! position in the segment. The index does not depend on the rotation
//! settings, so a log written with one `max_records_per_segment` replays
//! correctly under another. Memtables remember the highest index they absorbed (their watermark);
//! once a memtable is flushed to an SSTable, every closed segment up to the
//! watermark's segment is deleted through
//! [`Wal::mark_segments_persisted`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use block::BlockManager;
//! use wal::{Wal, WalOptions};
//!
//! let blocks = Arc::new(BlockManager::new(4096, 64));
//! let mut w = Wal::open("data/wal", blocks, WalOptions::default()).unwrap();
//! let ts = w.append_record(false, b"hello", b"world").unwrap();
//! for entry in w.read_records().unwrap() {
//!     println!("{} {:?}", entry.index, entry.record.key);
//! }
//! # let _ = ts;
//! ```

mod record;

pub use record::{Decoded, Record, RecordHeader, Timestamp, MAX_RECORD_LEN, RECORD_HEADER_LEN};

use block::{BlockError, BlockManager};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Literal tag at the start of every segment.
pub const SEGMENT_TAG: &[u8; 3] = b"WAL";

/// Segment header: tag + `u32` segment number.
pub const SEGMENT_HEADER_LEN: usize = 3 + 4;

const SEGMENT_PREFIX: &str = "wal_";
const SEGMENT_SUFFIX: &str = ".log";

/// Bits of a WAL index holding the position within a segment.
const INDEX_SHIFT: u32 = 32;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A block-level read or write failed.
    #[error("block error: {0}")]
    Block(#[from] BlockError),

    /// A record exceeds [`MAX_RECORD_LEN`].
    #[error("record too large: {0} bytes")]
    RecordTooLarge(u64),

    /// The caller asked to delete the segment still being written.
    #[error("segment {0} is active and cannot be marked persisted")]
    ActiveSegment(u32),

    /// The WAL was configured in a way it cannot operate with.
    #[error("invalid wal configuration: {0}")]
    Config(String),
}

/// Segment rotation and durability settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalOptions {
    pub max_records_per_segment: u64,
    pub blocks_per_segment: u64,
    /// `fsync` after every append.
    pub sync: bool,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            max_records_per_segment: 1024,
            blocks_per_segment: 256,
            sync: false,
        }
    }
}

/// A replayed record and its global WAL index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub index: u64,
    pub record: Record,
}

/// Segmented, block-aligned write-ahead log.
pub struct Wal {
    dir: PathBuf,
    blocks: Arc<BlockManager>,
    opts: WalOptions,
    /// Number of the segment being appended to.
    segment: u32,
    /// Index of the block currently being filled.
    block_index: u64,
    /// Contents of the block being filled (never longer than a block).
    buffer: Vec<u8>,
    records_in_segment: u64,
    last_timestamp: Timestamp,
    last_index: Option<u64>,
    /// Set when an append failed; the next append opens a new segment.
    abandoned: bool,
}

impl Wal {
    /// Opens the log in `dir`, creating the directory if needed.
    ///
    /// Existing segments are left untouched for replay; appends go to a
    /// fresh segment numbered after the highest one present.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        blocks: Arc<BlockManager>,
        opts: WalOptions,
    ) -> Result<Self, WalError> {
        if opts.max_records_per_segment == 0 || opts.blocks_per_segment == 0 {
            return Err(WalError::Config(
                "records and blocks per segment must be > 0".into(),
            ));
        }
        if opts.max_records_per_segment > u32::MAX as u64 {
            return Err(WalError::Config(format!(
                "at most {} records per segment",
                u32::MAX
            )));
        }
        if blocks.block_size() <= SEGMENT_HEADER_LEN {
            return Err(WalError::Config(format!(
                "block size {} cannot hold the {}-byte segment header",
                blocks.block_size(),
                SEGMENT_HEADER_LEN
            )));
        }

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let next = list_segments(&dir)?.last().map_or(1, |(n, _)| n + 1);

        let mut wal = Self {
            dir,
            blocks,
            opts,
            segment: next,
            block_index: 0,
            buffer: Vec::new(),
            records_in_segment: 0,
            last_timestamp: Timestamp::ZERO,
            last_index: None,
            abandoned: false,
        };
        wal.start_segment(next)?;
        Ok(wal)
    }

    /// Appends a mutation and returns the timestamp assigned to it.
    ///
    /// Timestamps are strictly increasing for the lifetime of the log,
    /// including across restarts once [`read_records`](Self::read_records)
    /// has replayed the existing segments.
    pub fn append_record(
        &mut self,
        tombstone: bool,
        key: &[u8],
        value: &[u8],
    ) -> Result<Timestamp, WalError> {
        if self.abandoned
            || self.records_in_segment >= self.opts.max_records_per_segment
            || self.block_index >= self.opts.blocks_per_segment
        {
            self.start_segment(self.segment + 1)?;
        }

        let timestamp = Timestamp::now().max(self.last_timestamp.successor());
        let record = Record::new(timestamp, tombstone, key.to_vec(), value.to_vec());
        if record.encoded_len() as u64 > MAX_RECORD_LEN {
            return Err(WalError::RecordTooLarge(record.encoded_len() as u64));
        }
        let (saved, block_index) = (self.buffer.clone(), self.block_index);
        if let Err(e) = self.write_bytes(&record.encode()) {
            self.abandon_append(saved, block_index);
            return Err(e);
        }

        self.last_timestamp = timestamp;
        self.last_index = Some(Self::index_of(self.segment, self.records_in_segment));
        self.records_in_segment += 1;
        Ok(timestamp)
    }

    /// Closes the active segment and starts a new one. A segment with no
    /// records is kept as the active one.
    pub fn rotate(&mut self) -> Result<(), WalError> {
        if self.records_in_segment == 0 {
            return Ok(());
        }
        self.start_segment(self.segment + 1)
    }

    /// Replays every segment in order, returning the intact records.
    ///
    /// Records spanning blocks are reassembled from the carried-over bytes.
    /// Records with a CRC mismatch, and a truncated record at the end of a
    /// segment, are dropped with a warning. The clock is advanced past the
    /// newest replayed timestamp.
    pub fn read_records(&mut self) -> Result<Vec<WalEntry>, WalError> {
        let mut entries = Vec::new();
        for (number, path) in list_segments(&self.dir)? {
            self.read_segment(number, &path, &mut entries)?;
        }
        if let Some(max) = entries.iter().map(|e| e.record.timestamp).max() {
            self.last_timestamp = self.last_timestamp.max(max);
        }
        Ok(entries)
    }

    /// Deletes one closed segment file. This is the only way WAL files are
    /// removed.
    pub fn mark_segment_as_persisted(&mut self, path: &Path) -> Result<(), WalError> {
        if path == self.segment_path(self.segment) {
            return Err(WalError::ActiveSegment(self.segment));
        }
        self.blocks.invalidate(path);
        match fs::remove_file(path) {
            Ok(()) => {
                info!(segment = %path.display(), "wal segment persisted, removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every closed segment whose records are all at or below
    /// `watermark`. Returns the number of segments removed.
    pub fn mark_segments_persisted(&mut self, watermark: u64) -> Result<usize, WalError> {
        let limit = Self::segment_of(watermark);
        let mut removed = 0;
        for (number, path) in list_segments(&self.dir)? {
            if number <= limit && number != self.segment {
                self.mark_segment_as_persisted(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Segment number holding the record with global index `index`.
    #[must_use]
    pub fn segment_of(index: u64) -> u32 {
        (index >> INDEX_SHIFT) as u32
    }

    /// Index of the most recently appended record.
    #[must_use]
    pub fn last_index(&self) -> Option<u64> {
        self.last_index
    }

    #[must_use]
    pub fn last_timestamp(&self) -> Timestamp {
        self.last_timestamp
    }

    #[must_use]
    pub fn active_segment(&self) -> u32 {
        self.segment
    }

    /// Paths of all segment files currently on disk, oldest first.
    pub fn segment_paths(&self) -> Result<Vec<PathBuf>, WalError> {
        Ok(list_segments(&self.dir)?.into_iter().map(|(_, p)| p).collect())
    }

    fn index_of(segment: u32, n: u64) -> u64 {
        ((segment as u64) << INDEX_SHIFT) | n
    }

    fn segment_path(&self, number: u32) -> PathBuf {
        self.dir
            .join(format!("{}{:05}{}", SEGMENT_PREFIX, number, SEGMENT_SUFFIX))
    }

    fn start_segment(&mut self, number: u32) -> Result<(), WalError> {
        self.segment = number;
        self.block_index = 0;
        self.records_in_segment = 0;
        self.buffer.clear();
        self.buffer.extend_from_slice(SEGMENT_TAG);
        self.buffer.extend_from_slice(&number.to_le_bytes());
        self.write_current_block()?;
        self.abandoned = false;
        debug!(segment = number, "wal segment started");
        Ok(())
    }

    /// Undoes a failed append: restores the tail block as it was before the
    /// record and retires the segment, so a record whose append returned an
    /// error is never replayed.
    fn abandon_append(&mut self, buffer: Vec<u8>, block_index: u64) {
        self.buffer = buffer;
        self.block_index = block_index;
        if let Err(e) = self.write_current_block() {
            warn!(segment = self.segment, error = %e, "could not restore wal tail block after failed append");
        }
        self.abandoned = true;
    }

    /// Packs `bytes` into blocks, writing each block as it fills and the
    /// partially filled tail block last.
    fn write_bytes(&mut self, mut bytes: &[u8]) -> Result<(), WalError> {
        let block_size = self.blocks.block_size();
        let path = self.segment_path(self.segment);
        while !bytes.is_empty() {
            let take = (block_size - self.buffer.len()).min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.buffer.len() == block_size {
                self.blocks.write_block(&path, self.block_index, &self.buffer)?;
                self.block_index += 1;
                self.buffer.clear();
            }
        }
        if !self.buffer.is_empty() {
            self.write_current_block()?;
        }
        if self.opts.sync {
            self.blocks.sync(&path)?;
        }
        Ok(())
    }

    fn write_current_block(&mut self) -> Result<(), WalError> {
        let mut block = self.buffer.clone();
        block.resize(self.blocks.block_size(), 0);
        let path = self.segment_path(self.segment);
        self.blocks.write_block(&path, self.block_index, &block)?;
        Ok(())
    }

    fn read_segment(
        &self,
        number: u32,
        path: &Path,
        out: &mut Vec<WalEntry>,
    ) -> Result<(), WalError> {
        let block_count = self.blocks.block_count(path)?;
        if block_count == 0 {
            return Ok(());
        }

        let mut raw = Vec::with_capacity(block_count as usize * self.blocks.block_size());
        for index in 0..block_count {
            raw.extend_from_slice(&self.blocks.read_block(path, index)?);
        }
        if &raw[..3] != SEGMENT_TAG || raw[3..SEGMENT_HEADER_LEN] != number.to_le_bytes() {
            warn!(segment = %path.display(), "bad wal segment header, skipping segment");
            return Ok(());
        }
        let data = &raw[SEGMENT_HEADER_LEN..];

        let mut pos = 0;
        let mut n = 0u64;
        let mut dropped = 0usize;
        while pos < data.len() && !is_padding(&data[pos..]) {
            match Record::decode(&data[pos..]) {
                Decoded::Record(record, len) => {
                    out.push(WalEntry {
                        index: Self::index_of(number, n),
                        record,
                    });
                    n += 1;
                    pos += len;
                }
                Decoded::Corrupt { len } if is_record_boundary(&data[pos + len..]) => {
                    warn!(segment = %path.display(), record = n, "wal record failed crc, dropping");
                    dropped += 1;
                    n += 1;
                    pos += len;
                }
                _ => {
                    dropped += 1;
                    match next_intact_record(data, pos + 1) {
                        Some(next) => {
                            warn!(segment = %path.display(), record = n, skipped = next - pos, "unreadable wal record, resuming at next intact record");
                            n += 1;
                            pos = next;
                        }
                        None => {
                            warn!(segment = %path.display(), record = n, "unreadable wal data at end of segment, dropping");
                            break;
                        }
                    }
                }
            }
        }
        debug!(segment = number, records = n, dropped, "wal segment replayed");
        Ok(())
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.dir)
            .field("segment", &self.segment)
            .field("block_index", &self.block_index)
            .field("records_in_segment", &self.records_in_segment)
            .field("opts", &self.opts)
            .finish()
    }
}

/// `true` once `rest` holds only the zero padding that follows the last
/// record of a segment.
fn is_padding(rest: &[u8]) -> bool {
    match RecordHeader::parse(rest) {
        Some(header) => header.timestamp == Timestamp::ZERO,
        None => rest.iter().all(|&b| b == 0),
    }
}

/// `true` if a record, the padding or the end of the segment starts at `rest`.
fn is_record_boundary(rest: &[u8]) -> bool {
    rest.is_empty() || is_padding(rest) || matches!(Record::decode(rest), Decoded::Record(..))
}

/// Offset of the first record at or after `from` whose CRC checks out.
fn next_intact_record(data: &[u8], from: usize) -> Option<usize> {
    (from..data.len()).find(|&p| matches!(Record::decode(&data[p..]), Decoded::Record(..)))
}

/// Lists `(number, path)` of every segment in `dir`, sorted by number.
fn list_segments(dir: &Path) -> Result<Vec<(u32, PathBuf)>, WalError> {
    let mut segments: Vec<(u32, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?;
            let number = name
                .strip_prefix(SEGMENT_PREFIX)?
                .strip_suffix(SEGMENT_SUFFIX)?
                .parse()
                .ok()?;
            Some((number, p))
        })
        .collect();
    segments.sort_by_key(|(n, _)| *n);
    Ok(segments)
}
