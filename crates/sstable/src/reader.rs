use anyhow::{bail, Context, Result};
use block::BlockManager;
use bloom::BloomFilter;
use merkle::MerkleTree;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wal::{Decoded, Record, RecordHeader, RECORD_HEADER_LEN};

use crate::cursor::SSTableCursor;
use crate::error::SSTableError;
use crate::format::{
    parse_index_entries, parse_table_name, Footer, Layout, Metadata, Segment, Summary,
    FOOTER_BYTES,
};

/// Where one logical segment lives: a file and a byte range inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SegmentLoc {
    path: PathBuf,
    start: u64,
    len: u64,
}

/// Result of recomputing a table's Merkle tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    /// Indices of Data chunks whose hash no longer matches.
    pub corrupted_chunks: Vec<usize>,
}

impl Validation {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.corrupted_chunks.is_empty()
    }
}

/// An open, immutable table.
///
/// The Summary, Filter and Metadata segments are loaded on open. Index and
/// Data are read on demand through the shared [`BlockManager`], so hot
/// blocks stay cached across lookups.
pub struct SSTable {
    id: u64,
    path: PathBuf,
    layout: Layout,
    segments: [SegmentLoc; 5],
    blocks: Arc<BlockManager>,
    bloom: BloomFilter,
    summary: Summary,
    metadata: Metadata,
}

impl SSTable {
    /// Opens the table at `path` (a `sstable_*` directory or `.db` file).
    pub fn open<P: AsRef<Path>>(path: P, blocks: Arc<BlockManager>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("sstable path has no file name")?;
        let (id, layout) = match parse_table_name(name) {
            Some(parsed) => parsed,
            None => bail!("not an sstable name: {}", path.display()),
        };

        let segments = match layout {
            Layout::MultiFile => multi_file_segments(&path)?,
            Layout::SingleFile => single_file_segments(&path)?,
        };

        let read = |segment: Segment| -> Result<Vec<u8>> {
            let loc = &segments[segment as usize];
            Ok(blocks.read_at(&loc.path, loc.start, loc.len as usize)?)
        };
        let bad = |e: std::io::Error| SSTableError::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        };
        let bloom = BloomFilter::from_bytes(&read(Segment::Filter)?).map_err(&bad)?;
        let summary = Summary::decode(&read(Segment::Summary)?).map_err(&bad)?;
        let metadata = Metadata::decode(&read(Segment::Metadata)?).map_err(&bad)?;
        if summary.entries.is_empty() {
            bail!(SSTableError::Malformed {
                path,
                reason: "summary has no entries".into(),
            });
        }

        Ok(Self {
            id,
            path,
            layout,
            segments,
            blocks,
            bloom,
            summary,
            metadata,
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn level(&self) -> u8 {
        self.metadata.level
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub fn min_key(&self) -> &[u8] {
        &self.summary.min_key
    }

    #[must_use]
    pub fn max_key(&self) -> &[u8] {
        &self.summary.max_key
    }

    /// Size of the Data segment in bytes.
    #[must_use]
    pub fn data_len(&self) -> u64 {
        self.segments[0].len
    }

    /// Bloom filter only: `false` means the key is definitely absent.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bloom.may_contain(key)
    }

    /// Point lookup. Tombstones are returned as records.
    ///
    /// Bloom filter, then key range, then the summary block, then the index
    /// entries it covers, then the CRC-checked data record.
    pub fn search(&self, key: &[u8]) -> Result<Option<Record>> {
        if !self.bloom.may_contain(key) || !self.summary.covers(key) {
            return Ok(None);
        }
        let block = match self.summary.block_for(key) {
            Some(b) => b,
            None => return Ok(None),
        };

        let (from, to) = self.summary_block_range(block, 1);
        let entries = self.index_entries(from, to)?;
        let data_offset = match entries.iter().find(|(k, _, _)| k.as_slice() == key) {
            Some((_, off, _)) => *off,
            None => return Ok(None),
        };

        let (record, _) = self.read_record_at(data_offset)?;
        if record.key != key {
            return Err(self
                .malformed(format!("index points at the wrong key at offset {}", data_offset))
                .into());
        }
        Ok(Some(record))
    }

    /// Data offset of the first record whose key is `>= min`, or
    /// [`data_len`](Self::data_len) if there is none.
    pub fn lower_bound(&self, min: &[u8]) -> Result<u64> {
        if min <= self.summary.min_key.as_slice() {
            return Ok(0);
        }
        if min > self.summary.max_key.as_slice() {
            return Ok(self.data_len());
        }
        let block = self.summary.block_for(min).unwrap_or(0);
        // the next block's first key is > min, so two blocks always suffice
        let (from, to) = self.summary_block_range(block, 2);
        let found = self
            .index_entries(from, to)?
            .into_iter()
            .find(|(k, _, _)| k.as_slice() >= min)
            .map(|(_, off, _)| off);
        Ok(found.unwrap_or_else(|| self.data_len()))
    }

    /// Reads and CRC-checks the record at `offset` in the Data segment.
    /// Returns the record and its encoded length.
    pub fn read_record_at(&self, offset: u64) -> Result<(Record, u64)> {
        let data_len = self.data_len();
        if offset + RECORD_HEADER_LEN as u64 > data_len {
            return Err(self
                .malformed(format!("record header at {} runs past the data segment", offset))
                .into());
        }
        let head = self.read_range(Segment::Data, offset, RECORD_HEADER_LEN)?;
        let total = RecordHeader::parse(&head)
            .map(|h| h.record_len())
            .unwrap_or(u64::MAX);
        if offset.saturating_add(total) > data_len {
            return Err(self
                .malformed(format!("record at {} runs past the data segment", offset))
                .into());
        }

        let buf = self.read_range(Segment::Data, offset, total as usize)?;
        match Record::decode(&buf) {
            Decoded::Record(record, len) => Ok((record, len as u64)),
            Decoded::Corrupt { .. } => Err(SSTableError::ChecksumMismatch {
                path: self.path.clone(),
                offset,
            }
            .into()),
            Decoded::Malformed | Decoded::Incomplete => Err(self
                .malformed(format!("undecodable record at {}", offset))
                .into()),
        }
    }

    /// Every record in key order. Used by compaction.
    pub fn records(&self) -> Result<Vec<Record>> {
        let data = self.read_segment(Segment::Data)?;
        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            match Record::decode(&data[pos..]) {
                Decoded::Record(record, len) => {
                    records.push(record);
                    pos += len;
                }
                Decoded::Corrupt { .. } => {
                    return Err(SSTableError::ChecksumMismatch {
                        path: self.path.clone(),
                        offset: pos as u64,
                    }
                    .into())
                }
                Decoded::Malformed | Decoded::Incomplete => {
                    return Err(self.malformed(format!("undecodable record at {}", pos)).into())
                }
            }
        }
        Ok(records)
    }

    /// A cursor positioned on the first record.
    pub fn cursor(&self) -> Result<SSTableCursor<'_>> {
        SSTableCursor::new(self, None)
    }

    /// A cursor over `[min, max]`, both bounds inclusive.
    pub fn range(&self, min: &[u8], max: &[u8]) -> Result<SSTableCursor<'_>> {
        let mut c = SSTableCursor::new(self, Some(max.to_vec()))?;
        memtable::Cursor::seek(&mut c, min)?;
        Ok(c)
    }

    /// Recomputes the Merkle tree from the Data bytes on disk and compares it
    /// with the stored one. The block cache is bypassed so stale cached
    /// blocks cannot hide corruption.
    pub fn validate_merkle(&self) -> Result<Validation> {
        let loc = &self.segments[0];
        let mut f = File::open(&loc.path)?;
        f.seek(SeekFrom::Start(loc.start))?;
        let mut data = vec![0u8; loc.len as usize];
        f.read_exact(&mut data)?;

        let fresh = MerkleTree::build(&data, self.metadata.chunk_size as usize);
        Ok(Validation {
            corrupted_chunks: MerkleTree::compare(&self.metadata.merkle, &fresh),
        })
    }

    /// Like [`validate_merkle`](Self::validate_merkle) but fails with
    /// [`SSTableError::MerkleMismatch`] on any divergence.
    pub fn verify(&self) -> Result<()> {
        let v = self.validate_merkle()?;
        if !v.is_ok() {
            return Err(SSTableError::MerkleMismatch {
                path: self.path.clone(),
                leaves: v.corrupted_chunks,
            }
            .into());
        }
        Ok(())
    }

    /// Drops cached blocks and removes the table from disk.
    pub fn delete_files(&self) -> Result<()> {
        for loc in &self.segments {
            self.blocks.invalidate(&loc.path);
        }
        let removed = match self.layout {
            Layout::MultiFile => fs::remove_dir_all(&self.path),
            Layout::SingleFile => fs::remove_file(&self.path),
        };
        match removed {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }

    /// Index byte range covered by `count` summary blocks starting at `block`.
    fn summary_block_range(&self, block: usize, count: usize) -> (u64, u64) {
        let from = self.summary.entries[block].1;
        let to = self
            .summary
            .entries
            .get(block + count)
            .map_or(self.segments[1].len, |(_, off)| *off);
        (from, to)
    }

    fn index_entries(&self, from: u64, to: u64) -> Result<Vec<(Vec<u8>, u64, u64)>> {
        if from > to || to > self.segments[1].len {
            return Err(self.malformed("summary points outside the index").into());
        }
        let buf = self.read_range(Segment::Index, from, (to - from) as usize)?;
        parse_index_entries(&buf, from).map_err(|e| anyhow::Error::from(self.malformed(e)))
    }

    fn read_segment(&self, segment: Segment) -> Result<Vec<u8>> {
        let len = self.segments[segment as usize].len as usize;
        self.read_range(segment, 0, len)
    }

    fn read_range(&self, segment: Segment, offset: u64, len: usize) -> Result<Vec<u8>> {
        let loc = &self.segments[segment as usize];
        Ok(self.blocks.read_at(&loc.path, loc.start + offset, len)?)
    }

    fn malformed(&self, reason: impl ToString) -> SSTableError {
        SSTableError::Malformed {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("id", &self.id)
            .field("level", &self.metadata.level)
            .field("path", &self.path)
            .field("layout", &self.layout)
            .field("min_key", &String::from_utf8_lossy(&self.summary.min_key))
            .field("max_key", &String::from_utf8_lossy(&self.summary.max_key))
            .finish()
    }
}

fn multi_file_segments(dir: &Path) -> Result<[SegmentLoc; 5]> {
    let loc = |segment: Segment| -> Result<SegmentLoc> {
        let path = dir.join(segment.file_name());
        let len = fs::metadata(&path)
            .with_context(|| format!("missing segment {}", path.display()))?
            .len();
        Ok(SegmentLoc {
            path,
            start: 0,
            len,
        })
    };
    Ok([
        loc(Segment::Data)?,
        loc(Segment::Index)?,
        loc(Segment::Summary)?,
        loc(Segment::Filter)?,
        loc(Segment::Metadata)?,
    ])
}

fn single_file_segments(path: &Path) -> Result<[SegmentLoc; 5]> {
    let mut f = File::open(path)?;
    let size = f.metadata()?.len();
    if size < FOOTER_BYTES {
        bail!(SSTableError::Malformed {
            path: path.to_path_buf(),
            reason: "file too small for footer".into(),
        });
    }
    let footer_start = size - FOOTER_BYTES;
    f.seek(SeekFrom::Start(footer_start))?;
    let mut buf = vec![0u8; FOOTER_BYTES as usize];
    f.read_exact(&mut buf)?;
    let footer = Footer::parse(&buf).map_err(|e| SSTableError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if footer.offset(Segment::Metadata) > footer_start {
        bail!(SSTableError::Malformed {
            path: path.to_path_buf(),
            reason: "segment offsets run past the footer".into(),
        });
    }

    let loc = |segment: Segment| {
        let (start, end) = footer.range(segment, footer_start);
        SegmentLoc {
            path: path.to_path_buf(),
            start,
            len: end - start,
        }
    };
    Ok([
        loc(Segment::Data),
        loc(Segment::Index),
        loc(Segment::Summary),
        loc(Segment::Filter),
        loc(Segment::Metadata),
    ])
}
