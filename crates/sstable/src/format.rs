//! On-disk layout of an SSTable.
//!
//! A table has five logical segments:
//!
//! ```text
//! Data      [record]*                                   (wal::Record encoding)
//! Index     [key_len: u64][key][data_offset: u64]*      one entry per record
//! Summary   [min_len: u64][min][max_len: u64][max][count: u64]
//!           [key_len: u64][key][index_offset: u64]*     every `summary_step`-th index entry
//! Filter    serialized BloomFilter
//! Metadata  [level: u8][chunk_size: u32][merkle tree]
//! ```
//!
//! The multi-file layout stores them as `Data.db`, `Index.db`, `Summary.db`,
//! `Filter.db` and `Metadata.db` inside a `sstable_{id:010}` directory. The
//! single-file layout concatenates them in that order into
//! `sstable_{id:010}.db` followed by a footer:
//!
//! ```text
//! [data_off: u64][index_off: u64][summary_off: u64][filter_off: u64][metadata_off: u64][magic: u32 = "SST5"]
//! ```
//!
//! All integers are little-endian.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use merkle::MerkleTree;
use std::io::{self, Cursor, Read, Write};

/// Magic number closing a single-file table (ASCII "SST5").
pub const SSTABLE_MAGIC: u32 = 0x5353_5435;

/// Single-file footer: five `u64` offsets + `u32` magic.
pub const FOOTER_BYTES: u64 = 5 * 8 + 4;

pub const TABLE_PREFIX: &str = "sstable_";
pub const SINGLE_FILE_EXT: &str = "db";
pub const TMP_SUFFIX: &str = ".tmp";

/// Largest key accepted from the index or summary (64 KiB).
pub const MAX_KEY_BYTES: u64 = 64 * 1024;

/// The five logical segments, in on-disk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Data,
    Index,
    Summary,
    Filter,
    Metadata,
}

impl Segment {
    pub const ALL: [Segment; 5] = [
        Segment::Data,
        Segment::Index,
        Segment::Summary,
        Segment::Filter,
        Segment::Metadata,
    ];

    /// File name in the multi-file layout.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Segment::Data => "Data.db",
            Segment::Index => "Index.db",
            Segment::Summary => "Summary.db",
            Segment::Filter => "Filter.db",
            Segment::Metadata => "Metadata.db",
        }
    }

    fn position(self) -> usize {
        self as usize
    }
}

/// Whether a table lives in a directory of five files or in one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    #[default]
    MultiFile,
    SingleFile,
}

/// Name of the table with `id` under `layout`, without the `.tmp` suffix.
#[must_use]
pub fn table_name(id: u64, layout: Layout) -> String {
    match layout {
        Layout::MultiFile => format!("{}{:010}", TABLE_PREFIX, id),
        Layout::SingleFile => format!("{}{:010}.{}", TABLE_PREFIX, id, SINGLE_FILE_EXT),
    }
}

/// Parses a directory entry name back into `(id, layout)`.
///
/// Temporary artifacts and unrelated names yield `None`.
#[must_use]
pub fn parse_table_name(name: &str) -> Option<(u64, Layout)> {
    if name.ends_with(TMP_SUFFIX) {
        return None;
    }
    let rest = name.strip_prefix(TABLE_PREFIX)?;
    let (digits, layout) = match rest.split_once('.') {
        Some((d, ext)) if ext == SINGLE_FILE_EXT => (d, Layout::SingleFile),
        Some(_) => return None,
        None => (rest, Layout::MultiFile),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|id| (id, layout))
}

/// Start offsets of the five segments in a single-file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub offsets: [u64; 5],
}

impl Footer {
    #[must_use]
    pub fn offset(&self, segment: Segment) -> u64 {
        self.offsets[segment.position()]
    }

    /// Segment byte range `[start, end)` given the footer's own position.
    #[must_use]
    pub fn range(&self, segment: Segment, footer_start: u64) -> (u64, u64) {
        let i = segment.position();
        let end = self.offsets.get(i + 1).copied().unwrap_or(footer_start);
        (self.offsets[i], end)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for off in self.offsets {
            w.write_u64::<LittleEndian>(off)?;
        }
        w.write_u32::<LittleEndian>(SSTABLE_MAGIC)
    }

    /// Parses the trailing [`FOOTER_BYTES`] of a file.
    pub fn parse(buf: &[u8]) -> io::Result<Self> {
        if buf.len() != FOOTER_BYTES as usize {
            return Err(invalid("footer has the wrong size"));
        }
        let magic = LittleEndian::read_u32(&buf[40..44]);
        if magic != SSTABLE_MAGIC {
            return Err(invalid(&format!("unknown SSTable magic: {:#x}", magic)));
        }
        let mut offsets = [0u64; 5];
        for (i, off) in offsets.iter_mut().enumerate() {
            *off = LittleEndian::read_u64(&buf[i * 8..i * 8 + 8]);
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(invalid("segment offsets are not ascending"));
        }
        Ok(Self { offsets })
    }
}

/// Appends one index entry.
pub fn write_index_entry(buf: &mut Vec<u8>, key: &[u8], data_offset: u64) {
    write_key(buf, key);
    // writes into a Vec cannot fail
    let _ = buf.write_u64::<LittleEndian>(data_offset);
}

/// Parses a run of index entries starting at `base` (the index offset of
/// `buf[0]`). Returns `(key, data_offset, index_offset)` triples.
pub fn parse_index_entries(buf: &[u8], base: u64) -> io::Result<Vec<(Vec<u8>, u64, u64)>> {
    let mut out = Vec::new();
    let mut r = Cursor::new(buf);
    while (r.position() as usize) < buf.len() {
        let at = base + r.position();
        let key = read_key(&mut r)?;
        let data_offset = r.read_u64::<LittleEndian>()?;
        out.push((key, data_offset, at));
    }
    Ok(out)
}

/// Sparse index over the Index segment plus the table's key range.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Summary {
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    /// `(key, index_offset)` for every `summary_step`-th index entry.
    pub entries: Vec<(Vec<u8>, u64)>,
}

impl Summary {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_key(&mut buf, &self.min_key);
        write_key(&mut buf, &self.max_key);
        let _ = buf.write_u64::<LittleEndian>(self.entries.len() as u64);
        for (key, offset) in &self.entries {
            write_index_entry(&mut buf, key, *offset);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        let mut r = Cursor::new(buf);
        let min_key = read_key(&mut r)?;
        let max_key = read_key(&mut r)?;
        let count = r.read_u64::<LittleEndian>()?;
        // each entry takes at least 16 bytes
        if count > buf.len() as u64 / 16 {
            return Err(invalid("summary entry count exceeds segment size"));
        }
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key = read_key(&mut r)?;
            let offset = r.read_u64::<LittleEndian>()?;
            entries.push((key, offset));
        }
        Ok(Self {
            min_key,
            max_key,
            entries,
        })
    }

    /// `true` if `key` falls inside `[min_key, max_key]`.
    #[must_use]
    pub fn covers(&self, key: &[u8]) -> bool {
        !self.entries.is_empty() && key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }

    /// Index of the last summary entry with key `<= key`.
    #[must_use]
    pub fn block_for(&self, key: &[u8]) -> Option<usize> {
        self.entries
            .partition_point(|(k, _)| k.as_slice() <= key)
            .checked_sub(1)
    }
}

/// Level tag and integrity tree of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub level: u8,
    pub chunk_size: u32,
    pub merkle: MerkleTree,
}

impl Metadata {
    pub fn encode(&self) -> Vec<u8> {
        let tree = self.merkle.serialize();
        let mut buf = Vec::with_capacity(5 + tree.len());
        buf.push(self.level);
        let _ = buf.write_u32::<LittleEndian>(self.chunk_size);
        buf.extend_from_slice(&tree);
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < 5 {
            return Err(invalid("metadata segment too short"));
        }
        let chunk_size = LittleEndian::read_u32(&buf[1..5]);
        if chunk_size == 0 {
            return Err(invalid("merkle chunk size is zero"));
        }
        let merkle =
            MerkleTree::deserialize(&buf[5..]).map_err(|e| invalid(&format!("merkle: {}", e)))?;
        Ok(Self {
            level: buf[0],
            chunk_size,
            merkle,
        })
    }
}

fn write_key(buf: &mut Vec<u8>, key: &[u8]) {
    let _ = buf.write_u64::<LittleEndian>(key.len() as u64);
    buf.extend_from_slice(key);
}

fn read_key<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = r.read_u64::<LittleEndian>()?;
    if len > MAX_KEY_BYTES {
        return Err(invalid(&format!(
            "key_len {} exceeds maximum {}",
            len, MAX_KEY_BYTES
        )));
    }
    let mut key = vec![0u8; len as usize];
    r.read_exact(&mut key)?;
    Ok(key)
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}
