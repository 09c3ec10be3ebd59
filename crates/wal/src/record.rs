//! The record shared by the WAL and the SSTable data segment.
//!
//! ```text
//! [crc32: u32][timestamp: 16 B][tombstone: u8][key_len: u64][value_len: u64][key][value]
//! ```
//!
//! All integers are little-endian. The CRC covers every byte after itself.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::time::{SystemTime, UNIX_EPOCH};

/// Bytes before the key: crc(4) + timestamp(16) + tombstone(1) + key_len(8) + value_len(8).
pub const RECORD_HEADER_LEN: usize = 4 + 16 + 1 + 8 + 8;

/// Largest record (header included) accepted when decoding (64 MiB).
pub const MAX_RECORD_LEN: u64 = 64 * 1024 * 1024;

/// Fixed-width 16-byte write timestamp: nanoseconds since the Unix epoch.
///
/// Zero is reserved; no real record carries it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u128);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(1);
        Timestamp(nanos.max(1))
    }

    pub const fn from_nanos(nanos: u128) -> Self {
        Timestamp(nanos)
    }

    #[must_use]
    pub const fn as_nanos(self) -> u128 {
        self.0
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Timestamp(u128::from_le_bytes(bytes))
    }

    /// The smallest timestamp strictly after `self`.
    #[must_use]
    pub fn successor(self) -> Self {
        Timestamp(self.0.saturating_add(1))
    }
}

/// A single mutation.
///
/// `tombstone == true` marks a logical delete; the value is empty and the
/// record is kept until compaction can prove nothing older needs shadowing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub crc: u32,
    pub timestamp: Timestamp,
    pub tombstone: bool,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Fixed-size prefix of an encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub crc: u32,
    pub timestamp: Timestamp,
    pub tombstone: bool,
    pub key_len: u64,
    pub value_len: u64,
}

impl RecordHeader {
    /// Parses the first [`RECORD_HEADER_LEN`] bytes of `buf`.
    ///
    /// Returns `None` if `buf` is too short.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < RECORD_HEADER_LEN {
            return None;
        }
        let mut ts = [0u8; 16];
        ts.copy_from_slice(&buf[4..20]);
        Some(Self {
            crc: LittleEndian::read_u32(&buf[0..4]),
            timestamp: Timestamp::from_bytes(ts),
            tombstone: buf[20] != 0,
            key_len: LittleEndian::read_u64(&buf[21..29]),
            value_len: LittleEndian::read_u64(&buf[29..37]),
        })
    }

    /// Full encoded length of the record this header starts.
    #[must_use]
    pub fn record_len(&self) -> u64 {
        (RECORD_HEADER_LEN as u64)
            .saturating_add(self.key_len)
            .saturating_add(self.value_len)
    }
}

/// Outcome of decoding one record from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A valid record and the number of bytes it occupied.
    Record(Record, usize),
    /// A complete record whose CRC does not match; `len` bytes can be skipped.
    Corrupt { len: usize },
    /// The header claims a length no sane record has.
    Malformed,
    /// More bytes are needed.
    Incomplete,
}

impl Record {
    /// Builds a record and computes its CRC.
    pub fn new(timestamp: Timestamp, tombstone: bool, key: Vec<u8>, value: Vec<u8>) -> Self {
        let mut r = Self {
            crc: 0,
            timestamp,
            tombstone,
            key,
            value,
        };
        r.crc = r.compute_crc();
        r
    }

    pub fn put(timestamp: Timestamp, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self::new(timestamp, false, key, value)
    }

    pub fn tombstone(timestamp: Timestamp, key: Vec<u8>) -> Self {
        Self::new(timestamp, true, key, Vec::new())
    }

    /// CRC32 over `timestamp | tombstone | key_len | value_len | key | value`.
    #[must_use]
    pub fn compute_crc(&self) -> u32 {
        let mut hasher = Crc32::new();
        hasher.update(&self.timestamp.to_bytes());
        hasher.update(&[self.tombstone as u8]);
        hasher.update(&(self.key.len() as u64).to_le_bytes());
        hasher.update(&(self.value.len() as u64).to_le_bytes());
        hasher.update(&self.key);
        hasher.update(&self.value);
        hasher.finalize()
    }

    /// `true` if the stored CRC matches the contents.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.crc == self.compute_crc()
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.key.len() + self.value.len()
    }

    /// Appends the encoded record to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.encoded_len());
        // writes into a Vec cannot fail
        let _ = buf.write_u32::<LittleEndian>(self.crc);
        buf.extend_from_slice(&self.timestamp.to_bytes());
        buf.push(self.tombstone as u8);
        let _ = buf.write_u64::<LittleEndian>(self.key.len() as u64);
        let _ = buf.write_u64::<LittleEndian>(self.value.len() as u64);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes the record at the front of `buf`, verifying its CRC.
    pub fn decode(buf: &[u8]) -> Decoded {
        let header = match RecordHeader::parse(buf) {
            Some(h) => h,
            None => return Decoded::Incomplete,
        };
        let total = header.record_len();
        if total > MAX_RECORD_LEN {
            return Decoded::Malformed;
        }
        let total = total as usize;
        if buf.len() < total {
            return Decoded::Incomplete;
        }

        let key_end = RECORD_HEADER_LEN + header.key_len as usize;
        let record = Record {
            crc: header.crc,
            timestamp: header.timestamp,
            tombstone: header.tombstone,
            key: buf[RECORD_HEADER_LEN..key_end].to_vec(),
            value: buf[key_end..total].to_vec(),
        };
        if record.is_intact() {
            Decoded::Record(record, total)
        } else {
            Decoded::Corrupt { len: total }
        }
    }
}
