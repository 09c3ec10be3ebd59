//! # Bloom Filter
//!
//! A space-efficient probabilistic data structure for set membership testing.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the set
//! (no false negatives), but may occasionally report that a key **is** in the
//! set when it isn't (false positives). The false positive rate depends on the
//! number of bits and hash functions used.
//!
//! ## Usage in StrataKV
//!
//! Every SSTable stores a bloom filter over its keys in `Filter.db`. A point
//! lookup consults the filter first; a negative answer rejects the table
//! without touching the summary, index, or data segments.
//!
//! ## Hash family
//!
//! Each of the `k` hash functions is blake3 keyed by its own 32-bit seed:
//! `h_i(key) = u64(blake3(seed_i || key)[..8]) mod m`. Seeds are derived
//! from one base seed passed to [`BloomFilter::with_seed`], which keeps tests
//! reproducible. [`BloomFilter::new`] derives the base seed from the clock.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::with_seed(1000, 0.01, 42);
//! bf.insert(b"hello");
//! assert!(bf.may_contain(b"hello"));
//! ```
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// Upper bound on `m` accepted when deserializing (128 Mi bits).
const MAX_BLOOM_BITS: u32 = 128 * 1024 * 1024;

/// Upper bound on `k` accepted when deserializing.
const MAX_HASHES: u32 = 64;

/// Bytes per serialized seed.
pub const SEED_LEN: usize = 4;

/// A bloom filter backed by a bit vector and `k` seeded hash functions.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    /// Packed bit vector (bit `i` lives in `bits[i / 8]`).
    bits: Vec<u8>,
    /// Number of bits in the filter (m).
    num_bits: u32,
    /// One seed per hash function (k = seeds.len()).
    seeds: Vec<u32>,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at `false_positive_rate`,
    /// seeding its hash family from the wall clock.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        Self::with_seed(expected_items, false_positive_rate, clock_seed())
    }

    /// Creates a filter whose hash seeds are derived from `seed`.
    ///
    /// Sizing follows the optimal bloom filter formulas:
    /// `m = ceil(n * |ln p| / ln(2)^2)` and `k = ceil((m / n) * ln 2)`.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in `(0, 1)`.
    pub fn with_seed(expected_items: usize, false_positive_rate: f64, seed: u64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        let n = expected_items as f64;
        let m = (n * false_positive_rate.ln().abs() / std::f64::consts::LN_2.powi(2)).ceil();
        let m = (m as u64).clamp(8, MAX_BLOOM_BITS as u64) as u32;

        let k = ((m as f64 / n) * std::f64::consts::LN_2).ceil() as u32;
        let k = k.clamp(1, MAX_HASHES);

        let mut state = seed;
        let seeds = (0..k).map(|_| splitmix64(&mut state) as u32).collect();

        Self {
            bits: vec![0u8; (m as usize).div_ceil(8)],
            num_bits: m,
            seeds,
        }
    }

    /// Sets the `k` bit positions of `key`.
    pub fn insert(&mut self, key: &[u8]) {
        for i in 0..self.seeds.len() {
            let idx = self.bit_index(i, key);
            self.bits[idx / 8] |= 1 << (idx % 8);
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        (0..self.seeds.len()).all(|i| {
            let idx = self.bit_index(i, key);
            (self.bits[idx / 8] >> (idx % 8)) & 1 == 1
        })
    }

    /// Returns the number of bits in the filter (m).
    #[must_use]
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Returns the number of hash functions (k).
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.seeds.len() as u32
    }

    /// Returns the size of the serialized filter in bytes.
    ///
    /// Layout: `m(u32) + m bytes + k(u32) + k * SEED_LEN`.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        4 + self.num_bits as usize + 4 + self.seeds.len() * SEED_LEN
    }

    /// Serializes the filter.
    ///
    /// Wire format (all little-endian):
    /// ```text
    /// [m: u32][bit array: m bytes, each 0 or 1][k: u32][seeds: k x u32]
    /// ```
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.num_bits)?;
        let expanded: Vec<u8> = (0..self.num_bits as usize)
            .map(|i| (self.bits[i / 8] >> (i % 8)) & 1)
            .collect();
        w.write_all(&expanded)?;
        w.write_u32::<LittleEndian>(self.seeds.len() as u32)?;
        for &seed in &self.seeds {
            w.write_u32::<LittleEndian>(seed)?;
        }
        Ok(())
    }

    /// Deserializes a filter written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let num_bits = r.read_u32::<LittleEndian>()?;
        if num_bits == 0 || num_bits > MAX_BLOOM_BITS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bloom filter bit count out of range: {}", num_bits),
            ));
        }

        let mut expanded = vec![0u8; num_bits as usize];
        r.read_exact(&mut expanded)?;
        let mut bits = vec![0u8; (num_bits as usize).div_ceil(8)];
        for (i, &b) in expanded.iter().enumerate() {
            match b {
                0 => {}
                1 => bits[i / 8] |= 1 << (i % 8),
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("bloom filter bit {} has invalid value {}", i, other),
                    ))
                }
            }
        }

        let k = r.read_u32::<LittleEndian>()?;
        if k == 0 || k > MAX_HASHES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bloom filter hash count out of range: {}", k),
            ));
        }
        let mut seeds = Vec::with_capacity(k as usize);
        for _ in 0..k {
            seeds.push(r.read_u32::<LittleEndian>()?);
        }

        Ok(Self {
            bits,
            num_bits,
            seeds,
        })
    }

    /// Serializes into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        // writing into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        buf
    }

    /// Deserializes from a byte slice.
    pub fn from_bytes(mut bytes: &[u8]) -> io::Result<Self> {
        Self::read_from(&mut bytes)
    }

    fn bit_index(&self, i: usize, key: &[u8]) -> usize {
        (seeded_hash(self.seeds[i], key) % self.num_bits as u64) as usize
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.seeds.len())
            .finish()
    }
}

/// Seed derived from the current time, for callers that do not need
/// reproducible hashing.
pub fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9e37_79b9_7f4a_7c15)
}

/// First 8 bytes of `blake3(seed || key)` as a little-endian `u64`.
///
/// The hash family shared by the bloom filter and the sketches.
pub fn seeded_hash(seed: u32, key: &[u8]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(key);
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// SplitMix64 step, used to spread one base seed into many.
pub fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests;
