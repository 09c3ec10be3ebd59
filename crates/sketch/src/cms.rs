use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;

use crate::{seeded_hash, splitmix64, SketchError};

/// Largest table accepted when decoding (16 Mi counters).
const MAX_CELLS: u64 = 16 * 1024 * 1024;

/// Count-Min sketch: `depth` rows of `width` counters, one seeded hash per row.
///
/// `estimate` returns the minimum counter across rows, which is never below
/// the true count and exceeds it by at most `epsilon * total` with
/// probability `1 - delta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountMinSketch {
    width: u32,
    depth: u32,
    seeds: Vec<u32>,
    table: Vec<u64>,
}

impl CountMinSketch {
    /// Sizes the sketch as `width = ceil(e / epsilon)`,
    /// `depth = ceil(ln(1 / delta))`.
    ///
    /// # Panics
    ///
    /// Panics if `epsilon` or `delta` is not in `(0, 1)`.
    pub fn with_seed(epsilon: f64, delta: f64, seed: u64) -> Self {
        assert!(epsilon > 0.0 && epsilon < 1.0, "epsilon must be in (0, 1)");
        assert!(delta > 0.0 && delta < 1.0, "delta must be in (0, 1)");

        let width = (std::f64::consts::E / epsilon).ceil().max(1.0) as u32;
        let depth = (1.0 / delta).ln().ceil().max(1.0) as u32;
        let mut state = seed;
        let seeds = (0..depth).map(|_| splitmix64(&mut state) as u32).collect();

        Self {
            width,
            depth,
            seeds,
            table: vec![0; width as usize * depth as usize],
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Adds `count` occurrences of `key`.
    pub fn add(&mut self, key: &[u8], count: u64) {
        for row in 0..self.depth as usize {
            let cell = self.cell(row, key);
            self.table[cell] = self.table[cell].saturating_add(count);
        }
    }

    /// Estimated number of occurrences of `key`.
    #[must_use]
    pub fn estimate(&self, key: &[u8]) -> u64 {
        (0..self.depth as usize)
            .map(|row| self.table[self.cell(row, key)])
            .min()
            .unwrap_or(0)
    }

    /// `[width: u32][depth: u32][seeds: depth x u32][counters: width*depth x u64]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.seeds.len() * 4 + self.table.len() * 8);
        buf.extend_from_slice(&self.width.to_le_bytes());
        buf.extend_from_slice(&self.depth.to_le_bytes());
        for &s in &self.seeds {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        for &c in &self.table {
            // writing into a Vec cannot fail
            let _ = buf.write_u64::<LittleEndian>(c);
        }
        buf
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, SketchError> {
        let r = &mut bytes;
        let width = r.read_u32::<LittleEndian>()?;
        let depth = r.read_u32::<LittleEndian>()?;
        let cells = width as u64 * depth as u64;
        if width == 0 || depth == 0 || cells > MAX_CELLS {
            return Err(SketchError::Invalid(format!(
                "count-min dimensions {}x{} out of range",
                width, depth
            )));
        }

        let mut seeds = Vec::with_capacity(depth as usize);
        for _ in 0..depth {
            seeds.push(r.read_u32::<LittleEndian>()?);
        }
        let mut table = vec![0u64; cells as usize];
        r.read_u64_into::<LittleEndian>(&mut table)?;

        let mut rest = Vec::new();
        r.read_to_end(&mut rest)?;
        if !rest.is_empty() {
            return Err(SketchError::Invalid(format!(
                "{} trailing bytes after count-min sketch",
                rest.len()
            )));
        }

        Ok(Self {
            width,
            depth,
            seeds,
            table,
        })
    }

    fn cell(&self, row: usize, key: &[u8]) -> usize {
        let col = seeded_hash(self.seeds[row], key) % self.width as u64;
        row * self.width as usize + col as usize
    }
}
