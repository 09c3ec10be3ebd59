use crate::{seeded_hash, SketchError};

const MIN_PRECISION: u8 = 4;
const MAX_PRECISION: u8 = 16;

/// HyperLogLog distinct-count estimator with `2^precision` registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    /// # Panics
    ///
    /// Panics unless `4 <= precision <= 16`.
    pub fn new(precision: u8) -> Self {
        assert!(
            (MIN_PRECISION..=MAX_PRECISION).contains(&precision),
            "precision must be in 4..=16"
        );
        Self {
            precision,
            registers: vec![0; 1 << precision],
        }
    }

    #[must_use]
    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn add(&mut self, key: &[u8]) {
        let h = seeded_hash(0, key);
        let p = self.precision as u32;
        let idx = (h >> (64 - p)) as usize;
        let rest = h << p;
        let rank = (rest.leading_zeros() + 1).min(64 - p + 1) as u8;
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    /// Estimated number of distinct keys added.
    #[must_use]
    pub fn estimate(&self) -> f64 {
        let m = self.registers.len() as f64;
        let alpha = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };

        let sum: f64 = self.registers.iter().map(|&r| 2f64.powi(-(r as i32))).sum();
        let raw = alpha * m * m / sum;

        let zeros = self.registers.iter().filter(|&&r| r == 0).count();
        if raw <= 2.5 * m && zeros > 0 {
            // linear counting for the small range
            m * (m / zeros as f64).ln()
        } else {
            raw
        }
    }

    /// Merges another sketch of the same precision into this one.
    pub fn merge(&mut self, other: &HyperLogLog) -> Result<(), SketchError> {
        if other.precision != self.precision {
            return Err(SketchError::Invalid(format!(
                "cannot merge precision {} into {}",
                other.precision, self.precision
            )));
        }
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            *mine = (*mine).max(*theirs);
        }
        Ok(())
    }

    /// `[precision: u8][registers: 2^precision bytes]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.registers.len());
        buf.push(self.precision);
        buf.extend_from_slice(&self.registers);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SketchError> {
        let (&precision, registers) = bytes
            .split_first()
            .ok_or_else(|| SketchError::Invalid("empty hyperloglog encoding".into()))?;
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(SketchError::Invalid(format!(
                "hyperloglog precision {} out of range",
                precision
            )));
        }
        if registers.len() != 1 << precision {
            return Err(SketchError::Invalid(format!(
                "hyperloglog expects {} registers, found {}",
                1 << precision,
                registers.len()
            )));
        }
        Ok(Self {
            precision,
            registers: registers.to_vec(),
        })
    }
}
