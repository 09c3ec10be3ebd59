use std::collections::HashMap;

use crate::{seeded_hash, SketchError};

/// 64-bit SimHash fingerprint of a text.
///
/// Tokens are whitespace-separated, lowercased words weighted by their
/// frequency. Similar texts produce fingerprints with a small Hamming
/// distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimHash {
    fingerprint: u64,
}

impl SimHash {
    pub fn of_text(text: &str) -> Self {
        let mut weights: HashMap<String, i64> = HashMap::new();
        for token in text.split_whitespace() {
            *weights.entry(token.to_lowercase()).or_insert(0) += 1;
        }

        let mut v = [0i64; 64];
        for (token, weight) in &weights {
            let h = seeded_hash(0, token.as_bytes());
            for (bit, acc) in v.iter_mut().enumerate() {
                if (h >> bit) & 1 == 1 {
                    *acc += weight;
                } else {
                    *acc -= weight;
                }
            }
        }

        let fingerprint = v
            .iter()
            .enumerate()
            .filter(|&(_, &acc)| acc > 0)
            .fold(0u64, |fp, (bit, _)| fp | (1 << bit));
        Self { fingerprint }
    }

    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    #[must_use]
    pub fn distance(&self, other: &SimHash) -> u32 {
        hamming_distance(self.fingerprint, other.fingerprint)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.fingerprint.to_le_bytes().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SketchError> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| {
            SketchError::Invalid(format!("simhash expects 8 bytes, found {}", bytes.len()))
        })?;
        Ok(Self {
            fingerprint: u64::from_le_bytes(raw),
        })
    }
}

/// Number of differing bits between two fingerprints.
#[must_use]
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
