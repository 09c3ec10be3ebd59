//! # Sketch - probabilistic summaries
//!
//! Companion structures to the SSTable bloom filter that the engine can
//! persist under reserved internal keys:
//!
//! | Structure          | Answers                                   |
//! |--------------------|-------------------------------------------|
//! | [`CountMinSketch`] | approximate frequency of a key (never under-counts) |
//! | [`HyperLogLog`]    | approximate number of distinct keys       |
//! | [`SimHash`]        | 64-bit locality-sensitive text fingerprint |
//!
//! All of them serialize to a compact little-endian binary form and hash
//! with the seeded blake3 family from [`bloom::seeded_hash`].

mod cms;
mod hll;
mod simhash;

pub use cms::CountMinSketch;
pub use hll::HyperLogLog;
pub use simhash::{hamming_distance, SimHash};

use thiserror::Error;

pub(crate) use bloom::{seeded_hash, splitmix64};

/// Errors raised while decoding a serialized sketch.
#[derive(Debug, Error)]
pub enum SketchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid sketch encoding: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests;
