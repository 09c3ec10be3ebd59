//! Persistence of probabilistic structures through any key-value store.
//!
//! Each structure is serialized to its binary form and stored under a
//! reserved key: `__bf__`, `__cms__`, `__hll__` or `__sh__` followed by the
//! caller's name. User-facing surfaces refuse keys starting with `__`.

use anyhow::{Context, Result};
use bloom::BloomFilter;
use sketch::{CountMinSketch, HyperLogLog, SimHash};

use crate::{Engine, Lookup};

/// Prefix shared by every internal key.
pub const INTERNAL_PREFIX: &str = "__";

/// Minimal store contract the probabilistic layer needs.
pub trait FullKv {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    /// `None` for a missing or deleted key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn delete(&self, key: &[u8]) -> Result<()>;
}

impl FullKv for Engine {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Engine::put(self, key, value).map(|_| ())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Engine::get(self, key).map(Lookup::into_value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        Engine::delete(self, key).map(|_| ())
    }
}

/// Kinds of structure that can be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    Bloom,
    CountMin,
    HyperLogLog,
    SimHash,
}

impl Structure {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Structure::Bloom => "__bf__",
            Structure::CountMin => "__cms__",
            Structure::HyperLogLog => "__hll__",
            Structure::SimHash => "__sh__",
        }
    }

    /// The internal key holding the structure called `name`.
    #[must_use]
    pub fn key(self, name: &str) -> Vec<u8> {
        format!("{}{}", self.prefix(), name).into_bytes()
    }
}

/// Saves and loads structures by name on top of a [`FullKv`].
pub struct ProbabilisticStore<'a, K: FullKv + ?Sized> {
    kv: &'a K,
}

impl<'a, K: FullKv + ?Sized> ProbabilisticStore<'a, K> {
    pub fn new(kv: &'a K) -> Self {
        Self { kv }
    }

    pub fn save_bloom(&self, name: &str, filter: &BloomFilter) -> Result<()> {
        self.save(Structure::Bloom, name, &filter.to_bytes())
    }

    pub fn load_bloom(&self, name: &str) -> Result<Option<BloomFilter>> {
        self.load(Structure::Bloom, name, BloomFilter::from_bytes)
    }

    pub fn save_count_min(&self, name: &str, sketch: &CountMinSketch) -> Result<()> {
        self.save(Structure::CountMin, name, &sketch.to_bytes())
    }

    pub fn load_count_min(&self, name: &str) -> Result<Option<CountMinSketch>> {
        self.load(Structure::CountMin, name, CountMinSketch::from_bytes)
    }

    pub fn save_hyperloglog(&self, name: &str, hll: &HyperLogLog) -> Result<()> {
        self.save(Structure::HyperLogLog, name, &hll.to_bytes())
    }

    pub fn load_hyperloglog(&self, name: &str) -> Result<Option<HyperLogLog>> {
        self.load(Structure::HyperLogLog, name, HyperLogLog::from_bytes)
    }

    pub fn save_simhash(&self, name: &str, hash: &SimHash) -> Result<()> {
        self.save(Structure::SimHash, name, &hash.to_bytes())
    }

    pub fn load_simhash(&self, name: &str) -> Result<Option<SimHash>> {
        self.load(Structure::SimHash, name, SimHash::from_bytes)
    }

    /// Deletes the stored structure, if any.
    pub fn remove(&self, structure: Structure, name: &str) -> Result<()> {
        self.kv.delete(&structure.key(name))
    }

    fn save(&self, structure: Structure, name: &str, bytes: &[u8]) -> Result<()> {
        anyhow::ensure!(!name.is_empty(), "structure name must not be empty");
        self.kv.put(&structure.key(name), bytes)
    }

    fn load<T, E>(
        &self,
        structure: Structure,
        name: &str,
        decode: impl FnOnce(&[u8]) -> Result<T, E>,
    ) -> Result<Option<T>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(bytes) = self.kv.get(&structure.key(name))? else {
            return Ok(None);
        };
        let value = decode(&bytes)
            .with_context(|| format!("decoding {:?} {:?}", structure, name))?;
        Ok(Some(value))
    }
}
