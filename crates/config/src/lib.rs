//! Engine configuration.
//!
//! [`Config::default`] gives a working setup; [`Config::from_env`] applies
//! `STRATA_*` environment overrides on top of it:
//!
//! ```text
//! STRATA_DATA_DIR               data directory                (default: "data")
//! STRATA_MAX_MEMTABLE_SIZE      entries per memtable          (default: 1024)
//! STRATA_NUM_MEMTABLES          memtables kept before flush   (default: 2)
//! STRATA_MEMTABLE_STRUCT        hashmap | skiplist | btree    (default: skiplist)
//! STRATA_SKIP_LIST_LEVEL_NUM    skip list max height          (default: 12)
//! STRATA_BTREE_DEGREE           B-tree minimum degree         (default: 8)
//! STRATA_BLOCK_SIZE             block size in bytes           (default: 4096)
//! STRATA_BLOCK_CACHE_SIZE       cached blocks                 (default: 256)
//! STRATA_LRU_CACHE_SIZE         cached read results           (default: 1024)
//! STRATA_WAL_MAX_RECORDS        records per WAL segment       (default: 1024)
//! STRATA_WAL_BLOCKS_PER_SEGMENT blocks per WAL segment        (default: 256)
//! STRATA_WAL_SYNC               fsync every WAL append        (default: false)
//! STRATA_SUMMARY_STEP           index entries per summary key (default: 16)
//! STRATA_SSTABLE_SINGLE_FILE    one file per table            (default: false)
//! STRATA_BLOOM_FPR              Bloom false positive rate     (default: 0.01)
//! STRATA_MERKLE_CHUNK_SIZE      bytes per Merkle leaf         (default: 4096)
//! STRATA_MAX_TABLES_PER_LEVEL   tables before compaction      (default: 4)
//! STRATA_SEED                   fixed seed for hashing/levels (default: time-derived)
//! ```

use memtable::MemtableKind;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Bytes a WAL segment header occupies ("WAL" + u32).
const WAL_HEADER_LEN: usize = 7;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Parse { key: String, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("bloom false positive rate must be in (0, 1), got {0}")]
    BloomRate(f64),

    #[error("btree degree must be at least 2, got {0}")]
    BTreeDegree(usize),

    #[error("block size {0} cannot hold a WAL segment header")]
    BlockTooSmall(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub max_memtable_size: usize,
    pub num_memtables: usize,
    pub memtable_struct: MemtableKind,
    pub skip_list_level_num: usize,
    pub btree_degree: usize,
    pub block_size: usize,
    pub block_cache_size: usize,
    pub lru_cache_size: usize,
    pub wal_max_records_per_segment: u64,
    pub wal_blocks_per_segment: u64,
    pub wal_sync: bool,
    pub summary_step: usize,
    pub sstable_single_file: bool,
    pub bloom_false_positive_rate: f64,
    pub merkle_chunk_size: usize,
    pub max_tables_per_level: usize,
    /// Seed for Bloom hashes and skip list levels; time-derived when `None`.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_memtable_size: 1024,
            num_memtables: 2,
            memtable_struct: MemtableKind::SkipList,
            skip_list_level_num: 12,
            btree_degree: 8,
            block_size: 4096,
            block_cache_size: 256,
            lru_cache_size: 1024,
            wal_max_records_per_segment: 1024,
            wal_blocks_per_segment: 256,
            wal_sync: false,
            summary_step: 16,
            sstable_single_file: false,
            bloom_false_positive_rate: 0.01,
            merkle_chunk_size: 4096,
            max_tables_per_level: 4,
            seed: None,
        }
    }
}

impl Config {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by any `STRATA_*` variable that is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut c = Self::default();
        if let Some(dir) = lookup("STRATA_DATA_DIR") {
            c.data_dir = PathBuf::from(dir);
        }
        override_with(&lookup, "STRATA_MAX_MEMTABLE_SIZE", &mut c.max_memtable_size)?;
        override_with(&lookup, "STRATA_NUM_MEMTABLES", &mut c.num_memtables)?;
        override_with(&lookup, "STRATA_MEMTABLE_STRUCT", &mut c.memtable_struct)?;
        override_with(&lookup, "STRATA_SKIP_LIST_LEVEL_NUM", &mut c.skip_list_level_num)?;
        override_with(&lookup, "STRATA_BTREE_DEGREE", &mut c.btree_degree)?;
        override_with(&lookup, "STRATA_BLOCK_SIZE", &mut c.block_size)?;
        override_with(&lookup, "STRATA_BLOCK_CACHE_SIZE", &mut c.block_cache_size)?;
        override_with(&lookup, "STRATA_LRU_CACHE_SIZE", &mut c.lru_cache_size)?;
        override_with(&lookup, "STRATA_WAL_MAX_RECORDS", &mut c.wal_max_records_per_segment)?;
        override_with(&lookup, "STRATA_WAL_BLOCKS_PER_SEGMENT", &mut c.wal_blocks_per_segment)?;
        override_with(&lookup, "STRATA_WAL_SYNC", &mut c.wal_sync)?;
        override_with(&lookup, "STRATA_SUMMARY_STEP", &mut c.summary_step)?;
        override_with(&lookup, "STRATA_SSTABLE_SINGLE_FILE", &mut c.sstable_single_file)?;
        override_with(&lookup, "STRATA_BLOOM_FPR", &mut c.bloom_false_positive_rate)?;
        override_with(&lookup, "STRATA_MERKLE_CHUNK_SIZE", &mut c.merkle_chunk_size)?;
        override_with(&lookup, "STRATA_MAX_TABLES_PER_LEVEL", &mut c.max_tables_per_level)?;
        if let Some(raw) = lookup("STRATA_SEED") {
            c.seed = Some(parse_value("STRATA_SEED", &raw)?);
        }
        c.validate()?;
        Ok(c)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_memtable_size", self.max_memtable_size),
            ("num_memtables", self.num_memtables),
            ("skip_list_level_num", self.skip_list_level_num),
            ("block_size", self.block_size),
            ("summary_step", self.summary_step),
            ("merkle_chunk_size", self.merkle_chunk_size),
            ("max_tables_per_level", self.max_tables_per_level),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.wal_max_records_per_segment == 0 {
            return Err(ConfigError::Zero("wal_max_records_per_segment"));
        }
        if self.wal_blocks_per_segment == 0 {
            return Err(ConfigError::Zero("wal_blocks_per_segment"));
        }
        let rate = self.bloom_false_positive_rate;
        if !(rate > 0.0 && rate < 1.0) {
            return Err(ConfigError::BloomRate(rate));
        }
        if self.btree_degree < 2 {
            return Err(ConfigError::BTreeDegree(self.btree_degree));
        }
        if self.block_size <= WAL_HEADER_LEN {
            return Err(ConfigError::BlockTooSmall(self.block_size));
        }
        if u32::try_from(self.merkle_chunk_size).is_err() {
            return Err(ConfigError::Parse {
                key: "merkle_chunk_size".into(),
                value: self.merkle_chunk_size.to_string(),
            });
        }
        Ok(())
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    pub fn sstable_dir(&self) -> PathBuf {
        self.data_dir.join("sstables")
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Parse {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn override_with<T, F>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = parse_value(key, &raw)?;
    }
    Ok(())
}
