//! # Block - fixed-size block I/O with an LRU block cache
//!
//! Every file the storage engine touches through this crate is treated as an
//! array of `block_size` byte blocks. Reads and writes consult a shared
//! [`BlockCache`] first, keyed by `(file path, block index)`, so hot WAL and
//! SSTable blocks are served from memory.
//!
//! ```text
//! offset:   0            bs           2*bs          3*bs
//!           ┌────────────┬────────────┬────────────┬──────┐
//! file:     │  block 0   │  block 1   │  block 2   │ blk 3│  (last block may be short)
//!           └────────────┴────────────┴────────────┴──────┘
//! ```
//!
//! The cache is best-effort: a miss reads through to disk, and I/O errors are
//! always propagated to the caller.
//!
//! ## Example
//!
//! ```rust,no_run
//! use block::BlockManager;
//!
//! let blocks = BlockManager::new(4096, 128);
//! blocks.write_block("seg.log".as_ref(), 0, &[0u8; 4096]).unwrap();
//! let b = blocks.read_block("seg.log".as_ref(), 0).unwrap();
//! assert_eq!(b.len(), 4096);
//! ```

mod cache;

pub use cache::LruCache;

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced by block-level I/O.
#[derive(Debug, Error)]
pub enum BlockError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A write was attempted with a buffer that is not exactly one block.
    #[error("block size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Cache key: a block of a specific file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub path: PathBuf,
    pub index: u64,
}

/// LRU cache of raw block bytes.
#[derive(Debug)]
pub struct BlockCache {
    lru: LruCache<BlockId, Vec<u8>>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            lru: LruCache::new(capacity),
        }
    }

    /// Stores a block, making it the most recently used entry. The least
    /// recently used block is evicted when the cache is full.
    pub fn add_to_cache(&mut self, path: &Path, index: u64, data: Vec<u8>) {
        let id = BlockId {
            path: path.to_path_buf(),
            index,
        };
        self.lru.insert(id, data);
    }

    /// Returns a copy of a cached block and promotes it.
    pub fn find_in_cache(&mut self, path: &Path, index: u64) -> Option<Vec<u8>> {
        let id = BlockId {
            path: path.to_path_buf(),
            index,
        };
        self.lru.get(&id).cloned()
    }

    /// Drops every cached block belonging to `path`.
    pub fn invalidate(&mut self, path: &Path) {
        self.lru.retain(|id| id.path != path);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lru.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }
}

/// Block-granular file access shared by the WAL and SSTable readers.
///
/// The manager is `Sync`; the cache sits behind a mutex so at most one
/// caller mutates it at a time.
pub struct BlockManager {
    block_size: usize,
    cache: Mutex<BlockCache>,
}

impl BlockManager {
    /// Creates a manager for `block_size`-byte blocks with room for
    /// `cache_blocks` cached blocks.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is 0.
    pub fn new(block_size: usize, cache_blocks: usize) -> Self {
        assert!(block_size > 0, "block_size must be > 0");
        Self {
            block_size,
            cache: Mutex::new(BlockCache::new(cache_blocks)),
        }
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Reads block `index` of `path`.
    ///
    /// The returned buffer is always `block_size` bytes; a short final block
    /// is zero-filled. A block that starts at or past EOF is an
    /// `UnexpectedEof` error.
    pub fn read_block(&self, path: &Path, index: u64) -> Result<Vec<u8>, BlockError> {
        if let Some(hit) = self.cache.lock().find_in_cache(path, index) {
            return Ok(hit);
        }

        let mut f = File::open(path)?;
        let len = f.metadata()?.len();
        let start = index * self.block_size as u64;
        if start >= len {
            return Err(BlockError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("block {} is past the end of {}", index, path.display()),
            )));
        }

        let available = ((len - start) as usize).min(self.block_size);
        let mut buf = vec![0u8; self.block_size];
        f.seek(SeekFrom::Start(start))?;
        f.read_exact(&mut buf[..available])?;

        self.cache.lock().add_to_cache(path, index, buf.clone());
        Ok(buf)
    }

    /// Writes exactly one block at position `index`, creating the file if
    /// needed, and refreshes the cached copy.
    pub fn write_block(&self, path: &Path, index: u64, data: &[u8]) -> Result<(), BlockError> {
        if data.len() != self.block_size {
            return Err(BlockError::SizeMismatch {
                expected: self.block_size,
                actual: data.len(),
            });
        }

        let mut f = OpenOptions::new().create(true).write(true).open(path)?;
        f.seek(SeekFrom::Start(index * self.block_size as u64))?;
        f.write_all(data)?;
        f.flush()?;

        self.cache.lock().add_to_cache(path, index, data.to_vec());
        Ok(())
    }

    /// Reads `len` bytes starting at byte `offset`, stitching together as
    /// many blocks as the range spans.
    pub fn read_at(&self, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>, BlockError> {
        let mut out = Vec::with_capacity(len);
        if len == 0 {
            return Ok(out);
        }

        let bs = self.block_size as u64;
        let mut pos = offset;
        let end = offset + len as u64;
        while pos < end {
            let index = pos / bs;
            let within = (pos % bs) as usize;
            let block = self.read_block(path, index)?;
            let take = ((end - pos) as usize).min(self.block_size - within);
            out.extend_from_slice(&block[within..within + take]);
            pos += take as u64;
        }
        Ok(out)
    }

    /// Number of blocks needed to cover the file at `path`.
    pub fn block_count(&self, path: &Path) -> Result<u64, BlockError> {
        let len = std::fs::metadata(path)?.len();
        Ok(len.div_ceil(self.block_size as u64))
    }

    /// Fsyncs `path` to stable storage.
    pub fn sync(&self, path: &Path) -> Result<(), BlockError> {
        OpenOptions::new().write(true).open(path)?.sync_all()?;
        Ok(())
    }

    /// Forgets every cached block of `path`. Call before deleting a file.
    pub fn invalidate(&self, path: &Path) {
        self.cache.lock().invalidate(path);
    }

    /// Number of blocks currently cached.
    #[must_use]
    pub fn cached_blocks(&self) -> usize {
        self.cache.lock().len()
    }
}

impl std::fmt::Debug for BlockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockManager")
            .field("block_size", &self.block_size)
            .field("cached_blocks", &self.cached_blocks())
            .finish()
    }
}
