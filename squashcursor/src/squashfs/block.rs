use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use lru::LruCache;
use parking_lot::Mutex;

use super::codec::CodecRegistry;
use super::error::{Error, FormatError, IoError, Result};
use super::source::ReadAt;

/// SquashFS metadata blocks never exceed 8KiB uncompressed
pub const METADATA_BLOCK_SIZE: usize = 8192;

const METADATA_UNCOMPRESSED: u16 = 0x8000;
const DATA_UNCOMPRESSED: u32 = 1 << 24;

/// The on-disk size word of a data block or fragment block: a size plus an "uncompressed" bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlockSize(pub u32);

impl DataBlockSize {
    pub fn size(&self) -> u32 {
        self.0 & !DATA_UNCOMPRESSED
    }

    pub fn is_compressed(&self) -> bool {
        self.0 & DATA_UNCOMPRESSED == 0
    }

    /// A zero-size block stands for a block of zeros that was never written
    pub fn is_sparse(&self) -> bool {
        self.size() == 0
    }
}

/// Counters describing how the cache has been used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub metadata_hits: u64,
    pub metadata_misses: u64,
    pub data_hits: u64,
    pub data_misses: u64,
    pub storage_reads: u64,
}

#[derive(Default)]
struct Counters {
    metadata_hits: AtomicU64,
    metadata_misses: AtomicU64,
    data_hits: AtomicU64,
    data_misses: AtomicU64,
    storage_reads: AtomicU64,
}

#[derive(Clone)]
struct MetadataBlock {
    data: Arc<[u8]>,
    disk_size: u64,
}

/// Decompresses and caches metadata blocks and data blocks, keyed by their archive offset.
///
/// Lookups and inserts happen under a lock, but reading and decompressing a missing block does
/// not hold it. Two callers missing on the same block at once may both decompress it; the
/// results are identical, and whichever is inserted last stays.
pub struct BlockCache {
    source: Arc<dyn ReadAt>,
    codecs: CodecRegistry,
    codec_id: u16,
    block_size: u32,
    metadata: Mutex<LruCache<u64, MetadataBlock>>,
    data: Mutex<LruCache<u64, Arc<[u8]>>>,
    counters: Counters,
}

impl fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCache")
            .field("codec_id", &self.codec_id)
            .field("block_size", &self.block_size)
            .field("codecs", &self.codecs)
            .field("stats", &self.stats())
            .finish()
    }
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

impl BlockCache {
    pub fn new(source: Arc<dyn ReadAt>, codecs: CodecRegistry, codec_id: u16, block_size: u32,
        metadata_blocks: usize, data_blocks: usize) -> Self
    {
        Self {
            source,
            codecs,
            codec_id,
            block_size,
            metadata: Mutex::new(LruCache::new(capacity(metadata_blocks))),
            data: Mutex::new(LruCache::new(capacity(data_blocks))),
            counters: Counters::default(),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Read `len` raw bytes from the archive.
    pub fn read_raw(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.counters.storage_reads.fetch_add(1, Ordering::Relaxed);
        let mut buf = vec![0; len];
        self.source.read_exact_at(&mut buf, offset).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::Format(FormatError::Truncated("block extends past end of archive")),
            _ => Error::Io(IoError::Read { offset, source: e }),
        })?;
        Ok(buf)
    }

    /// Read the metadata block whose 2-byte header sits at `offset`. Returns the decompressed
    /// payload and the number of archive bytes the block occupies, header included.
    pub fn read_metadata_block(&self, offset: u64) -> Result<(Arc<[u8]>, u64)> {
        if let Some(b) = self.metadata.lock().get(&offset) {
            self.counters.metadata_hits.fetch_add(1, Ordering::Relaxed);
            return Ok((b.data.clone(), b.disk_size));
        }
        self.counters.metadata_misses.fetch_add(1, Ordering::Relaxed);

        let header = LittleEndian::read_u16(&self.read_raw(offset, 2)?);
        let size = header & !METADATA_UNCOMPRESSED;
        let compressed = header & METADATA_UNCOMPRESSED == 0;
        if size == 0 || size as usize > METADATA_BLOCK_SIZE {
            log::warn!("metadata block at {} has bad size {}", offset, size);
            return Err(Error::corrupt(offset, format!("metadata block size {}", size)));
        }

        let payload = self.read_raw(offset + 2, size.into())?;
        let data = if compressed {
            log::trace!("decompressing metadata block at {} ({} bytes)", offset, size);
            self.codecs.decompress(self.codec_id, &payload, METADATA_BLOCK_SIZE)
                .map_err(|e| e.at_offset(offset))?
        } else {
            payload
        };

        let block = MetadataBlock { data: data.into(), disk_size: u64::from(size) + 2 };
        self.metadata.lock().put(offset, block.clone());
        Ok((block.data, block.disk_size))
    }

    /// Read a data or fragment block. Its size and compression flag come from the inode or the
    /// fragment table, since data blocks carry no header.
    pub fn read_data_block(&self, offset: u64, size: DataBlockSize) -> Result<Arc<[u8]>> {
        if let Some(b) = self.data.lock().get(&offset) {
            self.counters.data_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(b.clone());
        }
        self.counters.data_misses.fetch_add(1, Ordering::Relaxed);

        let disk_size = size.size();
        if disk_size > self.block_size {
            return Err(Error::corrupt(offset, format!("data block size {} exceeds block size", disk_size)));
        }
        let raw = self.read_raw(offset, disk_size as usize)?;
        let data: Arc<[u8]> = if size.is_compressed() {
            log::trace!("decompressing data block at {} ({} bytes)", offset, disk_size);
            self.codecs.decompress(self.codec_id, &raw, self.block_size as usize)
                .map_err(|e| e.at_offset(offset))?
                .into()
        } else {
            raw.into()
        };

        self.data.lock().put(offset, data.clone());
        Ok(data)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            metadata_hits: self.counters.metadata_hits.load(Ordering::Relaxed),
            metadata_misses: self.counters.metadata_misses.load(Ordering::Relaxed),
            data_hits: self.counters.data_hits.load(Ordering::Relaxed),
            data_misses: self.counters.data_misses.load(Ordering::Relaxed),
            storage_reads: self.counters.storage_reads.load(Ordering::Relaxed),
        }
    }
}
