use std::fmt;
use std::io::{self, Read};
use std::marker::PhantomData;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use super::block::{BlockCache, METADATA_BLOCK_SIZE};
use super::error::{Error, FormatError, Result};

// Divide x by y, rounding up any fractional result
macro_rules! div_ceil {
    ($x:expr, $y:expr) => { ($x + $y - 1) / $y }
}
pub(crate) use div_ceil;

/// A reference to a record in a metadata table: the offset of the metadata block containing it
/// (relative to the start of the table) and the record's offset within the decompressed block.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeRef {
    val: u64,
}

impl InodeRef {
    pub fn new(block: u64, offset: u16) -> Self {
        Self { val: (block << 16) | u64::from(offset) }
    }

    pub fn from_raw(val: u64) -> Self {
        Self { val }
    }

    pub fn block(&self) -> u64 {
        self.val >> 16
    }

    pub fn offset(&self) -> u16 {
        (self.val & 0xFFFF) as u16
    }

    pub fn raw(&self) -> u64 {
        self.val
    }
}

impl fmt::Debug for InodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.block(), self.offset())
    }
}

// A reader over a chain of metadata blocks. The blocks are decompressed through the shared cache,
// and reading moves on to the next block when the current one is used up. Records routinely
// straddle block boundaries, so callers see one continuous stream.
//
// Reading stops at `table_end`; running into it surfaces as an UnexpectedEof, which becomes
// FormatError::Truncated once it reaches the caller.
pub(crate) struct MetadataReader<'a> {
    cache: &'a BlockCache,
    table_end: u64,
    block: Arc<[u8]>,
    pos: usize,
    next_block: u64,
}

impl<'a> MetadataReader<'a> {
    /// Start reading at `r` within the table that begins at `table_start`.
    pub fn new(cache: &'a BlockCache, table_start: u64, table_end: u64, r: InodeRef) -> Result<Self> {
        let addr = table_start.checked_add(r.block())
            .filter(|a| *a < table_end)
            .ok_or(FormatError::Truncated("metadata reference past end of table"))?;
        let (block, disk_size) = cache.read_metadata_block(addr)?;
        let pos = usize::from(r.offset());
        if pos > block.len() {
            return Err(Error::corrupt(addr, format!("offset {} beyond end of {} byte block", pos, block.len())));
        }
        Ok(Self { cache, table_end, block, pos, next_block: addr + disk_size })
    }
}

impl Read for MetadataReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos == self.block.len() {
            if self.next_block >= self.table_end {
                return Ok(0);
            }
            let (block, disk_size) = self.cache.read_metadata_block(self.next_block)?;
            self.block = block;
            self.pos = 0;
            self.next_block += disk_size;
        }
        let n = Read::read(&mut &self.block[self.pos..], buf)?;
        self.pos += n;
        Ok(n)
    }
}

/// Fixed-size records stored in a lookup table
pub(crate) trait FromBytes {
    const BYTE_SIZE: usize;
    fn from_bytes(buf: &[u8]) -> Self;
}

impl FromBytes for u32 {
    const BYTE_SIZE: usize = 4;
    fn from_bytes(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl FromBytes for InodeRef {
    const BYTE_SIZE: usize = 8;
    fn from_bytes(buf: &[u8]) -> Self {
        InodeRef::from_raw(LittleEndian::read_u64(buf))
    }
}

// Lookup tables (fragments, ids, export, xattr ids) are an array of records packed into metadata
// blocks, plus an uncompressed array of u64 block locations. Only the locations are read up
// front; records are decoded on demand through the block cache.
#[derive(Debug)]
pub(crate) struct LookupTable<T> {
    block_offsets: Vec<u64>,
    count: u32,
    _record: PhantomData<T>,
}

impl<T: FromBytes> LookupTable<T> {
    const PER_BLOCK: u32 = (METADATA_BLOCK_SIZE / T::BYTE_SIZE) as u32;

    /// Read the block locations of a table of `count` records. They must fit between
    /// `table_offset` and `table_end`.
    pub fn read(cache: &BlockCache, table_offset: u64, table_end: u64, count: u32) -> Result<Self> {
        let array_len = div_ceil!(u64::from(count), u64::from(Self::PER_BLOCK)) * 8;
        if table_offset.saturating_add(array_len) > table_end {
            return Err(FormatError::Truncated("lookup table locations run past the end of the table").into());
        }
        let raw = cache.read_raw(table_offset, array_len as usize)?;
        let block_offsets = raw.chunks_exact(8).map(LittleEndian::read_u64).collect();
        Ok(Self { block_offsets, count, _record: PhantomData })
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    /// Look up record `index`, or None if the table is shorter than that.
    pub fn get(&self, cache: &BlockCache, index: u32) -> Result<Option<T>> {
        if index >= self.count {
            return Ok(None);
        }
        let block = self.block_offsets[(index / Self::PER_BLOCK) as usize];
        let start = (index % Self::PER_BLOCK) as usize * T::BYTE_SIZE;
        let (data, _) = cache.read_metadata_block(block)?;
        let rec = data.get(start..start + T::BYTE_SIZE)
            .ok_or(FormatError::Truncated("lookup table block too short"))?;
        Ok(Some(T::from_bytes(rec)))
    }
}

/// Maps the 16-bit uid/gid indexes stored in inodes to 32-bit ids
#[derive(Debug)]
pub(crate) struct IdTable {
    table: LookupTable<u32>,
}

impl IdTable {
    pub fn read(cache: &BlockCache, table_offset: u64, table_end: u64, count: u16) -> Result<Self> {
        Ok(Self { table: LookupTable::read(cache, table_offset, table_end, count.into())? })
    }

    pub fn get(&self, cache: &BlockCache, index: u16) -> Result<u32> {
        self.table.get(cache, index.into())?
            .ok_or_else(|| FormatError::BadIdIndex { index, count: self.table.len() as u16 }.into())
    }
}

/// Maps inode numbers to inode references. Present only in exportable archives.
#[derive(Debug)]
pub(crate) struct ExportTable {
    table: LookupTable<InodeRef>,
}

impl ExportTable {
    pub fn read(cache: &BlockCache, table_offset: u64, table_end: u64, inode_count: u32) -> Result<Self> {
        Ok(Self { table: LookupTable::read(cache, table_offset, table_end, inode_count)? })
    }

    /// Inode numbers start at 1
    pub fn get(&self, cache: &BlockCache, number: u32) -> Result<InodeRef> {
        let bad = || FormatError::BadInodeNumber { number, count: self.table.len() };
        let index = number.checked_sub(1).ok_or_else(bad)?;
        self.table.get(cache, index)?.ok_or_else(|| bad().into())
    }
}
