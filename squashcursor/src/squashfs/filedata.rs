use std::cmp::min;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use super::archive::Archive;
use super::block::DataBlockSize;
use super::error::{Error, IoError, Result};
use super::inode::Inode;

#[derive(Debug, Clone, Copy)]
struct BlockLocation {
    disk_offset: u64,
    size: DataBlockSize,
}

// The last `file_size % block_size` bytes of a file, packed into a fragment block
#[derive(Debug, Clone, Copy)]
struct TailEnd {
    fragment: u32,
    offset: u32,
}

// A window onto a decompressed block: the `len` bytes of file data starting at `start`
struct Chunk {
    data: Arc<[u8]>,
    start: usize,
    len: usize,
}

/// Random-access reader for a regular file's contents.
///
/// The reader keeps no position: every read names its offset, so one reader can be shared
/// between threads. Reads that run past the end of the file are cut short rather than failing.
/// Use [`FileReader::stream`] for a `std::io::Read + Seek` view.
#[derive(Clone)]
pub struct FileReader {
    archive: Archive,
    file_size: u64,
    block_size: u32,
    blocks: Arc<[BlockLocation]>,
    tail: Option<TailEnd>,
}

impl fmt::Debug for FileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileReader")
            .field("file_size", &self.file_size)
            .field("blocks", &self.blocks.len())
            .field("tail", &self.tail)
            .finish()
    }
}

impl FileReader {
    pub(crate) fn new(archive: Archive, inode: &Inode) -> Result<Option<Self>> {
        let info = match inode.file_info() {
            Some(info) => info,
            None => return Ok(None),
        };
        let block_size = archive.superblock().block_size;
        let bytes_used = archive.superblock().bytes_used;
        let overrun = || Error::corrupt(info.blocks_start,
            format!("data blocks of inode {} run past the end of the archive", inode.inode_number()));

        // Data blocks are stored back to back, so each starts where the previous one ended
        let mut disk_offset = info.blocks_start;
        let mut blocks = Vec::with_capacity(info.block_sizes.len());
        for &size in info.block_sizes.iter() {
            blocks.push(BlockLocation { disk_offset, size });
            disk_offset = disk_offset.checked_add(u64::from(size.size())).ok_or_else(overrun)?;
        }
        if disk_offset > bytes_used {
            return Err(overrun());
        }

        let tail = (info.has_fragment() && info.file_size % u64::from(block_size) != 0)
            .then_some(TailEnd { fragment: info.frag_index, offset: info.frag_offset });

        Ok(Some(Self { archive, file_size: info.file_size, block_size, blocks: blocks.into(), tail }))
    }

    pub fn size(&self) -> u64 {
        self.file_size
    }

    // Fetch the data of logical block `index`: a full data block, or the tail end
    fn chunk(&self, index: u64) -> Result<Chunk> {
        let inner = &self.archive.inner;
        let expected = min(u64::from(self.block_size), self.file_size - index * u64::from(self.block_size)) as usize;

        if let Some(loc) = usize::try_from(index).ok().and_then(|i| self.blocks.get(i)) {
            if loc.size.is_sparse() {
                return Ok(Chunk { data: vec![0; expected].into(), start: 0, len: expected });
            }
            let data = inner.cache.read_data_block(loc.disk_offset, loc.size)?;
            if data.len() < expected || (loc.size.is_compressed() && data.len() != expected) {
                return Err(Error::corrupt(loc.disk_offset,
                    format!("data block holds {} bytes, expected {}", data.len(), expected)));
            }
            return Ok(Chunk { data, start: 0, len: expected });
        }

        match self.tail {
            Some(tail) if index == self.blocks.len() as u64 => {
                let frag = inner.fragments.resolve(&inner.cache, tail.fragment)?;
                let data = inner.cache.read_data_block(frag.start, frag.size)?;
                let start = tail.offset as usize;
                if start + expected > data.len() {
                    return Err(Error::corrupt(frag.start,
                        format!("fragment of {} bytes can't hold {} bytes at {}", data.len(), expected, start)));
                }
                Ok(Chunk { data, start, len: expected })
            },
            _ => Err(Error::corrupt(inner.sb.inode_table,
                format!("file of {} bytes has no block {}", self.file_size, index))),
        }
    }

    /// Read into `buf` starting at `offset`. Returns the number of bytes read, which is less
    /// than `buf.len()` only when the end of the file is reached.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.file_size || buf.is_empty() {
            return Ok(0);
        }
        let end = min(self.file_size, offset.saturating_add(buf.len() as u64));
        let bs = u64::from(self.block_size);

        let mut pos = offset;
        let mut written = 0;
        while pos < end {
            let chunk = self.chunk(pos / bs)?;
            let within = (pos % bs) as usize;
            let n = min(chunk.len - within, (end - pos) as usize);
            let src = chunk.start + within;
            buf[written..written + n].copy_from_slice(&chunk.data[src..src + n]);
            written += n;
            pos += n as u64;
        }
        Ok(written)
    }

    /// Read up to `len` bytes at `offset`. The result is shorter than `len` only at the end of
    /// the file, and empty if `offset` is at or past the end.
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let avail = self.file_size.saturating_sub(offset);
        let mut buf = vec![0; min(len as u64, avail) as usize];
        let n = self.read_at(&mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Fill `buf` from `offset`, failing with [`IoError::OutOfRange`] if the file ends first
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let in_range = offset.checked_add(buf.len() as u64).is_some_and(|end| end <= self.file_size);
        if !in_range {
            return Err(IoError::OutOfRange { offset, size: self.file_size }.into());
        }
        self.read_at(buf, offset)?;
        Ok(())
    }

    /// A stream over the file starting at offset 0
    pub fn stream(&self) -> FileStream {
        self.clone().into_stream()
    }

    pub fn into_stream(self) -> FileStream {
        FileStream { reader: self, pos: 0 }
    }
}

/// A [`FileReader`] with a current position, for use wherever `std::io::Read` or `Seek` is
/// expected. Wrap it in a `BufReader` for buffered or line-oriented reading.
#[derive(Debug, Clone)]
pub struct FileStream {
    reader: FileReader,
    pos: u64,
}

impl FileStream {
    pub fn into_inner(self) -> FileReader {
        self.reader
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for FileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, delta) = match pos {
            SeekFrom::Start(p) => {
                self.pos = p;
                return Ok(p);
            },
            SeekFrom::End(d) => (self.reader.size(), d),
            SeekFrom::Current(d) => (self.pos, d),
        };
        match base.checked_add_signed(delta) {
            Some(p) => {
                self.pos = p;
                Ok(p)
            },
            None => Err(io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative or overflowing position")),
        }
    }
}
