use std::fmt;
use std::io::{Read, Take};

use byteorder::{LittleEndian, ReadBytesExt};

use super::block::BlockCache;
use super::error::{Error, Result};
use super::inode::{DirInfo, FileType};
use super::metadata::{InodeRef, MetadataReader};

// A directory header covers at most this many entries
const MAX_HEADER_ENTRIES: u32 = 256;

/// One name in a directory listing
#[derive(Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    name: Vec<u8>,
    inode_ref: InodeRef,
    file_type: FileType,
    inode_number: u32,
}

impl DirectoryEntry {
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// The name as a String, with invalid UTF-8 replaced
    pub fn file_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn inode_ref(&self) -> InodeRef {
        self.inode_ref
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn inode_number(&self) -> u32 {
        self.inode_number
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

impl fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("inode_ref", &self.inode_ref)
            .field("file_type", &self.file_type)
            .field("inode_number", &self.inode_number)
            .finish()
    }
}

struct Header {
    remaining: u32,
    start: u32,
    inode_number: u32,
}

/// Iterator over a directory listing, decoding entries on demand in on-disk order.
///
/// An error ends the iteration: it is yielded once, and `next` returns None afterwards.
pub struct ReadDir<'a> {
    reader: Option<Take<MetadataReader<'a>>>,
    header: Option<Header>,
    listing_start: u64,
}

impl<'a> ReadDir<'a> {
    pub(crate) fn new(cache: &'a BlockCache, table_start: u64, table_end: u64, dir: &DirInfo) -> Result<Self> {
        // file_size counts 3 bytes that are never stored
        let listing_len = u64::from(dir.file_size.saturating_sub(3));
        let listing_start = table_start + u64::from(dir.block_index);
        let reader = if listing_len == 0 {
            None
        } else {
            let r = InodeRef::new(dir.block_index.into(), dir.block_offset);
            Some(MetadataReader::new(cache, table_start, table_end, r)?.take(listing_len))
        };
        Ok(Self { reader, header: None, listing_start })
    }

    fn read_entry(&mut self) -> Result<Option<DirectoryEntry>> {
        let r = match &mut self.reader {
            Some(r) => r,
            None => return Ok(None),
        };

        if self.header.as_ref().map_or(true, |h| h.remaining == 0) {
            if r.limit() == 0 {
                return Ok(None);
            }
            let count = r.read_u32::<LittleEndian>()?.saturating_add(1);
            if count > MAX_HEADER_ENTRIES {
                return Err(Error::corrupt(self.listing_start, format!("directory header with {} entries", count)));
            }
            let start = r.read_u32::<LittleEndian>()?;
            let inode_number = r.read_u32::<LittleEndian>()?;
            self.header = Some(Header { remaining: count, start, inode_number });
        }
        let Some(header) = self.header.as_mut() else {
            return Ok(None);
        };

        let offset = r.read_u16::<LittleEndian>()?;
        let inode_delta = r.read_i16::<LittleEndian>()?;
        let file_type = FileType::from_type_tag(r.read_u16::<LittleEndian>()?)?;
        let name_size = usize::from(r.read_u16::<LittleEndian>()?) + 1;
        let mut name = vec![0; name_size];
        r.read_exact(&mut name)?;
        header.remaining -= 1;

        Ok(Some(DirectoryEntry {
            name,
            inode_ref: InodeRef::new(header.start.into(), offset),
            file_type,
            inode_number: header.inode_number.wrapping_add_signed(inode_delta.into()),
        }))
    }
}

impl Iterator for ReadDir<'_> {
    type Item = Result<DirectoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_entry() {
            Ok(Some(e)) => Some(Ok(e)),
            Ok(None) => {
                self.reader = None;
                None
            },
            Err(e) => {
                log::debug!("directory listing at {} failed: {}", self.listing_start, e);
                self.reader = None;
                Some(Err(e))
            },
        }
    }
}

impl std::iter::FusedIterator for ReadDir<'_> {}
