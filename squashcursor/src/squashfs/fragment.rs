use byteorder::{ByteOrder, LittleEndian};

use super::block::{BlockCache, DataBlockSize};
use super::error::{FormatError, Result};
use super::metadata::{FromBytes, LookupTable};

/// Location of a fragment block, which packs the tail ends of several files together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentEntry {
    pub start: u64,
    pub size: DataBlockSize,
}

impl FromBytes for FragmentEntry {
    const BYTE_SIZE: usize = 16;
    fn from_bytes(buf: &[u8]) -> Self {
        // The trailing 4 bytes are unused
        Self {
            start: LittleEndian::read_u64(&buf[0..8]),
            size: DataBlockSize(LittleEndian::read_u32(&buf[8..12])),
        }
    }
}

#[derive(Debug)]
pub(crate) struct FragmentTable {
    table: Option<LookupTable<FragmentEntry>>,
}

impl FragmentTable {
    /// Archives without fragments have no table at all
    pub fn none() -> Self {
        Self { table: None }
    }

    pub fn read(cache: &BlockCache, table_offset: u64, table_end: u64, count: u32) -> Result<Self> {
        Ok(Self { table: Some(LookupTable::read(cache, table_offset, table_end, count)?) })
    }

    pub fn len(&self) -> u32 {
        self.table.as_ref().map_or(0, |t| t.len())
    }

    pub fn resolve(&self, cache: &BlockCache, index: u32) -> Result<FragmentEntry> {
        let entry = match &self.table {
            Some(t) => t.get(cache, index)?,
            None => None,
        };
        entry.ok_or_else(|| FormatError::BadFragmentIndex { index, count: self.len() }.into())
    }
}
