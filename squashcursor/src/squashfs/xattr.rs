use std::fmt;
use std::io::Read;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use super::block::BlockCache;
use super::error::{FormatError, Result};
use super::metadata::{FromBytes, InodeRef, LookupTable, MetadataReader};

const OUT_OF_LINE: u16 = 0x0100;
const PREFIX_MASK: u16 = 0x00FF;

/// The namespace an extended attribute name belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XattrNamespace {
    User,
    Trusted,
    Security,
    Unknown(u16),
}

impl XattrNamespace {
    fn from_prefix(p: u16) -> Self {
        match p {
            0 => XattrNamespace::User,
            1 => XattrNamespace::Trusted,
            2 => XattrNamespace::Security,
            n => XattrNamespace::Unknown(n),
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            XattrNamespace::User => "user.",
            XattrNamespace::Trusted => "trusted.",
            XattrNamespace::Security => "security.",
            XattrNamespace::Unknown(_) => "",
        }
    }
}

/// An extended attribute: a name without its namespace prefix, and a value
#[derive(Clone, PartialEq, Eq)]
pub struct Xattr {
    pub namespace: XattrNamespace,
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl Xattr {
    /// The name with its namespace prefix, e.g. `user.comment`
    pub fn full_name(&self) -> Vec<u8> {
        let mut n = self.namespace.prefix().as_bytes().to_vec();
        n.extend_from_slice(&self.name);
        n
    }
}

impl fmt::Debug for Xattr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Xattr")
            .field("name", &String::from_utf8_lossy(&self.full_name()))
            .field("value", &String::from_utf8_lossy(&self.value))
            .finish()
    }
}

#[derive(Debug)]
struct XattrIdEntry {
    xattr_ref: InodeRef,
    count: u32,
}

impl FromBytes for XattrIdEntry {
    const BYTE_SIZE: usize = 16;
    fn from_bytes(buf: &[u8]) -> Self {
        // The last 4 bytes hold the total size of the key/value pairs, which isn't needed here
        Self {
            xattr_ref: InodeRef::from_raw(LittleEndian::read_u64(&buf[0..8])),
            count: LittleEndian::read_u32(&buf[8..12]),
        }
    }
}

/// The xattr id table and the key/value metadata it points into
#[derive(Debug)]
pub(crate) struct XattrTable {
    kv_start: u64,
    kv_end: u64,
    ids: LookupTable<XattrIdEntry>,
}

impl XattrTable {
    pub fn read(cache: &BlockCache, table_offset: u64, table_end: u64) -> Result<Self> {
        let header = cache.read_raw(table_offset, 16)?;
        let kv_start = LittleEndian::read_u64(&header[0..8]);
        let count = LittleEndian::read_u32(&header[8..12]);
        if kv_start >= table_offset {
            return Err(FormatError::TableOutOfRange { table: "xattr", offset: kv_start }.into());
        }
        log::debug!("xattr table: {} ids, key/value data at {}", count, kv_start);
        Ok(Self {
            kv_start,
            kv_end: table_offset,
            ids: LookupTable::read(cache, table_offset + 16, table_end, count)?,
        })
    }

    pub fn get(&self, cache: &BlockCache, index: u32) -> Result<Vec<Xattr>> {
        let id = self.ids.get(cache, index)?
            .ok_or(FormatError::BadXattrIndex { index, count: self.ids.len() })?;

        let mut r = MetadataReader::new(cache, self.kv_start, self.kv_end, id.xattr_ref)?;
        let mut attrs = Vec::with_capacity(id.count.min(256) as usize);
        for _ in 0..id.count {
            let kind = r.read_u16::<LittleEndian>()?;
            let name_size = r.read_u16::<LittleEndian>()?;
            let mut name = vec![0; name_size.into()];
            r.read_exact(&mut name)?;

            let value_size = r.read_u32::<LittleEndian>()?;
            let value = if kind & OUT_OF_LINE != 0 {
                // The value is stored once elsewhere and referenced here
                let value_ref = InodeRef::from_raw(r.read_u64::<LittleEndian>()?);
                let mut vr = MetadataReader::new(cache, self.kv_start, self.kv_end, value_ref)?;
                let size = vr.read_u32::<LittleEndian>()?;
                read_value(&mut vr, size)?
            } else {
                read_value(&mut r, value_size)?
            };

            attrs.push(Xattr { namespace: XattrNamespace::from_prefix(kind & PREFIX_MASK), name, value });
        }
        Ok(attrs)
    }
}

fn read_value<R: Read>(r: &mut R, size: u32) -> Result<Vec<u8>> {
    let mut value = Vec::new();
    r.take(size.into()).read_to_end(&mut value)?;
    if value.len() != size as usize {
        return Err(FormatError::Truncated("xattr value runs past end of table").into());
    }
    Ok(value)
}
