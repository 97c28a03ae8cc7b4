use std::io::Read;

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::{FromPrimitive, IntoPrimitive};

use super::error::{FormatError, Result};
use super::metadata::InodeRef;

pub const MAGIC: u32 = 0x73717368;
pub const SUPERBLOCK_SIZE: usize = 96;
pub const VERSION_MAJOR: u16 = 4;
pub const VERSION_MINOR: u16 = 0;

/// Table offset value meaning "this table is not present"
pub const TABLE_ABSENT: u64 = u64::MAX;

const MIN_BLOCK_LOG: u16 = 12;
const MAX_BLOCK_LOG: u16 = 20;

#[derive(Debug, Clone)]
pub struct Superblock {
    pub magic: u32,
    pub inode_count: u32,
    pub mod_time: u32,
    pub block_size: u32,
    pub frag_count: u32,
    pub compression_id: u16,
    pub compressor: Compressor,
    pub block_log: u16,
    pub flags: SuperblockFlags,
    pub id_count: u16,
    pub version_major: u16,
    pub version_minor: u16,
    pub root_inode: InodeRef,
    pub bytes_used: u64,
    pub id_table: u64,
    pub xattr_table: u64,
    pub inode_table: u64,
    pub dir_table: u64,
    pub frag_table: u64,
    pub export_table: u64,
}

bitflags! {
    pub struct SuperblockFlags: u16 {
        const INODES_UNCOMPRESSED = 0x0001;
        const DATABLOCKS_UNCOMPRESSED = 0x0002;
        const FRAGMENTS_UNCOMPRESSED = 0x0008;
        const FRAGMENTS_NOT_USED = 0x0010;
        const FRAGMENTS_ALWAYS_GENERATED = 0x0020;
        const DATA_DEDUPLICATED = 0x0040;
        const NFS_EXPORT_EXISTS = 0x0080;
        const XATTRS_UNCOMPRESSED = 0x0100;
        const NO_XATTRS = 0x0200;
        const COMPRESSOR_OPTIONS_PRESENT = 0x0400;
        const ID_TABLE_UNCOMPRESSED = 0x0800;
    }
}

/// Compression algorithm ids as stored in the superblock
#[derive(Debug, IntoPrimitive, FromPrimitive, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compressor {
    Gzip = 1,
    Lzo = 2,
    Lzma = 3,
    Xz = 4,
    Lz4 = 5,
    Zstd = 6,
    #[num_enum(default)]
    Unknown = 0xFFFF,
}

impl Superblock {
    /// Parse the fixed-size header. This only validates the header itself; table offsets are
    /// checked when the archive is opened.
    pub fn parse(b: &[u8]) -> Result<Superblock> {
        if b.len() < SUPERBLOCK_SIZE {
            return Err(FormatError::Truncated("superblock").into());
        }
        let sb = Superblock::read(&mut &b[..SUPERBLOCK_SIZE])?;
        sb.validate()?;
        Ok(sb)
    }

    fn read<R>(r: &mut R) -> Result<Superblock>
    where R: Read
    {
        let magic = r.read_u32::<LittleEndian>()?;
        let inode_count = r.read_u32::<LittleEndian>()?;
        let mod_time = r.read_u32::<LittleEndian>()?;
        let block_size = r.read_u32::<LittleEndian>()?;
        let frag_count = r.read_u32::<LittleEndian>()?;
        let compression_id = r.read_u16::<LittleEndian>()?;
        Ok(Superblock {
            magic,
            inode_count,
            mod_time,
            block_size,
            frag_count,
            compression_id,
            compressor: Compressor::from(compression_id),
            block_log: r.read_u16::<LittleEndian>()?,
            flags: SuperblockFlags::from_bits_truncate(r.read_u16::<LittleEndian>()?),
            id_count: r.read_u16::<LittleEndian>()?,
            version_major: r.read_u16::<LittleEndian>()?,
            version_minor: r.read_u16::<LittleEndian>()?,
            root_inode: InodeRef::from_raw(r.read_u64::<LittleEndian>()?),
            bytes_used: r.read_u64::<LittleEndian>()?,
            id_table: r.read_u64::<LittleEndian>()?,
            xattr_table: r.read_u64::<LittleEndian>()?,
            inode_table: r.read_u64::<LittleEndian>()?,
            dir_table: r.read_u64::<LittleEndian>()?,
            frag_table: r.read_u64::<LittleEndian>()?,
            export_table: r.read_u64::<LittleEndian>()?,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(FormatError::BadMagic(self.magic).into());
        }
        if self.version_major != VERSION_MAJOR || self.version_minor != VERSION_MINOR {
            return Err(FormatError::UnsupportedVersion {
                major: self.version_major,
                minor: self.version_minor,
            }.into());
        }
        let log_ok = (MIN_BLOCK_LOG..=MAX_BLOCK_LOG).contains(&self.block_log);
        if !log_ok || self.block_size != 1u32 << self.block_log {
            return Err(FormatError::BadBlockSize {
                block_size: self.block_size,
                block_log: self.block_log,
            }.into());
        }
        Ok(())
    }

    pub fn has_table(offset: u64) -> bool {
        offset != TABLE_ABSENT
    }

    /// Where the table beginning at `start` must end: the next table start after it, or the end
    /// of the used archive bytes.
    pub fn table_end(&self, start: u64) -> u64 {
        [self.inode_table, self.dir_table, self.frag_table, self.export_table, self.id_table, self.xattr_table]
            .into_iter()
            .filter(|&t| Superblock::has_table(t) && t > start)
            .min()
            .unwrap_or(self.bytes_used)
            .min(self.bytes_used)
    }

    /// Check that every present table begins inside the used area of the archive
    pub fn check_table_offsets(&self) -> Result<()> {
        let tables = [
            ("inode", self.inode_table),
            ("directory", self.dir_table),
            ("fragment", self.frag_table),
            ("export", self.export_table),
            ("id", self.id_table),
            ("xattr", self.xattr_table),
        ];
        for (table, offset) in tables {
            // The inode and directory tables are mandatory
            let required = table == "inode" || table == "directory";
            if !Superblock::has_table(offset) {
                if required {
                    return Err(FormatError::TableOutOfRange { table, offset }.into());
                }
                continue;
            }
            if offset < SUPERBLOCK_SIZE as u64 || offset >= self.bytes_used {
                return Err(FormatError::TableOutOfRange { table, offset }.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::squashfs::error::Error;
    use byteorder::WriteBytesExt;

    pub(crate) fn sample_header() -> Vec<u8> {
        let mut b = Vec::new();
        b.write_u32::<LittleEndian>(MAGIC).unwrap();
        b.write_u32::<LittleEndian>(3).unwrap(); // inode_count
        b.write_u32::<LittleEndian>(1_700_000_000).unwrap();
        b.write_u32::<LittleEndian>(131072).unwrap();
        b.write_u32::<LittleEndian>(1).unwrap(); // frag_count
        b.write_u16::<LittleEndian>(1).unwrap(); // gzip
        b.write_u16::<LittleEndian>(17).unwrap();
        b.write_u16::<LittleEndian>(0x0200).unwrap();
        b.write_u16::<LittleEndian>(1).unwrap(); // id_count
        b.write_u16::<LittleEndian>(4).unwrap();
        b.write_u16::<LittleEndian>(0).unwrap();
        b.write_u64::<LittleEndian>(0x20_0010).unwrap(); // root inode ref
        b.write_u64::<LittleEndian>(4096).unwrap(); // bytes_used
        for t in [4000u64, TABLE_ABSENT, 200, 1000, 3000, TABLE_ABSENT] {
            b.write_u64::<LittleEndian>(t).unwrap();
        }
        b
    }

    #[test]
    fn test_parse_superblock() -> Result<()> {
        let sb = Superblock::parse(&sample_header())?;
        assert_eq!(sb.magic, MAGIC);
        assert_eq!(sb.compressor, Compressor::Gzip);
        assert_eq!(sb.block_size, 1 << sb.block_log);
        assert!(sb.flags.contains(SuperblockFlags::NO_XATTRS));
        assert_eq!(sb.root_inode.block(), 0x20);
        assert_eq!(sb.root_inode.offset(), 0x10);
        assert!(!Superblock::has_table(sb.xattr_table));
        assert_eq!(sb.table_end(sb.inode_table), 1000);
        assert_eq!(sb.table_end(sb.frag_table), 4000);
        assert_eq!(sb.table_end(sb.id_table), 4096);
        sb.check_table_offsets()?;
        Ok(())
    }

    #[test]
    fn test_bad_magic() {
        let mut b = sample_header();
        b[0] = b'x';
        assert!(matches!(Superblock::parse(&b), Err(Error::Format(FormatError::BadMagic(_)))));
    }

    #[test]
    fn test_truncated() {
        let b = sample_header();
        assert!(matches!(Superblock::parse(&b[..95]), Err(Error::Format(FormatError::Truncated(_)))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut b = sample_header();
        b[28] = 3;
        assert!(matches!(
            Superblock::parse(&b),
            Err(Error::Format(FormatError::UnsupportedVersion { major: 3, minor: 0 }))
        ));
    }

    #[test]
    fn test_block_log_mismatch() {
        let mut b = sample_header();
        b[22] = 16;
        assert!(matches!(Superblock::parse(&b), Err(Error::Format(FormatError::BadBlockSize { .. }))));
    }

    #[test]
    fn test_unknown_compressor_parses() -> Result<()> {
        let mut b = sample_header();
        b[20] = 42;
        let sb = Superblock::parse(&b)?;
        assert_eq!(sb.compressor, Compressor::Unknown);
        assert_eq!(sb.compression_id, 42);
        Ok(())
    }

    #[test]
    fn test_table_out_of_range() -> Result<()> {
        let mut sb = Superblock::parse(&sample_header())?;
        sb.frag_table = 10_000;
        assert!(matches!(
            sb.check_table_offsets(),
            Err(Error::Format(FormatError::TableOutOfRange { table: "fragment", .. }))
        ));
        Ok(())
    }
}
