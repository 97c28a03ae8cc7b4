use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::block::{BlockCache, DataBlockSize};
use super::error::{FormatError, Result};
use super::metadata::{div_ceil, InodeRef, MetadataReader};

/// Fragment index stored in file inodes whose tail is not packed into a fragment
pub const NO_FRAGMENT: u32 = u32::MAX;
/// Xattr index stored in extended inodes that carry no extended attributes
pub const NO_XATTR: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub(crate) enum InodeType {
    BasicDir = 1,
    BasicFile = 2,
    BasicSymlink = 3,
    BasicBlockDev = 4,
    BasicCharDev = 5,
    BasicFifo = 6,
    BasicSocket = 7,
    ExtDir = 8,
    ExtFile = 9,
    ExtSymlink = 10,
    ExtBlockDev = 11,
    ExtCharDev = 12,
    ExtFifo = 13,
    ExtSocket = 14,
}

/// The kind of object an inode or directory entry describes, with basic and extended forms folded
/// together. Directory entries always record the basic form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Directory,
    File,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    pub(crate) fn from_type_tag(tag: u16) -> Result<Self> {
        let t = InodeType::try_from(tag).map_err(|_| FormatError::BadInodeType(tag))?;
        Ok(match t {
            InodeType::BasicDir | InodeType::ExtDir => FileType::Directory,
            InodeType::BasicFile | InodeType::ExtFile => FileType::File,
            InodeType::BasicSymlink | InodeType::ExtSymlink => FileType::Symlink,
            InodeType::BasicBlockDev | InodeType::ExtBlockDev => FileType::BlockDevice,
            InodeType::BasicCharDev | InodeType::ExtCharDev => FileType::CharDevice,
            InodeType::BasicFifo | InodeType::ExtFifo => FileType::Fifo,
            InodeType::BasicSocket | InodeType::ExtSocket => FileType::Socket,
        })
    }

    /// The S_IFMT bits for this type
    pub fn mode_bits(&self) -> u32 {
        match self {
            FileType::Fifo => 0o010000,
            FileType::CharDevice => 0o020000,
            FileType::Directory => 0o040000,
            FileType::BlockDevice => 0o060000,
            FileType::File => 0o100000,
            FileType::Symlink => 0o120000,
            FileType::Socket => 0o140000,
        }
    }
}

/// Where a directory's listing lives in the directory table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirInfo {
    pub block_index: u32,
    pub block_offset: u16,
    pub link_count: u32,
    /// Size of the listing in bytes, plus 3
    pub file_size: u32,
    pub parent_inode: u32,
}

/// An entry of an extended directory's index, which records the first name stored in each
/// metadata block of a long listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirIndexEntry {
    pub index: u32,
    pub start: u32,
    pub name: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtDirInfo {
    pub dir: DirInfo,
    pub index: Vec<DirIndexEntry>,
    pub xattr_index: u32,
}

/// Where a regular file's data lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub blocks_start: u64,
    pub file_size: u64,
    pub frag_index: u32,
    pub frag_offset: u32,
    pub block_sizes: Vec<DataBlockSize>,
}

impl FileInfo {
    pub fn has_fragment(&self) -> bool {
        self.frag_index != NO_FRAGMENT
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtFileInfo {
    pub file: FileInfo,
    /// Bytes saved by sparse blocks
    pub sparse: u64,
    pub link_count: u32,
    pub xattr_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkInfo {
    pub link_count: u32,
    pub target: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub link_count: u32,
    pub device: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcInfo {
    pub link_count: u32,
}

/// Type-specific information about a filesystem object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeInfo {
    Directory(DirInfo),
    ExtendedDirectory(ExtDirInfo),
    File(FileInfo),
    ExtendedFile(ExtFileInfo),
    Symlink(SymlinkInfo),
    ExtendedSymlink { link: SymlinkInfo, xattr_index: u32 },
    BlockDevice(DeviceInfo),
    ExtendedBlockDevice { dev: DeviceInfo, xattr_index: u32 },
    CharDevice(DeviceInfo),
    ExtendedCharDevice { dev: DeviceInfo, xattr_index: u32 },
    Fifo(IpcInfo),
    ExtendedFifo { ipc: IpcInfo, xattr_index: u32 },
    Socket(IpcInfo),
    ExtendedSocket { ipc: IpcInfo, xattr_index: u32 },
}

/// Information about an object in the filesystem (ex. file, directory, device node)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    permissions: u16,
    uid_index: u16,
    gid_index: u16,
    mtime: u32,
    inode_number: u32,
    pub info: InodeInfo,
}

impl Inode {
    pub(crate) fn read<R: Read>(r: &mut R, block_size: u32) -> Result<Self> {
        let tag = r.read_u16::<LittleEndian>()?;
        let inode_type = InodeType::try_from(tag).map_err(|_| FormatError::BadInodeType(tag))?;
        let permissions = r.read_u16::<LittleEndian>()?;
        let uid_index = r.read_u16::<LittleEndian>()?;
        let gid_index = r.read_u16::<LittleEndian>()?;
        let mtime = r.read_u32::<LittleEndian>()?;
        let inode_number = r.read_u32::<LittleEndian>()?;

        let info = match inode_type {
            InodeType::BasicDir => InodeInfo::Directory(DirInfo {
                block_index: r.read_u32::<LittleEndian>()?,
                link_count: r.read_u32::<LittleEndian>()?,
                file_size: r.read_u16::<LittleEndian>()?.into(),
                block_offset: r.read_u16::<LittleEndian>()?,
                parent_inode: r.read_u32::<LittleEndian>()?,
            }),
            InodeType::ExtDir => {
                let link_count = r.read_u32::<LittleEndian>()?;
                let file_size = r.read_u32::<LittleEndian>()?;
                let block_index = r.read_u32::<LittleEndian>()?;
                let parent_inode = r.read_u32::<LittleEndian>()?;
                let index_count = r.read_u16::<LittleEndian>()?;
                let block_offset = r.read_u16::<LittleEndian>()?;
                let xattr_index = r.read_u32::<LittleEndian>()?;
                let mut index = Vec::with_capacity(index_count.into());
                for _ in 0..index_count {
                    let idx = r.read_u32::<LittleEndian>()?;
                    let start = r.read_u32::<LittleEndian>()?;
                    let name_size = r.read_u32::<LittleEndian>()?;
                    index.push(DirIndexEntry { index: idx, start, name: read_bytes(r, u64::from(name_size) + 1)? });
                }
                InodeInfo::ExtendedDirectory(ExtDirInfo {
                    dir: DirInfo { block_index, block_offset, link_count, file_size, parent_inode },
                    index,
                    xattr_index,
                })
            },
            InodeType::BasicFile => {
                let blocks_start = r.read_u32::<LittleEndian>()?.into();
                let frag_index = r.read_u32::<LittleEndian>()?;
                let frag_offset = r.read_u32::<LittleEndian>()?;
                let file_size = r.read_u32::<LittleEndian>()?.into();
                let block_sizes = read_block_sizes(r, file_size, frag_index, block_size)?;
                InodeInfo::File(FileInfo { blocks_start, file_size, frag_index, frag_offset, block_sizes })
            },
            InodeType::ExtFile => {
                let blocks_start = r.read_u64::<LittleEndian>()?;
                let file_size = r.read_u64::<LittleEndian>()?;
                let sparse = r.read_u64::<LittleEndian>()?;
                let link_count = r.read_u32::<LittleEndian>()?;
                let frag_index = r.read_u32::<LittleEndian>()?;
                let frag_offset = r.read_u32::<LittleEndian>()?;
                let xattr_index = r.read_u32::<LittleEndian>()?;
                let block_sizes = read_block_sizes(r, file_size, frag_index, block_size)?;
                InodeInfo::ExtendedFile(ExtFileInfo {
                    file: FileInfo { blocks_start, file_size, frag_index, frag_offset, block_sizes },
                    sparse,
                    link_count,
                    xattr_index,
                })
            },
            InodeType::BasicSymlink | InodeType::ExtSymlink => {
                let link_count = r.read_u32::<LittleEndian>()?;
                let target_size = r.read_u32::<LittleEndian>()?;
                let link = SymlinkInfo { link_count, target: read_bytes(r, target_size.into())? };
                if inode_type == InodeType::ExtSymlink {
                    InodeInfo::ExtendedSymlink { link, xattr_index: r.read_u32::<LittleEndian>()? }
                } else {
                    InodeInfo::Symlink(link)
                }
            },
            InodeType::BasicBlockDev | InodeType::BasicCharDev
            | InodeType::ExtBlockDev | InodeType::ExtCharDev => {
                let dev = DeviceInfo {
                    link_count: r.read_u32::<LittleEndian>()?,
                    device: r.read_u32::<LittleEndian>()?,
                };
                match inode_type {
                    InodeType::BasicBlockDev => InodeInfo::BlockDevice(dev),
                    InodeType::BasicCharDev => InodeInfo::CharDevice(dev),
                    InodeType::ExtBlockDev => InodeInfo::ExtendedBlockDevice { dev, xattr_index: r.read_u32::<LittleEndian>()? },
                    _ => InodeInfo::ExtendedCharDevice { dev, xattr_index: r.read_u32::<LittleEndian>()? },
                }
            },
            InodeType::BasicFifo | InodeType::BasicSocket
            | InodeType::ExtFifo | InodeType::ExtSocket => {
                let ipc = IpcInfo { link_count: r.read_u32::<LittleEndian>()? };
                match inode_type {
                    InodeType::BasicFifo => InodeInfo::Fifo(ipc),
                    InodeType::BasicSocket => InodeInfo::Socket(ipc),
                    InodeType::ExtFifo => InodeInfo::ExtendedFifo { ipc, xattr_index: r.read_u32::<LittleEndian>()? },
                    _ => InodeInfo::ExtendedSocket { ipc, xattr_index: r.read_u32::<LittleEndian>()? },
                }
            },
        };

        Ok(Self { permissions, uid_index, gid_index, mtime, inode_number, info })
    }

    pub fn permissions(&self) -> u16 {
        self.permissions
    }

    /// Index into the id table, see [`Archive::uid`](super::Archive::uid)
    pub fn uid_index(&self) -> u16 {
        self.uid_index
    }

    pub fn gid_index(&self) -> u16 {
        self.gid_index
    }

    /// Modification time in seconds since the epoch
    pub fn mtime(&self) -> u32 {
        self.mtime
    }

    pub fn inode_number(&self) -> u32 {
        self.inode_number
    }

    pub fn file_type(&self) -> FileType {
        match &self.info {
            InodeInfo::Directory(_) | InodeInfo::ExtendedDirectory(_) => FileType::Directory,
            InodeInfo::File(_) | InodeInfo::ExtendedFile(_) => FileType::File,
            InodeInfo::Symlink(_) | InodeInfo::ExtendedSymlink { .. } => FileType::Symlink,
            InodeInfo::BlockDevice(_) | InodeInfo::ExtendedBlockDevice { .. } => FileType::BlockDevice,
            InodeInfo::CharDevice(_) | InodeInfo::ExtendedCharDevice { .. } => FileType::CharDevice,
            InodeInfo::Fifo(_) | InodeInfo::ExtendedFifo { .. } => FileType::Fifo,
            InodeInfo::Socket(_) | InodeInfo::ExtendedSocket { .. } => FileType::Socket,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == FileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == FileType::Symlink
    }

    pub fn dir_info(&self) -> Option<&DirInfo> {
        match &self.info {
            InodeInfo::Directory(d) => Some(d),
            InodeInfo::ExtendedDirectory(e) => Some(&e.dir),
            _ => None,
        }
    }

    pub fn file_info(&self) -> Option<&FileInfo> {
        match &self.info {
            InodeInfo::File(f) => Some(f),
            InodeInfo::ExtendedFile(e) => Some(&e.file),
            _ => None,
        }
    }

    pub fn symlink_target(&self) -> Option<&[u8]> {
        match &self.info {
            InodeInfo::Symlink(l) | InodeInfo::ExtendedSymlink { link: l, .. } => Some(&l.target),
            _ => None,
        }
    }

    /// Device number of a block or character device
    pub fn device(&self) -> Option<u32> {
        match &self.info {
            InodeInfo::BlockDevice(d) | InodeInfo::CharDevice(d)
            | InodeInfo::ExtendedBlockDevice { dev: d, .. }
            | InodeInfo::ExtendedCharDevice { dev: d, .. } => Some(d.device),
            _ => None,
        }
    }

    /// Index into the xattr id table, for extended inodes that carry attributes
    pub fn xattr_index(&self) -> Option<u32> {
        let idx = match &self.info {
            InodeInfo::ExtendedDirectory(e) => e.xattr_index,
            InodeInfo::ExtendedFile(e) => e.xattr_index,
            InodeInfo::ExtendedSymlink { xattr_index, .. }
            | InodeInfo::ExtendedBlockDevice { xattr_index, .. }
            | InodeInfo::ExtendedCharDevice { xattr_index, .. }
            | InodeInfo::ExtendedFifo { xattr_index, .. }
            | InodeInfo::ExtendedSocket { xattr_index, .. } => *xattr_index,
            _ => return None,
        };
        (idx != NO_XATTR).then_some(idx)
    }

    pub fn link_count(&self) -> u32 {
        match &self.info {
            InodeInfo::Directory(d) => d.link_count,
            InodeInfo::ExtendedDirectory(e) => e.dir.link_count,
            // Basic file inodes don't store a link count
            InodeInfo::File(_) => 1,
            InodeInfo::ExtendedFile(e) => e.link_count,
            InodeInfo::Symlink(l) | InodeInfo::ExtendedSymlink { link: l, .. } => l.link_count,
            InodeInfo::BlockDevice(d) | InodeInfo::CharDevice(d)
            | InodeInfo::ExtendedBlockDevice { dev: d, .. }
            | InodeInfo::ExtendedCharDevice { dev: d, .. } => d.link_count,
            InodeInfo::Fifo(i) | InodeInfo::Socket(i)
            | InodeInfo::ExtendedFifo { ipc: i, .. }
            | InodeInfo::ExtendedSocket { ipc: i, .. } => i.link_count,
        }
    }

    /// Size in bytes: file length for files, target length for symlinks, and the listing size for
    /// directories.
    pub fn file_size(&self) -> u64 {
        match &self.info {
            InodeInfo::Directory(d) => d.file_size.into(),
            InodeInfo::ExtendedDirectory(e) => e.dir.file_size.into(),
            InodeInfo::File(f) => f.file_size,
            InodeInfo::ExtendedFile(e) => e.file.file_size,
            InodeInfo::Symlink(l) | InodeInfo::ExtendedSymlink { link: l, .. } => l.target.len() as u64,
            _ => 0,
        }
    }

    pub fn mode(&self) -> u32 {
        u32::from(self.permissions) | self.file_type().mode_bits()
    }
}

fn read_bytes<R: Read>(r: &mut R, len: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(FormatError::Truncated("name runs past end of table").into());
    }
    Ok(buf)
}

fn read_block_sizes<R: Read>(r: &mut R, file_size: u64, frag_index: u32, block_size: u32) -> Result<Vec<DataBlockSize>> {
    let count = if frag_index == NO_FRAGMENT {
        div_ceil!(file_size, u64::from(block_size))
    } else {
        file_size / u64::from(block_size)
    };
    // The count comes from the archive; let a bogus size fail on reading rather than on allocating
    let mut sizes = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        sizes.push(DataBlockSize(r.read_u32::<LittleEndian>()?));
    }
    Ok(sizes)
}

/// Resolves inode references against the inode table
#[derive(Debug)]
pub(crate) struct InodeTable {
    start: u64,
    end: u64,
    block_size: u32,
}

impl InodeTable {
    pub fn new(start: u64, end: u64, block_size: u32) -> Self {
        Self { start, end, block_size }
    }

    pub fn resolve(&self, cache: &BlockCache, r: InodeRef) -> Result<Inode> {
        let mut reader = MetadataReader::new(cache, self.start, self.end, r)?;
        Inode::read(&mut reader, self.block_size)
    }
}
