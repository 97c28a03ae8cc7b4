mod archive;
mod block;
mod codec;
mod cursor;
mod directory;
mod error;
mod filedata;
mod fragment;
mod inode;
mod lzo;
mod metadata;
mod path;
mod source;
mod superblock;
mod xattr;

pub use archive::{open_archive, Archive, ArchiveOptions, DEFAULT_DATA_CACHE_BLOCKS, DEFAULT_METADATA_CACHE_BLOCKS};
pub use block::{CacheStats, DataBlockSize, METADATA_BLOCK_SIZE};
pub use codec::{CodecRegistry, CompressorOptions, Decompressor, GzipStrategies, XzFilters};
pub use cursor::Cursor;
pub use directory::{DirectoryEntry, ReadDir};
pub use error::{ByteName, Error, FormatError, IoError, PathError, Result};
pub use filedata::{FileReader, FileStream};
pub use fragment::FragmentEntry;
pub use inode::{
    DeviceInfo, DirIndexEntry, DirInfo, ExtDirInfo, ExtFileInfo, FileInfo, FileType, Inode, InodeInfo, IpcInfo,
    SymlinkInfo, NO_FRAGMENT, NO_XATTR,
};
pub use metadata::InodeRef;
pub use path::MAX_SYMLINK_HOPS;
pub use source::{ReadAt, SeekSource};
pub use superblock::{Compressor, Superblock, SuperblockFlags, MAGIC, SUPERBLOCK_SIZE, TABLE_ABSENT};
pub use xattr::{Xattr, XattrNamespace};
