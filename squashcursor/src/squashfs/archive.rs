//! See https://dr-emann.github.io/squashfs/squashfs.html
//! for details on the SquashFS binary format

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use super::block::{BlockCache, CacheStats};
use super::codec::{CodecRegistry, CompressorOptions};
use super::cursor::Cursor;
use super::directory::ReadDir;
use super::error::{Error, FormatError, IoError, Result};
use super::filedata::FileReader;
use super::fragment::FragmentTable;
use super::inode::{DirInfo, Inode, InodeTable};
use super::metadata::{ExportTable, IdTable, InodeRef};
use super::source::ReadAt;
use super::superblock::{Superblock, SuperblockFlags, SUPERBLOCK_SIZE};
use super::xattr::{Xattr, XattrTable};

pub const DEFAULT_METADATA_CACHE_BLOCKS: usize = 1024;
pub const DEFAULT_DATA_CACHE_BLOCKS: usize = 32;

/// Settings for opening an archive
#[derive(Debug)]
pub struct ArchiveOptions {
    metadata_cache_blocks: usize,
    data_cache_blocks: usize,
    codecs: CodecRegistry,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            metadata_cache_blocks: DEFAULT_METADATA_CACHE_BLOCKS,
            data_cache_blocks: DEFAULT_DATA_CACHE_BLOCKS,
            codecs: CodecRegistry::default(),
        }
    }
}

impl ArchiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many decompressed metadata blocks (up to 8KiB each) to keep
    pub fn metadata_cache_blocks(mut self, n: usize) -> Self {
        self.metadata_cache_blocks = n;
        self
    }

    /// How many decompressed data and fragment blocks (up to `block_size` each) to keep
    pub fn data_cache_blocks(mut self, n: usize) -> Self {
        self.data_cache_blocks = n;
        self
    }

    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }
}

#[derive(Debug)]
pub(crate) struct ArchiveInner {
    pub(crate) sb: Superblock,
    pub(crate) cache: BlockCache,
    pub(crate) fragments: FragmentTable,
    inodes: InodeTable,
    dir_table_end: u64,
    ids: Option<IdTable>,
    export: Option<ExportTable>,
    xattrs: Option<XattrTable>,
    compressor_options: Option<CompressorOptions>,
    root: Arc<Inode>,
}

/// An opened SquashFS archive. All tables are located once at open time; everything after that
/// is read on demand through a shared block cache.
///
/// `Archive` is a cheap handle: clones share the same tables and cache, and it may be used from
/// several threads at once.
#[derive(Debug, Clone)]
pub struct Archive {
    pub(crate) inner: Arc<ArchiveInner>,
}

/// Open an archive with the default options
pub fn open_archive<S: ReadAt + 'static>(source: S) -> Result<Archive> {
    Archive::open(source)
}

impl Archive {
    pub fn open<S: ReadAt + 'static>(source: S) -> Result<Self> {
        Self::open_with(source, ArchiveOptions::default())
    }

    /// Open the file at `path` as an archive
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(path).map_err(IoError::Other)?;
        Self::open(f)
    }

    pub fn open_with<S: ReadAt + 'static>(source: S, options: ArchiveOptions) -> Result<Self> {
        let source: Arc<dyn ReadAt> = Arc::new(source);

        let mut header = [0; SUPERBLOCK_SIZE];
        source.read_exact_at(&mut header, 0).map_err(|e| -> Error {
            match e.kind() {
                io::ErrorKind::UnexpectedEof => FormatError::Truncated("superblock").into(),
                _ => IoError::Read { offset: 0, source: e }.into(),
            }
        })?;
        let sb = Superblock::parse(&header)?;
        if !options.codecs.supports(sb.compression_id) {
            return Err(FormatError::UnsupportedCodec(sb.compression_id).into());
        }
        sb.check_table_offsets()?;

        let cache = BlockCache::new(source, options.codecs, sb.compression_id, sb.block_size,
            options.metadata_cache_blocks, options.data_cache_blocks);

        let compressor_options = if sb.flags.contains(SuperblockFlags::COMPRESSOR_OPTIONS_PRESENT) {
            let (b, _) = cache.read_metadata_block(SUPERBLOCK_SIZE as u64)?;
            CompressorOptions::parse(sb.compressor, &b)?
        } else {
            None
        };

        let fragments = if sb.frag_count > 0 && Superblock::has_table(sb.frag_table) {
            FragmentTable::read(&cache, sb.frag_table, sb.table_end(sb.frag_table), sb.frag_count)?
        } else {
            FragmentTable::none()
        };
        let ids = if Superblock::has_table(sb.id_table) {
            Some(IdTable::read(&cache, sb.id_table, sb.table_end(sb.id_table), sb.id_count)?)
        } else {
            None
        };
        let export = if Superblock::has_table(sb.export_table) {
            Some(ExportTable::read(&cache, sb.export_table, sb.table_end(sb.export_table), sb.inode_count)?)
        } else {
            None
        };
        let xattrs = if Superblock::has_table(sb.xattr_table) && !sb.flags.contains(SuperblockFlags::NO_XATTRS) {
            Some(XattrTable::read(&cache, sb.xattr_table, sb.table_end(sb.xattr_table))?)
        } else {
            None
        };

        let inodes = InodeTable::new(sb.inode_table, sb.table_end(sb.inode_table), sb.block_size);
        let root = inodes.resolve(&cache, sb.root_inode)?;
        if !root.is_dir() {
            log::warn!("root inode {:?} is a {:?}", sb.root_inode, root.file_type());
            return Err(FormatError::RootNotDirectory.into());
        }

        log::debug!(
            "opened archive: {:?} compression, block size {}, {} inodes, {} fragments, {} bytes",
            sb.compressor, sb.block_size, sb.inode_count, sb.frag_count, sb.bytes_used
        );

        let dir_table_end = sb.table_end(sb.dir_table);
        Ok(Archive {
            inner: Arc::new(ArchiveInner {
                sb,
                cache,
                fragments,
                inodes,
                dir_table_end,
                ids,
                export,
                xattrs,
                compressor_options,
                root: Arc::new(root),
            }),
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.inner.sb
    }

    /// Encoder settings recorded in the archive, if it stored any
    pub fn compressor_options(&self) -> Option<&CompressorOptions> {
        self.inner.compressor_options.as_ref()
    }

    /// A cursor positioned at the root directory
    pub fn root(&self) -> Cursor {
        Cursor::root(self.clone(), self.inner.sb.root_inode, self.inner.root.clone())
    }

    pub fn inode(&self, r: InodeRef) -> Result<Inode> {
        self.inner.inodes.resolve(&self.inner.cache, r)
    }

    /// Look up an inode by number. Needs the export table, which not every archive has.
    pub fn inode_by_number(&self, number: u32) -> Result<Inode> {
        let export = self.inner.export.as_ref().ok_or(FormatError::NoExportTable)?;
        let r = export.get(&self.inner.cache, number)?;
        self.inode(r)
    }

    /// List a directory given its inode's [`DirInfo`]. Callers navigating by name should use
    /// [`Cursor::list`] instead.
    pub fn read_dir(&self, dir: &DirInfo) -> Result<ReadDir<'_>> {
        ReadDir::new(&self.inner.cache, self.inner.sb.dir_table, self.inner.dir_table_end, dir)
    }

    /// A reader over a regular file's contents, or None if `inode` is not a regular file.
    /// Fails if the file's data blocks don't lie within the archive.
    pub fn open_file(&self, inode: &Inode) -> Result<Option<FileReader>> {
        FileReader::new(self.clone(), inode)
    }

    pub fn uid(&self, inode: &Inode) -> Result<u32> {
        self.id(inode.uid_index())
    }

    pub fn gid(&self, inode: &Inode) -> Result<u32> {
        self.id(inode.gid_index())
    }

    fn id(&self, index: u16) -> Result<u32> {
        match &self.inner.ids {
            Some(ids) => ids.get(&self.inner.cache, index),
            None => Err(FormatError::BadIdIndex { index, count: 0 }.into()),
        }
    }

    /// Extended attributes of `inode`. Empty for inodes without any.
    pub fn xattrs(&self, inode: &Inode) -> Result<Vec<Xattr>> {
        let (index, table) = match (inode.xattr_index(), &self.inner.xattrs) {
            (Some(i), Some(t)) => (i, t),
            (Some(index), None) => return Err(FormatError::BadXattrIndex { index, count: 0 }.into()),
            (None, _) => return Ok(Vec::new()),
        };
        table.get(&self.inner.cache, index)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub(crate) fn same_archive(&self, other: &Archive) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
