use std::fmt;
use std::io;

use thiserror::Error;

/// A byte string from the archive (a name or a path), displayed lossily as UTF-8.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ByteName(pub Vec<u8>);

impl ByteName {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for ByteName {
    fn from(b: &[u8]) -> Self {
        ByteName(b.to_vec())
    }
}

impl From<Vec<u8>> for ByteName {
    fn from(b: Vec<u8>) -> Self {
        ByteName(b)
    }
}

impl fmt::Display for ByteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for ByteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

/// The archive is malformed or uses something this reader can't handle.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("unsupported compressor id {0}")]
    UnsupportedCodec(u16),

    #[error("corrupt block at offset {offset}: {reason}")]
    CorruptBlock { offset: u64, reason: String },

    #[error("truncated archive: {0}")]
    Truncated(&'static str),

    #[error("fragment index {index} out of range ({count} fragments)")]
    BadFragmentIndex { index: u32, count: u32 },

    #[error("bad block size {block_size} (block_log {block_log})")]
    BadBlockSize { block_size: u32, block_log: u16 },

    #[error("unknown inode type {0}")]
    BadInodeType(u16),

    #[error("root inode is not a directory")]
    RootNotDirectory,

    #[error("{table} table starts at {offset}, beyond the end of the archive")]
    TableOutOfRange { table: &'static str, offset: u64 },

    #[error("id index {index} out of range ({count} ids)")]
    BadIdIndex { index: u16, count: u16 },

    #[error("xattr index {index} out of range ({count} entries)")]
    BadXattrIndex { index: u32, count: u32 },

    #[error("archive has no export table")]
    NoExportTable,

    #[error("inode number {number} out of range ({count} inodes)")]
    BadInodeNumber { number: u32, count: u32 },
}

/// Navigation failures. These are ordinary outcomes of looking up a path.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("{path}: no entry named '{component}'")]
    NotFound { path: ByteName, component: ByteName },

    #[error("{path}: '{component}' is not a directory")]
    NotADirectory { path: ByteName, component: ByteName },

    #[error("{path}: '{component}' is not a regular file")]
    NotAFile { path: ByteName, component: ByteName },

    #[error("{path}: '{component}' is not a symbolic link")]
    NotASymlink { path: ByteName, component: ByteName },

    #[error("{path}: too many levels of symbolic links")]
    TooManyLinks { path: ByteName },
}

impl PathError {
    /// The path component at which resolution stopped, if any.
    pub fn component(&self) -> Option<&[u8]> {
        match self {
            PathError::NotFound { component, .. }
            | PathError::NotADirectory { component, .. }
            | PathError::NotAFile { component, .. }
            | PathError::NotASymlink { component, .. } => Some(component.as_bytes()),
            PathError::TooManyLinks { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum IoError {
    #[error("read of archive at offset {offset} failed")]
    Read {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("read at {offset} is past the end of the file ({size} bytes)")]
    OutOfRange { offset: u64, size: u64 },

    #[error(transparent)]
    Other(io::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Io(#[from] IoError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Error::Format(FormatError::CorruptBlock { offset, reason: reason.into() })
    }

    // Codecs don't know where their input came from; the caller fills in the block offset.
    pub(crate) fn at_offset(self, at: u64) -> Self {
        match self {
            Error::Format(FormatError::CorruptBlock { reason, .. }) => {
                Error::Format(FormatError::CorruptBlock { offset: at, reason })
            },
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Path(PathError::NotFound { .. }))
    }
}

// Parsing runs over io::Read adapters, so crate errors travel inside io::Error
// and are recovered here.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = e.into_inner() {
                if let Ok(err) = inner.downcast::<Error>() {
                    return *err;
                }
            }
            // into_inner only fails when there is no inner error, checked above
            return Error::Io(IoError::Other(io::Error::other("lost inner error")));
        }
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::Format(FormatError::Truncated("record runs past end of table")),
            _ => Error::Io(IoError::Other(e)),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(IoError::Other(e)) => e,
            Error::Io(IoError::Read { source, .. }) => source,
            Error::Path(PathError::NotFound { .. }) => io::Error::new(io::ErrorKind::NotFound, e),
            Error::Format(FormatError::Truncated(_)) => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            _ => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}
