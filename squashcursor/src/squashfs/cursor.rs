use std::fmt;
use std::sync::Arc;

use super::archive::Archive;
use super::directory::{DirectoryEntry, ReadDir};
use super::error::{Error, PathError, Result};
use super::filedata::FileReader;
use super::inode::{FileType, Inode};
use super::metadata::InodeRef;

/// Split a path into its non-empty components, so repeated and trailing separators are ignored
pub(crate) fn components(path: &[u8]) -> impl DoubleEndedIterator<Item = &[u8]> {
    path.split(|b| *b == b'/').filter(|c| !c.is_empty())
}

fn last_component(path: &[u8]) -> &[u8] {
    components(path).last().unwrap_or(&b"."[..])
}

#[derive(Clone)]
pub(crate) struct Frame {
    pub(crate) name: Vec<u8>,
    pub(crate) inode_ref: InodeRef,
    pub(crate) inode: Arc<Inode>,
}

// What a path names: a directory, which a cursor can stand on, or anything else
pub(crate) enum Resolved {
    Dir(Cursor),
    Other(Inode),
}

/// A position in the archive's directory tree.
///
/// A cursor names one directory and remembers the directories above it, so that `..` and
/// [`Cursor::path`] work. Navigating returns a new cursor and leaves the original untouched;
/// cursors can be cloned freely and used from several threads.
#[derive(Clone)]
pub struct Cursor {
    archive: Archive,
    // From the root down to this directory; never empty
    frames: Vec<Frame>,
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.archive.same_archive(&other.archive) && self.inode_ref() == other.inode_ref()
    }
}

impl Eq for Cursor {}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("path", &String::from_utf8_lossy(&self.path()))
            .field("inode_ref", &self.inode_ref())
            .finish()
    }
}

impl Cursor {
    pub(crate) fn root(archive: Archive, inode_ref: InodeRef, inode: Arc<Inode>) -> Self {
        Self { archive, frames: vec![Frame { name: Vec::new(), inode_ref, inode }] }
    }

    fn top(&self) -> &Frame {
        // frames always holds at least the root
        &self.frames[self.frames.len() - 1]
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn inode_ref(&self) -> InodeRef {
        self.top().inode_ref
    }

    /// The directory inode this cursor stands on
    pub fn inode(&self) -> &Inode {
        &self.top().inode
    }

    pub fn is_root(&self) -> bool {
        self.frames.len() == 1
    }

    /// Absolute path of this directory within the archive, e.g. `/etc/ssl`
    pub fn path(&self) -> Vec<u8> {
        if self.is_root() {
            return b"/".to_vec();
        }
        let mut p = Vec::new();
        for f in &self.frames[1..] {
            p.push(b'/');
            p.extend_from_slice(&f.name);
        }
        p
    }

    /// The entries of this directory, in on-disk order
    pub fn list(&self) -> Result<ReadDir<'_>> {
        match self.inode().dir_info() {
            Some(d) => self.archive.read_dir(d),
            // Cursors are only ever built on directory inodes
            None => Err(PathError::NotADirectory { path: self.path().into(), component: self.top().name.clone().into() }.into()),
        }
    }

    /// Find the first entry of this directory named exactly `name`
    pub fn find(&self, name: &[u8]) -> Result<Option<DirectoryEntry>> {
        for e in self.list()? {
            let e = e?;
            if e.name() == name {
                return Ok(Some(e));
            }
        }
        Ok(None)
    }

    pub(crate) fn lookup(&self, path: &[u8], name: &[u8]) -> Result<DirectoryEntry> {
        self.find(name)?.ok_or_else(|| PathError::NotFound { path: path.into(), component: name.into() }.into())
    }

    // Start of resolution: the root for absolute paths, this cursor otherwise
    pub(crate) fn start(&self, path: &[u8]) -> Cursor {
        if path.first() == Some(&b'/') {
            self.archive.root()
        } else {
            self.clone()
        }
    }

    pub(crate) fn parent(&mut self) {
        // The root is its own parent
        if !self.is_root() {
            self.frames.pop();
        }
    }

    pub(crate) fn push(&mut self, name: &[u8], inode_ref: InodeRef, inode: Inode) {
        self.frames.push(Frame { name: name.to_vec(), inode_ref, inode: Arc::new(inode) });
    }

    // Move into the subdirectory `name`, or handle `.` and `..`
    fn step(&mut self, path: &[u8], name: &[u8]) -> Result<()> {
        match name {
            b"." => {},
            b".." => self.parent(),
            _ => {
                let not_dir = || -> Error { PathError::NotADirectory { path: path.into(), component: name.into() }.into() };
                let entry = self.lookup(path, name)?;
                if entry.file_type() != FileType::Directory {
                    return Err(not_dir());
                }
                let inode = self.archive.inode(entry.inode_ref())?;
                if !inode.is_dir() {
                    log::warn!("entry '{}' is listed as a directory but its inode is a {:?}", entry.file_name(), inode.file_type());
                    return Err(not_dir());
                }
                self.push(name, entry.inode_ref(), inode);
            },
        }
        Ok(())
    }

    /// Change to the directory at `path`, relative to this cursor unless it starts with `/`.
    /// Every component must name a directory; symbolic links are not followed.
    pub fn cd<P: AsRef<[u8]>>(&self, path: P) -> Result<Cursor> {
        let path = path.as_ref();
        let mut cur = self.start(path);
        for c in components(path) {
            cur.step(path, c)?;
        }
        Ok(cur)
    }

    // Resolve every component but the last as a directory; the last may be anything
    pub(crate) fn resolve(&self, path: &[u8]) -> Result<Resolved> {
        let mut cur = self.start(path);
        let mut comps = components(path);
        let last = match comps.next_back() {
            Some(l) => l,
            None => return Ok(Resolved::Dir(cur)),
        };
        for c in comps {
            cur.step(path, c)?;
        }
        if last == b"." || last == b".." {
            cur.step(path, last)?;
            return Ok(Resolved::Dir(cur));
        }

        let entry = cur.lookup(path, last)?;
        let inode = cur.archive.inode(entry.inode_ref())?;
        if inode.is_dir() {
            cur.push(last, entry.inode_ref(), inode);
            Ok(Resolved::Dir(cur))
        } else {
            Ok(Resolved::Other(inode))
        }
    }

    /// Open the regular file at `path` for reading
    pub fn open<P: AsRef<[u8]>>(&self, path: P) -> Result<FileReader> {
        let path = path.as_ref();
        let not_file = || -> Error { PathError::NotAFile { path: path.into(), component: last_component(path).into() }.into() };
        match self.resolve(path)? {
            Resolved::Other(inode) => self.archive.open_file(&inode)?.ok_or_else(not_file),
            Resolved::Dir(_) => Err(not_file()),
        }
    }

    /// The inode at `path`, of any type. A symbolic link's own inode is returned.
    pub fn stat<P: AsRef<[u8]>>(&self, path: P) -> Result<Inode> {
        Ok(match self.resolve(path.as_ref())? {
            Resolved::Dir(c) => c.inode().clone(),
            Resolved::Other(inode) => inode,
        })
    }

    /// The target of the symbolic link at `path`
    pub fn read_link<P: AsRef<[u8]>>(&self, path: P) -> Result<Vec<u8>> {
        let path = path.as_ref();
        if let Resolved::Other(inode) = self.resolve(path)? {
            if let Some(target) = inode.symlink_target() {
                return Ok(target.to_vec());
            }
        }
        Err(PathError::NotASymlink { path: path.into(), component: last_component(path).into() }.into())
    }
}
