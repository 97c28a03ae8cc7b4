// Note, quotes in this code are taken from the Open Group Base Specifications,
// Section 4.11 Pathname Resolution, found here:
// https://pubs.opengroup.org/onlinepubs/009696699/basedefs/xbd_chap04.html

use std::collections::VecDeque;

use super::cursor::{components, Cursor};
use super::error::{PathError, Result};
use super::inode::FileType;

/// How many symbolic links one resolution may pass through (Linux's MAXSYMLINKS)
pub const MAX_SYMLINK_HOPS: usize = 40;

impl Cursor {
    /// Resolve `path` to an absolute path with no `.` or `..` components and no symbolic links.
    /// Relative paths start at this cursor. The final component must exist but may be of any
    /// type; a final symbolic link is followed too.
    pub fn canonicalize<P: AsRef<[u8]>>(&self, path: P) -> Result<Vec<u8>> {
        let path = path.as_ref();

        // "A null pathname shall not be successfully resolved"
        if path.is_empty() {
            return Err(PathError::NotFound { path: path.into(), component: path.into() }.into());
        }

        // "If the pathname does not begin with a '/', the predecessor of the first filename of
        //  the pathname shall [be] the current working directory of the process..."
        let mut cur = self.start(path);

        // Components still to resolve. Following a link pushes the target's components onto the
        // front, ahead of whatever remained of the path.
        let mut pending: VecDeque<Vec<u8>> = components(path).map(<[u8]>::to_vec).collect();
        // Set once a component names something that is neither a directory nor a link
        let mut last: Option<Vec<u8>> = None;
        let mut hops = 0;

        while let Some(c) = pending.pop_front() {
            if let Some(prev) = last {
                return Err(PathError::NotADirectory { path: path.into(), component: prev.into() }.into());
            }
            match &c[..] {
                b"." => {},
                // "as a special case, in the root directory, dot-dot may refer to the root
                //  directory itself."
                b".." => cur.parent(),
                name => {
                    let entry = cur.lookup(path, name)?;
                    let inode = cur.archive().inode(entry.inode_ref())?;
                    match inode.file_type() {
                        FileType::Directory => cur.push(name, entry.inode_ref(), inode),
                        FileType::Symlink => {
                            hops += 1;
                            if hops > MAX_SYMLINK_HOPS {
                                return Err(PathError::TooManyLinks { path: path.into() }.into());
                            }
                            let target = inode.symlink_target().unwrap_or_default();
                            if target.is_empty() {
                                return Err(PathError::NotFound { path: path.into(), component: name.into() }.into());
                            }
                            log::trace!("following link '{}' -> '{}'", entry.file_name(), String::from_utf8_lossy(target));
                            if target[0] == b'/' {
                                cur = cur.archive().root();
                            }
                            for t in components(target).rev() {
                                pending.push_front(t.to_vec());
                            }
                        },
                        _ => last = Some(name.to_vec()),
                    }
                },
            }
        }

        let mut resolved = cur.path();
        if let Some(name) = last {
            if !cur.is_root() {
                resolved.push(b'/');
            }
            resolved.extend_from_slice(&name);
        }
        Ok(resolved)
    }
}
