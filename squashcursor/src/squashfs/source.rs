use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;

/// Positioned reads against the storage that backs an archive. Reads never depend on or move a
/// shared position, so one source can serve many readers at once.
pub trait ReadAt: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at the end of the source.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn read_slice_at(data: &[u8], buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let start = match usize::try_from(offset) {
        Ok(s) if s < data.len() => s,
        _ => return Ok(0),
    };
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    Ok(n)
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        read_slice_at(self, buf, offset)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        read_slice_at(self, buf, offset)
    }
}

#[cfg(unix)]
impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Box<T> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

/// Adapts a reader that only has a single seek position. Every read seeks first, under a lock,
/// so interleaved callers never observe each other's position.
#[derive(Debug)]
pub struct SeekSource<R> {
    inner: Mutex<SeekState<R>>,
}

#[derive(Debug)]
struct SeekState<R> {
    inner: R,
    // Position of the inner reader, if known, so sequential reads skip the seek
    pos: Option<u64>,
}

impl<R: Read + Seek + Send> SeekSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: Mutex::new(SeekState { inner, pos: None }),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner().inner
    }
}

impl<R: Read + Seek + Send> ReadAt for SeekSource<R> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut state = self.inner.lock();
        if state.pos != Some(offset) {
            state.pos = None;
            let new_pos = state.inner.seek(SeekFrom::Start(offset))?;
            if new_pos != offset {
                return Err(io::Error::new(io::ErrorKind::Other, "seek landed at the wrong position"));
            }
        }
        match state.inner.read(buf) {
            Ok(n) => {
                state.pos = Some(offset + n as u64);
                Ok(n)
            },
            Err(e) => {
                state.pos = None;
                Err(e)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_vec_read_at() -> io::Result<()> {
        let data: Vec<u8> = (0..=255).collect();
        let mut buf = [0; 8];
        assert_eq!(data.read_at(&mut buf, 16)?, 8);
        assert_eq!(buf, [16, 17, 18, 19, 20, 21, 22, 23]);
        assert_eq!(data.read_at(&mut buf, 252)?, 4);
        assert_eq!(&buf[..4], &[252, 253, 254, 255]);
        assert_eq!(data.read_at(&mut buf, 256)?, 0);
        assert_eq!(data.read_at(&mut buf, u64::MAX)?, 0);
        Ok(())
    }

    #[test]
    fn test_read_exact_at_eof() {
        let data: Vec<u8> = vec![1, 2, 3];
        let mut buf = [0; 4];
        let err = data.read_exact_at(&mut buf, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_seek_source_interleaved() -> io::Result<()> {
        let src = SeekSource::new(Cursor::new((0..=255).collect::<Vec<u8>>()));
        let mut a = [0; 4];
        let mut b = [0; 4];

        src.read_exact_at(&mut a, 40)?;
        src.read_exact_at(&mut b, 0)?;
        assert_eq!(a, [40, 41, 42, 43]);
        assert_eq!(b, [0, 1, 2, 3]);

        src.read_exact_at(&mut a, 44)?;
        src.read_exact_at(&mut b, 4)?;
        assert_eq!(a, [44, 45, 46, 47]);
        assert_eq!(b, [4, 5, 6, 7]);
        Ok(())
    }

    #[test]
    fn test_seek_source_shared_across_threads() {
        let src = Arc::new(SeekSource::new(Cursor::new((0..=255).collect::<Vec<u8>>())));
        let handles: Vec<_> = (0..4u64).map(|n| {
            let src = src.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let mut buf = [0; 16];
                    src.read_exact_at(&mut buf, n * 64).unwrap();
                    assert_eq!(buf[0] as u64, n * 64);
                    assert_eq!(buf[15] as u64, n * 64 + 15);
                }
            })
        }).collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
