//! Squashcursor reads SquashFS archives. An opened [`Archive`](squashfs::Archive) hands out
//! cursors that walk the directory tree and readers that fetch file contents at arbitrary offsets,
//! decompressing only the blocks a request touches.
//!
//! ## Feature Flags
//! Each compressor other than LZO sits behind a feature, all enabled by default:
//! - `gzip`: zlib-wrapped deflate, via `flate2`
//! - `xz`: LZMA and XZ, via `lzma-rs`
//! - `lz4`: LZ4 block format, via `lz4_flex`
//! - `zstd`: Zstandard, via `ruzstd`
//!
//! LZO decompression is built in. Further codecs can be plugged in through a
//! [`CodecRegistry`](squashfs::CodecRegistry).
//!
//! ## Concurrency
//! An archive and the cursors and readers derived from it may be shared between threads. Reads go
//! through positioned I/O ([`ReadAt`](squashfs::ReadAt)), so no seek position is shared.
//!
//! ## Usage Example
//! ```no_run
//! use std::io;
//! use squashcursor::squashfs::Archive;
//!
//! fn print_file_from_squashfs() -> Result<(), Box<dyn std::error::Error>> {
//!     // Open the SquashFS
//!     let archive = Archive::open_path("rootfs.squashfs")?;
//!     let root = archive.root();
//!
//!     // List the contents of a directory
//!     for entry in root.cd("/etc")?.list()? {
//!         println!("{}", entry?.file_name());
//!     }
//!
//!     // Open a file to read its contents
//!     let file = root.open("/etc/group")?;
//!
//!     // Copy the file contents to stdout
//!     let mut stdout = io::stdout().lock();
//!     io::copy(&mut file.stream(), &mut stdout)?;
//!     Ok(())
//! }
//! ```

pub mod squashfs;
