//! Builds small SquashFS images in memory for the integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use squashcursor::squashfs::{InodeRef, ReadAt, MAGIC, NO_FRAGMENT, TABLE_ABSENT};

pub const MTIME: u32 = 1_700_000_000;
pub const GZIP: u16 = 1;
pub const ZSTD: u16 = 6;
pub const UID: u32 = 1000;
pub const GID: u32 = 100;

const MD_BLOCK: usize = 8192;
const UNCOMPRESSED_DATA: u32 = 1 << 24;
const UNCOMPRESSED_MD: u16 = 0x8000;

#[derive(Debug, Clone)]
pub enum Node {
    File { data: Vec<u8>, xattrs: Vec<(u16, Vec<u8>, Vec<u8>)> },
    Dir(Vec<(Vec<u8>, Node)>),
    Symlink(Vec<u8>),
    CharDev(u32),
}

pub fn file(data: impl AsRef<[u8]>) -> Node {
    Node::File { data: data.as_ref().to_vec(), xattrs: Vec::new() }
}

/// A file carrying extended attributes, given as (namespace prefix id, name, value)
pub fn file_with_xattrs(data: impl AsRef<[u8]>, xattrs: &[(u16, &str, &str)]) -> Node {
    Node::File {
        data: data.as_ref().to_vec(),
        xattrs: xattrs.iter().map(|(p, n, v)| (*p, n.as_bytes().to_vec(), v.as_bytes().to_vec())).collect(),
    }
}

pub fn dir(entries: Vec<(&str, Node)>) -> Node {
    Node::Dir(entries.into_iter().map(|(n, e)| (n.as_bytes().to_vec(), e)).collect())
}

pub fn symlink(target: &str) -> Node {
    Node::Symlink(target.as_bytes().to_vec())
}

pub fn char_dev(dev: u32) -> Node {
    Node::CharDev(dev)
}

/// Deterministic, mildly compressible content
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 253) % 251) as u8).collect()
}

/// Image layout options. Entries are written in the order given, not sorted.
#[derive(Debug, Clone)]
pub struct Builder {
    pub block_log: u16,
    pub compress: bool,
    /// Compressor id recorded in the superblock and used when `compress` is set
    pub compressor: u16,
    pub fragments: bool,
    pub sparse: bool,
    pub export: bool,
    pub compressor_options: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            block_log: 12,
            compress: false,
            compressor: GZIP,
            fragments: true,
            sparse: true,
            export: true,
            compressor_options: false,
        }
    }
}

// Compress with the codec for `compressor`, or None when that doesn't make `raw` smaller
fn pack(compressor: Option<u16>, raw: &[u8]) -> Option<Vec<u8>> {
    let packed = match compressor? {
        GZIP => {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::best());
            enc.write_all(raw).unwrap();
            enc.finish().unwrap()
        },
        ZSTD => ruzstd::encoding::compress_to_vec(raw, ruzstd::encoding::CompressionLevel::Fastest),
        other => panic!("no encoder for compressor {}", other),
    };
    Some(packed).filter(|c| c.len() < raw.len())
}

struct MetadataWriter {
    compressor: Option<u16>,
    blocks: Vec<u8>,
    pending: Vec<u8>,
    block_starts: Vec<u64>,
}

impl MetadataWriter {
    fn new(compressor: Option<u16>) -> Self {
        Self { compressor, blocks: Vec::new(), pending: Vec::new(), block_starts: Vec::new() }
    }

    fn position(&self) -> InodeRef {
        InodeRef::new(self.blocks.len() as u64, self.pending.len() as u16)
    }

    fn write(&mut self, b: &[u8]) {
        self.pending.extend_from_slice(b);
        while self.pending.len() >= MD_BLOCK {
            self.flush(MD_BLOCK);
        }
    }

    fn flush(&mut self, n: usize) {
        let raw: Vec<u8> = self.pending.drain(..n).collect();
        self.block_starts.push(self.blocks.len() as u64);
        match pack(self.compressor, &raw) {
            Some(c) => {
                self.blocks.extend((c.len() as u16).to_le_bytes());
                self.blocks.extend(c);
            },
            None => {
                self.blocks.extend((raw.len() as u16 | UNCOMPRESSED_MD).to_le_bytes());
                self.blocks.extend(raw);
            },
        }
    }

    fn finish(mut self) -> (Vec<u8>, Vec<u64>) {
        if !self.pending.is_empty() {
            let n = self.pending.len();
            self.flush(n);
        }
        (self.blocks, self.block_starts)
    }
}

struct Child {
    name: Vec<u8>,
    inode_ref: InodeRef,
    tag: u16,
    number: u32,
}

struct Encoder<'a> {
    opts: &'a Builder,
    image: Vec<u8>,
    inodes: MetadataWriter,
    dirs: MetadataWriter,
    frag_buf: Vec<u8>,
    fragments: Vec<(u64, u32)>,
    xattr_kv: MetadataWriter,
    xattr_ids: Vec<(u64, u32, u32)>,
    export: Vec<InodeRef>,
}

fn count_inodes(node: &Node) -> u32 {
    match node {
        Node::Dir(entries) => 1 + entries.iter().map(|(_, n)| count_inodes(n)).sum::<u32>(),
        _ => 1,
    }
}

fn inode_header(tag: u16, perms: u16, number: u32) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend(tag.to_le_bytes());
    b.extend(perms.to_le_bytes());
    b.extend(0u16.to_le_bytes());
    b.extend(1u16.to_le_bytes());
    b.extend(MTIME.to_le_bytes());
    b.extend(number.to_le_bytes());
    b
}

impl Encoder<'_> {
    fn block_size(&self) -> usize {
        1 << self.opts.block_log
    }

    fn encode_data_block(&self, raw: &[u8]) -> (Vec<u8>, u32) {
        if let Some(c) = pack(self.opts.codec(), raw) {
            let n = c.len() as u32;
            return (c, n);
        }
        (raw.to_vec(), raw.len() as u32 | UNCOMPRESSED_DATA)
    }

    fn flush_fragment(&mut self) {
        if self.frag_buf.is_empty() {
            return;
        }
        let buf = std::mem::take(&mut self.frag_buf);
        let (bytes, word) = self.encode_data_block(&buf);
        self.fragments.push((self.image.len() as u64, word));
        self.image.extend(bytes);
    }

    fn add_fragment(&mut self, tail: &[u8]) -> (u32, u32) {
        if self.frag_buf.len() + tail.len() > self.block_size() {
            self.flush_fragment();
        }
        let index = self.fragments.len() as u32;
        let offset = self.frag_buf.len() as u32;
        self.frag_buf.extend_from_slice(tail);
        (index, offset)
    }

    fn write_inode(&mut self, b: &[u8]) -> InodeRef {
        let r = self.inodes.position();
        self.inodes.write(b);
        r
    }

    fn write_xattrs(&mut self, xattrs: &[(u16, Vec<u8>, Vec<u8>)]) -> u32 {
        let r = self.xattr_kv.position();
        let mut kv = Vec::new();
        for (prefix, name, value) in xattrs {
            kv.extend(prefix.to_le_bytes());
            kv.extend((name.len() as u16).to_le_bytes());
            kv.extend(name);
            kv.extend((value.len() as u32).to_le_bytes());
            kv.extend(value);
        }
        self.xattr_kv.write(&kv);
        self.xattr_ids.push((r.raw(), xattrs.len() as u32, kv.len() as u32));
        self.xattr_ids.len() as u32 - 1
    }

    fn write_file(&mut self, data: &[u8], xattrs: &[(u16, Vec<u8>, Vec<u8>)], number: u32) -> InodeRef {
        let bs = self.block_size();
        let blocks_start = self.image.len() as u64;
        let tail = data.len() % bs;
        let use_fragment = self.opts.fragments && tail > 0;
        let block_count = if use_fragment { data.len() / bs } else { data.len().div_ceil(bs) };

        let mut sizes = Vec::new();
        for chunk in data.chunks(bs).take(block_count) {
            if self.opts.sparse && chunk.len() == bs && chunk.iter().all(|b| *b == 0) {
                sizes.push(0u32);
                continue;
            }
            let (bytes, word) = self.encode_data_block(chunk);
            self.image.extend(bytes);
            sizes.push(word);
        }

        let (frag_index, frag_offset) = if use_fragment {
            self.add_fragment(&data[data.len() - tail..])
        } else {
            (NO_FRAGMENT, 0)
        };

        let mut b;
        if xattrs.is_empty() {
            b = inode_header(2, 0o644, number);
            b.extend((blocks_start as u32).to_le_bytes());
            b.extend(frag_index.to_le_bytes());
            b.extend(frag_offset.to_le_bytes());
            b.extend((data.len() as u32).to_le_bytes());
        } else {
            let xattr_index = self.write_xattrs(xattrs);
            b = inode_header(9, 0o644, number);
            b.extend(blocks_start.to_le_bytes());
            b.extend((data.len() as u64).to_le_bytes());
            b.extend(0u64.to_le_bytes());
            b.extend(1u32.to_le_bytes());
            b.extend(frag_index.to_le_bytes());
            b.extend(frag_offset.to_le_bytes());
            b.extend(xattr_index.to_le_bytes());
        }
        for s in sizes {
            b.extend(s.to_le_bytes());
        }
        self.write_inode(&b)
    }

    fn write_dir(&mut self, entries: &[(Vec<u8>, Node)], number: u32, parent: u32, counter: &mut u32) -> InodeRef {
        // Children are numbered before descending, so each listing uses a consecutive run
        let numbers: Vec<u32> = entries.iter().map(|_| {
            *counter += 1;
            *counter
        }).collect();

        let mut children = Vec::new();
        for ((name, node), &n) in entries.iter().zip(&numbers) {
            let (inode_ref, tag) = match node {
                Node::Dir(sub) => (self.write_dir(sub, n, number, counter), 1),
                Node::File { data, xattrs } => (self.write_file(data, xattrs, n), 2),
                Node::Symlink(target) => {
                    let mut b = inode_header(3, 0o777, n);
                    b.extend(1u32.to_le_bytes());
                    b.extend((target.len() as u32).to_le_bytes());
                    b.extend(target);
                    (self.write_inode(&b), 3)
                },
                Node::CharDev(dev) => {
                    let mut b = inode_header(5, 0o600, n);
                    b.extend(1u32.to_le_bytes());
                    b.extend(dev.to_le_bytes());
                    (self.write_inode(&b), 5)
                },
            };
            self.export[n as usize - 1] = inode_ref;
            children.push(Child { name: name.clone(), inode_ref, tag, number: n });
        }

        let listing = encode_listing(&children);
        let at = self.dirs.position();
        self.dirs.write(&listing);

        let subdirs = children.iter().filter(|c| c.tag == 1).count() as u32;
        let mut b = inode_header(1, 0o755, number);
        b.extend((at.block() as u32).to_le_bytes());
        b.extend((2 + subdirs).to_le_bytes());
        b.extend((listing.len() as u16 + 3).to_le_bytes());
        b.extend(at.offset().to_le_bytes());
        b.extend(parent.to_le_bytes());
        self.write_inode(&b)
    }

    // Lookup tables: records in metadata blocks, then the array of block locations
    fn write_lookup_table(&mut self, records: &[u8]) -> u64 {
        let mut md = MetadataWriter::new(self.opts.codec());
        md.write(records);
        let (blocks, starts) = md.finish();
        let md_start = self.image.len() as u64;
        self.image.extend(blocks);
        let table = self.image.len() as u64;
        for s in starts {
            self.image.extend((md_start + s).to_le_bytes());
        }
        table
    }
}

fn encode_listing(children: &[Child]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < children.len() {
        let block = children[i].inode_ref.block();
        let base = children[i].number;
        let mut j = i;
        while j < children.len()
            && j - i < 256
            && children[j].inode_ref.block() == block
            && (i64::from(children[j].number) - i64::from(base)).abs() < 32767
        {
            j += 1;
        }
        out.extend(((j - i - 1) as u32).to_le_bytes());
        out.extend((block as u32).to_le_bytes());
        out.extend(base.to_le_bytes());
        for c in &children[i..j] {
            out.extend(c.inode_ref.offset().to_le_bytes());
            out.extend(((c.number as i64 - base as i64) as i16).to_le_bytes());
            out.extend(c.tag.to_le_bytes());
            out.extend((c.name.len() as u16 - 1).to_le_bytes());
            out.extend(&c.name);
        }
        i = j;
    }
    out
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compressed() -> Self {
        Self { compress: true, ..Self::default() }
    }

    pub fn zstd() -> Self {
        Self { compress: true, compressor: ZSTD, ..Self::default() }
    }

    fn codec(&self) -> Option<u16> {
        self.compress.then_some(self.compressor)
    }

    /// Encode `root`, which must be a directory, into a complete image
    pub fn build(&self, root: &Node) -> Vec<u8> {
        let entries = match root {
            Node::Dir(e) => e,
            _ => panic!("root must be a directory"),
        };
        let total = count_inodes(root);

        let mut image = vec![0; 96];
        if self.compressor_options {
            // gzip: level 9, window 15, default strategy
            let mut opts = 9u32.to_le_bytes().to_vec();
            opts.extend(15u16.to_le_bytes());
            opts.extend(1u16.to_le_bytes());
            image.extend((opts.len() as u16 | UNCOMPRESSED_MD).to_le_bytes());
            image.extend(opts);
        }

        let mut enc = Encoder {
            opts: self,
            image,
            inodes: MetadataWriter::new(self.codec()),
            dirs: MetadataWriter::new(self.codec()),
            frag_buf: Vec::new(),
            fragments: Vec::new(),
            xattr_kv: MetadataWriter::new(self.codec()),
            xattr_ids: Vec::new(),
            export: vec![InodeRef::new(0, 0); total as usize],
        };
        let mut counter = 1;
        let root_ref = enc.write_dir(entries, 1, total + 1, &mut counter);
        enc.export[0] = root_ref;
        enc.flush_fragment();

        let inode_table = enc.image.len() as u64;
        let (blocks, _) = std::mem::replace(&mut enc.inodes, MetadataWriter::new(None)).finish();
        enc.image.extend(blocks);

        let dir_table = enc.image.len() as u64;
        let (blocks, _) = std::mem::replace(&mut enc.dirs, MetadataWriter::new(None)).finish();
        enc.image.extend(blocks);

        let frag_table = if enc.fragments.is_empty() {
            TABLE_ABSENT
        } else {
            let mut records = Vec::new();
            for (start, size) in &enc.fragments {
                records.extend(start.to_le_bytes());
                records.extend(size.to_le_bytes());
                records.extend(0u32.to_le_bytes());
            }
            enc.write_lookup_table(&records)
        };

        let export_table = if self.export {
            let records: Vec<u8> = enc.export.iter().flat_map(|r| r.raw().to_le_bytes()).collect();
            enc.write_lookup_table(&records)
        } else {
            TABLE_ABSENT
        };

        let ids: Vec<u8> = [UID, GID].iter().flat_map(|id| id.to_le_bytes()).collect();
        let id_table = enc.write_lookup_table(&ids);

        let xattr_table = if enc.xattr_ids.is_empty() {
            TABLE_ABSENT
        } else {
            let kv_start = enc.image.len() as u64;
            let (blocks, _) = std::mem::replace(&mut enc.xattr_kv, MetadataWriter::new(None)).finish();
            enc.image.extend(blocks);

            let mut records = Vec::new();
            for (r, count, size) in &enc.xattr_ids {
                records.extend(r.to_le_bytes());
                records.extend(count.to_le_bytes());
                records.extend(size.to_le_bytes());
            }
            let mut md = MetadataWriter::new(self.codec());
            md.write(&records);
            let (blocks, starts) = md.finish();
            let md_start = enc.image.len() as u64;
            enc.image.extend(blocks);

            let table = enc.image.len() as u64;
            enc.image.extend(kv_start.to_le_bytes());
            enc.image.extend((enc.xattr_ids.len() as u32).to_le_bytes());
            enc.image.extend(0u32.to_le_bytes());
            for s in starts {
                enc.image.extend((md_start + s).to_le_bytes());
            }
            table
        };

        let mut flags = 0u16;
        if !self.compress {
            flags |= 0x0001 | 0x0002 | 0x0008;
        }
        if !self.fragments {
            flags |= 0x0010;
        }
        if self.export {
            flags |= 0x0080;
        }
        if xattr_table == TABLE_ABSENT {
            flags |= 0x0200;
        }
        if self.compressor_options {
            flags |= 0x0400;
        }

        let bytes_used = enc.image.len() as u64;
        let mut sb = Vec::with_capacity(96);
        sb.extend(MAGIC.to_le_bytes());
        sb.extend(total.to_le_bytes());
        sb.extend(MTIME.to_le_bytes());
        sb.extend((1u32 << self.block_log).to_le_bytes());
        sb.extend((enc.fragments.len() as u32).to_le_bytes());
        sb.extend(self.compressor.to_le_bytes());
        sb.extend(self.block_log.to_le_bytes());
        sb.extend(flags.to_le_bytes());
        sb.extend(2u16.to_le_bytes());
        sb.extend(4u16.to_le_bytes());
        sb.extend(0u16.to_le_bytes());
        sb.extend(root_ref.raw().to_le_bytes());
        sb.extend(bytes_used.to_le_bytes());
        for t in [id_table, xattr_table, inode_table, dir_table, frag_table, export_table] {
            sb.extend(t.to_le_bytes());
        }
        assert_eq!(sb.len(), 96);
        enc.image[..96].copy_from_slice(&sb);
        enc.image
    }
}

/// Byte source that counts how often it is read
pub struct CountingSource {
    data: Vec<u8>,
    reads: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new(data: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        (Self { data, reads: reads.clone() }, reads)
    }
}

impl ReadAt for CountingSource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.data.read_at(buf, offset)
    }
}

/// The two-level tree used by most tests
pub fn sample_tree() -> Node {
    dir(vec![
        ("dir1", dir(vec![
            ("file.txt", file("hello world")),
        ])),
        ("a", file(pattern(10_000))),
        ("b", dir(vec![
            ("c", dir(vec![
                ("deep.bin", file(pattern(3 * 4096))),
            ])),
            ("empty", file("")),
            ("up", symlink("../a")),
            ("abs", symlink("/dir1")),
        ])),
        ("tty", char_dev(0x0501)),
        ("labelled", file_with_xattrs("tagged", &[(0, "comment", "hi"), (2, "selinux", "system_u")])),
    ])
}
