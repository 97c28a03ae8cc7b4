use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};

#[cfg(feature = "flate2")]
use flate2::read::ZlibDecoder;

#[cfg(feature = "ruzstd")]
use ruzstd::decoding::StreamingDecoder;

use super::error::{FormatError, Result};
use super::lzo;
use super::superblock::Compressor;

/// A block decompressor. Implementations must produce at most `max_size` bytes and fail if the
/// stream would produce more.
pub trait Decompressor: Send + Sync {
    fn decompress(&self, input: &[u8], max_size: usize) -> io::Result<Vec<u8>>;
}

fn corrupt<E: fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

fn too_large() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "decompressed data exceeds block size")
}

// Pull at most one byte more than allowed so that oversized output is detected rather than
// silently cut off.
fn read_bounded<R: Read>(r: R, max_size: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(max_size);
    r.take(max_size as u64 + 1).read_to_end(&mut out)?;
    if out.len() > max_size {
        return Err(too_large());
    }
    Ok(out)
}

#[cfg(feature = "flate2")]
struct Gzip;

#[cfg(feature = "flate2")]
impl Decompressor for Gzip {
    fn decompress(&self, input: &[u8], max_size: usize) -> io::Result<Vec<u8>> {
        read_bounded(ZlibDecoder::new(input), max_size)
    }
}

// Output sink that fails as soon as more than `limit` bytes are written to it
#[cfg(feature = "lzma-rs")]
struct BoundedWriter {
    out: Vec<u8>,
    limit: usize,
}

#[cfg(feature = "lzma-rs")]
impl BoundedWriter {
    fn new(limit: usize) -> Self {
        Self { out: Vec::with_capacity(limit), limit }
    }
}

#[cfg(feature = "lzma-rs")]
impl io::Write for BoundedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.out.len() + buf.len() > self.limit {
            return Err(too_large());
        }
        self.out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// Sum the unpacked sizes announced by the LZMA2 chunk headers of an xz stream without decoding
// anything. lzma-rs buffers a whole xz block before writing any of it out.
#[cfg(feature = "lzma-rs")]
fn xz_unpacked_size(input: &[u8], max_size: usize) -> io::Result<u64> {
    const STREAM_HEADER: usize = 12;
    let byte = |pos: usize| input.get(pos).copied().ok_or_else(|| corrupt("truncated xz stream"));
    let be16 = |pos: usize| -> io::Result<u64> { Ok(u64::from(byte(pos)?) << 8 | u64::from(byte(pos + 1)?)) };

    if input.len() < STREAM_HEADER || &input[..6] != b"\xfd7zXZ\0" {
        return Err(corrupt("bad xz stream header"));
    }
    let check_size = match input[7] & 0x0f {
        0 => 0,
        n => 4usize << ((n - 1) / 3),
    };

    let mut total = 0u64;
    let mut pos = STREAM_HEADER;
    loop {
        // A zero header size byte starts the index
        let header = byte(pos)?;
        if header == 0 {
            return Ok(total);
        }
        pos += (usize::from(header) + 1) * 4;

        loop {
            let control = byte(pos)?;
            let (unpacked, skip) = match control {
                0 => {
                    pos += 1;
                    break;
                },
                1 | 2 => {
                    let n = be16(pos + 1)? + 1;
                    (n, 3 + n as usize)
                },
                0x80..=0xff => {
                    let unpacked = (u64::from(control & 0x1f) << 16 | be16(pos + 1)?) + 1;
                    let packed = be16(pos + 3)? as usize + 1;
                    let props = usize::from((control >> 5) & 3 >= 2);
                    (unpacked, 5 + props + packed)
                },
                _ => return Err(corrupt(format!("invalid LZMA2 control byte {:#x}", control))),
            };
            total += unpacked;
            if total > max_size as u64 {
                return Err(too_large());
            }
            pos += skip;
        }
        pos = (pos + 3) & !3;
        pos += check_size;
    }
}

#[cfg(feature = "lzma-rs")]
struct Xz;

#[cfg(feature = "lzma-rs")]
impl Decompressor for Xz {
    fn decompress(&self, input: &[u8], max_size: usize) -> io::Result<Vec<u8>> {
        xz_unpacked_size(input, max_size)?;
        let mut out = BoundedWriter::new(max_size);
        lzma_rs::xz_decompress(&mut &input[..], &mut out).map_err(corrupt)?;
        Ok(out.out)
    }
}

#[cfg(feature = "lzma-rs")]
struct Lzma;

#[cfg(feature = "lzma-rs")]
impl Decompressor for Lzma {
    fn decompress(&self, input: &[u8], max_size: usize) -> io::Result<Vec<u8>> {
        use lzma_rs::decompress::{Options, UnpackedSize};

        // props(1) dict_size(4) unpacked_size(8), where all ones means "ends with a marker"
        let declared = input.get(5..13)
            .ok_or_else(|| corrupt("truncated lzma header"))?
            .iter().rev().fold(0u64, |acc, &b| acc << 8 | u64::from(b));
        if declared != u64::MAX && declared > max_size as u64 {
            return Err(too_large());
        }

        let options = Options {
            unpacked_size: UnpackedSize::ReadFromHeader,
            memlimit: Some(max_size),
            allow_incomplete: false,
        };
        let mut out = BoundedWriter::new(max_size);
        lzma_rs::lzma_decompress_with_options(&mut &input[..], &mut out, &options).map_err(corrupt)?;
        Ok(out.out)
    }
}

#[cfg(feature = "lz4_flex")]
struct Lz4;

#[cfg(feature = "lz4_flex")]
impl Decompressor for Lz4 {
    fn decompress(&self, input: &[u8], max_size: usize) -> io::Result<Vec<u8>> {
        let mut out = vec![0; max_size];
        let n = lz4_flex::block::decompress_into(input, &mut out).map_err(corrupt)?;
        out.truncate(n);
        Ok(out)
    }
}

#[cfg(feature = "ruzstd")]
struct Zstd;

#[cfg(feature = "ruzstd")]
impl Decompressor for Zstd {
    fn decompress(&self, input: &[u8], max_size: usize) -> io::Result<Vec<u8>> {
        let dec = StreamingDecoder::new(input).map_err(corrupt)?;
        read_bounded(dec, max_size)
    }
}

struct Lzo;

impl Decompressor for Lzo {
    fn decompress(&self, input: &[u8], max_size: usize) -> io::Result<Vec<u8>> {
        lzo::decompress(input, max_size).map_err(corrupt)
    }
}

/// Maps compressor ids to decompressors. The default registry holds every codec compiled into
/// the crate; callers may register additional ones or replace existing ones.
pub struct CodecRegistry {
    codecs: HashMap<u16, Box<dyn Decompressor>>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.codecs.keys().collect();
        ids.sort();
        f.debug_struct("CodecRegistry").field("ids", &ids).finish()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut reg = CodecRegistry::empty();
        #[cfg(feature = "flate2")]
        reg.register(Compressor::Gzip.into(), Box::new(Gzip));
        #[cfg(feature = "lzma-rs")]
        {
            reg.register(Compressor::Lzma.into(), Box::new(Lzma));
            reg.register(Compressor::Xz.into(), Box::new(Xz));
        }
        #[cfg(feature = "lz4_flex")]
        reg.register(Compressor::Lz4.into(), Box::new(Lz4));
        #[cfg(feature = "ruzstd")]
        reg.register(Compressor::Zstd.into(), Box::new(Zstd));
        reg.register(Compressor::Lzo.into(), Box::new(Lzo));
        reg
    }
}

impl CodecRegistry {
    pub fn empty() -> Self {
        Self { codecs: HashMap::new() }
    }

    pub fn register(&mut self, id: u16, codec: Box<dyn Decompressor>) {
        self.codecs.insert(id, codec);
    }

    pub fn supports(&self, id: u16) -> bool {
        self.codecs.contains_key(&id)
    }

    /// Decompress one block with the codec registered under `codec_id`.
    pub fn decompress(&self, codec_id: u16, compressed: &[u8], expected_max: usize) -> Result<Vec<u8>> {
        let codec = self.codecs.get(&codec_id)
            .ok_or(FormatError::UnsupportedCodec(codec_id))?;
        codec.decompress(compressed, expected_max)
            .map_err(|e| FormatError::CorruptBlock { offset: 0, reason: e.to_string() }.into())
    }
}

bitflags! {
    pub struct GzipStrategies: u16 {
        const DEFAULT  = 0x0001;
        const FILTERED = 0x0002;
        const HUFFMAN_ONLY = 0x0004;
        const RLE = 0x0008;
        const FIXED = 0x0010;
    }
}

bitflags! {
    pub struct XzFilters: u32 {
        const X86 = 0x0001;
        const POWERPC = 0x0002;
        const IA64 = 0x0004;
        const ARM = 0x0008;
        const ARMTHUMB = 0x0010;
        const SPARC = 0x0020;
    }
}

/// LZ4 options version written by every known encoder: the legacy block format
pub const LZ4_LEGACY: u32 = 1;

/// Encoder settings stored right after the superblock when the archive was built with
/// non-default compressor options. They are informational for decompression.
#[derive(Debug, Clone)]
pub enum CompressorOptions {
    Gzip { compression_level: u32, window_size: u16, strategies: GzipStrategies },
    Lzo { algorithm: u32, compression_level: u32 },
    Xz { dictionary_size: u32, filters: XzFilters },
    Lz4 { version: u32, flags: u32 },
    Zstd { compression_level: u32 },
}

impl CompressorOptions {
    pub fn parse(compressor: Compressor, b: &[u8]) -> Result<Option<Self>> {
        let r = &mut &b[..];
        let opts = match compressor {
            Compressor::Gzip => CompressorOptions::Gzip {
                compression_level: r.read_u32::<LittleEndian>()?,
                window_size: r.read_u16::<LittleEndian>()?,
                strategies: GzipStrategies::from_bits_truncate(r.read_u16::<LittleEndian>()?),
            },
            Compressor::Lzo => CompressorOptions::Lzo {
                algorithm: r.read_u32::<LittleEndian>()?,
                compression_level: r.read_u32::<LittleEndian>()?,
            },
            Compressor::Xz => CompressorOptions::Xz {
                dictionary_size: r.read_u32::<LittleEndian>()?,
                filters: XzFilters::from_bits_truncate(r.read_u32::<LittleEndian>()?),
            },
            Compressor::Lz4 => {
                let version = r.read_u32::<LittleEndian>()?;
                let flags = r.read_u32::<LittleEndian>()?;
                if version != LZ4_LEGACY {
                    log::warn!("unsupported LZ4 options version {}", version);
                    return Err(FormatError::UnsupportedCodec(Compressor::Lz4.into()).into());
                }
                CompressorOptions::Lz4 { version, flags }
            },
            Compressor::Zstd => CompressorOptions::Zstd {
                compression_level: r.read_u32::<LittleEndian>()?,
            },
            Compressor::Lzma | Compressor::Unknown => return Ok(None),
        };
        Ok(Some(opts))
    }
}
