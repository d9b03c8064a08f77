// Segment decompression backends.
//
// Compressed containers name their compressor ("zlib", "lzma") in the
// header; each compressed segment is opened independently with a known
// decompressed size. Zlib segments start with one signed windowBits byte
// (positive: zlib wrapper, negative: raw deflate) followed by the
// deflate data.

use std::cell::RefCell;

use crate::error::{PatchError, Result};
use crate::stream::Input;

/// A named decompression backend.
///
/// `open_part` starts decoding one segment of `src`; parts are read
/// strictly front to back.
pub trait Decompressor {
    fn id(&self) -> &'static str;

    fn can_open(&self, compress_type: &str) -> bool {
        compress_type == self.id()
    }

    fn open_part<'a>(
        &self,
        src: &'a dyn Input,
        pos: u64,
        pos_end: u64,
        out_size: u64,
    ) -> Result<Box<dyn DecompressPart + 'a>>;
}

/// One segment being decompressed, sequentially.
pub trait DecompressPart {
    /// Fill `out` completely with the next decompressed bytes.
    fn decompress_part(&mut self, out: &mut [u8]) -> Result<()>;
}

/// Look up a backend for the compressor named in a diff header.
pub fn decompressor_for(compress_type: &str) -> Result<&'static dyn Decompressor> {
    #[cfg(feature = "zlib")]
    if ZlibDecompressor.can_open(compress_type) {
        return Ok(&ZlibDecompressor);
    }
    #[cfg(feature = "lzma")]
    if LzmaDecompressor.can_open(compress_type) {
        return Ok(&LzmaDecompressor);
    }
    Err(PatchError::UnsupportedCompression(compress_type.to_owned()))
}

// ---------------------------------------------------------------------------
// Zlib backend
// ---------------------------------------------------------------------------

#[cfg(feature = "zlib")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibDecompressor;

#[cfg(feature = "zlib")]
impl Decompressor for ZlibDecompressor {
    fn id(&self) -> &'static str {
        "zlib"
    }

    fn open_part<'a>(
        &self,
        src: &'a dyn Input,
        pos: u64,
        pos_end: u64,
        _out_size: u64,
    ) -> Result<Box<dyn DecompressPart + 'a>> {
        if pos >= pos_end || pos_end > src.size() {
            return Err(PatchError::OutOfRange("compressed segment out of range"));
        }
        let mut window_bits = [0u8; 1];
        src.read_at(pos, &mut window_bits)?;
        let zlib_header = (window_bits[0] as i8) > 0;
        Ok(Box::new(ZlibPart {
            src,
            pos: pos + 1,
            pos_end,
            raw: flate2::Decompress::new(zlib_header),
            in_buf: vec![0; 16 * 1024].into_boxed_slice(),
            in_begin: 0,
            in_end: 0,
        }))
    }
}

#[cfg(feature = "zlib")]
struct ZlibPart<'a> {
    src: &'a dyn Input,
    pos: u64,
    pos_end: u64,
    raw: flate2::Decompress,
    in_buf: Box<[u8]>,
    in_begin: usize,
    in_end: usize,
}

#[cfg(feature = "zlib")]
impl DecompressPart for ZlibPart<'_> {
    fn decompress_part(&mut self, out: &mut [u8]) -> Result<()> {
        use flate2::{FlushDecompress, Status};

        let mut out_pos = 0;
        while out_pos < out.len() {
            if self.in_begin == self.in_end {
                let step = (self.in_buf.len() as u64).min(self.pos_end - self.pos) as usize;
                if step > 0 {
                    self.src.read_at(self.pos, &mut self.in_buf[..step])?;
                    self.pos += step as u64;
                }
                self.in_begin = 0;
                self.in_end = step;
            }
            let before_in = self.raw.total_in();
            let before_out = self.raw.total_out();
            let status = self
                .raw
                .decompress(
                    &self.in_buf[self.in_begin..self.in_end],
                    &mut out[out_pos..],
                    FlushDecompress::None,
                )
                .map_err(|_| PatchError::Malformed("bad zlib data"))?;
            let used_in = (self.raw.total_in() - before_in) as usize;
            let used_out = (self.raw.total_out() - before_out) as usize;
            self.in_begin += used_in;
            out_pos += used_out;
            match status {
                Status::StreamEnd => {
                    if out_pos < out.len() {
                        return Err(PatchError::Truncated("zlib stream ended early"));
                    }
                }
                Status::Ok | Status::BufError => {
                    if used_in == 0 && used_out == 0 && self.pos == self.pos_end {
                        return Err(PatchError::Truncated("zlib stream ended early"));
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LZMA backend
// ---------------------------------------------------------------------------

/// Decodes the whole segment up front; `lzma-rs` has no incremental
/// decoder.
#[cfg(feature = "lzma")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LzmaDecompressor;

#[cfg(feature = "lzma")]
impl Decompressor for LzmaDecompressor {
    fn id(&self) -> &'static str {
        "lzma"
    }

    fn open_part<'a>(
        &self,
        src: &'a dyn Input,
        pos: u64,
        pos_end: u64,
        out_size: u64,
    ) -> Result<Box<dyn DecompressPart + 'a>> {
        if pos > pos_end || pos_end > src.size() {
            return Err(PatchError::OutOfRange("compressed segment out of range"));
        }
        let mut packed = vec![0u8; (pos_end - pos) as usize];
        src.read_at(pos, &mut packed)?;
        let mut input = std::io::BufReader::new(std::io::Cursor::new(packed));
        let mut output = Vec::new();
        lzma_rs::lzma_decompress(&mut input, &mut output)
            .map_err(|_| PatchError::Malformed("bad lzma data"))?;
        if output.len() as u64 != out_size {
            return Err(PatchError::SizeMismatch {
                expected: out_size,
                actual: output.len() as u64,
            });
        }
        Ok(Box::new(LzmaPart { data: output, pos: 0 }))
    }
}

#[cfg(feature = "lzma")]
struct LzmaPart {
    data: Vec<u8>,
    pos: usize,
}

#[cfg(feature = "lzma")]
impl DecompressPart for LzmaPart {
    fn decompress_part(&mut self, out: &mut [u8]) -> Result<()> {
        if out.len() > self.data.len() - self.pos {
            return Err(PatchError::Truncated("lzma stream ended early"));
        }
        out.copy_from_slice(&self.data[self.pos..self.pos + out.len()]);
        self.pos += out.len();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Input facade over a decompressing part
// ---------------------------------------------------------------------------

/// Presents a decompressed segment as an `Input` of known size.
///
/// Reads must be sequential from position zero; the stream windows built
/// on top read that way.
pub struct DecompressStream<'a> {
    size: u64,
    state: RefCell<PartState<'a>>,
}

struct PartState<'a> {
    part: Box<dyn DecompressPart + 'a>,
    pos: u64,
}

impl<'a> DecompressStream<'a> {
    pub fn open(
        decomp: &dyn Decompressor,
        src: &'a dyn Input,
        pos: u64,
        pos_end: u64,
        out_size: u64,
    ) -> Result<Self> {
        let part = decomp.open_part(src, pos, pos_end, out_size)?;
        Ok(DecompressStream {
            size: out_size,
            state: RefCell::new(PartState { part, pos: 0 }),
        })
    }
}

impl Input for DecompressStream<'_> {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, pos: u64, out: &mut [u8]) -> Result<()> {
        let end = pos
            .checked_add(out.len() as u64)
            .ok_or(PatchError::OutOfRange("read position overflow"))?;
        if end > self.size {
            return Err(PatchError::OutOfRange("read past end of stream"));
        }
        let mut state = self.state.borrow_mut();
        if pos != state.pos {
            return Err(PatchError::Malformed("non-sequential decompressed read"));
        }
        state.part.decompress_part(out)?;
        state.pos = end;
        Ok(())
    }
}

#[cfg(all(test, feature = "zlib"))]
mod tests {
    use super::*;

    fn deflate_segment(data: &[u8]) -> Vec<u8> {
        use flate2::{Compression, write::ZlibEncoder};
        use std::io::Write;

        let mut out = vec![15u8]; // windowBits byte, zlib wrapper
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        out.extend_from_slice(&enc.finish().unwrap());
        out
    }

    #[test]
    fn zlib_part_streams_in_chunks() {
        let plain: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        let seg = deflate_segment(&plain);
        let stream =
            DecompressStream::open(&ZlibDecompressor, &seg, 0, seg.len() as u64, 200).unwrap();
        assert_eq!(stream.size(), 200);
        let mut head = vec![0u8; 80];
        let mut tail = vec![0u8; 120];
        stream.read_at(0, &mut head).unwrap();
        stream.read_at(80, &mut tail).unwrap();
        head.extend_from_slice(&tail);
        assert_eq!(head, plain);
    }

    #[test]
    fn zlib_rejects_non_sequential_reads() {
        let seg = deflate_segment(b"hello world");
        let stream =
            DecompressStream::open(&ZlibDecompressor, &seg, 0, seg.len() as u64, 11).unwrap();
        let mut out = [0u8; 4];
        assert!(stream.read_at(2, &mut out).is_err());
    }

    #[test]
    fn zlib_truncated_segment_fails() {
        let mut seg = deflate_segment(b"some data to squeeze");
        let cut = seg.len() - 4;
        seg.truncate(cut);
        let stream =
            DecompressStream::open(&ZlibDecompressor, &seg, 0, cut as u64, 20).unwrap();
        let mut out = [0u8; 20];
        assert!(stream.read_at(0, &mut out).is_err());
    }

    #[test]
    fn unknown_type_is_unsupported() {
        assert!(matches!(
            decompressor_for("zstd"),
            Err(PatchError::UnsupportedCompression(_))
        ));
        assert!(decompressor_for("zlib").is_ok());
    }

    #[cfg(feature = "lzma")]
    #[test]
    fn lzma_roundtrip_with_size_check() {
        let plain = b"lzma body bytes, repeated a bit, repeated a bit";
        let mut packed = Vec::new();
        lzma_rs::lzma_compress(&mut std::io::Cursor::new(&plain[..]), &mut packed).unwrap();
        let stream = DecompressStream::open(
            &LzmaDecompressor,
            &packed,
            0,
            packed.len() as u64,
            plain.len() as u64,
        )
        .unwrap();
        let mut got = vec![0u8; plain.len()];
        stream.read_at(0, &mut got).unwrap();
        assert_eq!(got, plain);

        let bad = DecompressStream::open(
            &LzmaDecompressor,
            &packed,
            0,
            packed.len() as u64,
            plain.len() as u64 + 1,
        );
        assert!(matches!(bad, Err(PatchError::SizeMismatch { .. })));
    }
}
