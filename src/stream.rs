// Random-access byte stream seams used by the patch engine.
//
// `Input` is an all-or-nothing positional read; `Output` is a positional
// write plus an optional read-back used by self-referencing copies.
// In-memory slices and sub-range clips live here; file adapters are in `io`.

use crate::error::{PatchError, Result};

/// Read side: a stream of known size supporting absolute-position reads.
///
/// A read either fills the whole buffer or fails; short reads are errors.
/// `read_at` takes `&self` so several windows can share one stream.
pub trait Input {
    fn size(&self) -> u64;

    fn read_at(&self, pos: u64, out: &mut [u8]) -> Result<()>;
}

impl Input for [u8] {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn read_at(&self, pos: u64, out: &mut [u8]) -> Result<()> {
        let end = pos
            .checked_add(out.len() as u64)
            .ok_or(PatchError::OutOfRange("read position overflow"))?;
        if end > self.len() as u64 {
            return Err(PatchError::OutOfRange("read past end of stream"));
        }
        let pos = pos as usize;
        out.copy_from_slice(&self[pos..pos + out.len()]);
        Ok(())
    }
}

impl Input for Vec<u8> {
    fn size(&self) -> u64 {
        self.as_slice().size()
    }

    fn read_at(&self, pos: u64, out: &mut [u8]) -> Result<()> {
        self.as_slice().read_at(pos, out)
    }
}

impl<const N: usize> Input for [u8; N] {
    fn size(&self) -> u64 {
        self.as_slice().size()
    }

    fn read_at(&self, pos: u64, out: &mut [u8]) -> Result<()> {
        self.as_slice().read_at(pos, out)
    }
}

impl<T: Input + ?Sized> Input for &T {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read_at(&self, pos: u64, out: &mut [u8]) -> Result<()> {
        (**self).read_at(pos, out)
    }
}

/// Write side: a fixed-size destination written front to back.
///
/// `read_back` re-reads already written bytes; the engine uses it for
/// self-referencing copies whose source has been flushed out of the cache.
pub trait Output {
    fn size(&self) -> u64;

    fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<()>;

    fn read_back(&self, pos: u64, out: &mut [u8]) -> Result<()>;
}

/// `Output` over a caller-owned byte slice.
pub struct SliceOutput<'a> {
    buf: &'a mut [u8],
}

impl<'a> SliceOutput<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        SliceOutput { buf }
    }
}

impl Output for SliceOutput<'_> {
    fn size(&self) -> u64 {
        self.buf.len() as u64
    }

    fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        let end = pos
            .checked_add(data.len() as u64)
            .ok_or(PatchError::OutOfRange("write position overflow"))?;
        if end > self.buf.len() as u64 {
            return Err(PatchError::OutOfRange("write past end of output"));
        }
        let pos = pos as usize;
        self.buf[pos..pos + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_back(&self, pos: u64, out: &mut [u8]) -> Result<()> {
        self.buf[..].read_at(pos, out)
    }
}

/// Sub-range view of an `Input`, re-based to position zero.
pub struct InputClip<'a> {
    src: &'a dyn Input,
    begin: u64,
    size: u64,
}

impl<'a> InputClip<'a> {
    pub fn new(src: &'a dyn Input, begin: u64, end: u64) -> Result<Self> {
        if begin > end || end > src.size() {
            return Err(PatchError::OutOfRange("clip range outside stream"));
        }
        Ok(InputClip {
            src,
            begin,
            size: end - begin,
        })
    }
}

impl Input for InputClip<'_> {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, pos: u64, out: &mut [u8]) -> Result<()> {
        let end = pos
            .checked_add(out.len() as u64)
            .ok_or(PatchError::OutOfRange("read position overflow"))?;
        if end > self.size {
            return Err(PatchError::OutOfRange("read past end of clip"));
        }
        self.src.read_at(self.begin + pos, out)
    }
}
