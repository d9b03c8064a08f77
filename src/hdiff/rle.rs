// Run-length codecs for the delta byte streams.
//
// `ByteRle` is the four-type additive codec of the main containers: a
// control stream of tagged varints describing runs, and a code stream
// holding fill bytes and literal runs. Decoded bytes are ADDED to the
// output, so a zero run leaves the output untouched. Runs may span many
// `decode_add` calls; partial state is kept between calls.
//
// `Rle0Decoder` is the two-way zero/literal codec of the single-stream
// container, decoding from an in-memory step buffer.

use crate::error::{PatchError, Result};
use crate::hdiff::varint;
use crate::hdiff::window::StreamWindow;

/// Control-varint tag width: the run type lives in the top 2 bits.
const RLE_TYPE_BITS: u8 = 2;

const RLE_TYPE_ZERO: u8 = 0;
const RLE_TYPE_FF: u8 = 1;
const RLE_TYPE_FILL: u8 = 2;
// type 3: literal run from the code stream

pub struct ByteRle<'a> {
    ctrl: StreamWindow<'a>,
    code: StreamWindow<'a>,
    set_len: u64,
    set_value: u8,
    copy_len: u64,
}

impl<'a> ByteRle<'a> {
    pub fn new(ctrl: StreamWindow<'a>, code: StreamWindow<'a>) -> Self {
        ByteRle {
            ctrl,
            code,
            set_len: 0,
            set_value: 0,
            copy_len: 0,
        }
    }

    /// Decode `out.len()` delta bytes and add them onto `out`.
    pub fn decode_add(&mut self, out: &mut [u8]) -> Result<()> {
        let len = out.len() as u64;
        self.decode(Some(out), len)
    }

    /// Advance the decoder without touching any output.
    pub fn skip(&mut self, len: u64) -> Result<()> {
        self.decode(None, len)
    }

    pub fn is_finish(&self) -> bool {
        self.set_len == 0 && self.copy_len == 0 && self.ctrl.is_finish() && self.code.is_finish()
    }

    fn decode(&mut self, mut out: Option<&mut [u8]>, mut remaining: u64) -> Result<()> {
        let mut pos = 0usize;
        self.drain(&mut out, &mut pos, &mut remaining)?;
        while remaining > 0 && !self.ctrl.is_finish() {
            let run_type = {
                let first = self.ctrl.access(1)?[0];
                varint::tag_of(first, RLE_TYPE_BITS)
            };
            let run_len = self.ctrl.unpack_varint(RLE_TYPE_BITS)? + 1;
            match run_type {
                RLE_TYPE_ZERO => {
                    self.set_len = run_len;
                    self.set_value = 0;
                }
                RLE_TYPE_FF => {
                    self.set_len = run_len;
                    self.set_value = 0xFF;
                }
                RLE_TYPE_FILL => {
                    self.set_value = self.code.read(1)?[0];
                    self.set_len = run_len;
                }
                _ => {
                    self.copy_len = run_len;
                }
            }
            self.drain(&mut out, &mut pos, &mut remaining)?;
        }
        if remaining == 0 {
            Ok(())
        } else {
            Err(PatchError::Truncated("rle control stream"))
        }
    }

    /// Consume pending run state into the output cursor.
    fn drain(
        &mut self,
        out: &mut Option<&mut [u8]>,
        pos: &mut usize,
        remaining: &mut u64,
    ) -> Result<()> {
        if self.set_len > 0 {
            let step = self.set_len.min(*remaining);
            if let Some(out) = out.as_deref_mut() {
                if self.set_value != 0 {
                    for b in &mut out[*pos..*pos + step as usize] {
                        *b = b.wrapping_add(self.set_value);
                    }
                }
                *pos += step as usize;
            }
            *remaining -= step;
            self.set_len -= step;
        }
        while self.copy_len > 0 && *remaining > 0 {
            let step = (self.code.cache_capacity() as u64)
                .min(self.copy_len)
                .min(*remaining) as usize;
            let data = self.code.read(step)?;
            if let Some(out) = out.as_deref_mut() {
                for (b, d) in out[*pos..*pos + step].iter_mut().zip(data) {
                    *b = b.wrapping_add(*d);
                }
                *pos += step;
            }
            self.copy_len -= step as u64;
            *remaining -= step as u64;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Single-stream zero/literal codec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rle0Next {
    ZeroRun,
    LiteralRun,
}

/// Alternating zero-run / literal-run additive decoder over one buffer.
/// Each run is a plain varint length; literal bytes follow in the same
/// buffer as the lengths.
pub struct Rle0Decoder<'a> {
    code: &'a [u8],
    pos: usize,
    len0: u64,
    lenv: usize,
    next: Rle0Next,
}

impl<'a> Rle0Decoder<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Rle0Decoder {
            code,
            pos: 0,
            len0: 0,
            lenv: 0,
            next: Rle0Next::ZeroRun,
        }
    }

    pub fn is_finish(&self) -> bool {
        self.len0 == 0 && self.lenv == 0 && self.pos == self.code.len()
    }

    fn unpack(&mut self) -> Result<u64> {
        let (value, consumed) = varint::unpack_with_tag(&self.code[self.pos..], 0)
            .map_err(|_| PatchError::Truncated("rle0 code buffer"))?;
        self.pos += consumed;
        Ok(value)
    }

    /// Decode `out.len()` delta bytes and add them onto `out`.
    pub fn decode_add(&mut self, out: &mut [u8]) -> Result<()> {
        let mut pos = 0usize;
        let mut remaining = out.len();
        while remaining > 0 {
            if self.len0 > 0 {
                let step = self.len0.min(remaining as u64);
                pos += step as usize;
                remaining -= step as usize;
                self.len0 -= step;
            } else if self.lenv > 0 {
                let step = self.lenv.min(remaining);
                for (b, d) in out[pos..pos + step]
                    .iter_mut()
                    .zip(&self.code[self.pos..self.pos + step])
                {
                    *b = b.wrapping_add(*d);
                }
                self.pos += step;
                pos += step;
                remaining -= step;
                self.lenv -= step;
            } else {
                match self.next {
                    Rle0Next::ZeroRun => {
                        self.len0 = self.unpack()?;
                        self.next = Rle0Next::LiteralRun;
                    }
                    Rle0Next::LiteralRun => {
                        let lenv = self.unpack()?;
                        if lenv > (self.code.len() - self.pos) as u64 {
                            return Err(PatchError::Truncated("rle0 literal run"));
                        }
                        self.lenv = lenv as usize;
                        self.next = Rle0Next::ZeroRun;
                    }
                }
            }
        }
        Ok(())
    }
}
