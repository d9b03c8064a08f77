// Sliding read window over a sub-range of an `Input`.
//
// The cache buffer fills from the back: `buf[cache_begin..]` holds unread
// bytes, refills move leftovers down and read new bytes in behind them.
// All segment decoding (varints, type strings, bulk copies) goes through
// one of these.

use crate::error::{PatchError, Result};
use crate::hdiff::varint::{self, MAX_VARINT_LEN, VarIntError};
use crate::stream::Input;

/// Longest compression-type string accepted in a container header,
/// excluding the terminator.
pub const MAX_TYPE_LEN: usize = 259;

pub struct StreamWindow<'a> {
    src: &'a dyn Input,
    pos: u64,
    pos_end: u64,
    buf: Vec<u8>,
    cache_begin: usize,
}

impl<'a> StreamWindow<'a> {
    pub fn new(src: &'a dyn Input, pos: u64, pos_end: u64, cache_size: usize) -> Result<Self> {
        if pos > pos_end || pos_end > src.size() {
            return Err(PatchError::OutOfRange("window range outside stream"));
        }
        debug_assert!(cache_size >= MAX_VARINT_LEN);
        Ok(StreamWindow {
            src,
            pos,
            pos_end,
            buf: vec![0; cache_size],
            cache_begin: cache_size,
        })
    }

    #[inline]
    pub fn cached_size(&self) -> usize {
        self.buf.len() - self.cache_begin
    }

    #[inline]
    pub fn cache_capacity(&self) -> usize {
        self.buf.len()
    }

    /// Unread bytes left in the window, cached or not.
    #[inline]
    pub fn remaining(&self) -> u64 {
        (self.pos_end - self.pos) + self.cached_size() as u64
    }

    #[inline]
    pub fn is_finish(&self) -> bool {
        self.remaining() == 0
    }

    /// Source-stream position of the next unread byte.
    #[inline]
    pub fn read_pos_of_src(&self) -> u64 {
        self.pos - self.cached_size() as u64
    }

    /// Pull more bytes from the source, keeping unread cached bytes.
    fn update_cache(&mut self) -> Result<()> {
        let stream_left = self.pos_end - self.pos;
        let read_size = (self.cache_begin as u64).min(stream_left) as usize;
        if read_size == 0 {
            return Ok(());
        }
        let end = self.buf.len();
        if self.cached_size() > 0 {
            self.buf
                .copy_within(self.cache_begin..end, self.cache_begin - read_size);
        }
        self.src.read_at(self.pos, &mut self.buf[end - read_size..])?;
        self.cache_begin -= read_size;
        self.pos += read_size as u64;
        Ok(())
    }

    /// Make at least `need` bytes available and return the cached run.
    /// The returned slice may be longer than `need`.
    pub fn access(&mut self, need: usize) -> Result<&[u8]> {
        debug_assert!(need <= self.buf.len());
        if need > self.cached_size() {
            self.update_cache()?;
            if need > self.cached_size() {
                return Err(PatchError::Truncated("stream window exhausted"));
            }
        }
        Ok(&self.buf[self.cache_begin..])
    }

    /// Consume `n` bytes already made available by `access`.
    #[inline]
    pub fn skip_cached(&mut self, n: usize) {
        debug_assert!(n <= self.cached_size());
        self.cache_begin += n;
    }

    /// Read `n` bytes (at most the cache capacity) and consume them.
    pub fn read(&mut self, n: usize) -> Result<&[u8]> {
        self.access(n)?;
        let begin = self.cache_begin;
        self.cache_begin += n;
        Ok(&self.buf[begin..begin + n])
    }

    /// Skip any number of bytes, refilling as needed.
    pub fn skip(&mut self, mut n: u64) -> Result<()> {
        while n > 0 {
            let step = (self.buf.len() as u64).min(n) as usize;
            self.access(step)?;
            self.skip_cached(step);
            n -= step as u64;
        }
        Ok(())
    }

    /// Fill `out` completely, bypassing the cache for large tails.
    pub fn read_exact_to(&mut self, out: &mut [u8]) -> Result<()> {
        let cached = self.cached_size().min(out.len());
        out[..cached].copy_from_slice(&self.buf[self.cache_begin..self.cache_begin + cached]);
        self.cache_begin += cached;
        let rest = &mut out[cached..];
        if rest.is_empty() {
            return Ok(());
        }
        if rest.len() < self.buf.len() / 2 {
            self.update_cache()?;
            if rest.len() > self.cached_size() {
                return Err(PatchError::Truncated("stream window exhausted"));
            }
            let begin = self.cache_begin;
            rest.copy_from_slice(&self.buf[begin..begin + rest.len()]);
            self.cache_begin += rest.len();
            Ok(())
        } else {
            if rest.len() as u64 > self.pos_end - self.pos {
                return Err(PatchError::Truncated("stream window exhausted"));
            }
            self.src.read_at(self.pos, rest)?;
            self.pos += rest.len() as u64;
            Ok(())
        }
    }

    /// Decode one tagged varint from the front of the window.
    pub fn unpack_varint(&mut self, tag_bits: u8) -> Result<u64> {
        let take = (MAX_VARINT_LEN as u64).min(self.remaining()) as usize;
        if take == 0 {
            return Err(PatchError::Truncated("varint"));
        }
        let code = &self.access(take)?[..take];
        match varint::unpack_with_tag(code, tag_bits) {
            Ok((value, consumed)) => {
                self.skip_cached(consumed);
                Ok(value)
            }
            Err(VarIntError::Overflow) => Err(PatchError::Malformed("varint overflow")),
            Err(VarIntError::Underflow) => {
                if take == MAX_VARINT_LEN {
                    Err(PatchError::Malformed("varint too long"))
                } else {
                    Err(PatchError::Truncated("varint"))
                }
            }
        }
    }

    /// Peek the tag bits of the next varint without consuming anything.
    pub fn peek_tag(&mut self, tag_bits: u8) -> Result<u8> {
        let first = self.access(1)?[0];
        Ok(varint::tag_of(first, tag_bits))
    }

    /// Read a `terminator`-delimited UTF-8 string of at most
    /// `MAX_TYPE_LEN` bytes, consuming the terminator too.
    pub fn read_type_end(&mut self, terminator: u8) -> Result<String> {
        let take = ((MAX_TYPE_LEN + 1) as u64).min(self.remaining()) as usize;
        let data = &self.access(take)?[..take];
        let Some(i) = data.iter().position(|&b| b == terminator) else {
            return Err(PatchError::Malformed("unterminated type string"));
        };
        let s = std::str::from_utf8(&data[..i])
            .map_err(|_| PatchError::Malformed("type string is not utf-8"))?
            .to_owned();
        self.skip_cached(i + 1);
        Ok(s)
    }
}
