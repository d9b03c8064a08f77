// Buffered writer over an `Output`, append-only.
//
// Everything the engine emits funnels through here: plain writes, byte
// fills, literal copies out of a stream window, and self-referencing
// copies that may reach back into already flushed output.

use crate::error::{PatchError, Result};
use crate::hdiff::window::StreamWindow;
use crate::stream::{Input, Output};

pub struct OutputCache<'a> {
    dst: &'a mut dyn Output,
    write_to_pos: u64,
    buf: Vec<u8>,
    cur: usize,
}

impl<'a> OutputCache<'a> {
    pub fn new(dst: &'a mut dyn Output, cache_size: usize) -> Self {
        OutputCache {
            dst,
            write_to_pos: 0,
            buf: vec![0; cache_size],
            cur: 0,
        }
    }

    /// Bytes still to be produced before the output is complete.
    #[inline]
    pub fn leave_size(&self) -> u64 {
        self.dst.size() - self.write_to_pos
    }

    /// All flushed: buffered bytes do not count until `flush`.
    #[inline]
    pub fn is_finish(&self) -> bool {
        self.write_to_pos == self.dst.size()
    }

    fn write_through(&mut self, data: &[u8]) -> Result<()> {
        self.dst.write_at(self.write_to_pos, data)?;
        self.write_to_pos += data.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.cur > 0 {
            self.dst.write_at(self.write_to_pos, &self.buf[..self.cur])?;
            self.write_to_pos += self.cur as u64;
            self.cur = 0;
        }
        Ok(())
    }

    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            if data.len() >= self.buf.len() && self.cur == 0 {
                return self.write_through(data);
            }
            let step = (self.buf.len() - self.cur).min(data.len());
            self.buf[self.cur..self.cur + step].copy_from_slice(&data[..step]);
            self.cur += step;
            data = &data[step..];
            if self.cur == self.buf.len() {
                self.flush()?;
            }
        }
        Ok(())
    }

    pub fn fill(&mut self, value: u8, mut len: u64) -> Result<()> {
        while len > 0 {
            let step = ((self.buf.len() - self.cur) as u64).min(len) as usize;
            self.buf[self.cur..self.cur + step].fill(value);
            self.cur += step;
            len -= step as u64;
            if self.cur == self.buf.len() {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Copy `len` bytes out of an input stream starting at `src_pos`.
    pub fn copy_from_stream(
        &mut self,
        src: &dyn Input,
        mut src_pos: u64,
        mut len: u64,
    ) -> Result<()> {
        while len > 0 {
            let step = ((self.buf.len() - self.cur) as u64).min(len) as usize;
            src.read_at(src_pos, &mut self.buf[self.cur..self.cur + step])?;
            src_pos += step as u64;
            self.cur += step;
            len -= step as u64;
            if self.cur == self.buf.len() {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Copy `len` bytes out of a stream window in window-sized steps.
    pub fn copy_from_window(&mut self, src: &mut StreamWindow<'_>, mut len: u64) -> Result<()> {
        let step_max = src.cache_capacity().min(self.buf.len());
        while len > 0 {
            let step = (step_max as u64).min(len) as usize;
            let data = src.read(step)?;
            self.write(data)?;
            len -= step as u64;
        }
        Ok(())
    }

    /// Copy `len` bytes from `ahead` bytes back in the output itself.
    /// The source may be flushed, still buffered, or both.
    pub fn copy_from_self(&mut self, ahead: u64, mut len: u64) -> Result<()> {
        let produced = self.write_to_pos + self.cur as u64;
        if ahead < 1 || ahead > produced {
            return Err(PatchError::OutOfRange("self copy reaches before start"));
        }
        let src_pos = produced - ahead;

        if src_pos + len <= self.write_to_pos {
            return self.copy_back(src_pos, len);
        }
        if src_pos >= self.write_to_pos {
            return self.copy_in_mem(ahead, len);
        }

        // Source straddles the flush point.
        if produced <= src_pos + self.buf.len() as u64 {
            let run = (self.write_to_pos - src_pos) as usize;
            debug_assert!(self.cur + run <= self.buf.len());
            self.dst
                .read_back(src_pos, &mut self.buf[self.cur..self.cur + run])?;
            self.cur += run;
            len -= run as u64;
            if self.cur == self.buf.len() {
                // The run now repeats itself in whole buffer lengths.
                loop {
                    if self.cur == self.buf.len() {
                        self.flush()?;
                    }
                    if len == 0 {
                        return Ok(());
                    }
                    let step = (self.buf.len() as u64).min(len) as usize;
                    len -= step as u64;
                    self.cur = step;
                }
            }
            return self.copy_in_mem(ahead, len);
        }
        self.copy_back(src_pos, len)
    }

    /// Like `copy_from_stream`, reading already flushed output back in.
    fn copy_back(&mut self, mut src_pos: u64, mut len: u64) -> Result<()> {
        while len > 0 {
            let step = ((self.buf.len() - self.cur) as u64).min(len) as usize;
            self.dst
                .read_back(src_pos, &mut self.buf[self.cur..self.cur + step])?;
            src_pos += step as u64;
            self.cur += step;
            len -= step as u64;
            if self.cur == self.buf.len() {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Overlapping forward copy entirely inside the cache buffer.
    fn copy_in_mem(&mut self, ahead: u64, mut len: u64) -> Result<()> {
        let ahead = ahead as usize;
        while len > 0 {
            let run = if self.cur as u64 + len <= self.buf.len() as u64 {
                len as usize
            } else {
                self.buf.len() - self.cur
            };
            for i in 0..run {
                self.buf[self.cur + i] = self.buf[self.cur + i - ahead];
            }
            len -= run as u64;
            self.cur += run;
            if self.cur == self.buf.len() {
                self.flush()?;
                // Re-seed the front with the last `ahead` bytes so the
                // overlapping copy can continue in-buffer.
                let keep = (ahead as u64).min(len) as usize;
                let end = self.buf.len();
                self.buf.copy_within(end - ahead..end - ahead + keep, 0);
                self.cur = keep;
                len -= keep as u64;
            } else {
                debug_assert_eq!(len, 0);
            }
        }
        Ok(())
    }
}
