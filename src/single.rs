// Single-stream container (`HDIFFSF20`).
//
// The whole diff body is one forward stream so it can be decompressed on
// the fly without per-segment seeks. Covers and their RLE deltas arrive
// in bounded steps: each step starts with two varints (cover bytes, rle
// bytes), the step block is read into a fixed buffer, and literal bytes
// for the gaps follow inline in the main stream.

use crate::decompress::{DecompressStream, Decompressor};
use crate::engine::{STREAM_CACHE_SIZE, resolve_decompressor};
use crate::error::{PatchError, Result};
use crate::hdiff::header::{SingleDiffInfo, single_diff_info};
use crate::hdiff::outcache::OutputCache;
use crate::hdiff::rle::Rle0Decoder;
use crate::hdiff::varint::{self, MAX_VARINT_LEN, VarIntError};
use crate::hdiff::window::StreamWindow;
use crate::stream::{Input, InputClip, Output, SliceOutput};

/// Apply an `HDIFFSF20` diff.
pub fn patch_single_stream(
    new: &mut dyn Output,
    old: &dyn Input,
    diff: &dyn Input,
    decomp: Option<&dyn Decompressor>,
) -> Result<()> {
    let info = single_diff_info(diff)?;
    if new.size() != info.new_data_size {
        return Err(PatchError::SizeMismatch {
            expected: info.new_data_size,
            actual: new.size(),
        });
    }
    if old.size() != info.old_data_size {
        return Err(PatchError::SizeMismatch {
            expected: info.old_data_size,
            actual: old.size(),
        });
    }
    let compressed = u32::from(info.compressed_size > 0);
    let decomp = resolve_decompressor(compressed, &info.compress_type, decomp)?;
    if let Some(decomp) = decomp {
        let body = DecompressStream::open(
            decomp,
            diff,
            info.diff_data_pos,
            info.diff_data_pos + info.compressed_size,
            info.uncompressed_size,
        )?;
        patch_single_body(new, old, &body, &info)
    } else {
        let body = InputClip::new(
            diff,
            info.diff_data_pos,
            info.diff_data_pos + info.uncompressed_size,
        )?;
        patch_single_body(new, old, &body, &info)
    }
}

/// Apply an `HDIFFSF20` diff between in-memory buffers; the output size
/// comes from the header.
pub fn apply_single(old: &[u8], diff: &[u8]) -> Result<Vec<u8>> {
    let info = single_diff_info(&diff)?;
    let mut new = vec![0u8; info.new_data_size as usize];
    let mut out = SliceOutput::new(&mut new);
    patch_single_stream(&mut out, &old, &diff, None)?;
    Ok(new)
}

/// Decode one cover from an in-memory step buffer.
fn step_cover(buf: &[u8], cursor: &mut usize) -> Result<(u8, u64, u64, u64)> {
    let mut field = |tag_bits: u8| -> Result<(u8, u64)> {
        let end = (*cursor + MAX_VARINT_LEN).min(buf.len());
        let code = &buf[*cursor..end];
        let tag = varint::tag_of(*code.first().ok_or(PatchError::Truncated("step cover"))?, tag_bits);
        match varint::unpack_with_tag(code, tag_bits) {
            Ok((value, consumed)) => {
                *cursor += consumed;
                Ok((tag, value))
            }
            Err(VarIntError::Overflow) => Err(PatchError::Malformed("varint overflow")),
            Err(VarIntError::Underflow) => Err(PatchError::Truncated("step cover")),
        }
    };
    let (sign, inc_old) = field(1)?;
    let (_, inc_new) = field(0)?;
    let (_, length) = field(0)?;
    Ok((sign, inc_old, inc_new, length))
}

fn patch_single_body(
    new: &mut dyn Output,
    old: &dyn Input,
    body: &dyn Input,
    info: &SingleDiffInfo,
) -> Result<()> {
    let mut in_clip = StreamWindow::new(body, 0, body.size(), STREAM_CACHE_SIZE)?;
    let mut out = OutputCache::new(new, STREAM_CACHE_SIZE);
    let mut step_buf = vec![0u8; info.step_mem_size as usize];
    let mut work = vec![0u8; STREAM_CACHE_SIZE];

    let new_size = info.new_data_size;
    let old_size = old.size();
    let mut cover_count = info.cover_count;
    let mut last_old_end = 0u64;
    let mut last_new_end = 0u64;

    while cover_count > 0 {
        let cover_size = in_clip.unpack_varint(0)?;
        let rle_size = in_clip.unpack_varint(0)?;
        let total = cover_size
            .checked_add(rle_size)
            .filter(|&t| t <= info.step_mem_size && cover_size <= info.step_mem_size)
            .ok_or(PatchError::Malformed("step sizes out of range"))?;
        in_clip.read_exact_to(&mut step_buf[..total as usize])?;
        let (cover_part, rle_part) = step_buf[..total as usize].split_at(cover_size as usize);
        let mut rle0 = Rle0Decoder::new(rle_part);

        let mut cursor = 0usize;
        while cursor < cover_part.len() {
            if cover_count == 0 {
                return Err(PatchError::Malformed("trailing bytes after covers"));
            }
            let (sign, inc_old, inc_new, length) = step_cover(cover_part, &mut cursor)?;
            let old_pos = if sign == 0 {
                last_old_end.checked_add(inc_old)
            } else {
                last_old_end.checked_sub(inc_old)
            }
            .ok_or(PatchError::Malformed("old position delta out of range"))?;
            let new_pos = last_new_end
                .checked_add(inc_new)
                .ok_or(PatchError::Malformed("new position out of range"))?;

            if new_pos > last_new_end {
                out.copy_from_window(&mut in_clip, new_pos - last_new_end)?;
            }
            cover_count -= 1;
            if length > 0 {
                if new_pos > new_size || length > new_size - new_pos {
                    return Err(PatchError::OutOfRange("cover past end of output"));
                }
                if old_pos > old_size || length > old_size - old_pos {
                    return Err(PatchError::OutOfRange("cover past end of old data"));
                }
                let mut at = old_pos;
                let mut len = length;
                while len > 0 {
                    let step = (work.len() as u64).min(len) as usize;
                    old.read_at(at, &mut work[..step])?;
                    rle0.decode_add(&mut work[..step])?;
                    out.write(&work[..step])?;
                    at += step as u64;
                    len -= step as u64;
                }
            } else if cover_count != 0 {
                // only the final cover may be a bare literal marker
                return Err(PatchError::Malformed("zero-length cover"));
            }
            last_old_end = old_pos + length;
            last_new_end = new_pos + length;
        }
    }

    if last_new_end < new_size {
        out.copy_from_window(&mut in_clip, new_size - last_new_end)?;
        last_new_end = new_size;
    }
    out.flush()?;

    let done = in_clip.is_finish() && out.is_finish() && last_new_end == new_size;
    if done {
        Ok(())
    } else {
        Err(PatchError::Malformed("diff streams not fully consumed"))
    }
}
