// Patch engines for the packed and compressed containers.
//
// Both containers drive the same inner loop: walk the covers in new-file
// order, copy literal bytes into the gaps, and for each cover read old
// data, add the RLE-decoded delta onto it, and emit the sum. The
// containers differ only in how the cover/ctrl/code/literal segments are
// located and whether they pass through a decompressor first.

use log::debug;

use crate::decompress::{DecompressStream, Decompressor, decompressor_for};
use crate::error::{PatchError, Result};
use crate::hdiff::covers::{CoverSource, StreamCovers};
use crate::hdiff::header::{CompressedDiffInfo, DiffHead, DiffzHead, read_diffz_head};
use crate::hdiff::outcache::OutputCache;
use crate::hdiff::rle::ByteRle;
use crate::hdiff::window::StreamWindow;
use crate::oldcache::{CacheKind, OldCachePlan, plan_old_cache};
use crate::stream::{Input, Output, SliceOutput};

/// Default per-stream cache when no memory budget is given.
pub(crate) const STREAM_CACHE_SIZE: usize = 4096;

/// Cover-stream cache while draining covers for the old-data planner.
pub(crate) const PLAN_COVER_CACHE_SIZE: usize = 64 * 1024;

/// A budget is split into this many equal stream caches; three of them
/// are freed up when covers are replayed from memory.
fn budget_cache_size(budget: u64, parts: u64) -> usize {
    (budget / parts).clamp(1024, 1 << 30) as usize
}

// ---------------------------------------------------------------------------
// Inner loop
// ---------------------------------------------------------------------------

/// Apply one diff given already-opened streams.
///
/// Success requires every stream to finish exactly: covers, RLE ctrl and
/// code, literal bytes, and the output itself.
pub(crate) fn patch_by_clip(
    out: &mut OutputCache<'_>,
    old: &dyn Input,
    covers: &mut dyn CoverSource,
    literal: &mut StreamWindow<'_>,
    rle: &mut ByteRle<'_>,
    work: &mut [u8],
) -> Result<()> {
    let new_data_size = out.leave_size();
    let old_size = old.size();
    let mut new_pos_back = 0u64;

    while covers.remaining() > 0 {
        let c = covers.read_cover()?;
        if c.new_pos < new_pos_back {
            return Err(PatchError::Malformed("covers overlap in output"));
        }
        if c.new_pos > new_data_size || c.length > new_data_size - c.new_pos {
            return Err(PatchError::OutOfRange("cover past end of output"));
        }
        if c.old_pos > old_size || c.length > old_size - c.old_pos {
            return Err(PatchError::OutOfRange("cover past end of old data"));
        }
        if c.new_pos > new_pos_back {
            let gap = c.new_pos - new_pos_back;
            out.copy_from_window(literal, gap)?;
            rle.skip(gap)?;
        }
        let mut old_pos = c.old_pos;
        let mut len = c.length;
        while len > 0 {
            let step = (work.len() as u64).min(len) as usize;
            old.read_at(old_pos, &mut work[..step])?;
            rle.decode_add(&mut work[..step])?;
            out.write(&work[..step])?;
            old_pos += step as u64;
            len -= step as u64;
        }
        new_pos_back = c.new_pos + c.length;
    }
    if new_pos_back < new_data_size {
        let gap = new_data_size - new_pos_back;
        out.copy_from_window(literal, gap)?;
        rle.skip(gap)?;
        new_pos_back = new_data_size;
    }
    out.flush()?;

    let done = rle.is_finish()
        && covers.is_finish()
        && out.is_finish()
        && literal.is_finish()
        && new_pos_back == new_data_size;
    if done {
        Ok(())
    } else {
        Err(PatchError::Malformed("diff streams not fully consumed"))
    }
}

// ---------------------------------------------------------------------------
// Packed container
// ---------------------------------------------------------------------------

/// Segment positions a packed head does not carry directly: the RLE ctrl
/// range, with the code stream running from its end to the stream end.
struct PackedLayout {
    head: DiffHead,
    ctrl_begin: u64,
    ctrl_end: u64,
}

fn packed_layout(diff: &dyn Input) -> Result<PackedLayout> {
    let head = DiffHead::read(diff)?;
    let rle_begin = head.cover_end + head.new_data_diff_size;
    let mut w = StreamWindow::new(diff, rle_begin, diff.size(), 64)?;
    let ctrl_size = w.unpack_varint(0)?;
    let ctrl_begin = w.read_pos_of_src();
    let ctrl_end = ctrl_begin
        .checked_add(ctrl_size)
        .ok_or(PatchError::Malformed("segment sizes overflow"))?;
    if ctrl_end > diff.size() {
        return Err(PatchError::Truncated("rle ctrl past end of stream"));
    }
    Ok(PackedLayout {
        head,
        ctrl_begin,
        ctrl_end,
    })
}

fn open_packed_covers<'a>(
    diff: &'a dyn Input,
    head: &DiffHead,
    cache: usize,
) -> Result<StreamCovers<'a>> {
    let lengths_end = head.head_end + head.length_size;
    let inc_new_end = lengths_end + head.inc_new_pos_size;
    Ok(StreamCovers::packed(
        head.cover_count,
        StreamWindow::new(diff, head.head_end, lengths_end, cache)?,
        StreamWindow::new(diff, lengths_end, inc_new_end, cache)?,
        StreamWindow::new(diff, inc_new_end, head.cover_end, cache)?,
    ))
}

fn run_packed(
    new: &mut dyn Output,
    old: &dyn Input,
    diff: &dyn Input,
    layout: &PackedLayout,
    covers: &mut dyn CoverSource,
    cache: usize,
) -> Result<()> {
    let head = &layout.head;
    let mut literal = StreamWindow::new(
        diff,
        head.cover_end,
        head.cover_end + head.new_data_diff_size,
        cache,
    )?;
    let ctrl = StreamWindow::new(diff, layout.ctrl_begin, layout.ctrl_end, cache)?;
    let code = StreamWindow::new(diff, layout.ctrl_end, diff.size(), cache)?;
    let mut rle = ByteRle::new(ctrl, code);
    let mut out = OutputCache::new(new, cache);
    let mut work = vec![0u8; cache];
    patch_by_clip(&mut out, old, covers, &mut literal, &mut rle, &mut work)
}

/// Apply a packed diff with fixed, small stream caches.
pub fn patch_stream(new: &mut dyn Output, old: &dyn Input, diff: &dyn Input) -> Result<()> {
    let layout = packed_layout(diff)?;
    let mut covers = open_packed_covers(diff, &layout.head, STREAM_CACHE_SIZE)?;
    run_packed(new, old, diff, &layout, &mut covers, STREAM_CACHE_SIZE)
}

/// Apply a packed diff within roughly `budget` bytes of working memory,
/// spending the surplus on an old-data cache.
pub fn patch_stream_with_cache(
    new: &mut dyn Output,
    old: &dyn Input,
    diff: &dyn Input,
    budget: u64,
) -> Result<()> {
    let layout = packed_layout(diff)?;
    let new_size = new.size();
    let plan = {
        let mut plan_covers = open_packed_covers(diff, &layout.head, PLAN_COVER_CACHE_SIZE)?;
        plan_old_cache(old, new_size, &mut plan_covers, CacheKind::Packed, budget)?
    };
    match plan {
        OldCachePlan::LoadAll(buf) => {
            debug!("old data fully loaded ({} bytes)", buf.len());
            let cache = budget_cache_size(budget, 8);
            let mut covers = open_packed_covers(diff, &layout.head, cache)?;
            run_packed(new, &buf, diff, &layout, &mut covers, cache)
        }
        OldCachePlan::Active(ac) => {
            debug!(
                "old data hot-cached: {} covers, hot cache {} bytes",
                ac.covers.len(),
                ac.hot_size()
            );
            let cache = budget_cache_size(budget, 8 - 3);
            let mut covers = ac.cover_source();
            match ac.cached_old(old) {
                Some(cached) => run_packed(new, &cached, diff, &layout, &mut covers, cache),
                None => run_packed(new, old, diff, &layout, &mut covers, cache),
            }
        }
        OldCachePlan::Direct => {
            debug!("old data read directly");
            let cache = budget_cache_size(budget, 8);
            let mut covers = open_packed_covers(diff, &layout.head, cache)?;
            run_packed(new, old, diff, &layout, &mut covers, cache)
        }
    }
}

/// Apply a packed diff between in-memory buffers. The packed container
/// does not record the output size, so the caller supplies it.
pub fn apply_packed(old: &[u8], diff: &[u8], new_size: usize) -> Result<Vec<u8>> {
    let mut new = vec![0u8; new_size];
    let mut out = SliceOutput::new(&mut new);
    patch_stream(&mut out, &old, &diff)?;
    Ok(new)
}

// ---------------------------------------------------------------------------
// Compressed container
// ---------------------------------------------------------------------------

/// One segment of a compressed diff: either a plain byte range or a
/// decompressing stream over a compressed range.
pub(crate) enum SegmentSource<'a> {
    Plain { begin: u64, end: u64 },
    Inflated(DecompressStream<'a>),
}

impl<'a> SegmentSource<'a> {
    pub(crate) fn open(
        diff: &'a dyn Input,
        decomp: Option<&dyn Decompressor>,
        pos: u64,
        size: u64,
        compressed_size: u64,
    ) -> Result<SegmentSource<'a>> {
        if compressed_size > 0 {
            let decomp =
                decomp.ok_or_else(|| PatchError::UnsupportedCompression(String::from("(none)")))?;
            let stream = DecompressStream::open(decomp, diff, pos, pos + compressed_size, size)?;
            Ok(SegmentSource::Inflated(stream))
        } else {
            Ok(SegmentSource::Plain {
                begin: pos,
                end: pos + size,
            })
        }
    }

    pub(crate) fn window<'s>(
        &'s self,
        diff: &'s dyn Input,
        cache: usize,
    ) -> Result<StreamWindow<'s>> {
        match self {
            SegmentSource::Plain { begin, end } => StreamWindow::new(diff, *begin, *end, cache),
            SegmentSource::Inflated(s) => StreamWindow::new(s, 0, s.size(), cache),
        }
    }
}

/// Byte positions of the four stored segments, in stream order.
fn diffz_segment_positions(head: &DiffzHead) -> [u64; 4] {
    let stored = head.stored_sizes();
    let cover_pos = head.head_end;
    let ctrl_pos = cover_pos + stored[0];
    let code_pos = ctrl_pos + stored[1];
    let literal_pos = code_pos + stored[2];
    [cover_pos, ctrl_pos, code_pos, literal_pos]
}

pub(crate) fn resolve_decompressor<'d>(
    compressed_count: u32,
    compress_type: &str,
    decomp: Option<&'d dyn Decompressor>,
) -> Result<Option<&'d dyn Decompressor>> {
    if compressed_count == 0 {
        return Ok(None);
    }
    match decomp {
        Some(d) if d.can_open(compress_type) => Ok(Some(d)),
        Some(_) => Err(PatchError::UnsupportedCompression(compress_type.to_owned())),
        None => Ok(Some(decompressor_for(compress_type)?)),
    }
}

fn check_sizes(info: &CompressedDiffInfo, new: &dyn Output, old: &dyn Input) -> Result<()> {
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
    Ok(())
}

fn run_compressed(
    new: &mut dyn Output,
    old: &dyn Input,
    diff: &dyn Input,
    head: &DiffzHead,
    decomp: Option<&dyn Decompressor>,
    covers_override: Option<&mut dyn CoverSource>,
    cache: usize,
) -> Result<()> {
    let [cover_pos, ctrl_pos, code_pos, literal_pos] = diffz_segment_positions(head);

    let ctrl_src = SegmentSource::open(
        diff,
        decomp,
        ctrl_pos,
        head.rle_ctrl_buf_size,
        head.compress_rle_ctrl_buf_size,
    )?;
    let code_src = SegmentSource::open(
        diff,
        decomp,
        code_pos,
        head.rle_code_buf_size,
        head.compress_rle_code_buf_size,
    )?;
    let literal_src = SegmentSource::open(
        diff,
        decomp,
        literal_pos,
        head.new_data_diff_size,
        head.compress_new_data_diff_size,
    )?;

    let mut rle = ByteRle::new(ctrl_src.window(diff, cache)?, code_src.window(diff, cache)?);
    let mut literal = literal_src.window(diff, cache)?;
    let mut out = OutputCache::new(new, cache);
    let mut work = vec![0u8; cache];

    match covers_override {
        Some(covers) => patch_by_clip(&mut out, old, covers, &mut literal, &mut rle, &mut work),
        None => {
            let cover_src = SegmentSource::open(
                diff,
                decomp,
                cover_pos,
                head.cover_buf_size,
                head.compress_cover_buf_size,
            )?;
            let mut covers =
                StreamCovers::interleaved(head.cover_count, cover_src.window(diff, cache)?);
            patch_by_clip(&mut out, old, &mut covers, &mut literal, &mut rle, &mut work)
        }
    }
}

/// Apply an `HDIFF13` diff. A backend override may be passed; otherwise
/// the compressor named in the header is looked up among the built-in
/// backends.
pub fn patch_decompress(
    new: &mut dyn Output,
    old: &dyn Input,
    diff: &dyn Input,
    decomp: Option<&dyn Decompressor>,
) -> Result<()> {
    let (info, head) = read_diffz_head(diff)?;
    check_sizes(&info, new, old)?;
    let decomp = resolve_decompressor(info.compressed_count, &info.compress_type, decomp)?;
    run_compressed(new, old, diff, &head, decomp, None, STREAM_CACHE_SIZE)
}

/// `patch_decompress` within roughly `budget` bytes of working memory.
pub fn patch_decompress_with_cache(
    new: &mut dyn Output,
    old: &dyn Input,
    diff: &dyn Input,
    decomp: Option<&dyn Decompressor>,
    budget: u64,
) -> Result<()> {
    let (info, head) = read_diffz_head(diff)?;
    check_sizes(&info, new, old)?;
    let decomp = resolve_decompressor(info.compressed_count, &info.compress_type, decomp)?;

    let plan = {
        let cover_src = SegmentSource::open(
            diff,
            decomp,
            head.head_end,
            head.cover_buf_size,
            head.compress_cover_buf_size,
        )?;
        let mut plan_covers = StreamCovers::interleaved(
            head.cover_count,
            cover_src.window(diff, PLAN_COVER_CACHE_SIZE)?,
        );
        plan_old_cache(
            old,
            info.new_data_size,
            &mut plan_covers,
            CacheKind::Compressed,
            budget,
        )?
    };
    match plan {
        OldCachePlan::LoadAll(buf) => {
            debug!("old data fully loaded ({} bytes)", buf.len());
            let cache = budget_cache_size(budget, 6);
            run_compressed(new, &buf, diff, &head, decomp, None, cache)
        }
        OldCachePlan::Active(ac) => {
            debug!(
                "old data hot-cached: {} covers, hot cache {} bytes",
                ac.covers.len(),
                ac.hot_size()
            );
            let cache = budget_cache_size(budget, 6 - 1);
            let mut covers = ac.cover_source();
            match ac.cached_old(old) {
                Some(cached) => run_compressed(
                    new,
                    &cached,
                    diff,
                    &head,
                    decomp,
                    Some(&mut covers),
                    cache,
                ),
                None => run_compressed(new, old, diff, &head, decomp, Some(&mut covers), cache),
            }
        }
        OldCachePlan::Direct => {
            debug!("old data read directly");
            let cache = budget_cache_size(budget, 6);
            run_compressed(new, old, diff, &head, decomp, None, cache)
        }
    }
}

/// Apply an `HDIFF13` diff between in-memory buffers; the output size
/// comes from the header.
pub fn apply_compressed(old: &[u8], diff: &[u8]) -> Result<Vec<u8>> {
    let (info, _) = read_diffz_head(&diff)?;
    let mut new = vec![0u8; info.new_data_size as usize];
    let mut out = SliceOutput::new(&mut new);
    patch_decompress(&mut out, &old, &diff, None)?;
    Ok(new)
}
