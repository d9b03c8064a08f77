// Old-data access planning.
//
// Patching reads the old file at cover positions that jump around; on
// slow media that dominates run time. Given a memory budget the planner
// picks one of three strategies:
//   - load the whole old file when it fits;
//   - drain the covers into memory and pre-load the most valuable cover
//     ranges into a hot cache filled by one sequential scan;
//   - fall back to direct reads.

use std::cell::RefCell;

use crate::error::{PatchError, Result};
use crate::hdiff::covers::{ArrayCoverSource, CoverArray, CoverSource};
use crate::stream::Input;

/// Part of the budget reserved for stream caches per strategy check.
const MIN_STREAM_CACHE_TOTAL: u64 = 4096;

/// Floor for trying the hot-cache strategy at all.
const ACTIVE_CACHE_FLOOR: u64 = 8 << 20;

/// Gaps at least this wide break the sequential load scan.
const MIN_SPACE_LEN: u64 = 4 << 20;

/// Read chunks during the load scan are at most half a gap.
const LOAD_CHUNK_MAX: u64 = MIN_SPACE_LEN >> 1;

const PAGE_SIZE: u64 = 4096;

/// How many stream caches the surrounding patch loop needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Packed,
    Compressed,
}

impl CacheKind {
    fn cache_count(self) -> u64 {
        match self {
            CacheKind::Packed => 8,
            CacheKind::Compressed => 6,
        }
    }
}

pub enum OldCachePlan {
    /// The old file, fully in memory.
    LoadAll(Vec<u8>),
    /// Covers in memory, optionally with a hot cache of old-data ranges.
    Active(ActiveCache),
    /// Not enough memory to help; read the old stream as-is.
    Direct,
}

pub struct ActiveCache {
    pub covers: CoverArray,
    hot: Option<HotCache>,
}

struct HotCache {
    data: Vec<u8>,
    /// Covers at most this long were loaded.
    max_cached_len: u64,
}

impl ActiveCache {
    pub fn cover_source(&self) -> ArrayCoverSource<'_> {
        ArrayCoverSource::new(&self.covers)
    }

    pub fn hot_size(&self) -> usize {
        self.hot.as_ref().map_or(0, |h| h.data.len())
    }

    /// Old-data reader routing cover reads through the hot cache, or
    /// `None` when no hot cache was built.
    pub fn cached_old<'a>(&'a self, old: &'a dyn Input) -> Option<CachedOld<'a>> {
        let hot = self.hot.as_ref()?;
        Some(CachedOld {
            old,
            covers: &self.covers,
            hot,
            state: RefCell::new(ReadState {
                next_idx: 0,
                cover_old_pos: 0,
                read_from_pos: 0,
                read_from_end: 0,
                hot_pos: 0,
                in_hot: false,
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

pub fn plan_old_cache(
    old: &dyn Input,
    new_data_size: u64,
    covers: &mut dyn CoverSource,
    kind: CacheKind,
    budget: u64,
) -> Result<OldCachePlan> {
    let old_size = old.size();
    let stream_reserve = MIN_STREAM_CACHE_TOTAL * kind.cache_count();

    if budget >= old_size + stream_reserve {
        let mut buf = vec![0u8; old_size as usize];
        old.read_at(0, &mut buf)?;
        return Ok(OldCachePlan::LoadAll(buf));
    }

    let active_floor = ACTIVE_CACHE_FLOOR
        .min(PLAN_DRAIN_CACHE * kind.cache_count() * 2 + old_size / 8);
    if budget < active_floor {
        return Ok(OldCachePlan::Direct);
    }

    let narrow = (old_size | new_data_size) < (1u64 << 32);
    // The cover count comes straight from the header; cap the array by
    // the budget before reserving anything for it.
    let claimed_mem = covers
        .remaining()
        .checked_mul(CoverArray::record_size(narrow) as u64);
    if !claimed_mem.is_some_and(|mem| mem <= budget) {
        return Ok(OldCachePlan::Direct);
    }
    let covers = match CoverArray::load(covers, narrow) {
        Ok(arr) => arr,
        // Malformed covers fail the same way when re-read; let the
        // streaming path produce the error.
        Err(PatchError::Io(e)) => return Err(PatchError::Io(e)),
        Err(_) => return Ok(OldCachePlan::Direct),
    };
    if covers.is_empty() {
        return Ok(OldCachePlan::Active(ActiveCache { covers, hot: None }));
    }

    let covers_mem = covers.len() as u64 * CoverArray::record_size(narrow) as u64;
    let hot_budget = budget.saturating_sub(covers_mem + stream_reserve);
    let (covers, hot) = build_hot_cache(old, covers, hot_budget)?;
    Ok(OldCachePlan::Active(ActiveCache { covers, hot }))
}

const PLAN_DRAIN_CACHE: u64 = 64 * 1024;

/// Longest cover length whose covers all fit in `avail` bytes together.
fn max_cached_len(covers: &CoverArray, avail: u64) -> u64 {
    let mut sum = 0u64;
    let mut max_len = 0u64;
    for len in covers.sorted_lengths() {
        match sum.checked_add(len) {
            Some(s) if s <= avail => {
                sum = s;
                max_len = len;
            }
            _ => return len.saturating_sub(1),
        }
    }
    max_len
}

/// Assign hot-cache slots in replay (new-position) order. Returns the
/// total hot size, or `None` when too few covers qualify to be worth a
/// scan of the old data.
fn assign_cache_slots(covers: &mut CoverArray, max_len: u64) -> Option<u64> {
    let mut total = 0u64;
    let mut hit_count = 0usize;
    for i in 0..covers.len() {
        let c = covers.get(i);
        if c.length <= max_len {
            covers.set_cache_pos(i, total);
            total += c.length;
            hit_count += 1;
        }
    }
    if hit_count >= covers.len() / 8 + 1 {
        Some(total)
    } else {
        None
    }
}

fn page_align_down(pos: u64) -> u64 {
    pos & !(PAGE_SIZE - 1)
}

/// One sequential scan over the old data, copying qualifying cover
/// ranges into the hot buffer. Wide gaps between qualifying covers are
/// skipped.
fn load_hot_data(
    old: &dyn Input,
    covers: &CoverArray,
    max_len: u64,
    hot: &mut [u8],
) -> Result<()> {
    let old_size = old.size();
    let chunk_len = LOAD_CHUNK_MAX.min(old_size.max(1)) as usize;
    let mut chunk = vec![0u8; chunk_len];

    let mut i = 0usize;
    // first qualifying cover sets the scan start
    while i < covers.len() && covers.get(i).length > max_len {
        i += 1;
    }
    if i == covers.len() {
        return Ok(());
    }
    let mut pos = if old_size < MIN_SPACE_LEN {
        0
    } else {
        page_align_down(covers.get(i).old_pos)
    };

    while i < covers.len() {
        let c = covers.get(i);
        if c.length > max_len {
            i += 1;
            continue;
        }
        if c.old_pos >= pos && c.old_pos - pos >= MIN_SPACE_LEN {
            pos = page_align_down(c.old_pos);
        }
        let step = (chunk.len() as u64).min(old_size - pos) as usize;
        if step == 0 {
            return Err(PatchError::OutOfRange("cover past end of old data"));
        }
        old.read_at(pos, &mut chunk[..step])?;
        let chunk_end = pos + step as u64;

        // copy every qualifying cover overlapping this chunk
        let mut j = i;
        while j < covers.len() {
            let c = covers.get(j);
            if c.length > max_len {
                j += 1;
                continue;
            }
            if c.old_pos >= chunk_end {
                break;
            }
            let begin = c.old_pos.max(pos);
            let end = (c.old_pos + c.length).min(chunk_end);
            if begin < end {
                let hot_at = (covers.cache_pos(j) + (begin - c.old_pos)) as usize;
                let src_at = (begin - pos) as usize;
                hot[hot_at..hot_at + (end - begin) as usize]
                    .copy_from_slice(&chunk[src_at..src_at + (end - begin) as usize]);
            }
            if c.old_pos + c.length <= chunk_end {
                if j == i {
                    i += 1;
                }
                j += 1;
            } else {
                break;
            }
        }
        pos = chunk_end;
    }
    Ok(())
}

fn build_hot_cache(
    old: &dyn Input,
    mut covers: CoverArray,
    hot_budget: u64,
) -> Result<(CoverArray, Option<HotCache>)> {
    if hot_budget == 0 {
        return Ok((covers, None));
    }
    let max_len = max_cached_len(&covers, hot_budget);
    if max_len == 0 {
        return Ok((covers, None));
    }
    let Some(total) = assign_cache_slots(&mut covers, max_len) else {
        return Ok((covers, None));
    };

    let mut data = vec![0u8; total as usize];
    covers.sort_by_old_pos();
    let loaded = load_hot_data(old, &covers, max_len, &mut data);
    covers.sort_by_new_pos();
    match loaded {
        Ok(()) => Ok((
            covers,
            Some(HotCache {
                data,
                max_cached_len: max_len,
            }),
        )),
        Err(PatchError::Io(e)) => Err(PatchError::Io(e)),
        // bad cover geometry: keep the in-memory covers, read old
        // directly, and let the patch loop report the real error
        Err(_) => Ok((covers, None)),
    }
}

// ---------------------------------------------------------------------------
// Cached reader
// ---------------------------------------------------------------------------

/// `Input` over the old data that serves the patch loop's cover reads,
/// in replay order, from the hot cache where possible.
pub struct CachedOld<'a> {
    old: &'a dyn Input,
    covers: &'a CoverArray,
    hot: &'a HotCache,
    state: RefCell<ReadState>,
}

struct ReadState {
    next_idx: usize,
    cover_old_pos: u64,
    read_from_pos: u64,
    read_from_end: u64,
    hot_pos: u64,
    in_hot: bool,
}

impl Input for CachedOld<'_> {
    fn size(&self) -> u64 {
        self.old.size()
    }

    fn read_at(&self, pos: u64, out: &mut [u8]) -> Result<()> {
        let mut st = self.state.borrow_mut();
        while st.read_from_pos == st.read_from_end {
            if st.next_idx >= self.covers.len() {
                return Err(PatchError::OutOfRange("read past the planned covers"));
            }
            let c = self.covers.get(st.next_idx);
            st.cover_old_pos = c.old_pos;
            st.read_from_pos = c.old_pos;
            st.read_from_end = c.old_pos + c.length;
            st.in_hot = c.length <= self.hot.max_cached_len;
            st.hot_pos = self.covers.cache_pos(st.next_idx);
            st.next_idx += 1;
        }
        if pos != st.read_from_pos || out.len() as u64 > st.read_from_end - pos {
            return Err(PatchError::OutOfRange("old read outside cover order"));
        }
        if st.in_hot {
            let at = (st.hot_pos + (pos - st.cover_old_pos)) as usize;
            out.copy_from_slice(&self.hot.data[at..at + out.len()]);
        } else {
            self.old.read_at(pos, out)?;
        }
        st.read_from_pos += out.len() as u64;
        Ok(())
    }
}
