// Cover sequences: the copy instructions of a diff.
//
// Covers arrive as three delta-coded varint streams (separate segments in
// the packed container, interleaved per cover in the compressed one). Old
// positions are signed deltas against a running back-position, new
// positions are implicit in the gaps, lengths are plain.
//
// `CoverArray` is the drained in-memory form used by the old-data cache
// planner; records shrink to 32-bit fields when both files fit.

use crate::error::{PatchError, Result};
use crate::hdiff::window::StreamWindow;

/// Old-position varints carry the delta sign in their top bit.
const SIGN_TAG_BITS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cover {
    pub old_pos: u64,
    pub new_pos: u64,
    pub length: u64,
}

pub trait CoverSource {
    /// Covers not yet read.
    fn remaining(&self) -> u64;

    fn read_cover(&mut self) -> Result<Cover>;

    /// All covers read and every backing stream fully consumed.
    fn is_finish(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Stream-backed covers
// ---------------------------------------------------------------------------

pub enum CoverStreams<'a> {
    /// Three separate segments: lengths, new-position deltas, old-position
    /// deltas.
    Packed {
        lengths: StreamWindow<'a>,
        inc_new_pos: StreamWindow<'a>,
        inc_old_pos: StreamWindow<'a>,
    },
    /// One segment with the three varints of each cover in old, new,
    /// length order.
    Interleaved(StreamWindow<'a>),
}

pub struct StreamCovers<'a> {
    streams: CoverStreams<'a>,
    count: u64,
    old_pos_back: u64,
    new_pos_back: u64,
    old_pos_includes_length: bool,
}

impl<'a> StreamCovers<'a> {
    pub fn packed(
        count: u64,
        lengths: StreamWindow<'a>,
        inc_new_pos: StreamWindow<'a>,
        inc_old_pos: StreamWindow<'a>,
    ) -> Self {
        StreamCovers {
            streams: CoverStreams::Packed {
                lengths,
                inc_new_pos,
                inc_old_pos,
            },
            count,
            old_pos_back: 0,
            new_pos_back: 0,
            old_pos_includes_length: false,
        }
    }

    pub fn interleaved(count: u64, stream: StreamWindow<'a>) -> Self {
        StreamCovers {
            streams: CoverStreams::Interleaved(stream),
            count,
            old_pos_back: 0,
            new_pos_back: 0,
            old_pos_includes_length: true,
        }
    }
}

impl CoverSource for StreamCovers<'_> {
    fn remaining(&self) -> u64 {
        self.count
    }

    fn read_cover(&mut self) -> Result<Cover> {
        if self.count == 0 {
            return Err(PatchError::Malformed("cover count exhausted"));
        }
        self.count -= 1;

        let (sign, inc_old, copy_len, length) = match &mut self.streams {
            CoverStreams::Packed {
                lengths,
                inc_new_pos,
                inc_old_pos,
            } => {
                let sign = inc_old_pos.peek_tag(SIGN_TAG_BITS)?;
                let inc_old = inc_old_pos.unpack_varint(SIGN_TAG_BITS)?;
                let copy_len = inc_new_pos.unpack_varint(0)?;
                let length = lengths.unpack_varint(0)?;
                (sign, inc_old, copy_len, length)
            }
            CoverStreams::Interleaved(w) => {
                let sign = w.peek_tag(SIGN_TAG_BITS)?;
                let inc_old = w.unpack_varint(SIGN_TAG_BITS)?;
                let copy_len = w.unpack_varint(0)?;
                let length = w.unpack_varint(0)?;
                (sign, inc_old, copy_len, length)
            }
        };

        let old_pos = if sign == 0 {
            self.old_pos_back.checked_add(inc_old)
        } else {
            self.old_pos_back.checked_sub(inc_old)
        }
        .ok_or(PatchError::Malformed("old position delta out of range"))?;

        let new_pos = self
            .new_pos_back
            .checked_add(copy_len)
            .ok_or(PatchError::Malformed("new position out of range"))?;
        self.new_pos_back = new_pos
            .checked_add(length)
            .ok_or(PatchError::Malformed("new position out of range"))?;
        self.old_pos_back = if self.old_pos_includes_length {
            old_pos
                .checked_add(length)
                .ok_or(PatchError::Malformed("old position out of range"))?
        } else {
            old_pos
        };

        Ok(Cover {
            old_pos,
            new_pos,
            length,
        })
    }

    fn is_finish(&self) -> bool {
        self.count == 0
            && match &self.streams {
                CoverStreams::Packed {
                    lengths,
                    inc_new_pos,
                    inc_old_pos,
                } => lengths.is_finish() && inc_new_pos.is_finish() && inc_old_pos.is_finish(),
                CoverStreams::Interleaved(w) => w.is_finish(),
            }
    }
}

// ---------------------------------------------------------------------------
// In-memory cover array
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct Rec<T> {
    old_pos: T,
    new_pos: T,
    length: T,
    cache_pos: T,
}

enum Recs {
    Narrow(Vec<Rec<u32>>),
    Wide(Vec<Rec<u64>>),
}

/// Drained covers plus a per-cover cache slot, narrow or wide records.
pub struct CoverArray {
    recs: Recs,
}

impl CoverArray {
    /// Record size in bytes for the given width, used for memory budgets.
    pub fn record_size(narrow: bool) -> usize {
        if narrow {
            4 * size_of::<u32>()
        } else {
            4 * size_of::<u64>()
        }
    }

    /// Drain `src` completely. `narrow` must only be set when every cover
    /// position and length fits in 32 bits.
    pub fn load(src: &mut dyn CoverSource, narrow: bool) -> Result<CoverArray> {
        let count = src.remaining();
        let mut recs = if narrow {
            Recs::Narrow(Vec::with_capacity(count as usize))
        } else {
            Recs::Wide(Vec::with_capacity(count as usize))
        };
        for _ in 0..count {
            let c = src.read_cover()?;
            match &mut recs {
                Recs::Narrow(v) => {
                    let (Ok(old_pos), Ok(new_pos), Ok(length)) = (
                        u32::try_from(c.old_pos),
                        u32::try_from(c.new_pos),
                        u32::try_from(c.length),
                    ) else {
                        return Err(PatchError::Malformed("cover out of 32-bit range"));
                    };
                    v.push(Rec {
                        old_pos,
                        new_pos,
                        length,
                        cache_pos: 0,
                    });
                }
                Recs::Wide(v) => v.push(Rec {
                    old_pos: c.old_pos,
                    new_pos: c.new_pos,
                    length: c.length,
                    cache_pos: 0,
                }),
            }
        }
        if !src.is_finish() {
            return Err(PatchError::Malformed("trailing bytes after covers"));
        }
        Ok(CoverArray { recs })
    }

    pub fn len(&self) -> usize {
        match &self.recs {
            Recs::Narrow(v) => v.len(),
            Recs::Wide(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Cover {
        match &self.recs {
            Recs::Narrow(v) => {
                let r = &v[i];
                Cover {
                    old_pos: u64::from(r.old_pos),
                    new_pos: u64::from(r.new_pos),
                    length: u64::from(r.length),
                }
            }
            Recs::Wide(v) => {
                let r = &v[i];
                Cover {
                    old_pos: r.old_pos,
                    new_pos: r.new_pos,
                    length: r.length,
                }
            }
        }
    }

    pub fn cache_pos(&self, i: usize) -> u64 {
        match &self.recs {
            Recs::Narrow(v) => u64::from(v[i].cache_pos),
            Recs::Wide(v) => v[i].cache_pos,
        }
    }

    /// Only valid for positions that fit the record width; the planner
    /// caps the hot cache below 4 GiB when records are narrow.
    pub fn set_cache_pos(&mut self, i: usize, pos: u64) {
        match &mut self.recs {
            Recs::Narrow(v) => v[i].cache_pos = pos as u32,
            Recs::Wide(v) => v[i].cache_pos = pos,
        }
    }

    pub fn sort_by_old_pos(&mut self) {
        match &mut self.recs {
            Recs::Narrow(v) => v.sort_by_key(|r| r.old_pos),
            Recs::Wide(v) => v.sort_by_key(|r| r.old_pos),
        }
    }

    pub fn sort_by_new_pos(&mut self) {
        match &mut self.recs {
            Recs::Narrow(v) => v.sort_by_key(|r| r.new_pos),
            Recs::Wide(v) => v.sort_by_key(|r| r.new_pos),
        }
    }

    /// Cover lengths in ascending order, without disturbing the array.
    pub fn sorted_lengths(&self) -> Vec<u64> {
        let mut lens: Vec<u64> = match &self.recs {
            Recs::Narrow(v) => v.iter().map(|r| u64::from(r.length)).collect(),
            Recs::Wide(v) => v.iter().map(|r| r.length).collect(),
        };
        lens.sort_unstable();
        lens
    }
}

/// Replays a `CoverArray` as a `CoverSource`.
pub struct ArrayCoverSource<'c> {
    arr: &'c CoverArray,
    idx: usize,
}

impl<'c> ArrayCoverSource<'c> {
    pub fn new(arr: &'c CoverArray) -> Self {
        ArrayCoverSource { arr, idx: 0 }
    }
}

impl CoverSource for ArrayCoverSource<'_> {
    fn remaining(&self) -> u64 {
        (self.arr.len() - self.idx) as u64
    }

    fn read_cover(&mut self) -> Result<Cover> {
        if self.idx >= self.arr.len() {
            return Err(PatchError::Malformed("cover count exhausted"));
        }
        let c = self.arr.get(self.idx);
        self.idx += 1;
        Ok(c)
    }

    fn is_finish(&self) -> bool {
        self.idx == self.arr.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdiff::varint::pack_with_tag;
    use crate::stream::Input;

    pub fn encode_packed_covers(covers: &[Cover]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let mut lengths = Vec::new();
        let mut inc_new = Vec::new();
        let mut inc_old = Vec::new();
        let mut old_back = 0u64;
        let mut new_back = 0u64;
        for c in covers {
            let (sign, delta) = if c.old_pos >= old_back {
                (0, c.old_pos - old_back)
            } else {
                (1, old_back - c.old_pos)
            };
            pack_with_tag(delta, sign, SIGN_TAG_BITS, &mut inc_old);
            pack_with_tag(c.new_pos - new_back, 0, 0, &mut inc_new);
            pack_with_tag(c.length, 0, 0, &mut lengths);
            old_back = c.old_pos;
            new_back = c.new_pos + c.length;
        }
        (lengths, inc_new, inc_old)
    }

    fn window(data: &dyn Input) -> StreamWindow<'_> {
        StreamWindow::new(data, 0, data.size(), 64).unwrap()
    }

    #[test]
    fn packed_covers_roundtrip() {
        let covers = [
            Cover { old_pos: 2, new_pos: 0, length: 4 },
            Cover { old_pos: 0, new_pos: 6, length: 3 },
            Cover { old_pos: 100, new_pos: 9, length: 1 },
        ];
        let (lengths, inc_new, inc_old) = encode_packed_covers(&covers);
        let mut src = StreamCovers::packed(
            covers.len() as u64,
            window(&lengths),
            window(&inc_new),
            window(&inc_old),
        );
        for want in covers {
            assert!(!src.is_finish());
            assert_eq!(src.read_cover().unwrap(), want);
        }
        assert!(src.is_finish());
        assert!(src.read_cover().is_err());
    }

    #[test]
    fn interleaved_back_position_includes_length() {
        // Two covers, the second at the exact end of the first in the old
        // file: delta 0 under the length-inclusive back position.
        let mut data = Vec::new();
        pack_with_tag(5, 0, SIGN_TAG_BITS, &mut data);
        pack_with_tag(0, 0, 0, &mut data);
        pack_with_tag(3, 0, 0, &mut data);
        pack_with_tag(0, 0, SIGN_TAG_BITS, &mut data);
        pack_with_tag(2, 0, 0, &mut data);
        pack_with_tag(4, 0, 0, &mut data);
        let mut src = StreamCovers::interleaved(2, window(&data));
        assert_eq!(
            src.read_cover().unwrap(),
            Cover { old_pos: 5, new_pos: 0, length: 3 }
        );
        assert_eq!(
            src.read_cover().unwrap(),
            Cover { old_pos: 8, new_pos: 5, length: 4 }
        );
        assert!(src.is_finish());
    }

    #[test]
    fn negative_delta_steps_backwards() {
        let covers = [
            Cover { old_pos: 50, new_pos: 0, length: 2 },
            Cover { old_pos: 10, new_pos: 4, length: 2 },
        ];
        let (lengths, inc_new, inc_old) = encode_packed_covers(&covers);
        let mut src = StreamCovers::packed(
            2,
            window(&lengths),
            window(&inc_new),
            window(&inc_old),
        );
        assert_eq!(src.read_cover().unwrap(), covers[0]);
        assert_eq!(src.read_cover().unwrap(), covers[1]);
    }

    #[test]
    fn underflowing_delta_is_malformed() {
        let mut inc_old = Vec::new();
        pack_with_tag(1, 1, SIGN_TAG_BITS, &mut inc_old);
        let mut inc_new = Vec::new();
        pack_with_tag(0, 0, 0, &mut inc_new);
        let mut lengths = Vec::new();
        pack_with_tag(1, 0, 0, &mut lengths);
        let mut src = StreamCovers::packed(
            1,
            window(&lengths),
            window(&inc_new),
            window(&inc_old),
        );
        assert!(matches!(
            src.read_cover(),
            Err(PatchError::Malformed(_))
        ));
    }

    #[test]
    fn array_load_and_replay() {
        let covers = [
            Cover { old_pos: 8, new_pos: 0, length: 4 },
            Cover { old_pos: 0, new_pos: 5, length: 2 },
        ];
        let (lengths, inc_new, inc_old) = encode_packed_covers(&covers);
        let mut src = StreamCovers::packed(
            2,
            window(&lengths),
            window(&inc_new),
            window(&inc_old),
        );
        let mut arr = CoverArray::load(&mut src, true).unwrap();
        assert_eq!(arr.len(), 2);
        arr.sort_by_old_pos();
        assert_eq!(arr.get(0).old_pos, 0);
        arr.sort_by_new_pos();
        let mut replay = ArrayCoverSource::new(&arr);
        assert_eq!(replay.read_cover().unwrap(), covers[0]);
        assert_eq!(replay.read_cover().unwrap(), covers[1]);
        assert!(replay.is_finish());
        assert_eq!(arr.sorted_lengths(), vec![2, 4]);
    }
}
