// Container headers.
//
// Three containers share the cover/RLE wire format:
//   - packed: no magic, five size varints up front, streams uncompressed;
//   - compressed: "HDIFF13&" magic, named compressor, four segments each
//     optionally compressed;
//   - single-stream: "HDIFFSF20&" magic, covers and deltas interleaved in
//     bounded steps.

use crate::error::{PatchError, Result};
use crate::hdiff::window::StreamWindow;
use crate::stream::Input;

pub const COMPRESSED_MAGIC: &str = "HDIFF13";
pub const SINGLE_MAGIC: &str = "HDIFFSF20";

/// Header read cache; headers never come close to this.
const HEAD_CACHE_SIZE: usize = 4096;

/// Step buffers above this are rejected unless the output itself is
/// larger.
const STEP_MEM_SAFE_LIMIT: u64 = 16 << 20;

fn head_window(diff: &dyn Input) -> Result<StreamWindow<'_>> {
    StreamWindow::new(diff, 0, diff.size(), HEAD_CACHE_SIZE)
}

fn add_checked(pos: u64, size: u64) -> Result<u64> {
    pos.checked_add(size)
        .ok_or(PatchError::Malformed("segment sizes overflow"))
}

// ---------------------------------------------------------------------------
// Packed container
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffHead {
    pub cover_count: u64,
    pub length_size: u64,
    pub inc_new_pos_size: u64,
    pub inc_old_pos_size: u64,
    pub new_data_diff_size: u64,
    /// Position just past the size varints; the length segment starts here.
    pub head_end: u64,
    /// Position just past the three cover segments.
    pub cover_end: u64,
}

impl DiffHead {
    pub fn read(diff: &dyn Input) -> Result<DiffHead> {
        let mut w = head_window(diff)?;
        let cover_count = w.unpack_varint(0)?;
        let length_size = w.unpack_varint(0)?;
        let inc_new_pos_size = w.unpack_varint(0)?;
        let inc_old_pos_size = w.unpack_varint(0)?;
        let new_data_diff_size = w.unpack_varint(0)?;
        let head_end = w.read_pos_of_src();

        let mut end = head_end;
        end = add_checked(end, length_size)?;
        end = add_checked(end, inc_new_pos_size)?;
        end = add_checked(end, inc_old_pos_size)?;
        let cover_end = end;
        end = add_checked(end, new_data_diff_size)?;
        if end > diff.size() {
            return Err(PatchError::Truncated("diff segments past end of stream"));
        }
        Ok(DiffHead {
            cover_count,
            length_size,
            inc_new_pos_size,
            inc_old_pos_size,
            new_data_diff_size,
            head_end,
            cover_end,
        })
    }
}

// ---------------------------------------------------------------------------
// Compressed container
// ---------------------------------------------------------------------------

/// Summary of a compressed diff, enough to pick a decompressor and size
/// the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedDiffInfo {
    pub new_data_size: u64,
    pub old_data_size: u64,
    /// Segments actually compressed, 0 to 4.
    pub compressed_count: u32,
    pub compress_type: String,
}

/// Full segment layout of a compressed diff. A compressed size of zero
/// means the segment is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffzHead {
    pub cover_count: u64,
    pub cover_buf_size: u64,
    pub compress_cover_buf_size: u64,
    pub rle_ctrl_buf_size: u64,
    pub compress_rle_ctrl_buf_size: u64,
    pub rle_code_buf_size: u64,
    pub compress_rle_code_buf_size: u64,
    pub new_data_diff_size: u64,
    pub compress_new_data_diff_size: u64,
    /// Position just past the size varints; the cover segment starts here.
    pub head_end: u64,
    /// Position just past the (possibly compressed) cover segment.
    pub cover_end: u64,
}

impl DiffzHead {
    /// Stored byte count of each segment in stream order.
    pub fn stored_sizes(&self) -> [u64; 4] {
        fn stored(size: u64, compressed: u64) -> u64 {
            if compressed > 0 { compressed } else { size }
        }
        [
            stored(self.cover_buf_size, self.compress_cover_buf_size),
            stored(self.rle_ctrl_buf_size, self.compress_rle_ctrl_buf_size),
            stored(self.rle_code_buf_size, self.compress_rle_code_buf_size),
            stored(self.new_data_diff_size, self.compress_new_data_diff_size),
        ]
    }
}

pub fn read_diffz_head(diff: &dyn Input) -> Result<(CompressedDiffInfo, DiffzHead)> {
    let mut w = head_window(diff)?;
    let magic = w.read_type_end(b'&')?;
    if magic != COMPRESSED_MAGIC {
        return Err(PatchError::Malformed("not an HDIFF13 diff"));
    }
    let compress_type = w.read_type_end(0)?;
    let new_data_size = w.unpack_varint(0)?;
    let old_data_size = w.unpack_varint(0)?;
    let cover_count = w.unpack_varint(0)?;
    let cover_buf_size = w.unpack_varint(0)?;
    let compress_cover_buf_size = w.unpack_varint(0)?;
    let rle_ctrl_buf_size = w.unpack_varint(0)?;
    let compress_rle_ctrl_buf_size = w.unpack_varint(0)?;
    let rle_code_buf_size = w.unpack_varint(0)?;
    let compress_rle_code_buf_size = w.unpack_varint(0)?;
    let new_data_diff_size = w.unpack_varint(0)?;
    let compress_new_data_diff_size = w.unpack_varint(0)?;
    let head_end = w.read_pos_of_src();

    let mut head = DiffzHead {
        cover_count,
        cover_buf_size,
        compress_cover_buf_size,
        rle_ctrl_buf_size,
        compress_rle_ctrl_buf_size,
        rle_code_buf_size,
        compress_rle_code_buf_size,
        new_data_diff_size,
        compress_new_data_diff_size,
        head_end,
        cover_end: 0,
    };
    let stored = head.stored_sizes();
    head.cover_end = add_checked(head_end, stored[0])?;

    let mut end = head_end;
    let mut compressed_count = 0u32;
    for (size, compressed) in [
        (cover_buf_size, compress_cover_buf_size),
        (rle_ctrl_buf_size, compress_rle_ctrl_buf_size),
        (rle_code_buf_size, compress_rle_code_buf_size),
        (new_data_diff_size, compress_new_data_diff_size),
    ] {
        if compressed > 0 {
            compressed_count += 1;
            end = add_checked(end, compressed)?;
        } else {
            end = add_checked(end, size)?;
        }
    }
    if end > diff.size() {
        return Err(PatchError::Truncated("diff segments past end of stream"));
    }
    if end != diff.size() {
        return Err(PatchError::Malformed("trailing bytes after diff segments"));
    }
    if compressed_count > 0 && compress_type.is_empty() {
        return Err(PatchError::Malformed("compressed segments without a type"));
    }

    let info = CompressedDiffInfo {
        new_data_size,
        old_data_size,
        compressed_count,
        compress_type,
    };
    Ok((info, head))
}

pub fn compressed_diff_info(diff: &dyn Input) -> Result<CompressedDiffInfo> {
    read_diffz_head(diff).map(|(info, _)| info)
}

// ---------------------------------------------------------------------------
// Single-stream container
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleDiffInfo {
    pub new_data_size: u64,
    pub old_data_size: u64,
    pub cover_count: u64,
    /// Largest cover+RLE step buffer the decoder must hold.
    pub step_mem_size: u64,
    pub uncompressed_size: u64,
    /// Zero when the body is stored.
    pub compressed_size: u64,
    /// Where the body starts in the diff stream.
    pub diff_data_pos: u64,
    pub compress_type: String,
}

pub fn single_diff_info(diff: &dyn Input) -> Result<SingleDiffInfo> {
    let mut w = head_window(diff)?;
    let magic = w.read_type_end(b'&')?;
    if magic != SINGLE_MAGIC {
        return Err(PatchError::Malformed("not an HDIFFSF20 diff"));
    }
    let compress_type = w.read_type_end(0)?;
    let new_data_size = w.unpack_varint(0)?;
    let old_data_size = w.unpack_varint(0)?;
    let cover_count = w.unpack_varint(0)?;
    let step_mem_size = w.unpack_varint(0)?;
    let uncompressed_size = w.unpack_varint(0)?;
    let compressed_size = w.unpack_varint(0)?;
    let diff_data_pos = w.read_pos_of_src();

    if step_mem_size > new_data_size.max(STEP_MEM_SAFE_LIMIT)
        || step_mem_size > uncompressed_size
    {
        return Err(PatchError::Malformed("step buffer size out of range"));
    }
    let stored = if compressed_size > 0 {
        compressed_size
    } else {
        uncompressed_size
    };
    if add_checked(diff_data_pos, stored)? > diff.size() {
        return Err(PatchError::Truncated("diff body past end of stream"));
    }
    Ok(SingleDiffInfo {
        new_data_size,
        old_data_size,
        cover_count,
        step_mem_size,
        uncompressed_size,
        compressed_size,
        diff_data_pos,
        compress_type,
    })
}
