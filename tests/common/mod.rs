// Minimal conforming diff writers used by the integration tests: enough
// of the encode side to produce packed, HDIFF13 and HDIFFSF20 containers
// that a correct decoder must accept.
#![allow(dead_code)]

use oxipatch::hdiff::covers::Cover;
use oxipatch::hdiff::varint::pack_with_tag;

pub fn cover(old_pos: u64, new_pos: u64, length: u64) -> Cover {
    Cover {
        old_pos,
        new_pos,
        length,
    }
}

fn pack(v: u64, out: &mut Vec<u8>) {
    pack_with_tag(v, 0, 0, out);
}

/// Build the new file from old data, covers and literal gap bytes.
pub fn make_new(old: &[u8], covers: &[Cover], literals: &[u8], new_len: usize) -> Vec<u8> {
    let mut new = vec![0u8; new_len];
    let mut lit = literals.iter().copied();
    let mut pos = 0usize;
    for c in covers {
        while pos < c.new_pos as usize {
            new[pos] = lit.next().expect("not enough literal bytes");
            pos += 1;
        }
        for k in 0..c.length as usize {
            new[pos + k] = old[c.old_pos as usize + k].wrapping_add(((pos + k) % 7) as u8);
        }
        pos += c.length as usize;
    }
    while pos < new_len {
        new[pos] = lit.next().expect("not enough literal bytes");
        pos += 1;
    }
    new
}

/// Per-position delta of the whole new file: `new - old` inside covers,
/// zero in the literal gaps.
pub fn delta_stream(old: &[u8], new: &[u8], covers: &[Cover]) -> Vec<u8> {
    let mut delta = vec![0u8; new.len()];
    for c in covers {
        for k in 0..c.length as usize {
            let n = c.new_pos as usize + k;
            delta[n] = new[n].wrapping_sub(old[c.old_pos as usize + k]);
        }
    }
    delta
}

/// Bytes of the new file outside every cover, in order.
pub fn literal_bytes(new: &[u8], covers: &[Cover]) -> Vec<u8> {
    let mut lit = Vec::new();
    let mut pos = 0usize;
    for c in covers {
        lit.extend_from_slice(&new[pos..c.new_pos as usize]);
        pos = (c.new_pos + c.length) as usize;
    }
    lit.extend_from_slice(&new[pos..]);
    lit
}

// ---------------------------------------------------------------------------
// Byte-RLE encoder (ctrl + code streams)
// ---------------------------------------------------------------------------

fn flush_literal(ctrl: &mut Vec<u8>, code: &mut Vec<u8>, lit: &mut Vec<u8>) {
    if !lit.is_empty() {
        pack_with_tag(lit.len() as u64 - 1, 3, 2, ctrl);
        code.extend_from_slice(lit);
        lit.clear();
    }
}

pub fn rle_encode(delta: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut ctrl = Vec::new();
    let mut code = Vec::new();
    let mut lit = Vec::new();
    let mut i = 0usize;
    while i < delta.len() {
        let b = delta[i];
        let mut j = i + 1;
        while j < delta.len() && delta[j] == b {
            j += 1;
        }
        let run = (j - i) as u64;
        if b == 0 || run >= 3 {
            flush_literal(&mut ctrl, &mut code, &mut lit);
            match b {
                0 => pack_with_tag(run - 1, 0, 2, &mut ctrl),
                0xFF => pack_with_tag(run - 1, 1, 2, &mut ctrl),
                v => {
                    pack_with_tag(run - 1, 2, 2, &mut ctrl);
                    code.push(v);
                }
            }
        } else {
            lit.extend_from_slice(&delta[i..j]);
        }
        i = j;
    }
    flush_literal(&mut ctrl, &mut code, &mut lit);
    (ctrl, code)
}

// ---------------------------------------------------------------------------
// Cover encoders
// ---------------------------------------------------------------------------

fn encode_cover_fields(
    c: &Cover,
    old_back: &mut u64,
    new_back: &mut u64,
    include_length: bool,
    inc_old: &mut Vec<u8>,
    inc_new: &mut Vec<u8>,
    lengths: &mut Vec<u8>,
) {
    let (sign, delta) = if c.old_pos >= *old_back {
        (0, c.old_pos - *old_back)
    } else {
        (1, *old_back - c.old_pos)
    };
    pack_with_tag(delta, sign, 1, inc_old);
    pack(c.new_pos - *new_back, inc_new);
    pack(c.length, lengths);
    *old_back = c.old_pos + if include_length { c.length } else { 0 };
    *new_back = c.new_pos + c.length;
}

/// Three delta-coded segments of the packed container.
pub fn encode_covers_packed(covers: &[Cover]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let mut lengths = Vec::new();
    let mut inc_new = Vec::new();
    let mut inc_old = Vec::new();
    let (mut old_back, mut new_back) = (0u64, 0u64);
    for c in covers {
        encode_cover_fields(
            c,
            &mut old_back,
            &mut new_back,
            false,
            &mut inc_old,
            &mut inc_new,
            &mut lengths,
        );
    }
    (lengths, inc_new, inc_old)
}

/// One interleaved segment, used by the HDIFF13 and HDIFFSF20 containers.
pub fn encode_covers_interleaved(covers: &[Cover]) -> Vec<u8> {
    let mut out = Vec::new();
    let (mut old_back, mut new_back) = (0u64, 0u64);
    for c in covers {
        let mut inc_new = Vec::new();
        let mut lengths = Vec::new();
        encode_cover_fields(
            c,
            &mut old_back,
            &mut new_back,
            true,
            &mut out,
            &mut inc_new,
            &mut lengths,
        );
        out.extend_from_slice(&inc_new);
        out.extend_from_slice(&lengths);
    }
    out
}

// ---------------------------------------------------------------------------
// Container writers
// ---------------------------------------------------------------------------

/// Packed container: size varints, cover segments, literal bytes, then
/// the RLE streams.
pub fn build_packed(old: &[u8], new: &[u8], covers: &[Cover]) -> Vec<u8> {
    let (lengths, inc_new, inc_old) = encode_covers_packed(covers);
    let literal = literal_bytes(new, covers);
    let (ctrl, code) = rle_encode(&delta_stream(old, new, covers));

    let mut out = Vec::new();
    pack(covers.len() as u64, &mut out);
    pack(lengths.len() as u64, &mut out);
    pack(inc_new.len() as u64, &mut out);
    pack(inc_old.len() as u64, &mut out);
    pack(literal.len() as u64, &mut out);
    out.extend_from_slice(&lengths);
    out.extend_from_slice(&inc_new);
    out.extend_from_slice(&inc_old);
    out.extend_from_slice(&literal);
    pack(ctrl.len() as u64, &mut out);
    out.extend_from_slice(&ctrl);
    out.extend_from_slice(&code);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segments {
    Stored,
    #[cfg(feature = "zlib")]
    Zlib,
}

#[cfg(feature = "zlib")]
fn zlib_segment(data: &[u8]) -> Vec<u8> {
    use flate2::{Compression, write::ZlibEncoder};
    use std::io::Write;

    let mut out = vec![15u8]; // windowBits byte
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    out.extend_from_slice(&enc.finish().unwrap());
    out
}

/// HDIFF13 container with all four segments stored or all compressed.
pub fn build_compressed(old: &[u8], new: &[u8], covers: &[Cover], mode: Segments) -> Vec<u8> {
    let cover_seg = encode_covers_interleaved(covers);
    let literal = literal_bytes(new, covers);
    let (ctrl, code) = rle_encode(&delta_stream(old, new, covers));
    let plain: [&[u8]; 4] = [&cover_seg, &ctrl, &code, &literal];

    let (ctype, stored): (&str, Vec<Vec<u8>>) = match mode {
        Segments::Stored => ("", plain.iter().map(|s| s.to_vec()).collect()),
        #[cfg(feature = "zlib")]
        Segments::Zlib => ("zlib", plain.iter().map(|s| zlib_segment(s)).collect()),
    };

    let mut out = Vec::new();
    out.extend_from_slice(b"HDIFF13&");
    out.extend_from_slice(ctype.as_bytes());
    out.push(0);
    pack(new.len() as u64, &mut out);
    pack(old.len() as u64, &mut out);
    pack(covers.len() as u64, &mut out);
    for (seg, enc) in plain.iter().zip(&stored) {
        pack(seg.len() as u64, &mut out);
        let csize = if mode == Segments::Stored {
            0
        } else {
            enc.len() as u64
        };
        pack(csize, &mut out);
    }
    for enc in &stored {
        out.extend_from_slice(enc);
    }
    out
}

// ---------------------------------------------------------------------------
// Single-stream writer
// ---------------------------------------------------------------------------

fn rle0_encode(delta: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < delta.len() {
        let zeros = delta[i..].iter().take_while(|&&b| b == 0).count();
        pack(zeros as u64, &mut out);
        i += zeros;
        if i == delta.len() {
            break;
        }
        let lits = delta[i..].iter().take_while(|&&b| b != 0).count();
        pack(lits as u64, &mut out);
        out.extend_from_slice(&delta[i..i + lits]);
        i += lits;
    }
    out
}

/// Body of an HDIFFSF20 diff: step blocks with their gap literals
/// inline, trailing literals at the end. Returns the body and the
/// largest step block size.
fn single_body(old: &[u8], new: &[u8], covers: &[Cover], per_step: usize) -> (Vec<u8>, u64) {
    let delta = delta_stream(old, new, covers);
    let mut body = Vec::new();
    let mut step_mem = 0u64;
    let (mut old_back, mut new_back) = (0u64, 0u64);
    let mut gap_pos = 0usize;
    for chunk in covers.chunks(per_step.max(1)) {
        let mut cover_seg = Vec::new();
        for c in chunk {
            let mut inc_new = Vec::new();
            let mut lengths = Vec::new();
            encode_cover_fields(
                c,
                &mut old_back,
                &mut new_back,
                true,
                &mut cover_seg,
                &mut inc_new,
                &mut lengths,
            );
            cover_seg.extend_from_slice(&inc_new);
            cover_seg.extend_from_slice(&lengths);
        }
        let mut cover_deltas = Vec::new();
        for c in chunk {
            cover_deltas
                .extend_from_slice(&delta[c.new_pos as usize..(c.new_pos + c.length) as usize]);
        }
        let rle = rle0_encode(&cover_deltas);
        step_mem = step_mem.max((cover_seg.len() + rle.len()) as u64);
        pack(cover_seg.len() as u64, &mut body);
        pack(rle.len() as u64, &mut body);
        body.extend_from_slice(&cover_seg);
        body.extend_from_slice(&rle);
        // each cover's gap literals are read while its step is live
        for c in chunk {
            body.extend_from_slice(&new[gap_pos..c.new_pos as usize]);
            gap_pos = (c.new_pos + c.length) as usize;
        }
    }
    body.extend_from_slice(&new[gap_pos..]);
    (body, step_mem)
}

fn single_header(
    ctype: &str,
    new_len: u64,
    old_len: u64,
    cover_count: u64,
    step_mem: u64,
    uncompressed: u64,
    compressed: u64,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"HDIFFSF20&");
    out.extend_from_slice(ctype.as_bytes());
    out.push(0);
    pack(new_len, &mut out);
    pack(old_len, &mut out);
    pack(cover_count, &mut out);
    pack(step_mem, &mut out);
    pack(uncompressed, &mut out);
    pack(compressed, &mut out);
    out
}

/// HDIFFSF20 container, covers split into steps of `per_step`, body
/// stored.
pub fn build_single_steps(old: &[u8], new: &[u8], covers: &[Cover], per_step: usize) -> Vec<u8> {
    let (body, step_mem) = single_body(old, new, covers, per_step);
    let mut out = single_header(
        "",
        new.len() as u64,
        old.len() as u64,
        covers.len() as u64,
        step_mem,
        body.len() as u64,
        0,
    );
    out.extend_from_slice(&body);
    out
}

/// HDIFFSF20 container, one step holding every cover, body stored.
pub fn build_single(old: &[u8], new: &[u8], covers: &[Cover]) -> Vec<u8> {
    build_single_steps(old, new, covers, covers.len().max(1))
}

/// HDIFFSF20 container with a zlib-compressed body.
#[cfg(feature = "zlib")]
pub fn build_single_zlib(old: &[u8], new: &[u8], covers: &[Cover]) -> Vec<u8> {
    let (body, step_mem) = single_body(old, new, covers, covers.len().max(1));
    let enc = zlib_segment(&body);
    let mut out = single_header(
        "zlib",
        new.len() as u64,
        old.len() as u64,
        covers.len() as u64,
        step_mem,
        body.len() as u64,
        enc.len() as u64,
    );
    out.extend_from_slice(&enc);
    out
}
