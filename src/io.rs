// File-level helpers: stream adapters over `File`, diff format
// detection, and an `apply_file()` convenience that wraps the patch
// engines with proper buffered I/O. Optionally computes a SHA-256 of the
// output (feature-gated behind `file-io`).

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

#[cfg(feature = "file-io")]
use sha2::Digest;

use crate::decompress::Decompressor;
use crate::engine::{patch_decompress, patch_decompress_with_cache};
use crate::error::{PatchError, Result};
use crate::hdiff::header::{
    COMPRESSED_MAGIC, CompressedDiffInfo, SINGLE_MAGIC, SingleDiffInfo, compressed_diff_info,
    single_diff_info,
};
use crate::single::patch_single_stream;
use crate::stream::{Input, Output};

#[cfg(feature = "file-io")]
const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// File adapters
// ---------------------------------------------------------------------------

/// Positional reads over a file. The handle sits behind a `RefCell` so
/// several stream windows can share one open file.
pub struct FileInput {
    file: RefCell<File>,
    size: u64,
}

impl FileInput {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(FileInput {
            file: RefCell::new(file),
            size,
        })
    }
}

impl Input for FileInput {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, pos: u64, out: &mut [u8]) -> Result<()> {
        let end = pos
            .checked_add(out.len() as u64)
            .ok_or(PatchError::OutOfRange("read position overflow"))?;
        if end > self.size {
            return Err(PatchError::OutOfRange("read past end of stream"));
        }
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(out)?;
        Ok(())
    }
}

/// A fixed-size output file. Created at full length up front so
/// read-back of already written ranges works.
pub struct FileOutput {
    file: RefCell<File>,
    size: u64,
}

impl FileOutput {
    pub fn create(path: &Path, size: u64) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        Ok(FileOutput {
            file: RefCell::new(file),
            size,
        })
    }
}

impl Output for FileOutput {
    fn size(&self) -> u64 {
        self.size
    }

    fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        let end = pos
            .checked_add(data.len() as u64)
            .ok_or(PatchError::OutOfRange("write position overflow"))?;
        if end > self.size {
            return Err(PatchError::OutOfRange("write past end of output"));
        }
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(data)?;
        Ok(())
    }

    fn read_back(&self, pos: u64, out: &mut [u8]) -> Result<()> {
        let end = pos
            .checked_add(out.len() as u64)
            .ok_or(PatchError::OutOfRange("read position overflow"))?;
        if end > self.size {
            return Err(PatchError::OutOfRange("read past end of output"));
        }
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(out)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Format detection
// ---------------------------------------------------------------------------

/// What a diff file's header says it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffInfo {
    Compressed(CompressedDiffInfo),
    Single(SingleDiffInfo),
}

impl DiffInfo {
    pub fn new_data_size(&self) -> u64 {
        match self {
            DiffInfo::Compressed(i) => i.new_data_size,
            DiffInfo::Single(i) => i.new_data_size,
        }
    }

    pub fn old_data_size(&self) -> u64 {
        match self {
            DiffInfo::Compressed(i) => i.old_data_size,
            DiffInfo::Single(i) => i.old_data_size,
        }
    }

    pub fn compress_type(&self) -> &str {
        match self {
            DiffInfo::Compressed(i) => &i.compress_type,
            DiffInfo::Single(i) => &i.compress_type,
        }
    }

    pub fn format_name(&self) -> &'static str {
        match self {
            DiffInfo::Compressed(_) => COMPRESSED_MAGIC,
            DiffInfo::Single(_) => SINGLE_MAGIC,
        }
    }
}

/// Identify a diff by its magic and parse its header. The packed
/// container has no magic (and no output size), so files are expected to
/// be one of the tagged containers.
pub fn read_diff_info(diff: &dyn Input) -> Result<DiffInfo> {
    let mut magic = [0u8; 10];
    let take = (diff.size().min(magic.len() as u64)) as usize;
    diff.read_at(0, &mut magic[..take])?;
    if magic[..take].starts_with(b"HDIFFSF20&") {
        Ok(DiffInfo::Single(single_diff_info(diff)?))
    } else if magic[..take].starts_with(b"HDIFF13&") {
        Ok(DiffInfo::Compressed(compressed_diff_info(diff)?))
    } else {
        Err(PatchError::Malformed("unrecognized diff magic"))
    }
}

// ---------------------------------------------------------------------------
// apply_file
// ---------------------------------------------------------------------------

/// Statistics returned by `apply_file()`.
#[derive(Debug, Clone)]
pub struct ApplyStats {
    pub old_size: u64,
    pub diff_size: u64,
    pub new_size: u64,
    /// SHA-256 of the written output (if the `file-io` feature is
    /// enabled).
    pub new_sha256: Option<[u8; 32]>,
}

/// Apply a diff file to an old file, writing the new file.
///
/// The container is detected from the diff's magic; `budget` bounds the
/// working memory of the compressed-container engine. A decompressor
/// override may be passed for compressors not built in.
pub fn apply_file(
    old_path: &Path,
    diff_path: &Path,
    new_path: &Path,
    budget: Option<u64>,
    decomp: Option<&dyn Decompressor>,
) -> Result<ApplyStats> {
    let old = FileInput::open(old_path)?;
    let diff = FileInput::open(diff_path)?;
    let info = read_diff_info(&diff)?;

    let mut new = FileOutput::create(new_path, info.new_data_size())?;
    match (&info, budget) {
        (DiffInfo::Compressed(_), Some(budget)) => {
            patch_decompress_with_cache(&mut new, &old, &diff, decomp, budget)?
        }
        (DiffInfo::Compressed(_), None) => patch_decompress(&mut new, &old, &diff, decomp)?,
        (DiffInfo::Single(_), _) => patch_single_stream(&mut new, &old, &diff, decomp)?,
    }

    Ok(ApplyStats {
        old_size: old.size(),
        diff_size: diff.size(),
        new_size: info.new_data_size(),
        new_sha256: hash_file(new_path)?,
    })
}

#[cfg(feature = "file-io")]
fn hash_file(path: &Path) -> Result<Option<[u8; 32]>> {
    let mut file = File::open(path)?;
    let mut hasher = sha2::Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Some(hasher.finalize().into()))
}

#[cfg(not(feature = "file-io"))]
fn hash_file(_path: &Path) -> Result<Option<[u8; 32]>> {
    Ok(None)
}
