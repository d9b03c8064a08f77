//! Oxipatch: streaming applier for HDiffPatch-format binary diffs.
//!
//! The crate provides:
//! - Wire-format decoders for the packed, `HDIFF13` and `HDIFFSF20`
//!   containers (`hdiff`)
//! - Streaming patch engines with bounded working memory (`engine`,
//!   `single`, `oldcache`)
//! - Pluggable segment decompression (`decompress`)
//! - File-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! let old = std::fs::read("app-1.0.bin").unwrap();
//! let diff = std::fs::read("app-1.0-to-1.1.hdiff").unwrap();
//!
//! let new = oxipatch::apply_compressed(&old, &diff).unwrap();
//! std::fs::write("app-1.1.bin", &new).unwrap();
//! ```

pub mod decompress;
pub mod engine;
pub mod error;
pub mod hdiff;
pub mod io;
pub mod oldcache;
pub mod single;
pub mod stream;

#[cfg(feature = "cli")]
pub mod cli;

pub use engine::{
    apply_compressed, apply_packed, patch_decompress, patch_decompress_with_cache, patch_stream,
    patch_stream_with_cache,
};
pub use error::{PatchError, Result};
pub use single::{apply_single, patch_single_stream};
