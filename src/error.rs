// Crate-wide error type for patch parsing and application.
//
// Every failure path maps to exactly one variant; an error aborts the whole
// apply and the output contents are unspecified afterwards.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    /// A stream, segment, or varint ended before the expected data.
    #[error("truncated diff: {0}")]
    Truncated(&'static str),

    /// The diff violates the format (bad magic, non-additive sizes,
    /// overlong varint, cover ordering).
    #[error("malformed diff: {0}")]
    Malformed(&'static str),

    /// A decoded position or length points outside its stream.
    #[error("out of range: {0}")]
    OutOfRange(&'static str),

    /// Underlying I/O failure from a stream read or write.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The diff names a compression codec no registered decompressor handles.
    #[error("unsupported compression {0:?}")]
    UnsupportedCompression(String),

    /// Declared sizes do not match the supplied streams.
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

pub type Result<T> = std::result::Result<T, PatchError>;
