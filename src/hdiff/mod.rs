// Wire-format layer: varints, stream windows, container headers, cover
// and RLE decoders, and the buffered output writer. The patch engines in
// `engine` and `single` are built out of these parts.

pub mod covers;
pub mod header;
pub mod outcache;
pub mod rle;
pub mod varint;
pub mod window;
