// In: src/codec/format.rs

//! Defines the framing constants of the streaming format. This is the single
//! source of truth for the byte-level contracts shared by the writer and the
//! reader: continuation marker, end-of-stream marker, padding and the body
//! compression prefix.

/// Every envelope since format 0.15 starts with this marker, followed by the
/// little-endian `i32` metadata length.
pub const CONTINUATION_MARKER: u32 = 0xFFFF_FFFF;

/// The eight bytes that terminate a stream.
pub const END_OF_STREAM: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00];

/// Size of the marker plus length prefix in front of the metadata.
pub const PREFIX_LEN: usize = 8;

/// Upper bound on the metadata length accepted by the reader. A flatbuffer
/// header larger than this is treated as corruption rather than allocated.
pub const MAX_METADATA_LEN: usize = 64 * 1024 * 1024;

/// Upper bound on a single message body.
pub const MAX_BODY_LEN: usize = 1 << 34;

/// Length prefix of every compressed body buffer that marks the buffer as
/// stored uncompressed.
pub const UNCOMPRESSED_SENTINEL: i64 = -1;

/// Size of the uncompressed-length prefix in front of each compressed buffer.
pub const COMPRESSION_PREFIX_LEN: usize = 8;

/// Rounds `len` up to the next multiple of `alignment`. `alignment` must be a
/// power of two.
pub fn padded_len(len: usize, alignment: usize) -> usize {
    (len + alignment - 1) & !(alignment - 1)
}

/// Number of zero bytes needed after `len` bytes to reach `alignment`.
pub fn padding_for(len: usize, alignment: usize) -> usize {
    padded_len(len, alignment) - len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_rounds_to_alignment() {
        assert_eq!(padded_len(0, 8), 0);
        assert_eq!(padded_len(1, 8), 8);
        assert_eq!(padded_len(8, 8), 8);
        assert_eq!(padded_len(9, 64), 64);
        assert_eq!(padding_for(13, 8), 3);
        assert_eq!(padding_for(64, 64), 0);
    }
}
