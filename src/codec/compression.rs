// In: src/codec/compression.rs

//! Per-buffer body compression.
//!
//! Every buffer of a compressed body is written as an 8-byte little-endian
//! uncompressed length followed by the codec output. A length of `-1` means
//! the bytes that follow are stored as-is, which the writer picks whenever
//! compression would not shrink the buffer. Empty buffers are written as
//! zero bytes with no prefix.

use arrow::ipc::CompressionType;
use std::io::{Read, Write};

use super::format::{COMPRESSION_PREFIX_LEN, MAX_BODY_LEN, UNCOMPRESSED_SENTINEL};
use crate::config::BodyCompression;
use crate::error::{IntegrityError, Result};

/// Zstd level used for body buffers.
const ZSTD_LEVEL: i32 = 1;

/// The wire codec for a non-`None` body compression.
pub fn wire_codec(compression: BodyCompression) -> Option<CompressionType> {
    match compression {
        BodyCompression::None => None,
        BodyCompression::Lz4Frame => Some(CompressionType::LZ4_FRAME),
        BodyCompression::Zstd => Some(CompressionType::ZSTD),
    }
}

/// Maps the wire codec back onto the configuration enum.
pub fn from_wire_codec(codec: CompressionType) -> Result<BodyCompression> {
    match codec {
        CompressionType::LZ4_FRAME => Ok(BodyCompression::Lz4Frame),
        CompressionType::ZSTD => Ok(BodyCompression::Zstd),
        other => Err(IntegrityError::MalformedStream(format!(
            "unknown body compression codec {}",
            other.0
        ))),
    }
}

fn compress_raw(compression: BodyCompression, input: &[u8]) -> Result<Vec<u8>> {
    match compression {
        BodyCompression::None => Ok(input.to_vec()),
        BodyCompression::Zstd => Ok(zstd::bulk::compress(input, ZSTD_LEVEL)?),
        BodyCompression::Lz4Frame => {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
            encoder.write_all(input)?;
            encoder
                .finish()
                .map_err(|e| IntegrityError::InternalError(format!("lz4 frame encode: {e}")))
        }
    }
}

/// Compresses one body buffer into its prefixed wire form.
pub fn compress_buffer(compression: BodyCompression, input: &[u8]) -> Result<Vec<u8>> {
    if input.is_empty() || compression == BodyCompression::None {
        return Ok(input.to_vec());
    }

    let compressed = compress_raw(compression, input)?;
    let mut out = Vec::with_capacity(COMPRESSION_PREFIX_LEN + compressed.len().min(input.len()));
    if compressed.len() < input.len() {
        out.extend_from_slice(&(input.len() as i64).to_le_bytes());
        out.extend_from_slice(&compressed);
    } else {
        out.extend_from_slice(&UNCOMPRESSED_SENTINEL.to_le_bytes());
        out.extend_from_slice(input);
    }
    Ok(out)
}

/// Reverses [`compress_buffer`]. Returns the uncompressed bytes.
pub fn decompress_buffer(compression: BodyCompression, input: &[u8]) -> Result<Vec<u8>> {
    if input.is_empty() || compression == BodyCompression::None {
        return Ok(input.to_vec());
    }
    if input.len() < COMPRESSION_PREFIX_LEN {
        return Err(IntegrityError::MalformedStream(format!(
            "compressed buffer of {} bytes is shorter than its length prefix",
            input.len()
        )));
    }

    let mut prefix = [0u8; COMPRESSION_PREFIX_LEN];
    prefix.copy_from_slice(&input[..COMPRESSION_PREFIX_LEN]);
    let declared = i64::from_le_bytes(prefix);
    let payload = &input[COMPRESSION_PREFIX_LEN..];

    if declared == UNCOMPRESSED_SENTINEL {
        return Ok(payload.to_vec());
    }
    if declared < 0 {
        return Err(IntegrityError::MalformedStream(format!(
            "invalid uncompressed length {declared}"
        )));
    }
    let declared = declared as u64;
    if declared > MAX_BODY_LEN as u64 {
        return Err(IntegrityError::MalformedStream(format!(
            "uncompressed length {declared} exceeds the body limit of {MAX_BODY_LEN} bytes"
        )));
    }

    // The output grows with what the codec actually yields, never with the
    // declared length; one extra byte is read to detect an overlong buffer.
    let mut out = Vec::new();
    match compression {
        BodyCompression::None => out.extend_from_slice(payload),
        BodyCompression::Zstd => {
            zstd::stream::read::Decoder::with_buffer(payload)
                .map_err(|e| IntegrityError::MalformedStream(format!("zstd body buffer: {e}")))?
                .take(declared + 1)
                .read_to_end(&mut out)
                .map_err(|e| IntegrityError::MalformedStream(format!("zstd body buffer: {e}")))?;
        }
        BodyCompression::Lz4Frame => {
            lz4_flex::frame::FrameDecoder::new(payload)
                .take(declared + 1)
                .read_to_end(&mut out)
                .map_err(|e| IntegrityError::MalformedStream(format!("lz4 body buffer: {e}")))?;
        }
    }

    if out.len() as u64 != declared {
        return Err(IntegrityError::MalformedStream(format!(
            "body buffer decompressed to {} bytes, header declared {declared}",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressible_buffer_round_trip() {
        let input: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        for codec in [BodyCompression::Zstd, BodyCompression::Lz4Frame] {
            let packed = compress_buffer(codec, &input).unwrap();
            assert!(packed.len() < input.len());
            assert_eq!(&packed[..8], &(input.len() as i64).to_le_bytes());
            assert_eq!(decompress_buffer(codec, &packed).unwrap(), input);
        }
    }

    #[test]
    fn test_incompressible_buffer_is_stored_raw() {
        let input = vec![1u8, 2, 3];
        let packed = compress_buffer(BodyCompression::Zstd, &input).unwrap();
        assert_eq!(&packed[..8], &UNCOMPRESSED_SENTINEL.to_le_bytes());
        assert_eq!(&packed[8..], &input[..]);
        assert_eq!(
            decompress_buffer(BodyCompression::Zstd, &packed).unwrap(),
            input
        );
    }

    #[test]
    fn test_short_prefix_is_malformed() {
        let res = decompress_buffer(BodyCompression::Lz4Frame, &[1, 2, 3]);
        assert!(matches!(res, Err(IntegrityError::MalformedStream(_))));
    }

    #[test]
    fn test_oversized_declared_length_is_malformed() {
        let mut hostile = i64::MAX.to_le_bytes().to_vec();
        hostile.extend_from_slice(&[0u8; 16]);
        for codec in [BodyCompression::Zstd, BodyCompression::Lz4Frame] {
            let res = decompress_buffer(codec, &hostile);
            assert!(matches!(res, Err(IntegrityError::MalformedStream(_))));
        }
    }

    #[test]
    fn test_declared_length_larger_than_payload_output_is_malformed() {
        // 1. Arrange: a valid buffer whose prefix claims a gigabyte.
        let input: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();

        for codec in [BodyCompression::Zstd, BodyCompression::Lz4Frame] {
            let mut packed = compress_buffer(codec, &input).unwrap();
            packed[..8].copy_from_slice(&(1i64 << 30).to_le_bytes());

            // 2. Act
            let res = decompress_buffer(codec, &packed);

            // 3. Assert
            assert!(matches!(res, Err(IntegrityError::MalformedStream(_))));
        }
    }

    #[test]
    fn test_declared_length_shorter_than_output_is_malformed() {
        let input: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        let mut packed = compress_buffer(BodyCompression::Lz4Frame, &input).unwrap();
        packed[..8].copy_from_slice(&16i64.to_le_bytes());

        let res = decompress_buffer(BodyCompression::Lz4Frame, &packed);

        assert!(matches!(res, Err(IntegrityError::MalformedStream(_))));
    }

    #[test]
    fn test_empty_buffer_has_no_prefix() {
        assert!(compress_buffer(BodyCompression::Zstd, &[]).unwrap().is_empty());
    }
}
