// In: src/codec/envelope.rs

//! Message envelope framing.
//!
//! ```text
//! +------------+-------------+----------------------+---------+------------------+
//! | 0xFFFFFFFF | meta_len i32| flatbuffer Message   | padding | body (bodyLength)|
//! +------------+-------------+----------------------+---------+------------------+
//! ```
//!
//! `meta_len` counts the flatbuffer plus its padding, so the body always starts
//! on an aligned offset. A `meta_len` of zero is the end-of-stream marker.
//! Streams from writers older than format 0.15 omit the continuation marker
//! and start directly with `meta_len`; both forms are accepted on read.

use arrow::ipc::{root_as_message, MessageHeader};
use std::io::{Read, Write};

use super::format::{
    padding_for, CONTINUATION_MARKER, END_OF_STREAM, MAX_BODY_LEN, MAX_METADATA_LEN, PREFIX_LEN,
};
use crate::error::{IntegrityError, Result};

/// The kind of an envelope, taken from the flatbuffer header union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Schema,
    DictionaryBatch,
    RecordBatch,
    EndOfStream,
    /// A header type this reader does not interpret. Skipped by length.
    Unknown(u8),
}

impl MessageKind {
    pub fn from_header(header: MessageHeader) -> Self {
        match header {
            MessageHeader::Schema => MessageKind::Schema,
            MessageHeader::DictionaryBatch => MessageKind::DictionaryBatch,
            MessageHeader::RecordBatch => MessageKind::RecordBatch,
            other => MessageKind::Unknown(other.0),
        }
    }

    /// Reads the kind straight out of serialized metadata.
    pub fn of_metadata(metadata: &[u8]) -> Result<Self> {
        let message = root_as_message(metadata)?;
        Ok(Self::from_header(message.header_type()))
    }
}

/// One framed message: flatbuffer metadata plus its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageKind,
    /// The serialized flatbuffer `Message`, without prefix or padding.
    pub metadata: Vec<u8>,
    /// The body, already padded to the stream alignment.
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new(kind: MessageKind, metadata: Vec<u8>, body: Vec<u8>) -> Self {
        Self {
            kind,
            metadata,
            body,
        }
    }

    pub fn end_of_stream() -> Self {
        Self::new(MessageKind::EndOfStream, Vec::new(), Vec::new())
    }

    /// Writes the framed envelope and returns the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W, alignment: usize) -> Result<usize> {
        if self.kind == MessageKind::EndOfStream {
            writer.write_all(&END_OF_STREAM)?;
            return Ok(END_OF_STREAM.len());
        }

        // The prefix and the metadata together end on an aligned offset.
        let padding = padding_for(PREFIX_LEN + self.metadata.len(), alignment);
        let meta_len = self.metadata.len() + padding;
        let meta_len_i32 = i32::try_from(meta_len).map_err(|_| {
            IntegrityError::MalformedStream(format!("metadata of {meta_len} bytes is too large"))
        })?;

        writer.write_all(&CONTINUATION_MARKER.to_le_bytes())?;
        writer.write_all(&meta_len_i32.to_le_bytes())?;
        writer.write_all(&self.metadata)?;
        writer.write_all(&vec![0u8; padding])?;
        writer.write_all(&self.body)?;
        Ok(PREFIX_LEN + meta_len + self.body.len())
    }

    pub fn to_bytes(&self, alignment: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(PREFIX_LEN + self.metadata.len() + self.body.len() + 64);
        self.write_to(&mut out, alignment)?;
        Ok(out)
    }
}

/// An envelope as read from a byte source: metadata with padding still
/// attached, and the body as read.
#[derive(Debug)]
pub struct RawEnvelope {
    pub kind: MessageKind,
    pub metadata: Vec<u8>,
    pub body: Vec<u8>,
}

/// Reads into `buf` until it is full or the source ends. Returns the number of
/// bytes read, which is short only at end of input.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn read_i32<R: Read>(reader: &mut R, what: &str) -> Result<Option<i32>> {
    let mut word = [0u8; 4];
    match read_up_to(reader, &mut word)? {
        0 => Ok(None),
        4 => Ok(Some(i32::from_le_bytes(word))),
        n => Err(IntegrityError::MalformedStream(format!(
            "truncated {what}: expected 4 bytes, found {n}"
        ))),
    }
}

/// Reads the next envelope.
///
/// Returns `Ok(None)` when the source ends cleanly on an envelope boundary,
/// which is accepted as an implicit end of stream.
pub fn read_envelope<R: Read>(reader: &mut R) -> Result<Option<RawEnvelope>> {
    // 1. Marker and length, accepting the legacy form without a marker.
    let first = match read_i32(reader, "message prefix")? {
        Some(word) => word,
        None => return Ok(None),
    };
    let meta_len = if first as u32 == CONTINUATION_MARKER {
        read_i32(reader, "metadata length")?.ok_or_else(|| {
            IntegrityError::MalformedStream("stream ends after continuation marker".to_string())
        })?
    } else {
        first
    };

    if meta_len == 0 {
        return Ok(Some(RawEnvelope {
            kind: MessageKind::EndOfStream,
            metadata: Vec::new(),
            body: Vec::new(),
        }));
    }
    if meta_len < 0 || meta_len as usize > MAX_METADATA_LEN {
        return Err(IntegrityError::MalformedStream(format!(
            "invalid metadata length {meta_len}"
        )));
    }

    // 2. Metadata.
    let mut metadata = vec![0u8; meta_len as usize];
    let got = read_up_to(reader, &mut metadata)?;
    if got != metadata.len() {
        return Err(IntegrityError::MalformedStream(format!(
            "truncated metadata: expected {meta_len} bytes, found {got}"
        )));
    }

    // 3. Body, sized by the flatbuffer's bodyLength.
    let (kind, body_len) = {
        let message = root_as_message(&metadata)?;
        (
            MessageKind::from_header(message.header_type()),
            message.bodyLength(),
        )
    };
    if body_len < 0 || body_len as u64 > MAX_BODY_LEN as u64 {
        return Err(IntegrityError::MalformedStream(format!(
            "invalid body length {body_len}"
        )));
    }

    // Grow the buffer as bytes arrive instead of trusting bodyLength upfront.
    let mut body = Vec::new();
    let got = reader.take(body_len as u64).read_to_end(&mut body)?;
    if got as i64 != body_len {
        return Err(IntegrityError::MalformedStream(format!(
            "truncated body: expected {body_len} bytes, found {got}"
        )));
    }

    Ok(Some(RawEnvelope {
        kind,
        metadata,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_end_of_stream_marker_round_trip() {
        let bytes = Envelope::end_of_stream().to_bytes(8).unwrap();
        assert_eq!(bytes, END_OF_STREAM.to_vec());

        let mut cursor = Cursor::new(bytes);
        let raw = read_envelope(&mut cursor).unwrap().unwrap();
        assert_eq!(raw.kind, MessageKind::EndOfStream);
        assert!(read_envelope(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_legacy_end_of_stream_without_marker() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0, 0]);
        let raw = read_envelope(&mut cursor).unwrap().unwrap();
        assert_eq!(raw.kind, MessageKind::EndOfStream);
    }

    #[test]
    fn test_truncated_prefix_is_malformed() {
        let mut cursor = Cursor::new(vec![0xFFu8, 0xFF, 0xFF, 0xFF, 0x10, 0x00]);
        let res = read_envelope(&mut cursor);
        assert!(matches!(res, Err(IntegrityError::MalformedStream(_))));
    }

    #[test]
    fn test_negative_metadata_length_is_malformed() {
        let mut bytes = CONTINUATION_MARKER.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(-5i32).to_le_bytes());
        let res = read_envelope(&mut Cursor::new(bytes));
        assert!(matches!(res, Err(IntegrityError::MalformedStream(_))));
    }

    #[test]
    fn test_garbage_metadata_is_malformed() {
        let mut bytes = CONTINUATION_MARKER.to_le_bytes().to_vec();
        bytes.extend_from_slice(&8i32.to_le_bytes());
        bytes.extend_from_slice(&[0xAB; 8]);
        let res = read_envelope(&mut Cursor::new(bytes));
        assert!(matches!(res, Err(IntegrityError::MalformedStream(_))));
    }
}
