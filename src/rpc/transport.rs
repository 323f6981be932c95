// In: src/rpc/transport.rs

//! Codec envelopes carried as Flight messages.
//!
//! One envelope is one `FlightData`: `data_header` holds the flatbuffer
//! metadata, `data_body` the body. A message with an empty header carries
//! only application metadata.

use arrow::buffer::Buffer;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow_flight::{FlightData, FlightDescriptor};
use bytes::Bytes;
use std::io::Cursor;
use tokio::sync::mpsc;
use tonic::Status;

use crate::codec::envelope::read_envelope;
use crate::codec::{Decoded, Envelope, MessageKind, StreamDecoder, StreamEncoder};
use crate::config::CodecOptions;
use crate::error::{IntegrityError, Result};
use crate::types::{DecodedDataset, DictionaryUpdate, StreamItem};

pub fn envelope_to_flight(envelope: Envelope, app_metadata: Bytes) -> FlightData {
    FlightData {
        flight_descriptor: None,
        data_header: envelope.metadata.into(),
        app_metadata,
        data_body: envelope.body.into(),
    }
}

/// A message that carries application metadata and nothing else.
pub fn metadata_only(app_metadata: Bytes) -> FlightData {
    FlightData {
        app_metadata,
        ..FlightData::default()
    }
}

/// Encodes `batch` into the Flight messages that carry it: any dictionary
/// messages it needs, then the record batch, which gets `app_metadata`.
pub fn encode_batch(
    encoder: &mut StreamEncoder,
    batch: &RecordBatch,
    app_metadata: Bytes,
) -> Result<Vec<FlightData>> {
    let envelopes = encoder.encode_batch(batch)?;
    let last = envelopes.len().saturating_sub(1);
    Ok(envelopes
        .into_iter()
        .enumerate()
        .map(|(i, envelope)| {
            let metadata = if i == last {
                app_metadata.clone()
            } else {
                Bytes::new()
            };
            envelope_to_flight(envelope, metadata)
        })
        .collect())
}

/// The schema as one framed IPC message, the form Flight uses in
/// `FlightInfo` and `SchemaResult`.
pub fn schema_to_ipc(schema: &SchemaRef, options: &CodecOptions) -> Result<Bytes> {
    let encoder = StreamEncoder::try_new(schema, options.clone())?;
    Ok(encoder
        .schema_envelope()
        .to_bytes(options.alignment)?
        .into())
}

pub fn schema_from_ipc(bytes: &[u8]) -> Result<SchemaRef> {
    let raw = read_envelope(&mut Cursor::new(bytes))?.ok_or_else(|| {
        IntegrityError::MalformedStream("empty schema message".to_string())
    })?;
    let mut decoder = StreamDecoder::new();
    match decoder.decode(&raw.metadata, Buffer::from_vec(raw.body))? {
        Decoded::Schema(schema) => Ok(schema),
        _ => Err(IntegrityError::MalformedStream(
            "expected a schema message".to_string(),
        )),
    }
}

pub fn descriptor_for(name: &str) -> FlightDescriptor {
    FlightDescriptor::new_path(vec![name.to_string()])
}

/// The dataset name a descriptor points at: its path, joined with `/`.
pub fn descriptor_name(descriptor: &FlightDescriptor) -> Result<String> {
    if descriptor.path.is_empty() {
        return Err(IntegrityError::Transport(
            "flight descriptor has no path".to_string(),
        ));
    }
    Ok(descriptor.path.join("/"))
}

//==================================================================================
// Decoding
//==================================================================================

/// What one received Flight message turned out to be.
#[derive(Debug)]
pub enum FlightMessage {
    Schema(SchemaRef),
    Dictionary(DictionaryUpdate),
    Batch {
        batch: RecordBatch,
        app_metadata: Bytes,
    },
    /// Application metadata without any data.
    Metadata(Bytes),
    /// A message kind the decoder does not interpret.
    Skipped,
}

/// A `StreamDecoder` fed from Flight messages instead of bytes.
#[derive(Debug, Default)]
pub struct FlightDecoder {
    decoder: StreamDecoder,
}

impl FlightDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> Option<&SchemaRef> {
        self.decoder.schema()
    }

    pub fn push(&mut self, data: FlightData) -> Result<FlightMessage> {
        if data.data_header.is_empty() {
            return Ok(FlightMessage::Metadata(data.app_metadata));
        }
        if let MessageKind::Unknown(kind) = MessageKind::of_metadata(&data.data_header)? {
            log::warn!("skipping flight message with unknown header type {kind}");
            return Ok(FlightMessage::Skipped);
        }
        match self
            .decoder
            .decode(&data.data_header, Buffer::from(data.data_body))?
        {
            Decoded::Schema(schema) => Ok(FlightMessage::Schema(schema)),
            Decoded::Item(StreamItem::Dictionary(update)) => Ok(FlightMessage::Dictionary(update)),
            Decoded::Item(StreamItem::Batch(batch)) => Ok(FlightMessage::Batch {
                batch,
                app_metadata: data.app_metadata,
            }),
            Decoded::Skipped | Decoded::EndOfStream => Ok(FlightMessage::Skipped),
        }
    }
}

/// Collects a whole stream of Flight messages into a dataset.
pub fn collect_dataset(messages: impl IntoIterator<Item = FlightData>) -> Result<DecodedDataset> {
    let mut decoder = FlightDecoder::new();
    let mut batches = Vec::new();
    for data in messages {
        if let FlightMessage::Batch { batch, .. } = decoder.push(data)? {
            batches.push(batch);
        }
    }
    let schema = decoder.schema().cloned().ok_or_else(|| {
        IntegrityError::MalformedStream("stream ended before its schema".to_string())
    })?;
    Ok(DecodedDataset::new(schema, batches))
}

//==================================================================================
// Outbound channel
//==================================================================================

/// The sending half of a call's bounded outbound queue.
///
/// `send` waits while the queue is full, so a slow receiver slows the
/// producer down instead of losing messages. A closed queue means the peer
/// went away and surfaces as `CallCancelled`.
#[derive(Debug, Clone)]
pub struct OutboundSender<T> {
    tx: mpsc::Sender<std::result::Result<T, Status>>,
}

impl<T> OutboundSender<T> {
    pub fn new(tx: mpsc::Sender<std::result::Result<T, Status>>) -> Self {
        Self { tx }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn send(&self, message: T) -> Result<()> {
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| IntegrityError::CallCancelled)
    }

    /// Ends the call with `status`. The peer may already be gone.
    pub async fn send_error(&self, status: Status) {
        let _ = self.tx.send(Err(status)).await;
    }
}

/// A bounded outbound queue and the stream tonic drains it through.
pub fn outbound<T: Send + 'static>(
    capacity: usize,
) -> (
    OutboundSender<T>,
    tokio_stream::wrappers::ReceiverStream<std::result::Result<T, Status>>,
) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        OutboundSender::new(tx),
        tokio_stream::wrappers::ReceiverStream::new(rx),
    )
}
