// In: src/orchestrator/builtin.rs

//! The implementations that live inside this process.

use arrow::ipc::reader::StreamReader as ArrowStreamReader;
use arrow::ipc::writer::{IpcWriteOptions, StreamWriter as ArrowStreamWriter};
use arrow::ipc::{CompressionType, MetadataVersion};
use arrow::record_batch::RecordBatch;
use std::io::Cursor;
use std::sync::Arc;

use super::implementation::Implementation;
use crate::codec;
use crate::codec::dictionary::assign_dictionary_ids;
use crate::config::{BodyCompression, CodecOptions};
use crate::error::Result;
use crate::ffi;
use crate::golden::GoldenCase;
use crate::types::{DecodedDataset, Feature, FeatureSet};

/// Features a producer puts into every stream because of its options.
pub fn emitted_by(options: &CodecOptions) -> FeatureSet {
    let mut emits = FeatureSet::new();
    if options.emit_dictionary_deltas {
        emits.insert(Feature::DictionaryDeltas);
    }
    if options.compression != BodyCompression::None {
        emits.insert(Feature::CompressedBodies);
    }
    emits
}

//==================================================================================
// I. Native codec
//==================================================================================

/// This crate's own `StreamEncoder` / `StreamDecoder`.
#[derive(Debug)]
pub struct NativeImplementation {
    name: String,
    options: CodecOptions,
    features: FeatureSet,
    emits: FeatureSet,
}

impl NativeImplementation {
    pub fn new(name: impl Into<String>, options: CodecOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            name: name.into(),
            emits: emitted_by(&options),
            features: Feature::all(),
            options,
        })
    }
}

impl Implementation for NativeImplementation {
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> &FeatureSet {
        &self.features
    }

    fn reads(&self) -> &FeatureSet {
        &self.features
    }

    fn emits(&self) -> &FeatureSet {
        &self.emits
    }

    fn produce(&self, case: &GoldenCase) -> Result<Vec<u8>> {
        codec::encode_dataset(&case.expected, &self.options)
    }

    fn consume(&self, bytes: &[u8]) -> Result<DecodedDataset> {
        codec::read_dataset(bytes)
    }
}

//==================================================================================
// II. The arrow crate's IPC reader and writer
//==================================================================================

/// Reads a stream with the `arrow` crate's reader, the trusted reference.
pub fn read_with_arrow_rs(bytes: &[u8]) -> Result<DecodedDataset> {
    let reader = ArrowStreamReader::try_new(Cursor::new(bytes), None)?;
    let schema = reader.schema();
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(DecodedDataset::new(schema, batches))
}

/// Writes a dataset with the `arrow` crate's writer.
///
/// That writer takes dictionary ids from the schema, so every dictionary
/// field is given its own id first.
pub fn write_with_arrow_rs(dataset: &DecodedDataset, compression: BodyCompression) -> Result<Vec<u8>> {
    let schema = Arc::new(assign_dictionary_ids(&dataset.schema));
    let compression = match compression {
        BodyCompression::None => None,
        BodyCompression::Lz4Frame => Some(CompressionType::LZ4_FRAME),
        BodyCompression::Zstd => Some(CompressionType::ZSTD),
    };
    let options =
        IpcWriteOptions::try_new(8, false, MetadataVersion::V5)?.try_with_compression(compression)?;

    let mut writer = ArrowStreamWriter::try_new_with_options(Vec::new(), &schema, options)?;
    for batch in &dataset.batches {
        let batch = RecordBatch::try_new(schema.clone(), batch.columns().to_vec())?;
        writer.write(&batch)?;
    }
    writer.finish()?;
    Ok(writer.into_inner()?)
}

#[derive(Debug)]
pub struct ArrowRsImplementation {
    name: String,
    compression: BodyCompression,
    features: FeatureSet,
    emits: FeatureSet,
}

impl ArrowRsImplementation {
    pub fn new(name: impl Into<String>, compression: BodyCompression) -> Self {
        // The arrow crate only ever replaces dictionaries and cannot read deltas.
        let features = Feature::all()
            .into_iter()
            .filter(|f| *f != Feature::DictionaryDeltas)
            .collect();
        Self {
            name: name.into(),
            emits: emitted_by(&CodecOptions::default().with_compression(compression)),
            compression,
            features,
        }
    }
}

impl Implementation for ArrowRsImplementation {
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> &FeatureSet {
        &self.features
    }

    fn reads(&self) -> &FeatureSet {
        &self.features
    }

    fn emits(&self) -> &FeatureSet {
        &self.emits
    }

    fn produce(&self, case: &GoldenCase) -> Result<Vec<u8>> {
        write_with_arrow_rs(&case.expected, self.compression)
    }

    fn consume(&self, bytes: &[u8]) -> Result<DecodedDataset> {
        read_with_arrow_rs(bytes)
    }
}

//==================================================================================
// III. Native codec behind the C data interface
//==================================================================================

/// The native codec, with every decoded batch exported through the C data
/// interface and re-imported before it is handed back.
#[derive(Debug)]
pub struct CDataImplementation {
    name: String,
    features: FeatureSet,
    emits: FeatureSet,
}

impl CDataImplementation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: Feature::all(),
            emits: FeatureSet::new(),
        }
    }
}

impl Implementation for CDataImplementation {
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> &FeatureSet {
        &self.features
    }

    fn reads(&self) -> &FeatureSet {
        &self.features
    }

    fn emits(&self) -> &FeatureSet {
        &self.emits
    }

    fn produce(&self, case: &GoldenCase) -> Result<Vec<u8>> {
        let batches = case
            .expected
            .batches
            .iter()
            .map(ffi::round_trip_batch)
            .collect::<Result<Vec<_>>>()?;
        let dataset = DecodedDataset::new(case.expected.schema.clone(), batches);
        codec::encode_dataset(&dataset, &CodecOptions::default())
    }

    fn consume(&self, bytes: &[u8]) -> Result<DecodedDataset> {
        let decoded = codec::read_dataset(bytes)?;
        let batches = decoded
            .batches
            .iter()
            .map(ffi::round_trip_batch)
            .collect::<Result<Vec<_>>>()?;
        Ok(DecodedDataset::new(decoded.schema, batches))
    }
}

//==================================================================================
// IV. Golden stream files
//==================================================================================

/// The name under which golden stream files appear as a producer.
pub const GOLDEN_FILE_PRODUCER: &str = "golden-file";

/// Replays a case's golden stream. Only cases that carry one can use it.
#[derive(Debug)]
pub struct GoldenFileProducer {
    features: FeatureSet,
    emits: FeatureSet,
}

impl Default for GoldenFileProducer {
    fn default() -> Self {
        Self {
            features: Feature::all(),
            emits: FeatureSet::new(),
        }
    }
}

impl Implementation for GoldenFileProducer {
    fn name(&self) -> &str {
        GOLDEN_FILE_PRODUCER
    }

    fn writes(&self) -> &FeatureSet {
        &self.features
    }

    fn reads(&self) -> &FeatureSet {
        &self.emits
    }

    /// Per-case; see `GoldenCase::stream_features`.
    fn emits(&self) -> &FeatureSet {
        &self.emits
    }

    fn produce(&self, case: &GoldenCase) -> Result<Vec<u8>> {
        case.golden_stream.clone().ok_or_else(|| {
            crate::error::IntegrityError::Corpus(format!("case '{}' has no golden stream", case.name))
        })
    }

    fn consume(&self, _bytes: &[u8]) -> Result<DecodedDataset> {
        Err(crate::error::IntegrityError::Unsupported(
            "golden files are a producer only".to_string(),
        ))
    }
}
