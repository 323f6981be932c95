// In: src/rpc/client.rs

//! A Flight client that speaks the same contract as the service and tracks
//! every call it makes in its own `CallRegistry`.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{Action, Criteria, FlightData, FlightInfo, HandshakeRequest, Ticket};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Streaming};

use super::auth::{bearer, AUTHORIZATION_HEADER, PROTOCOL_VERSION};
use super::service::PutAck;
use super::state::{CallGuard, CallKind, CallRecord, CallRegistry, CallState, FailureReason};
use super::transport::{
    descriptor_for, encode_batch, envelope_to_flight, metadata_only, schema_from_ipc,
    FlightDecoder, FlightMessage,
};
use crate::codec::StreamEncoder;
use crate::config::CodecOptions;
use crate::error::{IntegrityError, Result};
use crate::types::DecodedDataset;

pub struct IntegrationClient {
    inner: FlightServiceClient<Channel>,
    session: Option<String>,
    codec: CodecOptions,
    channel_capacity: usize,
    calls: Arc<CallRegistry>,
}

impl IntegrationClient {
    /// Connects to `url` (e.g. `http://127.0.0.1:50051`).
    pub async fn connect(url: &str, codec: CodecOptions) -> Result<Self> {
        let endpoint = Endpoint::from_shared(url.to_string())
            .map_err(|e| IntegrityError::Transport(format!("bad server url '{url}': {e}")))?;
        let channel = endpoint.connect().await?;
        log::debug!("connected to {url}");
        Ok(Self {
            inner: FlightServiceClient::new(channel),
            session: None,
            codec,
            channel_capacity: 2,
            calls: CallRegistry::new(),
        })
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// A second client on the same connection that has not shaken hands.
    pub fn without_session(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            session: None,
            codec: self.codec.clone(),
            channel_capacity: self.channel_capacity,
            calls: self.calls.clone(),
        }
    }

    /// Calls made through this client.
    pub fn calls(&self) -> Arc<CallRegistry> {
        self.calls.clone()
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    fn request<T>(&self, message: T) -> Result<Request<T>> {
        let mut request = Request::new(message);
        if let Some(session) = &self.session {
            let value = MetadataValue::try_from(bearer(session))
                .map_err(|e| IntegrityError::Transport(format!("bad session token: {e}")))?;
            request.metadata_mut().insert(AUTHORIZATION_HEADER, value);
        }
        Ok(request)
    }

    /// Runs the handshake and keeps the session for every later call.
    pub async fn handshake(&mut self, token: Option<&str>) -> Result<()> {
        let mut guard = self.calls.begin(CallKind::Handshake, None);
        guard.transition(CallState::Handshaking)?;
        let request = HandshakeRequest {
            protocol_version: PROTOCOL_VERSION,
            payload: token.unwrap_or_default().as_bytes().to_vec().into(),
        };
        let outcome = async {
            let mut responses = self
                .inner
                .handshake(futures::stream::iter(vec![request]))
                .await
                .map_err(IntegrityError::from_status)?
                .into_inner();
            let response = responses
                .message()
                .await
                .map_err(IntegrityError::from_status)?
                .ok_or_else(|| IntegrityError::Transport("empty handshake response".to_string()))?;
            String::from_utf8(response.payload.to_vec())
                .map_err(|_| IntegrityError::Transport("session token is not UTF-8".to_string()))
        }
        .await;
        match outcome {
            Ok(session) => {
                guard.transition(CallState::Completed)?;
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                guard.fail(FailureReason::of(&e));
                Err(e)
            }
        }
    }

    pub async fn do_get(&mut self, name: &str) -> Result<DoGetCall> {
        let request = self.request(Ticket {
            ticket: name.to_string().into(),
        })?;
        let mut guard = self.calls.begin(CallKind::DoGet, Some(name.to_string()));
        let stream = match self.inner.do_get(request).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                let e = IntegrityError::from_status(status);
                guard.fail(FailureReason::of(&e));
                return Err(e);
            }
        };
        Ok(DoGetCall {
            stream,
            decoder: FlightDecoder::new(),
            guard,
        })
    }

    /// Uploads `dataset` under `name` and returns the server's per-batch acks.
    pub async fn do_put(&mut self, name: &str, dataset: &DecodedDataset) -> Result<Vec<PutAck>> {
        let mut guard = self.calls.begin(CallKind::DoPut, Some(name.to_string()));
        let outcome = self.put_inner(&mut guard, name, dataset).await;
        if let Err(e) = &outcome {
            guard.fail(FailureReason::of(e));
        }
        outcome
    }

    async fn put_inner(
        &mut self,
        guard: &mut CallGuard,
        name: &str,
        dataset: &DecodedDataset,
    ) -> Result<Vec<PutAck>> {
        let mut encoder = StreamEncoder::try_new(&dataset.schema, self.codec.clone())?;
        let mut first = envelope_to_flight(encoder.schema_envelope(), Bytes::new());
        first.flight_descriptor = Some(descriptor_for(name));
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let request = self.request(ReceiverStream::new(rx))?;
        let inner = &mut self.inner;

        // Batches are encoded one at a time as the channel drains.
        let send = async {
            let tx = tx;
            tx.send(first)
                .await
                .map_err(|_| IntegrityError::CallCancelled)?;
            guard.transition(CallState::SchemaSent)?;
            for batch in &dataset.batches {
                for message in encode_batch(&mut encoder, batch, Bytes::new())? {
                    tx.send(message)
                        .await
                        .map_err(|_| IntegrityError::CallCancelled)?;
                }
                guard.record_sent()?;
            }
            drop(tx);
            guard.transition(CallState::HalfClosed)
        };
        let receive = async {
            let mut results = inner
                .do_put(request)
                .await
                .map_err(IntegrityError::from_status)?
                .into_inner();
            let mut acks = Vec::with_capacity(dataset.num_batches());
            while let Some(result) = results
                .message()
                .await
                .map_err(IntegrityError::from_status)?
            {
                acks.push(serde_json::from_slice::<PutAck>(&result.app_metadata)?);
            }
            Ok::<_, IntegrityError>(acks)
        };
        let (sent, received) = tokio::join!(send, receive);
        // A server status takes precedence over the send side's CallCancelled.
        let acks = received?;
        sent?;
        guard.transition(CallState::Completed)?;
        Ok(acks)
    }

    /// Opens an exchange whose outbound stream starts with `schema`.
    pub async fn do_exchange(&mut self, schema: &SchemaRef) -> Result<ExchangeCall> {
        let mut guard = self.calls.begin(CallKind::DoExchange, None);
        let encoder = StreamEncoder::try_new(schema, self.codec.clone())?;
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        tx.send(envelope_to_flight(encoder.schema_envelope(), Bytes::new()))
            .await
            .map_err(|_| IntegrityError::CallCancelled)?;
        guard.transition(CallState::SchemaSent)?;

        let request = self.request(ReceiverStream::new(rx))?;
        let inbound = match self.inner.do_exchange(request).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                let e = IntegrityError::from_status(status);
                guard.fail(FailureReason::of(&e));
                return Err(e);
            }
        };
        Ok(ExchangeCall {
            tx: Some(tx),
            encoder,
            inbound,
            decoder: FlightDecoder::new(),
            guard,
        })
    }

    pub async fn list_flights(&mut self) -> Result<Vec<FlightInfo>> {
        let request = self.request(Criteria::default())?;
        let mut stream = self
            .inner
            .list_flights(request)
            .await
            .map_err(IntegrityError::from_status)?
            .into_inner();
        let mut infos = Vec::new();
        while let Some(info) = stream.message().await.map_err(IntegrityError::from_status)? {
            infos.push(info);
        }
        Ok(infos)
    }

    pub async fn get_flight_info(&mut self, name: &str) -> Result<FlightInfo> {
        let request = self.request(descriptor_for(name))?;
        Ok(self
            .inner
            .get_flight_info(request)
            .await
            .map_err(IntegrityError::from_status)?
            .into_inner())
    }

    pub async fn get_schema(&mut self, name: &str) -> Result<SchemaRef> {
        let request = self.request(descriptor_for(name))?;
        let result = self
            .inner
            .get_schema(request)
            .await
            .map_err(IntegrityError::from_status)?
            .into_inner();
        schema_from_ipc(&result.schema)
    }

    pub async fn do_action(&mut self, kind: &str, body: Bytes) -> Result<Vec<Bytes>> {
        let request = self.request(Action {
            r#type: kind.to_string(),
            body,
        })?;
        let mut stream = self
            .inner
            .do_action(request)
            .await
            .map_err(IntegrityError::from_status)?
            .into_inner();
        let mut bodies = Vec::new();
        while let Some(result) = stream.message().await.map_err(IntegrityError::from_status)? {
            bodies.push(result.body);
        }
        Ok(bodies)
    }

    /// The calls the server has seen, from its `calls` action.
    pub async fn server_calls(&mut self) -> Result<Vec<CallRecord>> {
        let bodies = self.do_action("calls", Bytes::new()).await?;
        let body = bodies
            .first()
            .ok_or_else(|| IntegrityError::Transport("empty 'calls' response".to_string()))?;
        Ok(serde_json::from_slice(body)?)
    }
}

//==================================================================================
// Streaming calls
//==================================================================================

/// An open `do_get`. Dropping it before the end cancels the call.
pub struct DoGetCall {
    stream: Streaming<FlightData>,
    decoder: FlightDecoder,
    guard: CallGuard,
}

impl DoGetCall {
    pub fn schema(&self) -> Option<&SchemaRef> {
        self.decoder.schema()
    }

    pub fn state(&self) -> &CallState {
        self.guard.state()
    }

    /// The next batch, or `None` once the server finished the stream.
    pub async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.guard.state().is_terminal() {
            return Ok(None);
        }
        loop {
            let data = match self.stream.message().await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    self.finish()?;
                    return Ok(None);
                }
                Err(status) => {
                    let e = IntegrityError::from_status(status);
                    self.guard.fail(FailureReason::of(&e));
                    return Err(e);
                }
            };
            match self.decoder.push(data) {
                Ok(FlightMessage::Schema(_)) => self.guard.transition(CallState::SchemaSent)?,
                Ok(FlightMessage::Batch { batch, .. }) => {
                    self.guard.record_received()?;
                    return Ok(Some(batch));
                }
                Ok(_) => {}
                Err(e) => {
                    self.guard.fail(FailureReason::of(&e));
                    return Err(e);
                }
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        if *self.guard.state() == CallState::Idle {
            let e = IntegrityError::MalformedStream("stream ended before its schema".to_string());
            self.guard.fail(FailureReason::of(&e));
            return Err(e);
        }
        self.guard.transition(CallState::HalfClosed)?;
        self.guard.transition(CallState::Completed)
    }

    /// Stops reading and tells the server the call is over.
    pub fn cancel(mut self) {
        self.guard.fail(FailureReason::Cancelled);
    }

    /// Reads the rest of the stream into a dataset.
    pub async fn collect(mut self) -> Result<DecodedDataset> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            batches.push(batch);
        }
        let schema = self.decoder.schema().cloned().ok_or_else(|| {
            IntegrityError::MalformedStream("stream ended before its schema".to_string())
        })?;
        Ok(DecodedDataset::new(schema, batches))
    }
}

/// An open `do_exchange`. Both directions stream independently; the call
/// completes once this side half-closed and the server's stream ended.
pub struct ExchangeCall {
    tx: Option<mpsc::Sender<FlightData>>,
    encoder: StreamEncoder,
    inbound: Streaming<FlightData>,
    decoder: FlightDecoder,
    guard: CallGuard,
}

impl ExchangeCall {
    pub fn state(&self) -> &CallState {
        self.guard.state()
    }

    async fn send(&mut self, message: FlightData) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| {
            IntegrityError::Transport("exchange already half-closed".to_string())
        })?;
        if tx.send(message).await.is_err() {
            self.guard.fail(FailureReason::Cancelled);
            return Err(IntegrityError::CallCancelled);
        }
        Ok(())
    }

    pub async fn send_batch(&mut self, batch: &RecordBatch, app_metadata: Bytes) -> Result<()> {
        for message in encode_batch(&mut self.encoder, batch, app_metadata)? {
            self.send(message).await?;
        }
        self.guard.record_sent()
    }

    pub async fn send_metadata(&mut self, app_metadata: Bytes) -> Result<()> {
        self.send(metadata_only(app_metadata)).await
    }

    /// Closes the outbound direction. Inbound messages keep arriving.
    pub fn half_close(&mut self) -> Result<()> {
        if self.tx.take().is_some() {
            self.guard.transition(CallState::HalfClosed)?;
        }
        Ok(())
    }

    /// The next message from the server, or `None` once its stream ended.
    pub async fn next_message(&mut self) -> Result<Option<FlightMessage>> {
        if self.guard.state().is_terminal() {
            return Ok(None);
        }
        let data = match self.inbound.message().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                self.half_close()?;
                self.guard.transition(CallState::Completed)?;
                return Ok(None);
            }
            Err(status) => {
                let e = IntegrityError::from_status(status);
                self.guard.fail(FailureReason::of(&e));
                return Err(e);
            }
        };
        match self.decoder.push(data) {
            Ok(message) => {
                if matches!(message, FlightMessage::Batch { .. }) {
                    self.guard.record_received()?;
                }
                Ok(Some(message))
            }
            Err(e) => {
                self.guard.fail(FailureReason::of(&e));
                Err(e)
            }
        }
    }
}
