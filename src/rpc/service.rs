// In: src/rpc/service.rs

//! The Flight service every implementation's client is checked against.
//!
//! Protocol:
//!   handshake(version, token)              → session token
//!   do_get(Ticket { dataset name })        → schema, dictionaries, batches
//!   do_put(descriptor path + stream)       → one `PutAck` per batch, stored
//!   do_exchange(stream)                    → every batch re-encoded and echoed
//!   do_action("drop" | "describe" | "calls")

use arrow_flight::flight_service_server::{FlightService, FlightServiceServer};
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightEndpoint, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaResult, Ticket,
};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

use super::auth::{Authenticator, PROTOCOL_VERSION};
use super::state::{CallGuard, CallKind, CallRegistry, CallState, FailureReason};
use super::transport::{
    descriptor_for, descriptor_name, encode_batch, envelope_to_flight, metadata_only, outbound,
    schema_to_ipc, FlightDecoder, FlightMessage, OutboundSender,
};
use crate::codec::StreamEncoder;
use crate::config::RpcConfig;
use crate::error::{IntegrityError, Result};
use crate::golden::Corpus;
use crate::types::DecodedDataset;

/// Acknowledges one batch received by `do_put`. Sent as the JSON
/// `app_metadata` of a `PutResult`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutAck {
    pub batch_index: usize,
    pub rows_received: usize,
}

//==================================================================================
// I. Dataset store
//==================================================================================

/// Named datasets served by `do_get` and filled by `do_put`.
#[derive(Debug, Default)]
pub struct DatasetStore {
    datasets: RwLock<BTreeMap<String, Arc<DecodedDataset>>>,
}

impl DatasetStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A store holding the expectation of every case, keyed by case name.
    pub fn from_corpus(corpus: &Corpus) -> Arc<Self> {
        let store = Self::new();
        for case in corpus.cases() {
            store.insert(&case.name, case.expected.clone());
        }
        store
    }

    pub fn insert(&self, name: &str, dataset: DecodedDataset) {
        self.datasets
            .write()
            .insert(name.to_string(), Arc::new(dataset));
    }

    pub fn get(&self, name: &str) -> Option<Arc<DecodedDataset>> {
        self.datasets.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<DecodedDataset>> {
        self.datasets.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.datasets.read().keys().cloned().collect()
    }

    fn require(&self, name: &str) -> std::result::Result<Arc<DecodedDataset>, Status> {
        self.get(name)
            .ok_or_else(|| Status::not_found(format!("no dataset named '{name}'")))
    }
}

//==================================================================================
// II. Service
//==================================================================================

pub struct IntegrationService {
    config: RpcConfig,
    store: Arc<DatasetStore>,
    auth: Arc<Authenticator>,
    calls: Arc<CallRegistry>,
}

impl IntegrationService {
    pub fn new(config: RpcConfig, store: Arc<DatasetStore>) -> Self {
        Self {
            auth: Arc::new(Authenticator::with_limits(
                config.auth_token.clone(),
                config.max_sessions,
                config.session_ttl(),
            )),
            calls: CallRegistry::with_history(config.call_history),
            config,
            store,
        }
    }

    pub fn calls(&self) -> Arc<CallRegistry> {
        self.calls.clone()
    }

    pub fn store(&self) -> Arc<DatasetStore> {
        self.store.clone()
    }

    fn authorize<T>(&self, request: &Request<T>) -> std::result::Result<(), Status> {
        self.auth.check(request.metadata()).map_err(Status::from)
    }

    fn flight_info(&self, name: &str) -> std::result::Result<FlightInfo, Status> {
        let dataset = self.store.require(name)?;
        let schema = schema_to_ipc(&dataset.schema, &self.config.codec)?;
        let endpoint = FlightEndpoint {
            ticket: Some(Ticket {
                ticket: name.to_string().into(),
            }),
            location: vec![],
            expiration_time: None,
            app_metadata: Default::default(),
        };
        Ok(FlightInfo {
            schema,
            flight_descriptor: Some(descriptor_for(name)),
            endpoint: vec![endpoint],
            total_records: dataset.num_rows() as i64,
            total_bytes: -1,
            ordered: true,
            app_metadata: Default::default(),
        })
    }
}

fn utf8(bytes: &[u8], what: &str) -> std::result::Result<String, Status> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| Status::invalid_argument(format!("{what} must be valid UTF-8")))
}

/// Streams `dataset` through `out`, checking for cancellation before every
/// batch and on every send.
async fn stream_dataset(
    guard: &mut CallGuard,
    dataset: &DecodedDataset,
    encoder: &mut StreamEncoder,
    out: &OutboundSender<FlightData>,
) -> Result<()> {
    out.send(envelope_to_flight(encoder.schema_envelope(), Bytes::new()))
        .await?;
    guard.transition(CallState::SchemaSent)?;
    for batch in &dataset.batches {
        if out.is_cancelled() {
            return Err(IntegrityError::CallCancelled);
        }
        for message in encode_batch(encoder, batch, Bytes::new())? {
            out.send(message).await?;
        }
        guard.record_sent()?;
    }
    guard.transition(CallState::HalfClosed)?;
    guard.transition(CallState::Completed)?;
    Ok(())
}

/// Decodes a `do_put` stream, acknowledging every batch.
async fn receive_put(
    guard: &mut CallGuard,
    first: FlightData,
    mut inbound: Streaming<FlightData>,
    out: &OutboundSender<PutResult>,
) -> Result<DecodedDataset> {
    let mut decoder = FlightDecoder::new();
    let mut batches = Vec::new();
    let mut rows = 0;
    let mut next = Some(first);
    while let Some(data) = next {
        match decoder.push(data)? {
            FlightMessage::Schema(_) => guard.transition(CallState::SchemaSent)?,
            FlightMessage::Batch { batch, .. } => {
                rows += batch.num_rows();
                let ack = PutAck {
                    batch_index: batches.len(),
                    rows_received: rows,
                };
                batches.push(batch);
                guard.record_received()?;
                out.send(PutResult {
                    app_metadata: serde_json::to_vec(&ack)?.into(),
                })
                .await?;
            }
            FlightMessage::Dictionary(_) | FlightMessage::Metadata(_) | FlightMessage::Skipped => {}
        }
        next = inbound.message().await?;
    }
    let schema = decoder.schema().cloned().ok_or_else(|| {
        IntegrityError::MalformedStream("put stream ended before its schema".to_string())
    })?;
    guard.transition(CallState::HalfClosed)?;
    Ok(DecodedDataset::new(schema, batches))
}

/// Echoes every batch of an exchange, re-encoded with this side's encoder.
async fn echo_exchange(
    guard: &mut CallGuard,
    mut inbound: Streaming<FlightData>,
    config: &RpcConfig,
    out: &OutboundSender<FlightData>,
) -> Result<()> {
    let mut decoder = FlightDecoder::new();
    let mut encoder: Option<StreamEncoder> = None;
    while let Some(data) = inbound.message().await? {
        if out.is_cancelled() {
            return Err(IntegrityError::CallCancelled);
        }
        match decoder.push(data)? {
            FlightMessage::Schema(schema) => {
                let fresh = StreamEncoder::try_new(&schema, config.codec.clone())?;
                out.send(envelope_to_flight(fresh.schema_envelope(), Bytes::new()))
                    .await?;
                encoder = Some(fresh);
                guard.transition(CallState::SchemaSent)?;
            }
            FlightMessage::Batch {
                batch,
                app_metadata,
            } => {
                guard.record_received()?;
                let encoder = encoder.as_mut().ok_or_else(|| {
                    IntegrityError::MalformedStream("batch before schema".to_string())
                })?;
                for message in encode_batch(encoder, &batch, app_metadata)? {
                    out.send(message).await?;
                }
                guard.record_sent()?;
            }
            FlightMessage::Metadata(app_metadata) => {
                out.send(metadata_only(app_metadata)).await?;
            }
            FlightMessage::Dictionary(_) | FlightMessage::Skipped => {}
        }
    }
    // The client half-closed; ours closes when `out` is dropped.
    if *guard.state() == CallState::Idle {
        guard.transition(CallState::SchemaSent)?;
    }
    guard.transition(CallState::HalfClosed)?;
    guard.transition(CallState::Completed)?;
    Ok(())
}

#[tonic::async_trait]
impl FlightService for IntegrationService {
    type HandshakeStream = BoxStream<'static, std::result::Result<HandshakeResponse, Status>>;
    type ListFlightsStream = BoxStream<'static, std::result::Result<FlightInfo, Status>>;
    type DoGetStream = BoxStream<'static, std::result::Result<FlightData, Status>>;
    type DoPutStream = BoxStream<'static, std::result::Result<PutResult, Status>>;
    type DoExchangeStream = BoxStream<'static, std::result::Result<FlightData, Status>>;
    type DoActionStream = BoxStream<'static, std::result::Result<arrow_flight::Result, Status>>;
    type ListActionsStream = BoxStream<'static, std::result::Result<ActionType, Status>>;

    // ── handshake ────────────────────────────────────────────────────────────
    async fn handshake(
        &self,
        request: Request<Streaming<HandshakeRequest>>,
    ) -> std::result::Result<Response<Self::HandshakeStream>, Status> {
        let mut guard = self.calls.begin(CallKind::Handshake, None);
        guard.transition(CallState::Handshaking)?;
        let mut inbound = request.into_inner();
        let first = match inbound.message().await {
            Ok(Some(first)) => first,
            Ok(None) => {
                guard.fail(FailureReason::Transport("empty handshake".to_string()));
                return Err(Status::invalid_argument("empty handshake"));
            }
            Err(status) => {
                guard.fail(FailureReason::Transport(status.to_string()));
                return Err(status);
            }
        };
        match self.auth.handshake(&first) {
            Ok(session) => {
                guard.transition(CallState::Completed)?;
                let response = HandshakeResponse {
                    protocol_version: PROTOCOL_VERSION,
                    payload: session.into_bytes().into(),
                };
                Ok(Response::new(
                    futures::stream::once(futures::future::ready(Ok(response))).boxed(),
                ))
            }
            Err(e) => {
                guard.fail(FailureReason::of(&e));
                Err(e.into())
            }
        }
    }

    // ── list_flights ─────────────────────────────────────────────────────────
    async fn list_flights(
        &self,
        request: Request<Criteria>,
    ) -> std::result::Result<Response<Self::ListFlightsStream>, Status> {
        self.authorize(&request)?;
        let infos = self
            .store
            .names()
            .iter()
            .map(|name| self.flight_info(name))
            .collect::<Vec<_>>();
        Ok(Response::new(futures::stream::iter(infos).boxed()))
    }

    // ── get_flight_info ──────────────────────────────────────────────────────
    async fn get_flight_info(
        &self,
        request: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<FlightInfo>, Status> {
        self.authorize(&request)?;
        let name = descriptor_name(request.get_ref())?;
        Ok(Response::new(self.flight_info(&name)?))
    }

    // ── poll_flight_info ─────────────────────────────────────────────────────
    async fn poll_flight_info(
        &self,
        request: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<PollInfo>, Status> {
        let info = self.get_flight_info(request).await?.into_inner();
        Ok(Response::new(PollInfo {
            info: Some(info),
            flight_descriptor: None,
            progress: Some(1.0),
            expiration_time: None,
        }))
    }

    // ── get_schema ───────────────────────────────────────────────────────────
    async fn get_schema(
        &self,
        request: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<SchemaResult>, Status> {
        self.authorize(&request)?;
        let name = descriptor_name(request.get_ref())?;
        let dataset = self.store.require(&name)?;
        let schema = schema_to_ipc(&dataset.schema, &self.config.codec)?;
        Ok(Response::new(SchemaResult { schema }))
    }

    // ── do_get: stream one stored dataset ────────────────────────────────────
    async fn do_get(
        &self,
        request: Request<Ticket>,
    ) -> std::result::Result<Response<Self::DoGetStream>, Status> {
        self.authorize(&request)?;
        let name = utf8(&request.get_ref().ticket, "ticket")?;
        let dataset = self.store.require(&name)?;
        let mut encoder = StreamEncoder::try_new(&dataset.schema, self.config.codec.clone())?;
        log::debug!("do_get '{name}': {} batches", dataset.num_batches());

        let mut guard = self.calls.begin(CallKind::DoGet, Some(name));
        let (out, stream) = outbound(self.config.channel_capacity);
        tokio::spawn(async move {
            if let Err(e) = stream_dataset(&mut guard, &dataset, &mut encoder, &out).await {
                guard.fail(FailureReason::of(&e));
                out.send_error(e.into()).await;
            }
        });
        Ok(Response::new(stream.boxed()))
    }

    // ── do_put: receive and store one dataset ────────────────────────────────
    async fn do_put(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> std::result::Result<Response<Self::DoPutStream>, Status> {
        self.authorize(&request)?;
        let mut inbound = request.into_inner();
        let first = inbound
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("empty put stream"))?;
        let descriptor = first
            .flight_descriptor
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("first put message has no descriptor"))?;
        let name = descriptor_name(descriptor)?;

        let mut guard = self.calls.begin(CallKind::DoPut, Some(name.clone()));
        let store = self.store.clone();
        let (out, stream) = outbound(self.config.channel_capacity);
        tokio::spawn(async move {
            match receive_put(&mut guard, first, inbound, &out).await {
                Ok(dataset) => {
                    log::debug!("do_put '{name}': stored {} rows", dataset.num_rows());
                    store.insert(&name, dataset);
                    if let Err(e) = guard.transition(CallState::Completed) {
                        log::warn!("do_put '{name}': {e}");
                    }
                }
                Err(e) => {
                    guard.fail(FailureReason::of(&e));
                    out.send_error(e.into()).await;
                }
            }
        });
        Ok(Response::new(stream.boxed()))
    }

    // ── do_exchange: echo every batch ────────────────────────────────────────
    async fn do_exchange(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> std::result::Result<Response<Self::DoExchangeStream>, Status> {
        self.authorize(&request)?;
        let inbound = request.into_inner();
        let mut guard = self.calls.begin(CallKind::DoExchange, None);
        let config = self.config.clone();
        let (out, stream) = outbound(self.config.channel_capacity);
        tokio::spawn(async move {
            if let Err(e) = echo_exchange(&mut guard, inbound, &config, &out).await {
                guard.fail(FailureReason::of(&e));
                out.send_error(e.into()).await;
            }
        });
        Ok(Response::new(stream.boxed()))
    }

    // ── do_action ────────────────────────────────────────────────────────────
    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> std::result::Result<Response<Self::DoActionStream>, Status> {
        self.authorize(&request)?;
        let action = request.into_inner();
        let body: Bytes = match action.r#type.as_str() {
            "drop" => {
                let name = utf8(&action.body, "dataset name")?;
                let dropped = self.store.remove(&name).is_some();
                serde_json::to_vec(&serde_json::json!({ "dropped": dropped }))
                    .map_err(IntegrityError::from)?
                    .into()
            }
            "describe" => {
                let name = utf8(&action.body, "dataset name")?;
                let dataset = self.store.require(&name)?;
                serde_json::to_vec(dataset.schema.as_ref())
                    .map_err(IntegrityError::from)?
                    .into()
            }
            "calls" => serde_json::to_vec(&self.calls.snapshot())
                .map_err(IntegrityError::from)?
                .into(),
            other => {
                return Err(Status::invalid_argument(format!("unknown action '{other}'")));
            }
        };
        log::debug!("do_action '{}'", action.r#type);
        let result = arrow_flight::Result { body };
        Ok(Response::new(
            futures::stream::once(futures::future::ready(Ok(result))).boxed(),
        ))
    }

    // ── list_actions ─────────────────────────────────────────────────────────
    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> std::result::Result<Response<Self::ListActionsStream>, Status> {
        let actions = vec![
            ActionType {
                r#type: "drop".to_string(),
                description: "Remove a dataset. Body = dataset name. Returns {dropped: bool}."
                    .to_string(),
            },
            ActionType {
                r#type: "describe".to_string(),
                description: "Schema of a dataset as JSON. Body = dataset name.".to_string(),
            },
            ActionType {
                r#type: "calls".to_string(),
                description: "Every call this server has seen, with its final state.".to_string(),
            },
        ];
        Ok(Response::new(
            futures::stream::iter(actions.into_iter().map(Ok)).boxed(),
        ))
    }
}

//==================================================================================
// III. Server
//==================================================================================

/// A running server and the handles to observe and stop it.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub calls: Arc<CallRegistry>,
    pub store: Arc<DatasetStore>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::result::Result<(), tonic::transport::Error>>,
}

impl ServerHandle {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stops accepting calls and waits for the server task.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task
            .await
            .map_err(|e| IntegrityError::InternalError(format!("server task failed: {e}")))??;
        Ok(())
    }
}

/// Binds `config.host:config.port` (port 0 picks a free one) and serves
/// `store` in a background task.
pub async fn spawn_server(config: RpcConfig, store: Arc<DatasetStore>) -> Result<ServerHandle> {
    let listener = TcpListener::bind(config.socket_addr()).await?;
    let addr = listener.local_addr()?;
    let service = IntegrationService::new(config, store);
    let calls = service.calls();
    let store = service.store();
    let (tx, rx) = oneshot::channel();

    let task = tokio::spawn(
        Server::builder()
            .add_service(FlightServiceServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                let _ = rx.await;
            }),
    );
    log::info!("flight server listening on grpc://{addr}");
    Ok(ServerHandle {
        addr,
        calls,
        store,
        shutdown: Some(tx),
        task,
    })
}

/// Serves until the process is stopped. The store is preloaded with the
/// generated corpus when the config asks for it.
pub async fn serve(config: RpcConfig, seed: u64) -> Result<()> {
    let store = if config.preload_generated {
        DatasetStore::from_corpus(&Corpus::generated(seed)?)
    } else {
        DatasetStore::new()
    };
    let addr = config.socket_addr();
    let service = IntegrationService::new(config, store);
    log::info!("flight server listening on grpc://{addr}");
    let addr = addr
        .parse::<SocketAddr>()
        .map_err(|e| IntegrityError::InvalidOptions(format!("bad listen address {addr}: {e}")))?;
    Server::builder()
        .add_service(FlightServiceServer::new(service))
        .serve(addr)
        .await?;
    Ok(())
}
