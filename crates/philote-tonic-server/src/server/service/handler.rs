//! gRPC service implementation for hosted disciplines.
//!
//! This module defines [`DisciplineServer`], which implements the three
//! services of the `philote` protocol (`DisciplineService`,
//! `ExplicitService`, `ImplicitService`) on top of a single [`Session`].
//!
//! ## Responsibilities
//!
//! - Serialize access to the discipline: every RPC that touches metadata or
//!   invokes discipline math holds the session lock while it does so.
//! - Reassemble inbound chunk streams into dense buffers without holding the
//!   lock, and reject protocol violations before the discipline runs. The
//!   buffers are laid out from a metadata snapshot that must still match the
//!   session when the discipline is invoked.
//! - Stream results back through [`feed_chunks`] after the lock is released.
//! - Track in-flight RPCs so that shutdown can drain them.

use crate::{
    discipline::AnyDiscipline,
    server::{
        config::ServerConfig,
        service::{ChunkStream, MessageStream},
        session::Session,
        streaming::{
            inbound::{Received, receive_chunks},
            outbound::{Payload, feed_chunks},
        },
        telemetry::{
            decrement_inflight, increment_chunks_received, increment_chunks_sent,
            increment_errors, increment_inflight, increment_requests, record_duration,
        },
    },
};
use core::time::Duration;
use futures::TryStreamExt;
use philote_tonic_core::{
    Error, Kind, Options, StreamOptions,
    proto::{
        ArrayChunk, DisciplineOptions, DisciplineProperties, Empty, PartialsMetaData,
        StreamOptions as WireStreamOptions, VariableMetaData,
        discipline_service_server::DisciplineService,
    },
};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::{sync::Arc, time::Instant};
use tokio::{
    sync::{Mutex, mpsc},
    time::{sleep, timeout},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

/// gRPC front end of one hosted discipline.
///
/// Cloning is cheap; clones share the session, the shutdown state and the
/// in-flight counter.
#[derive(Clone)]
pub struct DisciplineServer {
    kind: Kind,
    config: ServerConfig,
    session: Arc<Mutex<Session>>,
    shutdown_token: CancellationToken,
    shutting_down: Arc<AtomicBool>,
    inflight: Arc<AtomicUsize>,
}

/// Bookkeeping for one RPC. Dropping it ends the RPC for shutdown draining
/// and metrics.
pub(crate) struct RpcGuard {
    rpc: &'static str,
    start: Instant,
    failed: bool,
    inflight: Arc<AtomicUsize>,
}

impl RpcGuard {
    /// Marks the RPC as failed and converts `e` into the status returned to
    /// the client.
    pub(crate) fn fail(&mut self, e: Error) -> Status {
        #[cfg(feature = "tracing")]
        tracing::warn!("{} failed: {}", self.rpc, e);
        self.failed = true;
        e.into()
    }
}

impl Drop for RpcGuard {
    fn drop(&mut self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_inflight(self.rpc);
        record_duration(self.rpc, self.start.elapsed().as_secs_f64() * 1000.0);
        if self.failed {
            increment_errors(self.rpc);
        }
    }
}

impl DisciplineServer {
    /// Wraps `discipline` in a fresh session. The discipline's `initialize`
    /// hook runs with empty options.
    pub fn new(discipline: AnyDiscipline, config: ServerConfig) -> Result<Self, Error> {
        let session = Session::new(discipline, config.stream_options)?;
        Ok(Self {
            kind: session.kind(),
            config,
            session: Arc::new(Mutex::new(session)),
            shutdown_token: CancellationToken::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
            inflight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Number of RPCs currently being served, including result streams that
    /// have not finished.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Registers the start of an RPC, refusing it once shutdown has begun.
    pub(crate) fn begin(&self, rpc: &'static str) -> Result<RpcGuard, Status> {
        if self.shutting_down.load(Ordering::Acquire) {
            increment_errors(rpc);
            return Err(Error::ServiceShutdown.into());
        }
        increment_requests(rpc);
        increment_inflight(rpc);
        self.inflight.fetch_add(1, Ordering::AcqRel);
        Ok(RpcGuard {
            rpc,
            start: Instant::now(),
            failed: false,
            inflight: Arc::clone(&self.inflight),
        })
    }

    /// Runs one evaluation RPC.
    ///
    /// The inbound stream is consumed without holding the session lock, into
    /// buffers shaped from a snapshot of the metadata. The lock is then
    /// retaken for `eval`; if the
    /// metadata no longer equals the snapshot the RPC fails with
    /// [`Error::MetadataChanged`]. Any error up to that point fails the RPC
    /// before a single result chunk is sent.
    pub(crate) async fn evaluate<F>(
        &self,
        rpc: &'static str,
        kind: Kind,
        mut inbound: Streaming<ArrayChunk>,
        eval: F,
    ) -> Result<Response<ChunkStream>, Status>
    where
        F: FnOnce(&mut Session, Received) -> philote_tonic_core::Result<Payload> + Send,
    {
        let mut guard = self.begin(rpc)?;

        let prepared = async {
            let snapshot = self.session.lock().await.evaluation_metadata(kind)?.clone();
            let received = receive_chunks(&mut inbound, &snapshot, &self.shutdown_token).await?;
            increment_chunks_received(rpc, received.chunks as u64);

            let mut session = self.session.lock().await;
            if session.evaluation_metadata(kind)? != &snapshot {
                return Err(Error::MetadataChanged);
            }
            let payload = eval(&mut *session, received)?;
            Ok::<_, Error>((payload, session.stream_options().num_double))
        }
        .await;

        match prepared {
            Ok((payload, max_chunk)) => Ok(Response::new(self.stream_payload(guard, payload, max_chunk))),
            Err(e) => Err(guard.fail(e)),
        }
    }

    /// Spawns the chunk feeder for `payload` and returns the response stream.
    /// The RPC stays in flight until the feeder finishes.
    fn stream_payload(&self, mut guard: RpcGuard, payload: Payload, max_chunk: usize) -> ChunkStream {
        let rpc = guard.rpc;
        let (resp_tx, resp_rx) = mpsc::channel(self.config.stream_buffer_size);
        let shutdown = self.shutdown_token.clone();

        let fut = async move {
            match feed_chunks(payload, max_chunk, resp_tx, shutdown).await {
                Ok(_sent) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Sent {} chunks", _sent);
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Error: {}", _e);
                    guard.failed = true;
                }
            }
            drop(guard);
        };
        #[cfg(feature = "tracing")]
        let fut = {
            use tracing::Instrument;
            let span = tracing::info_span!("streaming", rpc);
            fut.instrument(span)
        };

        tokio::spawn(fut);

        let stream = ReceiverStream::new(resp_rx).inspect_ok(move |_chunk| {
            increment_chunks_sent(rpc, 1);
        });

        Box::pin(stream)
    }

    /// Initiates a graceful shutdown.
    ///
    /// New RPCs are refused immediately. In-flight RPCs get up to
    /// `shutdown_timeout` seconds to finish, after which any result stream
    /// still being fed is cut off with `UNAVAILABLE`.
    pub async fn shutdown(&self) -> Result<(), Error> {
        // === Phase 0: Stop accepting new requests ===
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.shutting_down.store(true, Ordering::Release);

        // === Phase 1: Wait for in-flight RPCs to drain ===
        #[cfg(feature = "tracing")]
        tracing::info!("Draining in-flight RPCs ({} active)", self.inflight());
        let drain_result = timeout(Duration::from_secs(self.config.shutdown_timeout), async {
            while self.inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight RPCs drained successfully");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} RPCs still active)",
                    self.inflight()
                );
            }
        }

        // === Phase 2: Cancel any remaining work ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling remaining streams via shutdown token");
        self.shutdown_token.cancel();

        Ok(())
    }
}

#[tonic::async_trait]
impl DisciplineService for DisciplineServer {
    type GetVariableDefinitionsStream = MessageStream<VariableMetaData>;
    type GetPartialDefinitionsStream = MessageStream<PartialsMetaData>;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn get_info(
        &self,
        _req: Request<Empty>,
    ) -> Result<Response<DisciplineProperties>, Status> {
        let _guard = self.begin("get_info")?;
        let session = self.session.lock().await;
        Ok(Response::new(session.properties()))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(num_double = req.get_ref().num_double)))]
    async fn set_stream_options(
        &self,
        req: Request<WireStreamOptions>,
    ) -> Result<Response<Empty>, Status> {
        let mut guard = self.begin("set_stream_options")?;
        let options = StreamOptions::try_from(req.into_inner()).map_err(|e| guard.fail(e))?;
        self.session.lock().await.set_stream_options(options);
        Ok(Response::new(Empty {}))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn set_options(
        &self,
        req: Request<DisciplineOptions>,
    ) -> Result<Response<Empty>, Status> {
        let mut guard = self.begin("set_options")?;
        let options: Options = req.into_inner().options.into_iter().collect();
        #[cfg(feature = "tracing")]
        tracing::info!("Initializing discipline with {} options", options.len());
        let mut session = self.session.lock().await;
        session.set_options(&options).map_err(|e| guard.fail(e))?;
        Ok(Response::new(Empty {}))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn setup(&self, _req: Request<Empty>) -> Result<Response<Empty>, Status> {
        let mut guard = self.begin("setup")?;
        let mut session = self.session.lock().await;
        session.setup().map_err(|e| guard.fail(e))?;
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Discipline set up with {} variables and {} partials",
            session.metadata().variables().len(),
            session.metadata().partials().len()
        );
        Ok(Response::new(Empty {}))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn get_variable_definitions(
        &self,
        _req: Request<Empty>,
    ) -> Result<Response<Self::GetVariableDefinitionsStream>, Status> {
        let _guard = self.begin("get_variable_definitions")?;
        let definitions: Vec<VariableMetaData> = {
            let session = self.session.lock().await;
            session
                .metadata()
                .variables()
                .iter()
                .map(VariableMetaData::from)
                .collect()
        };
        let stream = tokio_stream::iter(definitions.into_iter().map(Ok));
        Ok(Response::new(Box::pin(stream)))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn get_partial_definitions(
        &self,
        _req: Request<Empty>,
    ) -> Result<Response<Self::GetPartialDefinitionsStream>, Status> {
        let _guard = self.begin("get_partial_definitions")?;
        let definitions: Vec<PartialsMetaData> = {
            let session = self.session.lock().await;
            session
                .metadata()
                .partials()
                .iter()
                .map(PartialsMetaData::from)
                .collect()
        };
        let stream = tokio_stream::iter(definitions.into_iter().map(Ok));
        Ok(Response::new(Box::pin(stream)))
    }
}
