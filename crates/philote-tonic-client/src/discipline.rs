//! Connection-level client shared by the explicit and implicit clients.
//!
//! [`DisciplineClient`] mirrors the server session: it negotiates stream
//! options, triggers `Setup`, and caches the variable and partial definitions
//! that tell it how to chunk requests and reassemble responses.

use futures::{Stream, StreamExt};
use philote_tonic_core::{
    ArrayMap, DEFAULT_NUM_DOUBLE, Error, Jacobian, Kind, Metadata, Options, PartialMeta, Result,
    Role, StreamOptions, VariableMeta,
    proto::{
        ArrayChunk, DisciplineOptions, DisciplineProperties, Empty,
        StreamOptions as WireStreamOptions,
        discipline_service_client::DisciplineServiceClient,
    },
    chunk::ChunkCursor,
    wire::{ChunkRole, encode_map, write_chunk, write_partial_chunk},
};
use tonic::{
    Status,
    codec::CompressionEncoding,
    transport::{Channel, Endpoint},
};

/// Client-side streaming configuration.
#[derive(Clone, Copy, Debug)]
pub struct ClientConfig {
    /// Maximum number of doubles per outgoing chunk. Sent to the server by
    /// [`DisciplineClient::send_stream_options`].
    pub num_double: usize,
    /// Compression applied to requests and accepted on responses.
    pub compression: Option<CompressionEncoding>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            num_double: DEFAULT_NUM_DOUBLE,
            compression: None,
        }
    }
}

/// Opens a channel to `addr` (e.g. `http://127.0.0.1:50051`).
pub(crate) async fn connect(addr: impl Into<String>) -> Result<Channel> {
    let endpoint = Endpoint::from_shared(addr.into())?;
    Ok(endpoint.connect().await?)
}

#[derive(Clone)]
pub struct DisciplineClient {
    stub: DisciplineServiceClient<Channel>,
    config: ClientConfig,
    properties: Option<DisciplineProperties>,
    meta: Metadata,
}

impl DisciplineClient {
    pub fn new(channel: Channel, kind: Kind, config: ClientConfig) -> Self {
        let mut stub = DisciplineServiceClient::new(channel);
        if let Some(encoding) = config.compression {
            stub = stub.send_compressed(encoding).accept_compressed(encoding);
        }
        Self {
            stub,
            config,
            properties: None,
            meta: Metadata::new(kind),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Definitions fetched so far. Empty until
    /// [`DisciplineClient::fetch_variable_definitions`] runs.
    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    /// Properties cached by the last [`DisciplineClient::get_discipline_info`].
    pub fn properties(&self) -> Option<&DisciplineProperties> {
        self.properties.as_ref()
    }

    pub async fn get_discipline_info(&mut self) -> Result<DisciplineProperties> {
        let properties = self.stub.get_info(Empty {}).await?.into_inner();
        self.properties = Some(properties.clone());
        Ok(properties)
    }

    /// Tells the server the chunk size this client sends with.
    pub async fn send_stream_options(&mut self) -> Result<()> {
        let options = StreamOptions::new(self.config.num_double)?;
        self.stub
            .set_stream_options(WireStreamOptions::from(options))
            .await?;
        Ok(())
    }

    /// Re-initializes the remote discipline. Cached definitions are dropped
    /// since the server discards its metadata too.
    pub async fn send_options(&mut self, options: &Options) -> Result<()> {
        let msg = DisciplineOptions {
            options: options.clone().into_iter().collect(),
        };
        self.stub.set_options(msg).await?;
        self.meta.clear();
        Ok(())
    }

    pub async fn run_setup(&mut self) -> Result<()> {
        self.stub.setup(Empty {}).await?;
        Ok(())
    }

    /// Replaces the cached variable definitions with the server's.
    pub async fn fetch_variable_definitions(&mut self) -> Result<()> {
        let mut stream = self
            .stub
            .get_variable_definitions(Empty {})
            .await?
            .into_inner();
        let mut variables = Vec::new();
        while let Some(msg) = stream.message().await? {
            variables.push(VariableMeta::try_from(msg)?);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("Fetched {} variable definitions", variables.len());
        let partials = self.meta.partials().to_vec();
        self.meta = Metadata::from_definitions(self.meta.kind(), variables, partials);
        Ok(())
    }

    /// Replaces the cached partial definitions with the server's.
    pub async fn fetch_partial_definitions(&mut self) -> Result<()> {
        let mut stream = self
            .stub
            .get_partial_definitions(Empty {})
            .await?
            .into_inner();
        let mut partials = Vec::new();
        while let Some(msg) = stream.message().await? {
            partials.push(PartialMeta::from(msg));
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("Fetched {} partial definitions", partials.len());
        let variables = self.meta.variables().to_vec();
        self.meta = Metadata::from_definitions(self.meta.kind(), variables, partials);
        Ok(())
    }

    /// Negotiates stream options, runs `Setup` and fetches every definition.
    pub async fn configure(&mut self) -> Result<()> {
        self.send_stream_options().await?;
        self.run_setup().await?;
        self.fetch_variable_definitions().await?;
        self.fetch_partial_definitions().await
    }

    /// Chunks `inputs` with this client's chunk size, in map order.
    pub fn assemble_input_chunks(&self, inputs: &ArrayMap) -> Vec<ArrayChunk> {
        encode_map(inputs, Role::Input, self.config.num_double)
    }

    /// Chunks `inputs` followed by `outputs`, for the implicit RPCs.
    pub fn assemble_implicit_chunks(&self, inputs: &ArrayMap, outputs: &ArrayMap) -> Vec<ArrayChunk> {
        let mut chunks = self.assemble_input_chunks(inputs);
        chunks.extend(encode_map(outputs, Role::Output, self.config.num_double));
        chunks
    }
}

/// Reassembles a response stream of `role` chunks into dense buffers
/// preallocated from `meta`.
///
/// # Errors
///
/// - [`Error::UnexpectedRole`] for a chunk of any other role.
/// - [`Error::UnknownVariable`] for a name missing from `meta`.
/// - The chunk validation errors of [`philote_tonic_core::chunk::scatter`],
///   including [`Error::EmptyChunk`].
/// - [`Error::ChunkOutOfOrder`] for a repeated or overlapping chunk, and
///   [`Error::IncompleteArray`] if the stream stops partway through an array.
/// - [`Error::Rpc`] if the stream fails before completion. No partial result
///   is returned.
pub async fn recover_arrays<S>(mut stream: S, meta: &Metadata, role: Role) -> Result<ArrayMap>
where
    S: Stream<Item = core::result::Result<ArrayChunk, Status>> + Unpin,
{
    let mut arrays = meta.allocate(role);
    let mut cursor = ChunkCursor::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        match ChunkRole::try_from(chunk.role)? {
            ChunkRole::Variable(r) if r == role => {
                write_chunk(&mut arrays, role, &mut cursor, &chunk)?;
            }
            other => {
                return Err(Error::UnexpectedRole {
                    name: chunk.name,
                    role: other.to_string(),
                });
            }
        }
    }
    cursor.finish()?;
    Ok(arrays)
}

/// Reassembles a stream of partial chunks into Jacobian blocks shaped from
/// `meta`.
///
/// # Errors
///
/// Same as [`recover_arrays`], with
/// [`Error::UndeclaredPartialVariable`] for an unknown `(name, subname)` pair.
pub async fn recover_partials<S>(mut stream: S, meta: &Metadata) -> Result<Jacobian>
where
    S: Stream<Item = core::result::Result<ArrayChunk, Status>> + Unpin,
{
    let mut jac = meta.allocate_jacobian()?;
    let mut cursor = ChunkCursor::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        match ChunkRole::try_from(chunk.role)? {
            ChunkRole::Partial => write_partial_chunk(&mut jac, &mut cursor, &chunk)?,
            other => {
                return Err(Error::UnexpectedRole {
                    name: chunk.name,
                    role: other.to_string(),
                });
            }
        }
    }
    cursor.finish()?;
    Ok(jac)
}
