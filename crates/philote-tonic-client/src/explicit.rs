use crate::discipline::{ClientConfig, DisciplineClient, connect, recover_arrays, recover_partials};
use core::ops::{Deref, DerefMut};
use philote_tonic_core::{
    ArrayMap, Jacobian, Kind, Result, Role, proto::explicit_service_client::ExplicitServiceClient,
};
use tonic::transport::Channel;

/// Client for a server hosting an explicit discipline.
///
/// Dereferences to [`DisciplineClient`] for the setup and metadata calls.
///
/// ```no_run
/// # async fn run() -> philote_tonic_core::Result<()> {
/// use philote_tonic_client::{ClientConfig, ExplicitClient};
/// use philote_tonic_core::{Array, ArrayMap};
///
/// let mut client = ExplicitClient::connect("http://127.0.0.1:50051", ClientConfig::default()).await?;
/// client.configure().await?;
///
/// let inputs = ArrayMap::from_iter([("x", Array::scalar(1.0)), ("y", Array::scalar(2.0))]);
/// let outputs = client.compute(&inputs).await?;
/// println!("f = {}", outputs.scalar("f")?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ExplicitClient {
    discipline: DisciplineClient,
    stub: ExplicitServiceClient<Channel>,
}

impl ExplicitClient {
    pub async fn connect(addr: impl Into<String>, config: ClientConfig) -> Result<Self> {
        Ok(Self::new(connect(addr).await?, config))
    }

    pub fn new(channel: Channel, config: ClientConfig) -> Self {
        let mut stub = ExplicitServiceClient::new(channel.clone());
        if let Some(encoding) = config.compression {
            stub = stub.send_compressed(encoding).accept_compressed(encoding);
        }
        Self {
            discipline: DisciplineClient::new(channel, Kind::Explicit, config),
            stub,
        }
    }

    /// Runs `ComputeFunction` and returns one dense buffer per declared output.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn compute(&mut self, inputs: &ArrayMap) -> Result<ArrayMap> {
        let chunks = self.discipline.assemble_input_chunks(inputs);
        let response = self
            .stub
            .compute_function(tokio_stream::iter(chunks))
            .await?
            .into_inner();
        recover_arrays(response, self.discipline.metadata(), Role::Output).await
    }

    /// Runs `ComputeGradient` and returns one block per declared partial.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn compute_partials(&mut self, inputs: &ArrayMap) -> Result<Jacobian> {
        let chunks = self.discipline.assemble_input_chunks(inputs);
        let response = self
            .stub
            .compute_gradient(tokio_stream::iter(chunks))
            .await?
            .into_inner();
        recover_partials(response, self.discipline.metadata()).await
    }
}

impl Deref for ExplicitClient {
    type Target = DisciplineClient;

    fn deref(&self) -> &Self::Target {
        &self.discipline
    }
}

impl DerefMut for ExplicitClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.discipline
    }
}
