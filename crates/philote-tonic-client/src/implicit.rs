use crate::discipline::{ClientConfig, DisciplineClient, connect, recover_arrays, recover_partials};
use core::ops::{Deref, DerefMut};
use philote_tonic_core::{
    ArrayMap, Jacobian, Kind, Result, Role, proto::implicit_service_client::ImplicitServiceClient,
};
use tonic::transport::Channel;

/// Client for a server hosting an implicit discipline.
///
/// Every RPC sends the inputs followed by the current outputs. Dereferences to
/// [`DisciplineClient`] for the setup and metadata calls.
#[derive(Clone)]
pub struct ImplicitClient {
    discipline: DisciplineClient,
    stub: ImplicitServiceClient<Channel>,
}

impl ImplicitClient {
    pub async fn connect(addr: impl Into<String>, config: ClientConfig) -> Result<Self> {
        Ok(Self::new(connect(addr).await?, config))
    }

    pub fn new(channel: Channel, config: ClientConfig) -> Self {
        let mut stub = ImplicitServiceClient::new(channel.clone());
        if let Some(encoding) = config.compression {
            stub = stub.send_compressed(encoding).accept_compressed(encoding);
        }
        Self {
            discipline: DisciplineClient::new(channel, Kind::Implicit, config),
            stub,
        }
    }

    /// Runs `ComputeResiduals` and returns one buffer per residual.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn compute_residuals(
        &mut self,
        inputs: &ArrayMap,
        outputs: &ArrayMap,
    ) -> Result<ArrayMap> {
        let chunks = self.discipline.assemble_implicit_chunks(inputs, outputs);
        let response = self
            .stub
            .compute_residuals(tokio_stream::iter(chunks))
            .await?
            .into_inner();
        recover_arrays(response, self.discipline.metadata(), Role::Residual).await
    }

    /// Runs `SolveResiduals`. `guess` seeds the server's output buffers; pass
    /// an empty map to start from zeros.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn solve_residuals(&mut self, inputs: &ArrayMap, guess: &ArrayMap) -> Result<ArrayMap> {
        let chunks = self.discipline.assemble_implicit_chunks(inputs, guess);
        let response = self
            .stub
            .solve_residuals(tokio_stream::iter(chunks))
            .await?
            .into_inner();
        recover_arrays(response, self.discipline.metadata(), Role::Output).await
    }

    /// Runs `ComputeResidualGradients` and returns one block per declared
    /// partial.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn residual_gradients(
        &mut self,
        inputs: &ArrayMap,
        outputs: &ArrayMap,
    ) -> Result<Jacobian> {
        let chunks = self.discipline.assemble_implicit_chunks(inputs, outputs);
        let response = self
            .stub
            .compute_residual_gradients(tokio_stream::iter(chunks))
            .await?
            .into_inner();
        recover_partials(response, self.discipline.metadata()).await
    }
}

impl Deref for ImplicitClient {
    type Target = DisciplineClient;

    fn deref(&self) -> &Self::Target {
        &self.discipline
    }
}

impl DerefMut for ImplicitClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.discipline
    }
}
