use super::{ChunkStream, handler::DisciplineServer};
use crate::server::streaming::outbound::Payload;
use philote_tonic_core::{
    Kind, Role,
    proto::{ArrayChunk, explicit_service_server::ExplicitService},
};
use tonic::{Request, Response, Status, Streaming};

#[tonic::async_trait]
impl ExplicitService for DisciplineServer {
    type ComputeFunctionStream = ChunkStream;
    type ComputeGradientStream = ChunkStream;

    /// Reassembles the inputs, runs `compute` and streams every output back.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn compute_function(
        &self,
        req: Request<Streaming<ArrayChunk>>,
    ) -> Result<Response<Self::ComputeFunctionStream>, Status> {
        self.evaluate("compute_function", Kind::Explicit, req.into_inner(), |session, received| {
            Ok(Payload::Arrays {
                arrays: session.compute_function(&received.inputs)?,
                role: Role::Output,
            })
        })
        .await
    }

    /// Reassembles the inputs, runs `compute_partials` and streams every
    /// declared Jacobian block back.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn compute_gradient(
        &self,
        req: Request<Streaming<ArrayChunk>>,
    ) -> Result<Response<Self::ComputeGradientStream>, Status> {
        self.evaluate("compute_gradient", Kind::Explicit, req.into_inner(), |session, received| {
            Ok(Payload::Partials(
                session.compute_gradient(&received.inputs)?,
            ))
        })
        .await
    }
}
