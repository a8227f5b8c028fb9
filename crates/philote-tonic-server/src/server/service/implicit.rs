use super::{ChunkStream, handler::DisciplineServer};
use crate::server::streaming::outbound::Payload;
use philote_tonic_core::{
    Kind, Role,
    proto::{ArrayChunk, implicit_service_server::ImplicitService},
};
use tonic::{Request, Response, Status, Streaming};

// Implicit RPCs accept output chunks alongside inputs: the outputs are the
// unknowns the residuals are evaluated at, or the initial guess for a solve.
#[tonic::async_trait]
impl ImplicitService for DisciplineServer {
    type ComputeResidualsStream = ChunkStream;
    type SolveResidualsStream = ChunkStream;
    type ComputeResidualGradientsStream = ChunkStream;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn compute_residuals(
        &self,
        req: Request<Streaming<ArrayChunk>>,
    ) -> Result<Response<Self::ComputeResidualsStream>, Status> {
        self.evaluate("compute_residuals", Kind::Implicit, req.into_inner(), |session, received| {
            Ok(Payload::Arrays {
                arrays: session.compute_residuals(&received.inputs, &received.outputs)?,
                role: Role::Residual,
            })
        })
        .await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn solve_residuals(
        &self,
        req: Request<Streaming<ArrayChunk>>,
    ) -> Result<Response<Self::SolveResidualsStream>, Status> {
        self.evaluate("solve_residuals", Kind::Implicit, req.into_inner(), |session, received| {
            Ok(Payload::Arrays {
                arrays: session.solve_residuals(&received.inputs, received.outputs)?,
                role: Role::Output,
            })
        })
        .await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn compute_residual_gradients(
        &self,
        req: Request<Streaming<ArrayChunk>>,
    ) -> Result<Response<Self::ComputeResidualGradientsStream>, Status> {
        self.evaluate(
            "compute_residual_gradients",
            Kind::Implicit,
            req.into_inner(),
            |session, received| {
                Ok(Payload::Partials(session.compute_residual_gradients(
                    &received.inputs,
                    &received.outputs,
                )?))
            },
        )
        .await
    }
}
