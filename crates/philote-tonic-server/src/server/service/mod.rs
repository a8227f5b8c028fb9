//! gRPC service implementation and stream coordination logic.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point ([`DisciplineServer`]) and the
//!   shared `DisciplineService` RPCs.
//! - [`explicit`] - `ComputeFunction` and `ComputeGradient`.
//! - [`implicit`] - `ComputeResiduals`, `SolveResiduals` and
//!   `ComputeResidualGradients`.
//!
//! All three services are served by the same [`DisciplineServer`]; the RPCs of
//! the variant that does not match the hosted discipline fail with
//! `UNIMPLEMENTED`.

pub mod explicit;
pub mod handler;
pub mod implicit;

pub use handler::DisciplineServer;

use core::pin::Pin;
use philote_tonic_core::proto::{
    ArrayChunk, discipline_service_server::DisciplineServiceServer,
    explicit_service_server::ExplicitServiceServer, implicit_service_server::ImplicitServiceServer,
};
use tokio_stream::Stream;
use tonic::{Status, codec::CompressionEncoding};

/// Boxed server-streaming response.
pub type MessageStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Boxed stream of result chunks.
pub type ChunkStream = MessageStream<ArrayChunk>;

/// Applies the compression encodings every service accepts and sends.
macro_rules! with_compression {
    ($svc:expr) => {
        $svc.send_compressed(CompressionEncoding::Zstd)
            .send_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Deflate)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Deflate)
    };
}

pub fn build_discipline_service(
    server: DisciplineServer,
) -> DisciplineServiceServer<DisciplineServer> {
    with_compression!(DisciplineServiceServer::new(server))
}

pub fn build_explicit_service(server: DisciplineServer) -> ExplicitServiceServer<DisciplineServer> {
    with_compression!(ExplicitServiceServer::new(server))
}

pub fn build_implicit_service(server: DisciplineServer) -> ImplicitServiceServer<DisciplineServer> {
    with_compression!(ImplicitServiceServer::new(server))
}
