#![allow(dead_code)]

use philote_tonic_core::StreamOptions;
use philote_tonic_server::{
    AnyDiscipline,
    server::{
        config::ServerConfig,
        service::{
            DisciplineServer, build_discipline_service, build_explicit_service,
            build_implicit_service,
        },
    },
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};

/// A server bound to an ephemeral localhost port.
pub struct TestServer {
    pub addr: String,
    pub service: DisciplineServer,
}

impl TestServer {
    pub async fn channel(&self) -> Channel {
        Channel::from_shared(self.addr.clone())
            .unwrap()
            .connect()
            .await
            .unwrap()
    }
}

/// Serves `discipline` with outgoing chunks of at most `num_double` values.
pub async fn spawn(discipline: AnyDiscipline, num_double: usize) -> TestServer {
    let config = ServerConfig {
        stream_options: StreamOptions::new(num_double).unwrap(),
        ..ServerConfig::default()
    };
    spawn_with(discipline, config).await
}

pub async fn spawn_with(discipline: AnyDiscipline, config: ServerConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());

    let service = DisciplineServer::new(discipline, config).unwrap();

    let svc = service.clone();
    tokio::spawn(async move {
        Server::builder()
            .add_service(build_discipline_service(svc.clone()))
            .add_service(build_explicit_service(svc.clone()))
            .add_service(build_implicit_service(svc))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    TestServer { addr, service }
}
