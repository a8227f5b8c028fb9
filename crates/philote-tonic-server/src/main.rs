use clap::Parser;
use futures::Stream;
use philote_tonic_core::{
    Kind,
    proto::{
        FILE_DESCRIPTOR_SET, discipline_service_server::DisciplineServiceServer,
        explicit_service_server::ExplicitServiceServer,
        implicit_service_server::ImplicitServiceServer,
    },
};
use philote_tonic_server::server::{
    config::{CliArgs, ServerConfig},
    service::{
        DisciplineServer, build_discipline_service, build_explicit_service, build_implicit_service,
    },
    telemetry::{TelemetryProviders, init_telemetry},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Server, server::Connected};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &config);
            let res = run_server_with_incoming(providers, incoming, config).await;
            // A panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &config);
        run_server_with_incoming(providers, incoming, config).await
    }
}

async fn run_server_with_incoming<I, IO, IE>(
    providers: TelemetryProviders,
    incoming: I,
    config: ServerConfig,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let service = DisciplineServer::new(config.discipline.build(), config.clone())?;

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    set_health(&health_reporter, Some(service.kind())).await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    // Both evaluation services are mounted; the one that does not match the
    // hosted discipline answers UNIMPLEMENTED.
    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service.clone())
        .add_service(reflection)
        .add_service(build_discipline_service(service.clone()))
        .add_service(build_explicit_service(service.clone()))
        .add_service(build_implicit_service(service.clone()))
        .serve_with_incoming_shutdown(
            incoming,
            shutdown_signal(service, health_reporter, providers),
        )
        .await?;

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");
    Ok(())
}

/// Publishes health for the three services. `None` marks all of them as not
/// serving.
async fn set_health(reporter: &HealthReporter, kind: Option<Kind>) {
    match kind {
        Some(kind) => {
            reporter
                .set_serving::<DisciplineServiceServer<DisciplineServer>>()
                .await;
            if kind == Kind::Explicit {
                reporter
                    .set_serving::<ExplicitServiceServer<DisciplineServer>>()
                    .await;
                reporter
                    .set_not_serving::<ImplicitServiceServer<DisciplineServer>>()
                    .await;
            } else {
                reporter
                    .set_not_serving::<ExplicitServiceServer<DisciplineServer>>()
                    .await;
                reporter
                    .set_serving::<ImplicitServiceServer<DisciplineServer>>()
                    .await;
            }
        }
        None => {
            reporter
                .set_not_serving::<DisciplineServiceServer<DisciplineServer>>()
                .await;
            reporter
                .set_not_serving::<ExplicitServiceServer<DisciplineServer>>()
                .await;
            reporter
                .set_not_serving::<ImplicitServiceServer<DisciplineServer>>()
                .await;
        }
    }
}

fn log_startup_info(_addr: &str, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting discipline server on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting {:?} discipline server on {} (num_double = {})",
            _config.discipline,
            _addr,
            _config.stream_options.num_double
        );
    }
}

async fn shutdown_signal(
    service: DisciplineServer,
    health_reporter: HealthReporter,
    providers: TelemetryProviders,
) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {}", _e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {}", _e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    set_health(&health_reporter, None).await;

    // 2. Drain in-flight RPCs
    if let Err(_e) = service.shutdown().await {
        #[cfg(feature = "tracing")]
        tracing::error!("Error during service shutdown: {:?}", _e);
    }

    // 3. Flush exporters
    providers.shutdown();
}
