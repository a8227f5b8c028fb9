use crate::disciplines::ExampleDiscipline;
use anyhow::bail;
use clap::Parser;
use philote_tonic_core::{DEFAULT_NUM_DOUBLE, StreamOptions};

/// Runtime configuration for the `philote-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first), with defaults suitable for local use.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "philote-server",
    version,
    about = "A gRPC server hosting an analysis discipline"
)]
pub struct CliArgs {
    /// Example discipline to serve.
    ///
    /// Environment variable: `DISCIPLINE`
    #[arg(long, env = "DISCIPLINE", value_enum, default_value_t = ExampleDiscipline::Paraboloid)]
    pub discipline: ExampleDiscipline,

    /// Maximum number of doubles per outgoing chunk.
    ///
    /// This is the server's own chunk size; clients negotiate theirs through
    /// `SetStreamOptions`, which replaces this value for the session.
    ///
    /// Environment variable: `NUM_DOUBLE`
    #[arg(long, env = "NUM_DOUBLE", default_value_t = DEFAULT_NUM_DOUBLE)]
    pub num_double: usize,

    /// Capacity of the response buffer between the chunk feeder and the gRPC
    /// stream.
    ///
    /// Lower values increase backpressure responsiveness; higher values enable
    /// deeper pipelining.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for in-flight RPCs to drain on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/philote.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub discipline: ExampleDiscipline,
    pub stream_options: StreamOptions,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: u64,
    pub server_addr: String,
    pub uds: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            discipline: ExampleDiscipline::default(),
            stream_options: StreamOptions::default(),
            stream_buffer_size: 8,
            shutdown_timeout: 5,
            server_addr: String::from("0.0.0.0:50051"),
            uds: false,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_double == 0 {
            bail!("NUM_DOUBLE must be greater than 0");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        Ok(Self {
            discipline: args.discipline,
            stream_options: StreamOptions::new(args.num_double)?,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: args.shutdown_timeout,
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}
