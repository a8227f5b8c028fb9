//! Error types for the discipline streaming protocol.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable and reportable failure on either side of a discipline
//! connection. It implements `From<Error>` for `tonic::Status` so that server
//! handlers can propagate failures with `?`, and `From<tonic::Status>` so that
//! clients surface remote failures through the same type.
//!
//! ## Error Categories
//!
//! - *Protocol*: malformed or out-of-range chunks, chunks naming undeclared
//!   variables, empty payloads. The RPC is aborted before the discipline runs
//!   and can be retried as a whole.
//! - *Configuration*: partials naming undeclared variables, duplicate or
//!   malformed declarations, hooks the discipline does not implement. Fatal
//!   for the RPC until the discipline is fixed.
//! - *Transport*: channel failures, disconnects and shutdown. No partial
//!   results are ever returned.

use crate::meta::Role;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for discipline servers and clients.
#[derive(Clone, thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// A chunk or result referenced a variable that was never declared.
    #[error("Unknown {role} variable `{name}`")]
    UnknownVariable { name: String, role: Role },

    /// A chunk carried a role that the receiving RPC does not accept.
    #[error("Unexpected {role} chunk for `{name}`")]
    UnexpectedRole { name: String, role: String },

    /// The wire role value does not map to a known role.
    #[error("Invalid variable role value {value}")]
    InvalidRole { value: i32 },

    /// A chunk for a declared range carried no values.
    #[error("Empty data in chunk for `{name}`")]
    EmptyChunk { name: String },

    /// The chunk range `[start, end)` does not fit the target buffer.
    #[error("Chunk [{start}, {end}) is out of bounds for `{name}` (size {size})")]
    ChunkOutOfBounds {
        name: String,
        start: u64,
        end: u64,
        size: usize,
    },

    /// The number of values does not equal `end - start`.
    #[error("Chunk for `{name}` carries {actual} values, expected {expected}")]
    ChunkLengthMismatch {
        name: String,
        expected: u64,
        actual: usize,
    },

    /// A chunk does not start where the previous chunk of the same array
    /// ended. Covers repeated, overlapping and reordered chunks.
    #[error("Chunk for `{name}` starts at {start}, expected {expected}")]
    ChunkOutOfOrder {
        name: String,
        start: u64,
        expected: u64,
    },

    /// The stream ended before every element of a started array arrived.
    #[error("Stream ended after {received} of {size} values for `{name}`")]
    IncompleteArray {
        name: String,
        received: u64,
        size: usize,
    },

    /// Stream options were rejected.
    #[error("Invalid stream options: {reason}")]
    InvalidStreamOptions { reason: String },

    /// A variable with the same name and role was declared twice.
    #[error("Variable `{name}` already declared as {role}")]
    DuplicateVariable { name: String, role: Role },

    /// A partial names a variable that is not declared.
    #[error("Partial d({of})/d({wrt}) references undeclared variable `{missing}`")]
    UndeclaredPartialVariable {
        of: String,
        wrt: String,
        missing: String,
    },

    /// A declared shape is empty or has a zero-sized dimension.
    #[error("Invalid shape {shape:?} for `{name}`")]
    InvalidShape { name: String, shape: Vec<usize> },

    /// A buffer produced by the discipline has the wrong size.
    #[error("`{name}` has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A discipline option is missing or out of range.
    #[error("Invalid option `{name}`: {reason}")]
    InvalidOption { name: String, reason: String },

    /// An evaluation was requested before `Setup`.
    #[error("Discipline is not set up")]
    NotConfigured,

    /// The discipline was reconfigured while an evaluation was receiving
    /// its inputs.
    #[error("Discipline was reconfigured during the request")]
    MetadataChanged,

    /// The discipline does not implement the requested hook.
    #[error("`{hook}` is not implemented by this discipline")]
    NotImplemented { hook: &'static str },

    /// An explicit RPC was issued against an implicit discipline or vice versa.
    #[error("Discipline is not {expected}")]
    WrongDisciplineKind { expected: &'static str },

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// The remote side failed the RPC.
    #[error("RPC failed ({code:?}): {message}")]
    Rpc { code: Code, message: String },

    /// The client could not reach the server.
    #[error("Failed to connect: {reason}")]
    Connect { reason: String },
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::UnknownVariable { .. }
            | Error::UnexpectedRole { .. }
            | Error::InvalidRole { .. }
            | Error::EmptyChunk { .. }
            | Error::ChunkLengthMismatch { .. }
            | Error::ChunkOutOfOrder { .. }
            | Error::IncompleteArray { .. }
            | Error::InvalidStreamOptions { .. }
            | Error::InvalidOption { .. } => Status::invalid_argument(message),
            Error::ChunkOutOfBounds { .. } => Status::out_of_range(message),
            Error::DuplicateVariable { .. }
            | Error::UndeclaredPartialVariable { .. }
            | Error::InvalidShape { .. }
            | Error::ShapeMismatch { .. }
            | Error::NotConfigured => Status::failed_precondition(message),
            Error::NotImplemented { .. } | Error::WrongDisciplineKind { .. } => {
                Status::unimplemented(message)
            }
            Error::MetadataChanged => Status::aborted(message),
            Error::ChannelError { .. } => Status::internal(message),
            Error::ServiceShutdown | Error::Connect { .. } => Status::unavailable(message),
            Error::Rpc { code, message } => Status::new(code, message),
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Rpc {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Connect {
            reason: err.to_string(),
        }
    }
}
