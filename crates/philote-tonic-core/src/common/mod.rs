pub mod array;
pub mod chunk;
pub mod error;
pub mod meta;
pub mod pair_map;
pub mod types;
pub mod wire;

pub use array::{Array, ArrayMap, Jacobian};
pub use error::{Error, Result};
pub use meta::{Kind, Metadata, PartialMeta, Role, VariableMeta};
pub use pair_map::PairMap;
pub use types::{DEFAULT_NUM_DOUBLE, Options, StreamOptions};

/// Generated protobuf types, gRPC clients and servers for the `philote`
/// package.
pub mod proto {
    tonic::include_proto!("philote");

    /// Encoded file descriptor set, registered with the reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("philote_descriptor");
}
