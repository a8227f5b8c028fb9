/// Builds the gRPC client and server code for the `philote.proto` definition
/// using `tonic-prost-build`.
///
/// This code generation step processes the Protocol Buffer definitions located
/// in the `proto` directory and emits Rust modules with gRPC bindings into the
/// crate's `OUT_DIR`, together with an encoded file descriptor set used by the
/// server for gRPC reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/philote.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/philote_descriptor.bin`
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
///
/// # Output
///
/// Generated code will be accessible in Rust via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("philote");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("philote_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    println!("cargo:rerun-if-changed=proto/philote.proto");

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/philote.proto"], &["proto"])
        .unwrap();
}
