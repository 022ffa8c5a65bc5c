//! Build script for sgx-proto
//!
//! Generates the kubelet device-plugin gRPC bindings during `cargo build`.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/api.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .type_attribute(".", "#[allow(missing_docs)]")
        .compile(&["proto/api.proto"], &["proto"])?;

    Ok(())
}
