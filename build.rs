//! Build script for proto compilation.
//!
//! Compiles the Pulumi engine protocol definitions under `proto/pulumi` into
//! Rust types and tonic service stubs. The generated module is pulled in by
//! `src/lib.rs` through `tonic::include_proto!("pulumirpc")`.
//!
//! `protoc` and the well-known-type includes (`google/protobuf/*.proto`) come
//! from `protoc-bin-vendored`, so no system installation is required.

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    let well_known = protoc_bin_vendored::include_path()?;
    std::env::set_var("PROTOC", protoc);

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                PathBuf::from("proto/pulumi/plugin.proto"),
                PathBuf::from("proto/pulumi/provider.proto"),
                PathBuf::from("proto/pulumi/resource.proto"),
                PathBuf::from("proto/pulumi/engine.proto"),
            ],
            &[PathBuf::from("proto"), well_known],
        )?;

    println!("cargo:rerun-if-changed=proto");

    Ok(())
}
