//! Build script for metallic-proto
//!
//! Compiles the agent protobuf definitions using tonic-prost-build.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = "../../proto";

    let protos = [
        "agent.proto",
        "filesystem.proto",
        "terminal.proto",
        "browser.proto",
    ];

    let proto_paths: Vec<_> = protos
        .iter()
        .map(|p| format!("{proto_root}/{p}"))
        .collect();

    // Servers are generated for in-process test doubles of the agent.
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&proto_paths, &[proto_root.to_string()])?;

    Ok(())
}
