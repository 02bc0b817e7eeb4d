fn main() {
    println!("cargo:rerun-if-changed=proto/common.proto");
    println!("cargo:rerun-if-changed=proto/runtime.proto");

    let prost_build = prost_build::Config::new();

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_well_known_types(true)
        .extern_path(".google.protobuf", "::prost_types")
        .compile_protos_with_config(prost_build, &["proto/runtime.proto"], &["proto/"])
        .expect("failed to compile runtime.proto");
}
