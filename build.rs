fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/flowobserver/flowobserver.proto");

    if std::env::var("CARGO_FEATURE_OBSERVER").is_ok() {
        tonic_build::configure()
            .build_server(false)
            .build_client(true)
            .compile_protos(&["proto/flowobserver/flowobserver.proto"], &["proto"])?;
    }
    Ok(())
}
