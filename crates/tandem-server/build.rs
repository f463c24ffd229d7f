fn main() {
    println!("cargo::rerun-if-changed=../../tandem.capnp");
    capnpc::CompilerCommand::new()
        .src_prefix("../../")
        .file("../../tandem.capnp")
        .run()
        .expect("Failed to compile Cap'n Proto schema");
}
