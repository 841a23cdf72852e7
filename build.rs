fn main() {
    protobuf_codegen::Codegen::new()
        .pure()
        .includes(["proto"])
        .input("proto/cast_channel.proto")
        .cargo_out_dir("protos")
        .run_from_script();
}
