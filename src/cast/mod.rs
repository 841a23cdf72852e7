//! Protobuf wire types, generated by `build.rs` from `proto/cast_channel.proto`.

include!(concat!(env!("OUT_DIR"), "/protos/mod.rs"));
