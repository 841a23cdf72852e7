//! Length-prefixed protobuf framing for `CastMessage`s.
//!
//! Each frame is a big endian `u32` length followed by that many bytes of a serialized
//! `extensions.api.cast_channel.CastMessage`.

use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};
use crate::{
    cast::cast_channel::{
        self as proto,
        cast_message::{PayloadType, ProtocolVersion},
    },
    Error,
    message::{CastMessage, CastMessagePayload},
    Result,
};
use protobuf::Message;
use tokio_util::codec;

const SIZE_OF_U32: usize = 4;

/// Largest frame body accepted from or written to a device.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, Default)]
pub struct CastMessageCodec;

impl codec::Encoder<CastMessage> for CastMessageCodec {
    type Error = Error;

    fn encode(
        &mut self,
        msg: CastMessage,
        dst: &mut BytesMut
    ) -> Result<()>
    {
        let mut proto_msg = proto::CastMessage::new();

        proto_msg.set_protocol_version(ProtocolVersion::CASTV2_1_0);

        proto_msg.set_namespace(msg.namespace);
        proto_msg.set_source_id(msg.source);
        proto_msg.set_destination_id(msg.destination);

        match msg.payload {
            CastMessagePayload::String(s) => {
                proto_msg.set_payload_type(PayloadType::STRING);
                proto_msg.set_payload_utf8(s);
            },

            CastMessagePayload::Binary(b) => {
                proto_msg.set_payload_type(PayloadType::BINARY);
                proto_msg.set_payload_binary(b);
            },
        };

        let proto_bytes = proto_msg.write_to_bytes()?;
        let proto_len = proto_bytes.len();

        if proto_len > MAX_FRAME_LEN {
            bail!("CastMessageCodec::encode: message too large\n\
                   _ proto_len     = {proto_len}\n\
                   _ MAX_FRAME_LEN = {MAX_FRAME_LEN}");
        }

        let proto_len_u32: u32 = proto_len.try_into()?;

        dst.reserve(SIZE_OF_U32 + proto_len);

        // Uses big endian
        dst.put_u32(proto_len_u32);
        dst.extend_from_slice(&proto_bytes);

        Ok(())
    }
}

impl codec::Decoder for CastMessageCodec {
    type Item = CastMessage;
    type Error = Error;

    fn decode(
        &mut self,
        src: &mut BytesMut
    ) -> Result<Option<CastMessage>>
    {
        if src.len() < SIZE_OF_U32 {
            return Ok(None);
        }

        let mut proto_len_bytes = [0_u8; SIZE_OF_U32];
        proto_len_bytes.copy_from_slice(&src[0..SIZE_OF_U32]);
        let proto_len = usize::try_from(u32::from_be_bytes(proto_len_bytes))?;

        if proto_len > MAX_FRAME_LEN {
            bail!("CastMessageCodec::decode: frame length over limit\n\
                   _ proto_len     = {proto_len}\n\
                   _ MAX_FRAME_LEN = {MAX_FRAME_LEN}");
        }

        let total_len: usize = proto_len + SIZE_OF_U32;

        let src_len = src.len();

        if src_len < total_len {
            src.reserve(total_len - src_len);
            return Ok(None);
        }

        let mut proto_msg = proto::CastMessage::parse_from_bytes(&src[SIZE_OF_U32..total_len])?;

        src.advance(total_len);

        let msg = CastMessage {
            namespace: proto_msg.take_namespace(),
            source: proto_msg.take_source_id(),
            destination: proto_msg.take_destination_id(),
            payload: match proto_msg.payload_type() {
                PayloadType::STRING =>
                    CastMessagePayload::String(proto_msg.take_payload_utf8()),
                PayloadType::BINARY =>
                    CastMessagePayload::Binary(proto_msg.take_payload_binary()),
            },
        };

        Ok(Some(msg))
    }
}
