use crate::{
    message::CastMessage,
    Result,
    types::{AppId, EndpointId, MediaSessionId,
            MessageType, MessageTypeConst,
            NamespaceConst, SessionId},
    util::named,
};
use anyhow::bail;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{
    fmt::{self, Debug, Display},
    sync::atomic::{AtomicI32, Ordering},
};

/// i32 that represents a request_id in the Cast protocol.
///
/// Zero is only used in broadcast messages with no corresponding request.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
         Serialize)]
#[serde(transparent)]
pub struct RequestId(i32);

/// Issues request ids for one controller.
///
/// The first id taken after construction or `reset()` is 1; 0 is never returned.
#[derive(Debug)]
pub struct RequestIdGen(AtomicI32);

impl RequestId {
    pub const BROADCAST: RequestId = RequestId(Self::BROADCAST_I32);
    const BROADCAST_I32: i32 = 0;
}

impl RequestIdGen {
    /// Some broadcasts have `request_id` 0, so skip that.
    const INITIAL_I32: i32 = RequestId::BROADCAST_I32 + 1;
}

/// JSON envelope shared by every message on the JSON namespaces.
///
/// `requestId` is omitted from the serialized form when `None`.
#[skip_serializing_none]
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload<T>
{
    pub request_id: Option<RequestId>,

    #[serde(rename = "type")]
    pub typ: MessageType,

    #[serde(flatten)]
    pub inner: T,
}

pub type PayloadDyn = Payload<serde_json::Value>;

pub trait RequestInner: Debug + Serialize
{
    const CHANNEL_NAMESPACE: NamespaceConst;
    const TYPE_NAME: MessageTypeConst;
}

impl RequestId {
    pub fn inner(self) -> i32 {
        self.0
    }

    fn rpc_id_from(n: i32) -> RequestId {
        let id = RequestId(n);

        debug_assert!(id.is_rpc(), "RequestId::rpc_id_from: was broadcast = {id}");

        id
    }

    pub fn is_broadcast(self) -> bool {
        self == RequestId::BROADCAST
    }

    pub fn is_rpc(self) -> bool {
        self != RequestId::BROADCAST
    }
}

impl From<RequestId> for i32 {
    fn from(id: RequestId) -> i32 {
        id.0
    }
}

impl From<i32> for RequestId {
    fn from(n: i32) -> RequestId {
        RequestId(n)
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl RequestIdGen {
    pub fn new() -> RequestIdGen {
        RequestIdGen(AtomicI32::new(Self::INITIAL_I32))
    }

    pub fn take_next(&self) -> RequestId {
        loop {
            let id = self.0.fetch_add(1, Ordering::SeqCst);
            if id == RequestId::BROADCAST_I32 {
                // Receivers use 0 for broadcast messages, take the next value.
                continue;
            }

            return RequestId::rpc_id_from(id);
        }
    }

    /// The next id taken will be 1 again.
    pub fn reset(&self) {
        self.0.store(Self::INITIAL_I32, Ordering::SeqCst);
    }
}

impl Default for RequestIdGen {
    fn default() -> RequestIdGen {
        RequestIdGen::new()
    }
}

impl<T: RequestInner> Payload<T> {
    pub fn new(request_id: Option<RequestId>, inner: T) -> Payload<T> {
        Payload {
            request_id,
            typ: T::TYPE_NAME.to_string(),
            inner,
        }
    }
}

impl PayloadDyn {
    /// Parse the envelope of an inbound JSON payload, keeping the whole object as `inner`.
    pub fn from_json(json: &str) -> Result<PayloadDyn> {
        let inner: serde_json::Value = serde_json::from_str(json)?;
        let envelope: Payload<()> = serde_json::from_value(inner.clone())?;

        Ok(PayloadDyn {
            request_id: envelope.request_id,
            typ: envelope.typ,
            inner,
        })
    }

    /// Parse the JSON payload of `msg`. Binary payloads are an error.
    pub fn from_message(msg: &CastMessage) -> Result<PayloadDyn> {
        let Some(json) = msg.payload_str() else {
            bail!("PayloadDyn::from_message: binary payload on namespace {ns}",
                  ns = msg.namespace);
        };

        Self::from_json(json)
    }

    /// Deserialize the whole payload object as `T`.
    pub fn typed<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.inner)?)
    }

    /// The request id, treating a missing id as the broadcast id.
    pub fn request_id_or_broadcast(&self) -> RequestId {
        self.request_id.unwrap_or(RequestId::BROADCAST)
    }
}

/// Build a `CastMessage` carrying `req` as its JSON payload.
#[named]
pub fn request_message<Req>(req: Req, request_id: Option<RequestId>,
                            source: EndpointId, destination: EndpointId)
-> Result<CastMessage>
where Req: RequestInner
{
    const FUNCTION_PATH: &str = function_path!();

    let payload = Payload::<Req>::new(request_id, req);
    let request_namespace = Req::CHANNEL_NAMESPACE;

    let payload_json = serde_json::to_string(&payload)?;

    tracing::trace!(target: FUNCTION_PATH,
                    payload_json,
                    request_id = ?payload.request_id,
                    request_type = payload.typ,
                    request_namespace,
                    source, destination,
                    "payload json");

    Ok(CastMessage {
        namespace: request_namespace.to_string(),
        source,
        destination,
        payload: payload_json.into(),
    })
}

pub mod connection {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.tp.connection";

    pub const MESSAGE_TYPE_CONNECT: MessageTypeConst = "CONNECT";
    pub const MESSAGE_TYPE_CLOSE: MessageTypeConst = "CLOSE";

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ConnectRequest {}

    impl RequestInner for ConnectRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_CONNECT;
    }
}

pub mod heartbeat {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.tp.heartbeat";

    pub const MESSAGE_TYPE_PING: MessageTypeConst = "PING";
    pub const MESSAGE_TYPE_PONG: MessageTypeConst = "PONG";

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Pong {}

    impl RequestInner for Pong {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_PONG;
    }
}

pub mod receiver {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.receiver";

    pub const MESSAGE_REQUEST_TYPE_LAUNCH: MessageTypeConst = "LAUNCH";
    pub const MESSAGE_REQUEST_TYPE_STOP: MessageTypeConst = "STOP";
    pub const MESSAGE_REQUEST_TYPE_GET_STATUS: MessageTypeConst = "GET_STATUS";
    pub const MESSAGE_REQUEST_TYPE_SET_VOLUME: MessageTypeConst = "SET_VOLUME";

    pub const MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS: MessageTypeConst = "RECEIVER_STATUS";
    pub const MESSAGE_RESPONSE_TYPE_LAUNCH_ERROR: MessageTypeConst = "LAUNCH_ERROR";
    pub const MESSAGE_RESPONSE_TYPE_INVALID_REQUEST: MessageTypeConst = "INVALID_REQUEST";

    /// Inbound `RECEIVER_STATUS` body. Every field may be absent.
    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StatusWrapper {
        pub status: Option<Status>,
    }

    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Status {
        pub applications: Option<Vec<Application>>,

        /// Volume parameters of the cast device.
        pub volume: Option<Volume>,
    }

    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Application {
        pub app_id: Option<AppId>,
        pub session_id: Option<SessionId>,
        pub transport_id: Option<EndpointId>,
        pub display_name: Option<String>,
        pub status_text: Option<String>,
    }

    /// Cast device volume, used both in status and in `SET_VOLUME`.
    #[skip_serializing_none]
    #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Volume {
        /// Volume level.
        pub level: Option<f64>,
        /// Mute/unmute state.
        pub muted: Option<bool>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusRequest {}

    impl RequestInner for GetStatusRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_STATUS;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LaunchRequest {
        pub app_id: AppId,
    }

    impl RequestInner for LaunchRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_LAUNCH;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StopRequest {
        pub session_id: SessionId,
    }

    impl RequestInner for StopRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_STOP;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SetVolumeRequest {
        pub volume: Volume,
    }

    impl RequestInner for SetVolumeRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SET_VOLUME;
    }
}

pub mod media {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.media";

    pub const MESSAGE_REQUEST_TYPE_GET_STATUS: MessageTypeConst = "GET_STATUS";
    pub const MESSAGE_REQUEST_TYPE_LOAD: MessageTypeConst = "LOAD";
    pub const MESSAGE_REQUEST_TYPE_PLAY: MessageTypeConst = "PLAY";
    pub const MESSAGE_REQUEST_TYPE_PAUSE: MessageTypeConst = "PAUSE";
    pub const MESSAGE_REQUEST_TYPE_SEEK: MessageTypeConst = "SEEK";

    pub const MESSAGE_RESPONSE_TYPE_MEDIA_STATUS: MessageTypeConst = "MEDIA_STATUS";
    pub const MESSAGE_RESPONSE_TYPE_ERROR: MessageTypeConst = "ERROR";
    pub const MESSAGE_RESPONSE_TYPE_LOAD_CANCELLED: MessageTypeConst = "LOAD_CANCELLED";
    pub const MESSAGE_RESPONSE_TYPE_LOAD_FAILED: MessageTypeConst = "LOAD_FAILED";
    pub const MESSAGE_RESPONSE_TYPE_INVALID_PLAYER_STATE: MessageTypeConst
        = "INVALID_PLAYER_STATE";
    pub const MESSAGE_RESPONSE_TYPE_INVALID_REQUEST: MessageTypeConst = "INVALID_REQUEST";

    pub const STREAM_TYPE_NONE: &str = "NONE";

    /// Inbound `MEDIA_STATUS` body.
    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Status {
        #[serde(default)]
        pub status: Vec<StatusEntry>,
    }

    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StatusEntry {
        pub media_session_id: Option<MediaSessionId>,
        pub player_state: Option<String>,
        pub idle_reason: Option<String>,
        pub current_time: Option<f64>,
        pub media: Option<StatusMedia>,
        pub live_seekable_range: Option<LiveSeekableRange>,
    }

    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StatusMedia {
        pub content_id: Option<String>,
        pub duration: Option<f64>,
    }

    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LiveSeekableRange {
        pub start: Option<f64>,
        pub end: Option<f64>,
        pub is_live_done: Option<bool>,
    }

    /// Inbound `ERROR` body.
    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ErrorReply {
        pub detailed_error_code: Option<i32>,
        pub reason: Option<String>,
    }

    /// Body of the error replies to a rejected request, e.g. `LOAD_FAILED`.
    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RequestErrorReply {
        pub reason: Option<String>,
        pub custom_data: Option<serde_json::Value>,
    }

    #[derive(Clone, Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Media {
        pub content_id: String,
        pub stream_type: String,
        pub content_type: String,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LoadRequest {
        pub media: Media,
    }

    impl RequestInner for LoadRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_LOAD;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusRequest {}

    impl RequestInner for GetStatusRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_STATUS;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SeekRequest {
        pub media_session_id: MediaSessionId,
        pub current_time: f64,
    }

    impl RequestInner for SeekRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SEEK;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MediaRequestCommon {
        pub media_session_id: MediaSessionId,
    }

    macro_rules! simple_media_request {
        ($name: ident, $msg_type_name: path) => {
            #[derive(Debug, Serialize)]
            pub struct $name(pub MediaRequestCommon);

            impl RequestInner for $name {
                const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
                const TYPE_NAME: MessageTypeConst = $msg_type_name;
            }
        };
    }

    simple_media_request!(PlayRequest,  MESSAGE_REQUEST_TYPE_PLAY);
    simple_media_request!(PauseRequest, MESSAGE_REQUEST_TYPE_PAUSE);
}
