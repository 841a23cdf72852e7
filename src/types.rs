use serde::{Deserialize, Serialize};

pub type AppId = String;
pub type AppIdConst = &'static str;

/// Source or destination of a `CastMessage`, e.g. `"sender-0"`, `"receiver-0"`
/// or a launched application's transport id.
pub type EndpointId = String;
pub type EndpointIdConst = &'static str;

pub type MediaSessionId = i32;

pub type MessageType = String;
pub type MessageTypeConst = &'static str;

pub type Namespace = String;
pub type NamespaceConst = &'static str;

pub type SessionId = String;

/// Identity of a running receiver application instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AppSession {
    pub session_id: SessionId,

    /// Destination id for messages addressed to the application.
    pub transport_id: EndpointId,
}
