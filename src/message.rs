use crate::types::{EndpointId, Namespace};
use std::fmt::{self, Debug};

/// Longest prefix of a JSON payload shown by `Debug`.
const DEBUG_PREVIEW_LEN: usize = 120;

#[derive(Clone, Eq, PartialEq)]
pub enum CastMessagePayload {
    /// JSON text; every namespace this crate speaks uses it.
    String(String),
    Binary(Vec<u8>),
}

/// One frame of the protocol, addressed from one endpoint to another within a namespace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CastMessage {
    /// e.g. `urn:x-cast:com.google.cast.media`
    pub namespace: Namespace,
    pub source: EndpointId,
    pub destination: EndpointId,
    pub payload: CastMessagePayload,
}

impl CastMessage {
    pub fn new(namespace: impl Into<Namespace>,
               source: impl Into<EndpointId>,
               destination: impl Into<EndpointId>,
               payload: impl Into<CastMessagePayload>)
    -> CastMessage
    {
        CastMessage {
            namespace: namespace.into(),
            source: source.into(),
            destination: destination.into(),
            payload: payload.into(),
        }
    }

    /// The JSON text of a string payload, `None` for binary payloads.
    pub fn payload_str(&self) -> Option<&str> {
        match &self.payload {
            CastMessagePayload::String(s) => Some(s.as_str()),
            CastMessagePayload::Binary(_) => None,
        }
    }
}

impl From<String> for CastMessagePayload {
    fn from(s: String) -> CastMessagePayload {
        CastMessagePayload::String(s)
    }
}

impl From<&str> for CastMessagePayload {
    fn from(s: &str) -> CastMessagePayload {
        CastMessagePayload::String(s.to_string())
    }
}

impl From<Vec<u8>> for CastMessagePayload {
    fn from(b: Vec<u8>) -> CastMessagePayload {
        CastMessagePayload::Binary(b)
    }
}

impl Debug for CastMessagePayload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CastMessagePayload::String(s) => {
                let end = s.char_indices()
                           .map(|(i, _)| i)
                           .nth(DEBUG_PREVIEW_LEN)
                           .unwrap_or(s.len());
                f.debug_struct("String")
                 .field("len", &s.len())
                 .field("json", &&s[..end])
                 .finish()
            },
            CastMessagePayload::Binary(b) => {
                f.debug_struct("Binary")
                 .field("len", &b.len())
                 .finish_non_exhaustive()
            },
        }
    }
}
