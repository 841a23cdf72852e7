//! Identity and volume of the receiver application, from `RECEIVER_STATUS` messages.

use crate::{
    channel::MessageHandler,
    message::CastMessage,
    payload::{self, PayloadDyn, RequestId},
    types::{AppId, AppSession, NamespaceConst},
    util::named,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::watch;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ReceiverStatus {
    /// In `[0, 1]`.
    pub volume_level: f64,
    pub volume_muted: bool,
}

pub trait ReceiverStatusListener: Send + Sync {
    fn on_receiver_status_update(&self, status: &ReceiverStatus);
}

impl<F> ReceiverStatusListener for F
where F: Fn(&ReceiverStatus) + Send + Sync
{
    fn on_receiver_status_update(&self, status: &ReceiverStatus) {
        self(status)
    }
}

/// Tracks the session of the configured receiver application and the device volume.
pub struct ReceiverSession {
    app_id: AppId,
    state: Mutex<State>,

    /// Request id of the latest `RECEIVER_STATUS` that carried a non-zero one.
    latest_request_id: watch::Sender<RequestId>,

    listeners: RwLock<Vec<Arc<dyn ReceiverStatusListener>>>,
}

#[derive(Debug, Default)]
struct State {
    session: Option<AppSession>,
    status: ReceiverStatus,
}

impl Default for ReceiverStatus {
    fn default() -> ReceiverStatus {
        ReceiverStatus {
            volume_level: 1.0,
            volume_muted: false,
        }
    }
}

impl ReceiverSession {
    pub fn new(app_id: impl Into<AppId>) -> ReceiverSession {
        let (latest_request_id, _) = watch::channel(RequestId::BROADCAST);

        ReceiverSession {
            app_id: app_id.into(),
            state: Mutex::new(State::default()),
            latest_request_id,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn add_listener(&self, listener: Arc<dyn ReceiverStatusListener>) {
        self.listeners.write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// The running session of the configured application, if any.
    pub fn session(&self) -> Option<AppSession> {
        self.lock().session.clone()
    }

    pub fn status(&self) -> ReceiverStatus {
        self.lock().status.clone()
    }

    pub fn latest_request_id(&self) -> RequestId {
        *self.latest_request_id.borrow()
    }

    /// Watch `latest_request_id()`, e.g. to wait for the reply to a LAUNCH.
    pub fn subscribe_request_id(&self) -> watch::Receiver<RequestId> {
        self.latest_request_id.subscribe()
    }

    /// Forget the session and the latest request id. Volume is kept.
    pub fn reset(&self) {
        self.lock().session = None;
        self.latest_request_id.send_replace(RequestId::BROADCAST);
    }

    /// Apply one inbound receiver namespace payload.
    #[named]
    pub fn handle_payload(&self, pd: &PayloadDyn) {
        const METHOD_PATH: &str = method_path!("ReceiverSession");

        match pd.typ.as_str() {
            payload::receiver::MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS => (),

            payload::receiver::MESSAGE_RESPONSE_TYPE_LAUNCH_ERROR
            | payload::receiver::MESSAGE_RESPONSE_TYPE_INVALID_REQUEST => {
                tracing::warn!(target: METHOD_PATH,
                               typ = pd.typ,
                               request_id = ?pd.request_id,
                               payload = %pd.inner,
                               "receiver rejected request");
                return;
            },

            _ => return,
        }

        let wrapper: payload::receiver::StatusWrapper = match pd.typed() {
            Ok(w) => w,
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               payload = %pd.inner,
                               "malformed receiver status");
                return;
            },
        };
        let status = wrapper.status.unwrap_or_default();

        let snapshot = {
            let mut state = self.lock();

            if let Some(apps) = status.applications.as_ref() {
                let foreground = apps.first();
                let app_id = foreground.and_then(|app| app.app_id.as_deref());

                if app_id == Some(self.app_id.as_str()) {
                    let app = foreground.cloned().unwrap_or_default();
                    let transport_id = app.transport_id.unwrap_or_default();

                    // Not addressable yet without a transport.
                    state.session = (!transport_id.is_empty()).then(|| AppSession {
                        session_id: app.session_id.unwrap_or_default(),
                        transport_id,
                    });
                } else {
                    if state.session.is_some() {
                        tracing::info!(target: METHOD_PATH,
                                       foreground_app_id = app_id,
                                       "another application took the foreground");
                    }
                    state.session = None;
                }
            }

            if let Some(volume) = status.volume.as_ref() {
                if let Some(level) = volume.level {
                    state.status.volume_level = level;
                }
                if let Some(muted) = volume.muted {
                    state.status.volume_muted = muted;
                }
            }

            tracing::debug!(target: METHOD_PATH,
                            request_id = ?pd.request_id,
                            session = ?state.session,
                            status = ?state.status,
                            "receiver status");

            state.status.clone()
        };

        let request_id = pd.request_id_or_broadcast();
        if request_id.is_rpc() {
            self.latest_request_id.send_replace(request_id);
        }

        self.notify(&snapshot);
    }

    fn notify(&self, snapshot: &ReceiverStatus) {
        let listeners = self.listeners.read()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clone();
        for listener in listeners {
            listener.on_receiver_status_update(snapshot);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageHandler for ReceiverSession {
    fn namespace(&self) -> NamespaceConst {
        payload::receiver::CHANNEL_NAMESPACE
    }

    #[named]
    fn on_message(&self, msg: &CastMessage) -> Option<CastMessage> {
        match PayloadDyn::from_message(msg) {
            Ok(pd) => self.handle_payload(&pd),
            Err(err) => tracing::warn!(target: method_path!("ReceiverSession"),
                                       ?err, ?msg,
                                       "error parsing receiver payload"),
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const APP: &str = "CC1AD845";

    fn apply(session: &ReceiverSession, json: &str) {
        session.handle_payload(&PayloadDyn::from_json(json).unwrap());
    }

    fn launched(session: &ReceiverSession) {
        apply(session, r#"{"requestId":1,"type":"RECEIVER_STATUS","status":{
            "applications":[{"appId":"CC1AD845","sessionId":"s-1","transportId":"web-1"}],
            "volume":{"level":0.4,"muted":false}}}"#);
    }

    #[test]
    fn adopts_matching_application() {
        let session = ReceiverSession::new(APP);
        launched(&session);

        assert_eq!(session.session(), Some(AppSession {
            session_id: "s-1".to_string(),
            transport_id: "web-1".to_string(),
        }));
        assert_eq!(session.status().volume_level, 0.4);
        assert_eq!(session.latest_request_id(), RequestId::from(1));
    }

    #[test]
    fn other_application_clears_session() {
        let session = ReceiverSession::new(APP);
        launched(&session);

        apply(&session, r#"{"requestId":0,"type":"RECEIVER_STATUS","status":{
            "applications":[{"appId":"E8C28D3C","sessionId":"s-2","transportId":"web-2"}]}}"#);

        assert_eq!(session.session(), None);
        // Broadcast id 0 never replaces the latest request id.
        assert_eq!(session.latest_request_id(), RequestId::from(1));
    }

    #[test]
    fn empty_application_list_clears_session() {
        let session = ReceiverSession::new(APP);
        launched(&session);

        apply(&session, r#"{"type":"RECEIVER_STATUS","status":{"applications":[]}}"#);
        assert_eq!(session.session(), None);
    }

    #[test]
    fn application_without_transport_has_no_session() {
        let session = ReceiverSession::new(APP);
        launched(&session);

        apply(&session, r#"{"requestId":2,"type":"RECEIVER_STATUS","status":{
            "applications":[{"appId":"CC1AD845","displayName":"Default Media Receiver"}]}}"#);

        assert_eq!(session.session(), None);
        assert_eq!(session.latest_request_id(), RequestId::from(2));
    }

    #[test]
    fn volume_is_sparse_merged() {
        let session = ReceiverSession::new(APP);
        launched(&session);

        apply(&session, r#"{"requestId":2,"type":"RECEIVER_STATUS","status":{
            "volume":{"muted":true}}}"#);

        let status = session.status();
        assert_eq!(status.volume_level, 0.4);
        assert!(status.volume_muted);

        // No applications key: the session is unchanged.
        assert!(session.session().is_some());
        assert_eq!(session.latest_request_id(), RequestId::from(2));
    }

    #[test]
    fn other_types_are_ignored() {
        let session = ReceiverSession::new(APP);
        apply(&session, r#"{"requestId":3,"type":"LAUNCH_ERROR","reason":"NOT_FOUND"}"#);
        apply(&session, r#"{"requestId":4,"type":"SOMETHING_ELSE"}"#);

        assert_eq!(session.latest_request_id(), RequestId::BROADCAST);
        assert_eq!(session.status(), ReceiverStatus::default());
    }

    #[test]
    fn listeners_get_snapshot() {
        let session = ReceiverSession::new(APP);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen2 = Arc::clone(&seen);
        session.add_listener(Arc::new(move |status: &ReceiverStatus| {
            seen2.lock().unwrap().push(status.volume_level);
        }));

        launched(&session);
        apply(&session, r#"{"type":"RECEIVER_STATUS","status":{"volume":{"level":0.6}}}"#);

        assert_eq!(*seen.lock().unwrap(), vec![0.4, 0.6]);
    }

    #[test]
    fn reset_clears_session_and_request_id() {
        let session = ReceiverSession::new(APP);
        launched(&session);

        session.reset();

        assert_eq!(session.session(), None);
        assert_eq!(session.latest_request_id(), RequestId::BROADCAST);
        assert_eq!(session.status().volume_level, 0.4);
    }

    #[tokio::test]
    async fn request_id_watch_sees_reply() {
        let session = ReceiverSession::new(APP);
        let mut rx = session.subscribe_request_id();

        launched(&session);

        let id = tokio::time::timeout(std::time::Duration::from_secs(1),
                                      rx.wait_for(|id| *id == RequestId::from(1)))
            .await.unwrap().unwrap();
        assert_eq!(*id, RequestId::from(1));
    }
}
