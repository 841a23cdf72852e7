//! Playback status of the loaded media, from media namespace messages.

use crate::{
    channel::MessageHandler,
    message::CastMessage,
    payload::{self, PayloadDyn, RequestId},
    types::{MediaSessionId, NamespaceConst},
    util::named,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    #[default]
    Idle,
    Buffering,
    Playing,
    Paused,
}

/// Why the player is idle. Only meaningful when the player state is `Idle`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdleReason {
    Unknown,
    #[default]
    Stopped,
    Finished,
    Error,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MediaStatus {
    pub content_id: String,

    /// Seconds, -1 when unknown.
    pub duration: f64,

    /// Seconds.
    pub current_time: f64,

    pub player_state: PlayerState,
    pub idle_reason: IdleReason,

    /// `detailedErrorCode` of the latest ERROR, 0 once a status arrives after it.
    pub cast_error_code: i32,

    /// Seconds, -1 when there is no seekable range.
    pub seek_range_start: f64,
    pub seek_range_end: f64,

    /// A live stream has ended, or is no longer being encoded.
    pub stream_is_finished: bool,
}

pub trait MediaStatusListener: Send + Sync {
    fn on_media_status_update(&self, status: &MediaStatus);
}

pub trait MediaFinishedListener: Send + Sync {
    fn on_media_finished(&self);
}

impl<F> MediaStatusListener for F
where F: Fn(&MediaStatus) + Send + Sync
{
    fn on_media_status_update(&self, status: &MediaStatus) {
        self(status)
    }
}

/// Tracks `MediaStatus` of the media application.
pub struct MediaSession {
    state: Mutex<State>,
    status_listeners: RwLock<Vec<Arc<dyn MediaStatusListener>>>,
    finished_listeners: RwLock<Vec<Arc<dyn MediaFinishedListener>>>,
}

#[derive(Debug, Default)]
struct State {
    status: MediaStatus,
    media_session_id: MediaSessionId,
    latest_request_id: RequestId,
}

enum Notify {
    Nothing,
    Status(MediaStatus),
    FinishedAndStatus(MediaStatus),
}

impl Default for MediaStatus {
    fn default() -> MediaStatus {
        MediaStatus {
            content_id: String::new(),
            duration: -1.0,
            current_time: 0.0,
            player_state: PlayerState::Idle,
            idle_reason: IdleReason::Stopped,
            cast_error_code: 0,
            seek_range_start: -1.0,
            seek_range_end: -1.0,
            stream_is_finished: false,
        }
    }
}

impl PlayerState {
    /// Unrecognised and empty strings are `Idle`.
    pub fn from_protocol(s: &str) -> PlayerState {
        match s {
            "BUFFERING" => PlayerState::Buffering,
            "PLAYING" => PlayerState::Playing,
            "PAUSED" => PlayerState::Paused,
            _ => PlayerState::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlayerState::Idle => "IDLE",
            PlayerState::Buffering => "BUFFERING",
            PlayerState::Playing => "PLAYING",
            PlayerState::Paused => "PAUSED",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, PlayerState::Buffering | PlayerState::Playing)
    }
}

impl IdleReason {
    /// `CANCELLED` (stopped by a sender) is `Stopped`; anything not listed is `Unknown`.
    pub fn from_protocol(s: &str) -> IdleReason {
        match s {
            "FINISHED" => IdleReason::Finished,
            "ERROR" => IdleReason::Error,
            "CANCELLED" => IdleReason::Stopped,
            _ => IdleReason::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IdleReason::Unknown => "UNKNOWN",
            IdleReason::Stopped => "STOPPED",
            IdleReason::Finished => "FINISHED",
            IdleReason::Error => "ERROR",
        }
    }
}

impl Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for IdleReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MediaSession {
    pub fn new() -> MediaSession {
        MediaSession {
            state: Mutex::new(State::default()),
            status_listeners: RwLock::new(Vec::new()),
            finished_listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_status_listener(&self, listener: Arc<dyn MediaStatusListener>) {
        self.status_listeners.write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn add_finished_listener(&self, listener: Arc<dyn MediaFinishedListener>) {
        self.finished_listeners.write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn status(&self) -> MediaStatus {
        self.lock().status.clone()
    }

    /// Id of the loaded media item, 0 before any status has named one.
    pub fn media_session_id(&self) -> MediaSessionId {
        self.lock().media_session_id
    }

    pub fn latest_request_id(&self) -> RequestId {
        self.lock().latest_request_id
    }

    /// Restore the default status and notify status listeners.
    pub fn reset(&self) {
        let snapshot = {
            let mut state = self.lock();
            *state = State::default();
            state.status.clone()
        };

        self.notify(Notify::Status(snapshot));
    }

    /// Apply one inbound media namespace payload.
    #[named]
    pub fn handle_payload(&self, pd: &PayloadDyn) {
        const METHOD_PATH: &str = method_path!("MediaSession");

        let notify = match pd.typ.as_str() {
            payload::media::MESSAGE_RESPONSE_TYPE_ERROR => self.apply_error(pd),

            payload::media::MESSAGE_RESPONSE_TYPE_MEDIA_STATUS => self.apply_status(pd),

            payload::media::MESSAGE_RESPONSE_TYPE_LOAD_FAILED
            | payload::media::MESSAGE_RESPONSE_TYPE_LOAD_CANCELLED
            | payload::media::MESSAGE_RESPONSE_TYPE_INVALID_PLAYER_STATE
            | payload::media::MESSAGE_RESPONSE_TYPE_INVALID_REQUEST => {
                let reply = pd.typed::<payload::media::RequestErrorReply>()
                              .unwrap_or_default();
                tracing::warn!(target: METHOD_PATH,
                               typ = pd.typ,
                               request_id = ?pd.request_id,
                               reason = reply.reason,
                               "media request rejected");
                Notify::Nothing
            },

            _ => Notify::Nothing,
        };

        self.notify(notify);
    }

    #[named]
    fn apply_error(&self, pd: &PayloadDyn) -> Notify {
        let reply = match pd.typed::<payload::media::ErrorReply>() {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(target: method_path!("MediaSession"),
                               ?err,
                               payload = %pd.inner,
                               "malformed media error");
                payload::media::ErrorReply::default()
            },
        };

        let mut state = self.lock();
        if let Some(code) = reply.detailed_error_code {
            state.status.cast_error_code = code;
        }

        tracing::info!(target: method_path!("MediaSession"),
                       cast_error_code = state.status.cast_error_code,
                       reason = reply.reason,
                       "media error");

        Notify::Status(state.status.clone())
    }

    #[named]
    fn apply_status(&self, pd: &PayloadDyn) -> Notify {
        const METHOD_PATH: &str = method_path!("MediaSession");

        let status = match pd.typed::<payload::media::Status>() {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               payload = %pd.inner,
                               "malformed media status");
                return Notify::Nothing;
            },
        };

        let Some(entry) = status.status.into_iter().next() else {
            return Notify::Nothing;
        };

        let mut state = self.lock();
        let was_finished = state.status.idle_reason == IdleReason::Finished;

        let st = &mut state.status;
        st.player_state = PlayerState::from_protocol(entry.player_state.as_deref().unwrap_or(""));
        st.idle_reason = match st.player_state {
            PlayerState::Idle => entry.idle_reason.as_deref()
                                      .map(IdleReason::from_protocol)
                                      .unwrap_or(IdleReason::Unknown),
            _ => IdleReason::Unknown,
        };
        st.cast_error_code = 0;

        if let Some(current_time) = entry.current_time {
            st.current_time = current_time;
        }

        if let Some(media) = entry.media {
            if let Some(duration) = media.duration {
                st.duration = duration;
            }
            if let Some(content_id) = media.content_id {
                st.content_id = content_id;
            }
        }

        if let Some(range) = entry.live_seekable_range {
            if let Some(start) = range.start {
                st.seek_range_start = start;
            }
            if let Some(end) = range.end {
                st.seek_range_end = end;
            }
            if let Some(is_live_done) = range.is_live_done {
                st.stream_is_finished = is_live_done;
            }
        }

        let is_finished = st.idle_reason == IdleReason::Finished;

        if let Some(id) = entry.media_session_id {
            state.media_session_id = id;
        }

        let request_id = pd.request_id_or_broadcast();
        if request_id.is_rpc() {
            state.latest_request_id = request_id;
        }

        tracing::debug!(target: METHOD_PATH,
                        media_session_id = state.media_session_id,
                        request_id = %state.latest_request_id,
                        status = ?state.status,
                        "media status");

        let snapshot = state.status.clone();

        if is_finished && !was_finished {
            Notify::FinishedAndStatus(snapshot)
        } else {
            Notify::Status(snapshot)
        }
    }

    /// Runs with no lock held.
    fn notify(&self, notify: Notify) {
        let snapshot = match notify {
            Notify::Nothing => return,
            Notify::Status(s) => s,
            Notify::FinishedAndStatus(s) => {
                let finished = self.finished_listeners.read()
                                   .unwrap_or_else(PoisonError::into_inner)
                                   .clone();
                for listener in finished {
                    listener.on_media_finished();
                }
                s
            },
        };

        let listeners = self.status_listeners.read()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clone();
        for listener in listeners {
            listener.on_media_status_update(&snapshot);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MediaSession {
    fn default() -> MediaSession {
        MediaSession::new()
    }
}

impl MessageHandler for MediaSession {
    fn namespace(&self) -> NamespaceConst {
        payload::media::CHANNEL_NAMESPACE
    }

    #[named]
    fn on_message(&self, msg: &CastMessage) -> Option<CastMessage> {
        match PayloadDyn::from_message(msg) {
            Ok(pd) => self.handle_payload(&pd),
            Err(err) => tracing::warn!(target: method_path!("MediaSession"),
                                       ?err, ?msg,
                                       "error parsing media payload"),
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn apply(session: &MediaSession, json: &str) {
        session.handle_payload(&PayloadDyn::from_json(json).unwrap());
    }

    #[derive(Default)]
    struct Events {
        finished: AtomicUsize,
        log: Mutex<Vec<String>>,
    }

    impl MediaFinishedListener for Events {
        fn on_media_finished(&self) {
            self.finished.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("finished".to_string());
        }
    }

    impl MediaStatusListener for Events {
        fn on_media_status_update(&self, status: &MediaStatus) {
            self.log.lock().unwrap().push(format!("status:{}", status.player_state));
        }
    }

    fn session_with_events() -> (MediaSession, Arc<Events>) {
        let session = MediaSession::new();
        let events = Arc::new(Events::default());
        session.add_finished_listener(events.clone());
        session.add_status_listener(events.clone());
        (session, events)
    }

    const PLAYING: &str = r#"{"requestId":3,"type":"MEDIA_STATUS","status":[{
        "mediaSessionId":1,"playerState":"PLAYING","currentTime":10.5,
        "media":{"contentId":"http://h/a.mp4","duration":120.0},
        "liveSeekableRange":{"start":0.0,"end":100.0,"isLiveDone":false}}]}"#;

    #[test]
    fn full_status() {
        let session = MediaSession::new();
        apply(&session, PLAYING);

        let status = session.status();
        assert_eq!(status.player_state, PlayerState::Playing);
        assert_eq!(status.idle_reason, IdleReason::Unknown);
        assert_eq!(status.content_id, "http://h/a.mp4");
        assert_eq!(status.duration, 120.0);
        assert_eq!(status.current_time, 10.5);
        assert_eq!(status.seek_range_start, 0.0);
        assert_eq!(status.seek_range_end, 100.0);
        assert_eq!(session.media_session_id(), 1);
        assert_eq!(session.latest_request_id(), RequestId::from(3));
    }

    #[test]
    fn absent_fields_keep_previous_values() {
        let session = MediaSession::new();
        apply(&session, PLAYING);

        apply(&session, r#"{"requestId":0,"type":"MEDIA_STATUS","status":[{
            "playerState":"PAUSED","currentTime":11.0,"media":{"duration":130.0}}]}"#);

        let status = session.status();
        assert_eq!(status.player_state, PlayerState::Paused);
        assert_eq!(status.current_time, 11.0);
        assert_eq!(status.duration, 130.0);
        assert_eq!(status.content_id, "http://h/a.mp4");
        assert_eq!(status.seek_range_end, 100.0);
        assert_eq!(session.media_session_id(), 1);
        assert_eq!(session.latest_request_id(), RequestId::from(3));
    }

    #[test]
    fn unknown_player_state_is_idle() {
        let session = MediaSession::new();
        apply(&session, PLAYING);
        apply(&session, r#"{"type":"MEDIA_STATUS","status":[{"playerState":"LOADING"}]}"#);
        assert_eq!(session.status().player_state, PlayerState::Idle);

        apply(&session, PLAYING);
        apply(&session, r#"{"type":"MEDIA_STATUS","status":[{}]}"#);
        let status = session.status();
        assert_eq!(status.player_state, PlayerState::Idle);
        assert_eq!(status.idle_reason, IdleReason::Unknown);
    }

    #[test]
    fn idle_reasons() {
        let session = MediaSession::new();
        for (wire, expected) in [("CANCELLED", IdleReason::Stopped),
                                 ("ERROR", IdleReason::Error),
                                 ("INTERRUPTED", IdleReason::Unknown)] {
            apply(&session, &format!(r#"{{"type":"MEDIA_STATUS","status":[{{
                "playerState":"IDLE","idleReason":"{wire}"}}]}}"#));
            assert_eq!(session.status().idle_reason, expected, "{wire}");
        }
    }

    #[test]
    fn error_sets_code_only() {
        let (session, events) = session_with_events();
        apply(&session, PLAYING);

        apply(&session, r#"{"requestId":9,"type":"ERROR","detailedErrorCode":104}"#);
        let status = session.status();
        assert_eq!(status.cast_error_code, 104);
        assert_eq!(status.player_state, PlayerState::Playing);
        assert_eq!(session.latest_request_id(), RequestId::from(3));

        // An ERROR without a code still notifies and keeps the previous code.
        apply(&session, r#"{"type":"ERROR"}"#);
        assert_eq!(session.status().cast_error_code, 104);
        assert_eq!(events.log.lock().unwrap().len(), 3);

        // The next status clears it.
        apply(&session, PLAYING);
        assert_eq!(session.status().cast_error_code, 0);
    }

    #[test]
    fn empty_status_is_ignored() {
        let (session, events) = session_with_events();
        apply(&session, PLAYING);
        apply(&session, r#"{"requestId":7,"type":"MEDIA_STATUS","status":[]}"#);

        assert_eq!(session.status().player_state, PlayerState::Playing);
        assert_eq!(session.latest_request_id(), RequestId::from(3));
        assert_eq!(events.log.lock().unwrap().len(), 1);
    }

    #[test]
    fn finished_fires_once_per_transition() {
        let (session, events) = session_with_events();
        let finished = r#"{"type":"MEDIA_STATUS","status":[{
            "playerState":"IDLE","idleReason":"FINISHED"}]}"#;

        apply(&session, PLAYING);
        apply(&session, finished);
        apply(&session, finished);

        assert_eq!(events.finished.load(Ordering::SeqCst), 1);
        assert_eq!(*events.log.lock().unwrap(),
                   vec!["status:PLAYING", "finished", "status:IDLE", "status:IDLE"]);

        apply(&session, PLAYING);
        apply(&session, finished);
        assert_eq!(events.finished.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejected_requests_change_nothing() {
        let (session, events) = session_with_events();
        apply(&session, r#"{"requestId":4,"type":"LOAD_FAILED"}"#);
        apply(&session, r#"{"requestId":5,"type":"INVALID_REQUEST","reason":"INVALID_COMMAND"}"#);

        assert_eq!(session.status(), MediaStatus::default());
        assert!(events.log.lock().unwrap().is_empty());
    }

    #[test]
    fn reset_restores_defaults_and_notifies() {
        let (session, events) = session_with_events();
        apply(&session, PLAYING);

        session.reset();

        assert_eq!(session.status(), MediaStatus::default());
        assert_eq!(session.media_session_id(), 0);
        assert_eq!(session.latest_request_id(), RequestId::BROADCAST);
        assert_eq!(*events.log.lock().unwrap(), vec!["status:PLAYING", "status:IDLE"]);
    }
}
