#![allow(dead_code)]

use cast_player::{
    codec::CastMessageCodec,
    config::{app, Config},
    message::CastMessage,
    payload,
    transport::{BoxedStream, Connector},
    PlaybackController,
    Result,
};
use futures::{future::BoxFuture, SinkExt, StreamExt};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{io::DuplexStream, sync::mpsc};
use tokio_util::codec::Framed;

pub const SESSION_ID: &str = "session-1";
pub const TRANSPORT_ID: &str = "transport-1";
pub const MEDIA_SESSION_ID: i32 = 7;

/// A message the fake device received, with its JSON payload parsed.
#[derive(Clone, Debug)]
pub struct Received {
    pub namespace: String,
    pub source: String,
    pub destination: String,
    pub payload: Value,
}

impl Received {
    pub fn typ(&self) -> &str {
        self.payload["type"].as_str().unwrap_or("")
    }

    pub fn request_id(&self) -> Option<i64> {
        self.payload.get("requestId").and_then(Value::as_i64)
    }
}

#[derive(Debug)]
pub struct DeviceState {
    pub app_running: bool,
    pub answer_launch: bool,
    pub volume_level: f64,
    pub volume_muted: bool,

    pub player_state: &'static str,
    pub content_id: String,
    pub duration: f64,
    pub current_time: f64,
    pub seekable_range: Option<(f64, f64)>,
}

impl Default for DeviceState {
    fn default() -> DeviceState {
        DeviceState {
            app_running: false,
            answer_launch: true,
            volume_level: 0.5,
            volume_muted: false,

            player_state: "IDLE",
            content_id: String::new(),
            duration: 100.0,
            current_time: 0.0,
            seekable_range: None,
        }
    }
}

/// Speaks the framed protocol on the far end of an in-memory stream, answering receiver
/// and media requests the way a device running the default media receiver does.
#[derive(Clone)]
pub struct FakeDevice {
    pub state: Arc<Mutex<DeviceState>>,
    pub connections: Arc<AtomicUsize>,
    pub refuse: Arc<AtomicBool>,
    received_tx: mpsc::UnboundedSender<Received>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<CastMessage>>>>,
}

pub struct Harness {
    pub controller: Arc<PlaybackController>,
    pub device: FakeDevice,
    pub received: mpsc::UnboundedReceiver<Received>,
}

pub fn harness() -> Harness {
    harness_with_config(test_config())
}

pub fn test_config() -> Config {
    Config {
        launch_timeout: Duration::from_secs(2),
        reconnect_backoff_initial: Duration::from_millis(200),
        ..Config::default()
    }
}

pub fn harness_with_config(config: Config) -> Harness {
    let (received_tx, received) = mpsc::unbounded_channel();
    let device = FakeDevice {
        state: Arc::new(Mutex::new(DeviceState::default())),
        connections: Arc::new(AtomicUsize::new(0)),
        refuse: Arc::new(AtomicBool::new(false)),
        received_tx,
        outbound: Arc::new(Mutex::new(None)),
    };

    let controller = PlaybackController::new(config, device.clone());

    Harness {
        controller,
        device,
        received,
    }
}

impl Harness {
    /// The next message the device received that is not CONNECT.
    pub async fn next_request(&mut self) -> Received {
        loop {
            let msg = self.next_received().await;
            if msg.typ() != "CONNECT" {
                return msg;
            }
        }
    }

    pub async fn next_received(&mut self) -> Received {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv()).await
            .expect("timed out waiting for the device to receive a message")
            .expect("device dropped")
    }

    /// Everything received so far, without waiting.
    pub fn drain(&mut self) -> Vec<Received> {
        let mut all = Vec::new();
        while let Ok(msg) = self.received.try_recv() {
            all.push(msg);
        }
        all
    }

    /// Wait until `cond` holds for the controller, polling.
    pub async fn wait_until(&self, cond: impl Fn(&PlaybackController) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond(self.controller.as_ref()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }).await.expect("condition not reached");
    }
}

impl Connector for FakeDevice {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>> {
        Box::pin(async move {
            if self.refuse.load(Ordering::SeqCst) {
                anyhow::bail!("FakeDevice: connection refused");
            }

            self.connections.fetch_add(1, Ordering::SeqCst);

            let (local, remote) = tokio::io::duplex(64 * 1024);
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            *self.outbound.lock().unwrap() = Some(outbound_tx);

            tokio::spawn(self.clone().serve(Framed::new(remote, CastMessageCodec),
                                            outbound_rx));

            Ok(Box::new(local) as BoxedStream)
        })
    }
}

impl FakeDevice {
    /// Send an unsolicited message from the media application to the sender.
    pub fn push_media(&self, body: Value) {
        self.push(CastMessage::new(payload::media::CHANNEL_NAMESPACE, TRANSPORT_ID, "sender-0",
                                   body.to_string()));
    }

    pub fn push(&self, msg: CastMessage) {
        if let Some(tx) = self.outbound.lock().unwrap().as_ref() {
            let _ = tx.send(msg);
        }
    }

    /// Drop the current connection from the device side.
    pub fn hang_up(&self) {
        self.outbound.lock().unwrap().take();
    }

    pub fn media_status_payload(&self, request_id: i64) -> Value {
        let state = self.state.lock().unwrap();
        let mut entry = json!({
            "mediaSessionId": MEDIA_SESSION_ID,
            "playerState": state.player_state,
            "currentTime": state.current_time,
            "media": {
                "contentId": state.content_id,
                "duration": state.duration,
            },
        });
        if let Some((start, end)) = state.seekable_range {
            entry["liveSeekableRange"] = json!({ "start": start, "end": end });
        }

        json!({
            "type": "MEDIA_STATUS",
            "requestId": request_id,
            "status": [entry],
        })
    }

    fn receiver_status_payload(&self, request_id: i64) -> Value {
        let state = self.state.lock().unwrap();
        let applications = if state.app_running {
            json!([{
                "appId": app::DEFAULT_MEDIA_RECEIVER,
                "displayName": "Default Media Receiver",
                "sessionId": SESSION_ID,
                "transportId": TRANSPORT_ID,
                "statusText": "Ready To Cast",
            }])
        } else {
            json!([])
        };

        json!({
            "type": "RECEIVER_STATUS",
            "requestId": request_id,
            "status": {
                "applications": applications,
                "volume": {
                    "level": state.volume_level,
                    "muted": state.volume_muted,
                },
            },
        })
    }

    async fn serve(self,
                   mut framed: Framed<DuplexStream, CastMessageCodec>,
                   mut outbound: mpsc::UnboundedReceiver<CastMessage>)
    {
        loop {
            let msg = tokio::select! {
                msg = framed.next() => match msg {
                    Some(Ok(msg)) => msg,
                    _ => break,
                },
                push = outbound.recv() => match push {
                    Some(push) => {
                        if framed.send(push).await.is_err() {
                            break;
                        }
                        continue;
                    },
                    None => break,
                },
            };

            let payload: Value = msg.payload_str()
                                    .and_then(|s| serde_json::from_str(s).ok())
                                    .unwrap_or(Value::Null);
            let received = Received {
                namespace: msg.namespace.clone(),
                source: msg.source.clone(),
                destination: msg.destination.clone(),
                payload,
            };

            let reply = self.reply_to(&received);
            let _ = self.received_tx.send(received);

            if let Some(reply) = reply {
                let out = CastMessage::new(msg.namespace.clone(), msg.destination.clone(),
                                           msg.source.clone(), reply.to_string());
                if framed.send(out).await.is_err() {
                    break;
                }
            }
        }
    }

    fn reply_to(&self, msg: &Received) -> Option<Value> {
        let request_id = msg.request_id().unwrap_or(0);

        match (msg.namespace.as_str(), msg.typ()) {
            (payload::receiver::CHANNEL_NAMESPACE, "LAUNCH") => {
                let mut state = self.state.lock().unwrap();
                if !state.answer_launch {
                    return None;
                }
                state.app_running = true;
                drop(state);
                Some(self.receiver_status_payload(request_id))
            },
            (payload::receiver::CHANNEL_NAMESPACE, "STOP") => {
                let mut state = self.state.lock().unwrap();
                state.app_running = false;
                state.player_state = "IDLE";
                drop(state);
                Some(self.receiver_status_payload(request_id))
            },
            (payload::receiver::CHANNEL_NAMESPACE, "SET_VOLUME") => {
                let mut state = self.state.lock().unwrap();
                if let Some(level) = msg.payload["volume"]["level"].as_f64() {
                    state.volume_level = level;
                }
                if let Some(muted) = msg.payload["volume"]["muted"].as_bool() {
                    state.volume_muted = muted;
                }
                drop(state);
                Some(self.receiver_status_payload(request_id))
            },
            (payload::receiver::CHANNEL_NAMESPACE, "GET_STATUS") =>
                Some(self.receiver_status_payload(request_id)),

            (payload::media::CHANNEL_NAMESPACE, "LOAD") => {
                let mut state = self.state.lock().unwrap();
                state.content_id = msg.payload["media"]["contentId"]
                                       .as_str().unwrap_or("").to_string();
                state.player_state = "PLAYING";
                state.current_time = 0.0;
                drop(state);
                Some(self.media_status_payload(request_id))
            },
            (payload::media::CHANNEL_NAMESPACE, "PLAY") => {
                self.state.lock().unwrap().player_state = "PLAYING";
                Some(self.media_status_payload(request_id))
            },
            (payload::media::CHANNEL_NAMESPACE, "PAUSE") => {
                self.state.lock().unwrap().player_state = "PAUSED";
                Some(self.media_status_payload(request_id))
            },
            (payload::media::CHANNEL_NAMESPACE, "SEEK") => {
                if let Some(t) = msg.payload["currentTime"].as_f64() {
                    self.state.lock().unwrap().current_time = t;
                }
                Some(self.media_status_payload(request_id))
            },
            (payload::media::CHANNEL_NAMESPACE, "GET_STATUS") =>
                Some(self.media_status_payload(request_id)),

            _ => None,
        }
    }
}
