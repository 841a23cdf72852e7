//! Turns user intents into correlated commands to the receiver and media applications.

use crate::{
    channel::{MessageChannel, MessageHandler, DEFAULT_RECEIVER_ID},
    config::Config,
    media::{MediaFinishedListener, MediaSession, MediaStatus, MediaStatusListener, PlayerState},
    mime,
    payload::{self, receiver::Volume, RequestId, RequestIdGen, RequestInner},
    playlist::Playlist,
    receiver::{ReceiverSession, ReceiverStatus, ReceiverStatusListener},
    Result,
    status::{StatusBroadcaster, StatusUpdate},
    transport::Connector,
    types::{AppSession, EndpointId},
    util::named,
};
use anyhow::{bail, format_err};
use futures::{Future, Stream};
use std::{
    fmt::{self, Debug},
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::{
    sync::MappedMutexGuard,
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

pub use crate::config::SeekMode;

pub const VOLUME_STEP: f64 = 0.1;

/// Plays a playlist on one device.
///
/// Connection, application launch and reconnection happen on demand: every command that
/// needs the device first calls `ensure_connection`.
pub struct PlaybackController {
    config: Config,
    connector: Box<dyn Connector>,

    link: tokio::sync::Mutex<Link>,

    receiver: Arc<ReceiverSession>,
    media: Arc<MediaSession>,
    status: Arc<StatusBroadcaster>,

    playlist: Mutex<Playlist>,
    seek_mode: Mutex<SeekMode>,
    request_ids: RequestIdGen,

    status_timer: Mutex<Option<StatusTimer>>,

    this: Weak<PlaybackController>,
}

#[derive(Debug, Default)]
struct Link {
    channel: Option<MessageChannel>,
    backoff: Backoff,
}

/// Consecutive failed connection attempts, and when the next may start.
#[derive(Debug, Default)]
struct Backoff {
    failures: u32,
    retry_after: Option<Instant>,
}

struct StatusTimer {
    cancel: CancellationToken,
    join_handle: JoinHandle<()>,
}

/// Loads the next playlist entry when the media finishes.
struct AutoAdvance {
    controller: Weak<PlaybackController>,
}

impl PlaybackController {
    pub fn new(config: Config, connector: impl Connector + 'static) -> Arc<PlaybackController> {
        Arc::new_cyclic(|this: &Weak<PlaybackController>| {
            let receiver = Arc::new(ReceiverSession::new(config.app_id.clone()));
            let media = Arc::new(MediaSession::new());
            let status = Arc::new(StatusBroadcaster::new());

            receiver.add_listener(status.clone());
            media.add_status_listener(status.clone());
            media.add_finished_listener(status.clone());
            media.add_finished_listener(Arc::new(AutoAdvance { controller: this.clone() }));

            PlaybackController {
                seek_mode: Mutex::new(config.seek_mode),
                config,
                connector: Box::new(connector),

                link: tokio::sync::Mutex::new(Link::default()),

                receiver,
                media,
                status,

                playlist: Mutex::new(Playlist::default()),
                request_ids: RequestIdGen::new(),

                status_timer: Mutex::new(None),

                this: this.clone(),
            }
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // # Playlist

    pub fn set_playlist(&self, entries: Vec<String>) {
        self.lock_playlist().set(entries);
    }

    /// Append the entries of a playlist file and move to the first entry.
    #[named]
    pub fn load_playlist_file(&self, path: &Path) -> Result<usize> {
        let entries = Playlist::load_file(path)?;
        let count = entries.len();

        tracing::info!(target: method_path!("PlaybackController"),
                       ?path, count,
                       "playlist file loaded");

        self.lock_playlist().extend(entries);
        Ok(count)
    }

    pub fn playlist(&self) -> Playlist {
        self.lock_playlist().clone()
    }

    // # State

    pub fn media_status(&self) -> MediaStatus {
        self.media.status()
    }

    pub fn receiver_status(&self) -> ReceiverStatus {
        self.receiver.status()
    }

    pub fn session(&self) -> Option<AppSession> {
        self.receiver.session()
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.channel.as_ref().is_some_and(MessageChannel::is_connected)
    }

    pub fn add_media_status_listener(&self, listener: Arc<dyn MediaStatusListener>) {
        self.media.add_status_listener(listener);
    }

    pub fn add_media_finished_listener(&self, listener: Arc<dyn MediaFinishedListener>) {
        self.media.add_finished_listener(listener);
    }

    pub fn add_receiver_status_listener(&self, listener: Arc<dyn ReceiverStatusListener>) {
        self.receiver.add_listener(listener);
    }

    /// Status updates as a stream, delivered off the channel task.
    pub fn listen_status(&self) -> impl Stream<Item = StatusUpdate> + Send {
        self.status.listen()
    }

    // # Connection

    /// Open a channel if there is no live one, and launch the receiver application if no
    /// session is known.
    ///
    /// Returns the locked channel; hold it only for the commands to send.
    #[named]
    pub async fn ensure_connection(&self) -> Result<MappedMutexGuard<'_, MessageChannel>> {
        const METHOD_PATH: &str = method_path!("PlaybackController");

        let mut link = self.link.lock().await;

        let connected = link.channel.as_ref().is_some_and(MessageChannel::is_connected);
        if !connected {
            if let Some(old) = link.channel.take() {
                tracing::info!(target: METHOD_PATH,
                               "channel disconnected, reconnecting");
                if let Err(err) = old.close().await {
                    tracing::debug!(target: METHOD_PATH,
                                    ?err,
                                    "error closing old channel");
                }
            }

            link.backoff.check()?;

            match self.open_channel().await {
                Ok(channel) => {
                    link.backoff = Backoff::default();
                    link.channel = Some(channel);
                },
                Err(err) => {
                    let delay = link.backoff.failed(self.config.reconnect_backoff_initial,
                                                    self.config.reconnect_backoff_max);
                    tracing::warn!(target: METHOD_PATH,
                                   ?err, ?delay,
                                   failures = link.backoff.failures,
                                   "connect failed");
                    return Err(err);
                },
            }
        }

        let channel = link.channel.as_ref()
                          .ok_or_else(|| format_err!("{METHOD_PATH}: no channel"))?;

        match self.receiver.session() {
            Some(session) => channel.add_destination(session.transport_id).await?,
            None => self.launch_and_wait(channel).await?,
        }

        tokio::sync::MutexGuard::try_map(link, |link| link.channel.as_mut())
            .map_err(|_| format_err!("{METHOD_PATH}: no channel"))
    }

    #[named]
    async fn open_channel(&self) -> Result<MessageChannel> {
        const METHOD_PATH: &str = method_path!("PlaybackController");

        let connect_timeout = self.config.connect_timeout;
        let conn = match tokio::time::timeout(connect_timeout, self.connector.connect()).await {
            Ok(res) => res?,
            Err(_elapsed) => bail!("{METHOD_PATH}: timed out connecting\n\
                                    _ connect_timeout = {connect_timeout:?}"),
        };

        let handlers: [Arc<dyn MessageHandler>; 2] = [self.receiver.clone(), self.media.clone()];
        let channel = MessageChannel::open(conn, self.config.channel.clone(), handlers).await?;

        tracing::info!(target: METHOD_PATH,
                       "channel open");

        Ok(channel)
    }

    /// Send LAUNCH and wait for the receiver status that answers it.
    #[named]
    async fn launch_and_wait(&self, channel: &MessageChannel) -> Result<()> {
        const METHOD_PATH: &str = method_path!("PlaybackController");

        let mut request_id_rx = self.receiver.subscribe_request_id();

        let launch = payload::receiver::LaunchRequest {
            app_id: self.config.app_id.clone(),
        };
        let request_id = self.send_request(channel, launch, DEFAULT_RECEIVER_ID.to_string())
                             .await?;

        let launch_timeout = self.config.launch_timeout;
        let waited = tokio::time::timeout(
            launch_timeout,
            request_id_rx.wait_for(|id| *id == request_id)).await
            .map(|res| res.map(|_ref| ()));

        match waited {
            Err(_elapsed) => bail!("{METHOD_PATH}: timed out waiting for launch\n\
                                    _ app_id         = {app_id}\n\
                                    _ request_id     = {request_id}\n\
                                    _ launch_timeout = {launch_timeout:?}",
                                   app_id = self.config.app_id),
            Ok(Err(err)) => bail!("{METHOD_PATH}: request id watch closed: {err}"),
            Ok(Ok(())) => (),
        }

        let Some(session) = self.receiver.session() else {
            bail!("{METHOD_PATH}: launch answered without a session for {app_id}",
                  app_id = self.config.app_id);
        };

        tracing::info!(target: METHOD_PATH,
                       session_id = session.session_id,
                       transport_id = session.transport_id,
                       "application launched");

        channel.add_destination(session.transport_id).await
    }

    // # Commands

    /// Pause when playing or buffering, resume when paused, load the current entry when idle.
    #[named]
    pub async fn play_or_pause(&self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("PlaybackController");

        tracing::info!(target: METHOD_PATH, "play/pause");

        let url = match self.lock_playlist().current() {
            Ok(url) => url.to_string(),
            Err(err) => {
                log_playlist_error(METHOD_PATH, err);
                return Ok(());
            },
        };

        let channel = self.ensure_connection().await?;

        match self.media.status().player_state {
            PlayerState::Buffering | PlayerState::Playing => {
                let pause = payload::media::PauseRequest(self.media_request_common());
                self.send_media(&channel, pause).await?;
            },
            PlayerState::Paused => {
                let play = payload::media::PlayRequest(self.media_request_common());
                self.send_media(&channel, play).await?;
            },
            PlayerState::Idle => self.load(&channel, &url).await?,
        }

        Ok(())
    }

    /// Stop the application and drop the connection. The next command reconnects and
    /// launches again.
    #[named]
    pub async fn stop(&self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("PlaybackController");

        tracing::info!(target: METHOD_PATH, "stop");

        let mut result: Result<()> = Ok(());

        if let Some(session) = self.receiver.session() {
            result = async {
                let channel = self.ensure_connection().await?;
                let stop = payload::receiver::StopRequest {
                    session_id: session.session_id,
                };
                self.send_request(&channel, stop, DEFAULT_RECEIVER_ID.to_string()).await?;
                Ok::<(), anyhow::Error>(())
            }.await;

            if let Err(ref err) = result {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               "error sending stop");
            }
        }

        self.receiver.reset();
        self.media.reset();
        self.request_ids.reset();

        let channel = self.link.lock().await.channel.take();
        if let Some(channel) = channel {
            if let Err(err) = channel.close().await {
                tracing::debug!(target: METHOD_PATH,
                                ?err,
                                "error closing channel");
            }
        }

        result
    }

    #[named]
    pub async fn next(&self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("PlaybackController");

        let url = match self.lock_playlist().advance() {
            Ok(url) => url.to_string(),
            Err(err) => {
                log_playlist_error(METHOD_PATH, err);
                return Ok(());
            },
        };

        tracing::info!(target: METHOD_PATH,
                       index = self.lock_playlist().index(),
                       url,
                       "next");

        let channel = self.ensure_connection().await?;
        self.load(&channel, &url).await
    }

    #[named]
    pub async fn previous(&self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("PlaybackController");

        let url = match self.lock_playlist().retreat() {
            Ok(url) => url.to_string(),
            Err(err) => {
                log_playlist_error(METHOD_PATH, err);
                return Ok(());
            },
        };

        tracing::info!(target: METHOD_PATH,
                       index = self.lock_playlist().index(),
                       url,
                       "previous");

        let channel = self.ensure_connection().await?;
        self.load(&channel, &url).await
    }

    // # Seeking

    pub fn set_seek_mode(&self, mode: SeekMode) {
        *self.seek_mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    pub fn seek_mode(&self) -> SeekMode {
        *self.seek_mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seek_enabled(&self) -> bool {
        match self.seek_mode() {
            SeekMode::Never => false,
            SeekMode::Always => true,
            SeekMode::StreamingOnly => {
                let status = self.media.status();
                status.seek_range_end > 0.0 || mime::is_streaming_manifest(&status.content_id)
            },
        }
    }

    /// Seek to `target` seconds, clamped to the known duration and seekable range.
    #[named]
    pub async fn seek(&self, target: f64) -> Result<()> {
        const METHOD_PATH: &str = method_path!("PlaybackController");

        if !self.seek_enabled() {
            tracing::debug!(target: METHOD_PATH,
                            target,
                            seek_mode = ?self.seek_mode(),
                            "seek disabled");
            return Ok(());
        }

        let clamped = clamp_seek_target(target, &self.media.status());

        tracing::info!(target: METHOD_PATH,
                       target, clamped,
                       "seek");

        let channel = self.ensure_connection().await?;
        let seek = payload::media::SeekRequest {
            media_session_id: self.media.media_session_id(),
            current_time: clamped,
        };
        self.send_media(&channel, seek).await?;

        Ok(())
    }

    /// Seek relative to the current time.
    pub async fn seek_diff(&self, delta: f64) -> Result<()> {
        self.seek(self.media.status().current_time + delta).await
    }

    // # Volume

    pub async fn increase_volume_level(&self) -> Result<()> {
        self.send_volume(|status| Volume {
            level: Some(stepped_volume(status.volume_level, VOLUME_STEP)),
            muted: None,
        }).await
    }

    pub async fn decrease_volume_level(&self) -> Result<()> {
        self.send_volume(|status| Volume {
            level: Some(stepped_volume(status.volume_level, -VOLUME_STEP)),
            muted: None,
        }).await
    }

    /// Set the level, clamped to `[0, 1]`.
    #[named]
    pub async fn set_volume_level(&self, level: f64) -> Result<()> {
        if !level.is_finite() {
            bail!("{METHOD_PATH}: volume level must be finite, was {level}",
                  METHOD_PATH = method_path!("PlaybackController"));
        }

        let level = level.clamp(0.0, 1.0);
        self.send_volume(|_| Volume { level: Some(level), muted: None }).await
    }

    pub async fn toggle_volume_muted(&self) -> Result<()> {
        self.send_volume(|status| Volume { level: None, muted: Some(!status.volume_muted) })
            .await
    }

    /// Send SET_VOLUME with the fields `volume` picks, given the status once connected.
    #[named]
    async fn send_volume(&self, volume: impl FnOnce(&ReceiverStatus) -> Volume) -> Result<()> {
        let channel = self.ensure_connection().await?;

        let volume = volume(&self.receiver.status());

        tracing::info!(target: method_path!("PlaybackController"),
                       ?volume,
                       "set volume");

        let set_volume = payload::receiver::SetVolumeRequest { volume };
        self.send_request(&channel, set_volume, DEFAULT_RECEIVER_ID.to_string()).await?;

        Ok(())
    }

    // # Status

    /// Ask for a status update: from the media application when a session is known, else
    /// from the receiver. Does nothing without a live channel.
    #[named]
    pub async fn get_status(&self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("PlaybackController");

        let link = self.link.lock().await;
        let Some(channel) = link.channel.as_ref().filter(|c| c.is_connected()) else {
            tracing::debug!(target: METHOD_PATH,
                            "get_status: no channel");
            return Ok(());
        };

        match self.receiver.session() {
            Some(session) => {
                channel.add_destination(session.transport_id.clone()).await?;
                self.send_request(channel, payload::media::GetStatusRequest {},
                                  session.transport_id).await?;
            },
            None => {
                self.send_request(channel, payload::receiver::GetStatusRequest {},
                                  DEFAULT_RECEIVER_ID.to_string()).await?;
            },
        }

        Ok(())
    }

    /// Poll `get_status` every `interval` (the configured default for `None`) until
    /// `stop_status_timer`. A zero interval polls once, now.
    #[named]
    pub async fn start_status_timer(&self, interval: Option<Duration>) -> Result<()> {
        const METHOD_PATH: &str = method_path!("PlaybackController");

        let interval = interval.unwrap_or(self.config.status_poll_interval);
        if interval.is_zero() {
            return self.get_status().await;
        }

        self.stop_status_timer().await;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let weak = self.this.clone();

        let join_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => (),
                }

                let Some(controller) = weak.upgrade() else {
                    break;
                };

                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    res = controller.get_status() => if let Err(err) = res {
                        tracing::warn!(target: METHOD_PATH,
                                       ?err,
                                       "status poll error");
                    },
                }
            }

            tracing::debug!(target: METHOD_PATH,
                            "status timer exit");
        });

        tracing::debug!(target: METHOD_PATH,
                        ?interval,
                        "status timer started");

        *self.lock_status_timer() = Some(StatusTimer { cancel, join_handle });

        Ok(())
    }

    /// Signal the polling task to exit and wait until it has.
    #[named]
    pub async fn stop_status_timer(&self) {
        let Some(timer) = self.lock_status_timer().take() else {
            return;
        };

        timer.cancel.cancel();

        if let Err(err) = timer.join_handle.await {
            tracing::warn!(target: method_path!("PlaybackController"),
                           ?err,
                           "status timer task failed");
        }
    }

    // # Internals

    /// Run a command on a new task, for callers on the channel task.
    #[named]
    pub(crate) fn spawn_command<F, Fut>(&self, name: &'static str, command: F)
    where F: FnOnce(Arc<PlaybackController>) -> Fut,
          Fut: Future<Output = Result<()>> + Send + 'static
    {
        const METHOD_PATH: &str = method_path!("PlaybackController");

        let Some(controller) = self.this.upgrade() else {
            return;
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err, name,
                               "no runtime for command");
                return;
            },
        };

        let fut = command(controller);
        handle.spawn(async move {
            if let Err(err) = fut.await {
                tracing::warn!(target: METHOD_PATH,
                               ?err, name,
                               "spawned command failed");
            }
        });
    }

    async fn load(&self, channel: &MessageChannel, url: &str) -> Result<()> {
        let load = payload::media::LoadRequest {
            media: payload::media::Media {
                content_id: url.to_string(),
                stream_type: payload::media::STREAM_TYPE_NONE.to_string(),
                content_type: mime::content_type(url).to_string(),
            },
        };
        self.send_media(channel, load).await?;

        Ok(())
    }

    fn media_request_common(&self) -> payload::media::MediaRequestCommon {
        payload::media::MediaRequestCommon {
            media_session_id: self.media.media_session_id(),
        }
    }

    /// Send to the media application of the current session.
    #[named]
    async fn send_media<Req>(&self, channel: &MessageChannel, req: Req) -> Result<RequestId>
    where Req: RequestInner
    {
        let Some(session) = self.receiver.session() else {
            bail!("{METHOD_PATH}: no receiver session for {typ}",
                  METHOD_PATH = method_path!("PlaybackController"),
                  typ = Req::TYPE_NAME);
        };

        self.send_request(channel, req, session.transport_id).await
    }

    #[named]
    async fn send_request<Req>(&self, channel: &MessageChannel, req: Req,
                               destination: EndpointId)
    -> Result<RequestId>
    where Req: RequestInner
    {
        let request_id = self.request_ids.take_next();

        tracing::debug!(target: method_path!("PlaybackController"),
                        ?req,
                        %request_id,
                        request_type = Req::TYPE_NAME,
                        destination,
                        "send request");

        let msg = payload::request_message(req, Some(request_id),
                                           channel.config().sender(), destination)?;
        channel.send(msg).await?;

        Ok(request_id)
    }

    fn lock_playlist(&self) -> MutexGuard<'_, Playlist> {
        self.playlist.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_status_timer(&self) -> MutexGuard<'_, Option<StatusTimer>> {
        self.status_timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        let timer = self.status_timer.get_mut()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
        if let Some(timer) = timer {
            timer.cancel.cancel();
        }
    }
}

impl Debug for PlaybackController {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PlaybackController")
         .field("config", &self.config)
         .field("seek_mode", &self.seek_mode())
         .field("session", &self.receiver.session())
         .finish_non_exhaustive()
    }
}

impl Backoff {
    #[named]
    fn check(&self) -> Result<()> {
        if let Some(retry_after) = self.retry_after {
            let now = Instant::now();
            if now < retry_after {
                bail!("{METHOD_PATH}: reconnect backoff\n\
                       _ failures = {failures}\n\
                       _ retry_in = {retry_in:?}",
                      METHOD_PATH = method_path!("Backoff"),
                      failures = self.failures,
                      retry_in = retry_after - now);
            }
        }
        Ok(())
    }

    /// Record a failure; returns the delay before the next attempt.
    fn failed(&mut self, initial: Duration, max: Duration) -> Duration {
        let factor = 1_u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        let delay = initial.saturating_mul(factor).min(max);

        self.failures = self.failures.saturating_add(1);
        self.retry_after = Some(Instant::now() + delay);

        delay
    }
}

impl MediaFinishedListener for AutoAdvance {
    #[named]
    fn on_media_finished(&self) {
        let Some(controller) = self.controller.upgrade() else {
            return;
        };

        tracing::info!(target: method_path!("AutoAdvance"),
                       index = controller.lock_playlist().index(),
                       "media finished, playing next");

        controller.spawn_command("next", |c| async move { c.next().await });
    }
}

fn log_playlist_error(method_path: &str, err: anyhow::Error) {
    tracing::error!(method_path,
                    ?err,
                    "playlist error, nothing sent");
}

/// Clamp to >= 0, then to the duration when known, then into the seekable range when known.
pub fn clamp_seek_target(target: f64, status: &MediaStatus) -> f64 {
    let mut target = target.max(0.0);

    if status.duration > 0.0 && target > status.duration {
        target = status.duration;
    }

    if status.seek_range_start >= 0.0 && target < status.seek_range_start {
        target = status.seek_range_start;
    }

    if status.seek_range_end >= 0.0 && target > status.seek_range_end {
        target = status.seek_range_end;
    }

    target
}

/// `level + delta`, clamped to `[0, 1]`.
pub fn stepped_volume(level: f64, delta: f64) -> f64 {
    (level + delta).clamp(0.0, 1.0)
}

#[cfg(test)]
mod test {
    use super::*;

    fn status_with(duration: f64, start: f64, end: f64) -> MediaStatus {
        MediaStatus {
            duration,
            seek_range_start: start,
            seek_range_end: end,
            ..MediaStatus::default()
        }
    }

    #[test]
    fn seek_clamps_into_range() {
        let status = status_with(100.0, 10.0, 90.0);
        assert_eq!(clamp_seek_target(200.0, &status), 90.0);
        assert_eq!(clamp_seek_target(-5.0, &status), 10.0);
        assert_eq!(clamp_seek_target(42.0, &status), 42.0);
    }

    #[test]
    fn seek_clamps_to_duration_without_range() {
        let status = status_with(100.0, -1.0, -1.0);
        assert_eq!(clamp_seek_target(150.0, &status), 100.0);
        assert_eq!(clamp_seek_target(-1.0, &status), 0.0);

        let unknown = MediaStatus::default();
        assert_eq!(clamp_seek_target(1e6, &unknown), 1e6);
        assert_eq!(clamp_seek_target(f64::NAN, &unknown), 0.0);
    }

    #[test]
    fn volume_steps_stay_in_bounds() {
        let mut level = 0.95;
        for _ in 0..3 {
            level = stepped_volume(level, VOLUME_STEP);
            assert!(level <= 1.0);
        }
        assert_eq!(level, 1.0);

        let mut level = 0.05;
        for _ in 0..3 {
            level = stepped_volume(level, -VOLUME_STEP);
            assert!(level >= 0.0);
        }
        assert_eq!(level, 0.0);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let initial = Duration::from_millis(500);
        let max = Duration::from_secs(30);
        let mut backoff = Backoff::default();

        assert!(backoff.check().is_ok());
        assert_eq!(backoff.failed(initial, max), Duration::from_millis(500));
        assert!(backoff.check().is_err());
        assert_eq!(backoff.failed(initial, max), Duration::from_secs(1));
        assert_eq!(backoff.failed(initial, max), Duration::from_secs(2));

        for _ in 0..40 {
            backoff.failed(initial, max);
        }
        assert_eq!(backoff.failed(initial, max), max);
    }
}
