use crate::{
    channel::ChannelConfig,
    types::AppId,
};
use std::time::Duration;

/// Well known cast receiver app IDs
pub mod app {
    use crate::types::AppIdConst;

    pub const DEFAULT_MEDIA_RECEIVER: AppIdConst = "CC1AD845";
    pub const BACKDROP: AppIdConst = "E8C28D3C";
}

/// When `PlaybackController::seek` is allowed to send SEEK.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum SeekMode {
    Never,
    Always,

    /// Only when the device reports a seekable range, or the content is a DASH or HLS
    /// manifest.
    #[default]
    StreamingOnly,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Receiver application launched to play media.
    pub app_id: AppId,

    pub channel: ChannelConfig,

    /// Longest wait for the connector to return a stream, including any TLS handshake.
    /// Expiry counts as a failed connection attempt.
    pub connect_timeout: Duration,

    /// Longest wait for the device to answer a LAUNCH.
    pub launch_timeout: Duration,

    /// Delay before retrying after the first failed connection attempt. Doubles on each
    /// further failure.
    pub reconnect_backoff_initial: Duration,
    pub reconnect_backoff_max: Duration,

    pub seek_mode: SeekMode,

    /// Interval for `PlaybackController::start_status_timer` when none is given.
    pub status_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            app_id: app::DEFAULT_MEDIA_RECEIVER.to_string(),
            channel: ChannelConfig::default(),
            connect_timeout: Duration::from_secs(10),
            launch_timeout: Duration::from_secs(10),
            reconnect_backoff_initial: Duration::from_millis(500),
            reconnect_backoff_max: Duration::from_secs(30),
            seek_mode: SeekMode::default(),
            status_poll_interval: Duration::from_secs(2),
        }
    }
}
