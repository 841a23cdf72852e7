use anyhow::bail;
use crate::{
    config::{Config, SeekMode},
    mdns,
    Result,
    transport::DEFAULT_PORT,
    util::named,
};
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

/// Which device to play on. Exactly one option is required.
#[derive(clap::Args, Clone, Debug)]
#[group(id = "target", multiple = false, required = true)]
pub struct TargetArgs {
    /// The first device to answer an mDNS query.
    #[arg(long)]
    pub mdns_first: bool,

    /// The device with this friendly name, e.g. "Living Room".
    #[arg(long)]
    pub mdns_display_name: Option<String>,

    /// The device with this mDNS `id`.
    #[arg(long)]
    pub mdns_id: Option<String>,

    /// Device IP address, connecting on port 8009.
    #[arg(long, value_name = "IP")]
    pub ip: Option<IpAddr>,

    /// Device IP address and port.
    #[arg(long, value_name = "IP:PORT")]
    pub addr: Option<SocketAddr>,
}

#[derive(Clone, Debug)]
pub enum Target {
    Mdns(mdns::Target),
    SocketAddr(SocketAddr),
}

/// Playback options that map onto `Config`.
#[derive(clap::Args, Clone, Debug)]
pub struct PlayerArgs {
    /// Receiver application to launch.
    #[arg(long, default_value = crate::config::app::DEFAULT_MEDIA_RECEIVER)]
    pub app_id: String,

    #[arg(long, value_enum, default_value_t = SeekMode::default())]
    pub seek_mode: SeekMode,

    /// Status poll interval in milliseconds. 0 disables polling.
    #[arg(long, default_value_t = 2000)]
    pub poll_ms: u64,

    /// Seconds to wait for the receiver application to start.
    #[arg(long, default_value_t = 10)]
    pub launch_timeout_secs: u64,
}

/// Where the playlist comes from: URLs on the command line, a playlist file, or both.
#[derive(clap::Args, Clone, Debug)]
pub struct PlaylistArgs {
    /// File with one URL per line. Blank lines are skipped.
    #[arg(long, value_name = "FILE")]
    pub playlist: Option<PathBuf>,

    /// Media URLs, played in order before any playlist file entries.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,
}

impl TargetArgs {
    /// The one target given. clap enforces exactly one when parsing process arguments.
    pub fn to_target(&self) -> Result<Target> {
        let target = match (self.addr, self.ip) {
            (Some(addr), _) => Target::SocketAddr(addr),
            (None, Some(ip)) => Target::SocketAddr(SocketAddr::from((ip, DEFAULT_PORT))),
            (None, None) => Target::Mdns(
                match (self.mdns_first, &self.mdns_display_name, &self.mdns_id) {
                    (true, _, _) => mdns::Target::First,
                    (false, Some(name), _) => mdns::Target::DisplayName(name.clone()),
                    (false, None, Some(id)) => mdns::Target::Id(id.clone()),
                    (false, None, None) =>
                        bail!("TargetArgs::to_target: no target given\n\
                               _ args = {self:?}"),
                }),
        };

        Ok(target)
    }

    pub async fn resolve_to_socket_addr(&self) -> Result<SocketAddr> {
        self.to_target()?.resolve().await
    }
}

impl Target {
    /// Socket address to connect to, browsing mDNS when needed.
    #[named]
    pub async fn resolve(&self) -> Result<SocketAddr> {
        match self {
            Target::SocketAddr(addr) => Ok(*addr),
            Target::Mdns(target) => {
                let device = mdns::resolve_target(target, mdns::DEFAULT_RESOLVE_TIMEOUT).await?;
                tracing::info!(target: method_path!("Target"),
                               ?device,
                               "resolved device");
                Ok(device.addr)
            },
        }
    }
}

impl PlayerArgs {
    pub fn to_config(&self) -> Config {
        Config {
            app_id: self.app_id.clone(),
            launch_timeout: Duration::from_secs(self.launch_timeout_secs),
            seek_mode: self.seek_mode,
            status_poll_interval: Duration::from_millis(self.poll_ms),
            ..Config::default()
        }
    }
}

impl PlaylistArgs {
    pub fn is_empty(&self) -> bool {
        self.playlist.is_none() && self.urls.is_empty()
    }
}
