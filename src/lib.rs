//! Control media playback on a cast receiver over the Cast v2 protocol: a framed TLS
//! channel, receiver and media session tracking, and a playlist driven controller.

// #![deny(warnings)]

#[macro_use]
mod util;
pub use util::named;

pub use anyhow::Error;
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(feature = "cli")]
pub mod args;
pub mod cast;
pub mod channel;
pub mod codec;
pub mod config;
pub mod controller;
pub mod mdns;
pub mod media;
pub mod message;
pub mod mime;
pub mod payload;
pub mod playlist;
pub mod receiver;
pub mod status;
pub mod stream_restart;
pub mod transport;
pub mod types;

pub use config::{Config, SeekMode};
pub use controller::PlaybackController;
