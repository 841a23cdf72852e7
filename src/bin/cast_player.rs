use cast_player::{
    self as lib,
    media::MediaStatus,
    status::{StatusMessage, StatusUpdate},
    stream_restart::StreamRestartHelper,
    transport::TlsConnector,
    PlaybackController,
    Result,
};
use clap::Parser;
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use std::{sync::Arc, time::Duration};
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::LinesStream;

#[derive(clap::Parser, Clone, Debug)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log bunyan JSON to stdout instead of pretty text to stderr.
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(clap::Subcommand, Clone, Debug)]
enum Command {
    /// List cast devices found with mDNS.
    Devices(DevicesArgs),

    /// Play URLs on a device, controlled by line commands on stdin.
    Play(PlayArgs),
}

#[derive(clap::Args, Clone, Debug)]
struct DevicesArgs {
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

#[derive(clap::Args, Clone, Debug)]
struct PlayArgs {
    #[clap(flatten)]
    target: lib::args::TargetArgs,

    #[clap(flatten)]
    player: lib::args::PlayerArgs,

    #[clap(flatten)]
    playlist: lib::args::PlaylistArgs,

    /// Seek live streams back to the start when the device joins them late.
    #[arg(long)]
    stream_restart: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum LineCommand {
    PlayOrPause,
    Stop,
    Next,
    Previous,
    Restart,
    Seek(f64),
    VolumeUp,
    VolumeDown,
    Mute,
    Quit,
}

enum Event {
    Line(std::io::Result<String>),
    Status(StatusUpdate),
    StdinClosed,
}

const COMMAND_HELP: &str = "\
commands: p play/pause, s stop, n next, b previous, r restart,
          f/F forward 60/600 s, rw/RW rewind 60/600 s,
          +/- volume, m mute, q quit";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_json)?;

    tracing::debug!(?args, "args");

    match args.command {
        Command::Devices(sub_args) => devices_main(sub_args).await,
        Command::Play(sub_args) => play_main(sub_args).await,
    }
}

async fn devices_main(sub_args: DevicesArgs) -> Result<()> {
    let devices = lib::mdns::discover(Duration::from_secs(sub_args.timeout_secs)).await?;

    if devices.is_empty() {
        println!("No devices found");
    }

    for device in devices.iter() {
        println!("{device}");
    }

    Ok(())
}

async fn play_main(sub_args: PlayArgs) -> Result<()> {
    if sub_args.playlist.is_empty() {
        anyhow::bail!("Nothing to play: pass URLs or `--playlist FILE`");
    }

    let addr = sub_args.target.resolve_to_socket_addr().await?;
    let config = sub_args.player.to_config();
    let poll_interval = config.status_poll_interval;

    let controller = PlaybackController::new(config, TlsConnector::new(addr));

    controller.set_playlist(sub_args.playlist.urls.clone());
    if let Some(ref path) = sub_args.playlist.playlist {
        controller.load_playlist_file(path)?;
    }

    if sub_args.stream_restart {
        let _helper: Arc<StreamRestartHelper> = StreamRestartHelper::attach(&controller);
    }

    if !poll_interval.is_zero() {
        controller.start_status_timer(None).await?;
    }

    println!("{COMMAND_HELP}");

    let lines = LinesStream::new(tokio::io::BufReader::new(tokio::io::stdin()).lines())
                    .map(Event::Line)
                    .chain(futures::stream::once(futures::future::ready(Event::StdinClosed)));
    let statuses = controller.listen_status().map(Event::Status);

    let events = (lines, statuses).merge();
    tokio::pin!(events);

    while let Some(event) = events.next().await {
        let line = match event {
            Event::Status(update) => {
                print_status(&update);
                continue;
            },
            Event::StdinClosed => break,
            Event::Line(line) => line?,
        };

        let Some(command) = parse_command(&line) else {
            if !line.trim().is_empty() {
                println!("{COMMAND_HELP}");
            }
            continue;
        };

        if command == LineCommand::Quit {
            break;
        }

        if let Err(err) = run_command(&controller, command).await {
            tracing::warn!(?err, ?command, "command failed");
            eprintln!("{command:?} failed: {err}");
        }
    }

    controller.stop_status_timer().await;
    controller.stop().await?;

    Ok(())
}

fn parse_command(line: &str) -> Option<LineCommand> {
    Some(match line.trim() {
        "p" => LineCommand::PlayOrPause,
        "s" => LineCommand::Stop,
        "n" => LineCommand::Next,
        "b" => LineCommand::Previous,
        "r" => LineCommand::Restart,
        "f" => LineCommand::Seek(60.0),
        "F" => LineCommand::Seek(600.0),
        "rw" => LineCommand::Seek(-60.0),
        "RW" => LineCommand::Seek(-600.0),
        "+" => LineCommand::VolumeUp,
        "-" => LineCommand::VolumeDown,
        "m" => LineCommand::Mute,
        "q" => LineCommand::Quit,
        _ => return None,
    })
}

async fn run_command(controller: &PlaybackController, command: LineCommand) -> Result<()> {
    match command {
        LineCommand::PlayOrPause => controller.play_or_pause().await,
        LineCommand::Stop => controller.stop().await,
        LineCommand::Next => controller.next().await,
        LineCommand::Previous => controller.previous().await,
        LineCommand::Restart => controller.seek(0.0).await,
        LineCommand::Seek(delta) => controller.seek_diff(delta).await,
        LineCommand::VolumeUp => controller.increase_volume_level().await,
        LineCommand::VolumeDown => controller.decrease_volume_level().await,
        LineCommand::Mute => controller.toggle_volume_muted().await,
        LineCommand::Quit => Ok(()),
    }
}

fn print_status(update: &StatusUpdate) {
    let time = update.time.format("%H:%M:%S");

    match update.msg {
        StatusMessage::Media(ref status) => println!("{time} {}", media_line(status)),
        StatusMessage::MediaFinished => println!("{time} finished"),
        StatusMessage::Receiver(ref status) => {
            println!("{time} volume {level:.2}{muted}",
                     level = status.volume_level,
                     muted = if status.volume_muted { " (muted)" } else { "" });
        },
        _ => (),
    }
}

fn media_line(status: &MediaStatus) -> String {
    let mut line = format!("{state:<9} {current:>8.1}",
                           state = status.player_state.as_str(),
                           current = status.current_time);

    if status.duration > 0.0 {
        line.push_str(&format!(" / {:.1}", status.duration));
    }

    if status.cast_error_code != 0 {
        line.push_str(&format!(" error {}", status.cast_error_code));
    }

    line.push_str(&format!("  {}", status.content_id));
    line
}

#[derive(Eq, PartialEq)]
enum LogMode {
    PrettyAnsi,
    Pretty,
    Json,
}

fn init_logging(log_json: bool) -> Result<()> {
    use std::io::IsTerminal;
    use tracing_bunyan_formatter::{
        BunyanFormattingLayer,
        JsonStorageLayer,
    };
    use tracing_subscriber::{
        EnvFilter,
        filter::LevelFilter,
        fmt,
        prelude::*,
    };

    let log_mode =
        if log_json {
            LogMode::Json
        } else if std::io::stderr().is_terminal() {
            LogMode::PrettyAnsi
        } else {
            LogMode::Pretty
        };

    tracing_subscriber::Registry::default()
        .with(match log_mode {
                  LogMode::PrettyAnsi | LogMode::Pretty => {
                      Some(fmt::Layer::new()
                               .event_format(fmt::format()
                                                 .pretty()
                                                 .with_ansi(log_mode == LogMode::PrettyAnsi)
                                                 .with_timer(fmt::time::UtcTime::<_>::
                                                                 rfc_3339())
                                                 .with_target(true)
                                                 .with_source_location(true)
                                                 .with_thread_ids(true))
                               .with_ansi(log_mode == LogMode::PrettyAnsi)
                               .with_writer(std::io::stderr))
                  },
                  LogMode::Json => None,
             })
        .with(if log_mode == LogMode::Json {
                  Some(JsonStorageLayer
                           .and_then(BunyanFormattingLayer::new(
                               env!("CARGO_CRATE_NAME").to_string(),
                               std::io::stdout)))
              } else {
                  None
              })
        .with(EnvFilter::builder()
                  .with_default_directive(LevelFilter::INFO.into())
                  .parse(std::env::var("RUST_LOG")
                             .unwrap_or(format!("warn,{lib}=info",
                                                lib = "cast_player")))?)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn line_commands() {
        assert_eq!(parse_command(" p\n"), Some(LineCommand::PlayOrPause));
        assert_eq!(parse_command("rw"), Some(LineCommand::Seek(-60.0)));
        assert_eq!(parse_command("F"), Some(LineCommand::Seek(600.0)));
        assert_eq!(parse_command("q"), Some(LineCommand::Quit));
        assert_eq!(parse_command("x"), None);
        assert_eq!(parse_command(""), None);
    }
}
