use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use framecast::{
    ReceiveOutcome, StreamConfig, StreamError, TcpReceiver, TcpSender,
    http::{HttpReceiver, HttpSender},
    ppm, test_pattern,
};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "framecast", version, about = "Stream encoded video frames over TCP or HTTP")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    width: Option<u32>,

    #[arg(long, global = true)]
    height: Option<u32>,

    #[arg(long, global = true)]
    fps: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream a test pattern to one TCP client.
    Send(SendArgs),
    /// Connect to a TCP sender and decode its stream.
    Receive(ReceiveArgs),
    /// Publish a test pattern over HTTP.
    ServeHttp(SendArgs),
    /// Poll an HTTP sender and decode its frames.
    ReceiveHttp(ReceiveArgs),
    /// Print the default configuration.
    GenConfig {
        /// Write to a file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(long)]
    port: Option<u16>,
    /// Stop after this many frames instead of running until interrupted.
    #[arg(long)]
    frames: Option<u32>,
}

#[derive(Args, Debug)]
struct ReceiveArgs {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long)]
    port: Option<u16>,
    /// Write every Nth decoded frame as a PPM image into this directory.
    #[arg(long, value_name = "DIR")]
    dump_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 30)]
    dump_every: u64,
}

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_codec", log::LevelFilter::Info)
        .filter_module("framecast", log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupted");
            ctrl_c.cancel();
        }
    });

    if let Err(e) = run(cli, cancel).await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => StreamConfig::load(path)?,
        None => StreamConfig::default(),
    };
    if let Some(width) = cli.width {
        config.video.width = width;
    }
    if let Some(height) = cli.height {
        config.video.height = height;
    }
    if let Some(fps) = cli.fps {
        config.video.frame_rate = fps;
    }

    match cli.command {
        Command::Send(args) => {
            if let Some(port) = args.port {
                config.network.tcp_port = port;
            }
            send_tcp(&config, args.frames, cancel).await
        }
        Command::Receive(args) => {
            if let Some(port) = args.port {
                config.network.tcp_port = port;
            }
            receive_tcp(&config, &args, cancel).await
        }
        Command::ServeHttp(args) => {
            if let Some(port) = args.port {
                config.network.http_port = port;
            }
            serve_http(&config, args.frames, cancel).await
        }
        Command::ReceiveHttp(args) => {
            if let Some(port) = args.port {
                config.network.http_port = port;
            }
            receive_http(&config, &args, cancel).await
        }
        Command::GenConfig { output } => {
            let text = StreamConfig::default().to_toml()?;
            match output {
                Some(path) => std::fs::write(&path, text)
                    .with_context(|| format!("write {}", path.display()))?,
                None => print!("{}", text),
            }
            Ok(())
        }
    }
}

fn frame_interval(config: &StreamConfig) -> Duration {
    Duration::from_secs(1) / config.video.frame_rate.max(1)
}

async fn send_tcp(
    config: &StreamConfig,
    frames: Option<u32>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let format = config.packed_format()?;
    let (width, height) = (config.video.width, config.video.height);
    let mut sender = TcpSender::from_config(config).await?;

    tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        peer = sender.wait_connection() => { peer?; }
    }

    let mut ticker = tokio::time::interval(frame_interval(config));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut index = 0u32;
    while frames.is_none_or(|limit| index < limit) {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let frame = test_pattern(width, height, format, index);
        match sender.send_frame(&frame).await {
            Ok(_) => {}
            Err(e) if e.is_transport() => {
                log::warn!("client gone: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        index += 1;
    }

    let flushed = sender.finish().await?;
    log::info!(
        "sent {} frames in {} packets ({} at flush)",
        sender.frames_sent(),
        sender.packets_sent(),
        flushed
    );
    Ok(())
}

async fn serve_http(
    config: &StreamConfig,
    frames: Option<u32>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let format = config.packed_format()?;
    let (width, height) = (config.video.width, config.video.height);
    let interval = frame_interval(config);
    let poll_timeout = config.http_poll_timeout();
    let mut sender = HttpSender::from_config(config).await?;
    log::info!("viewer at http://{}/viewer", sender.local_addr());

    let mut index = 0u32;
    while !cancel.is_cancelled() {
        let next_frame = Instant::now() + interval;
        if frames.is_none_or(|limit| index < limit) {
            sender.send_frame(&test_pattern(width, height, format, index))?;
            index += 1;
        }
        // serve requests for the rest of the frame slot
        loop {
            let remaining = next_frame.saturating_duration_since(Instant::now());
            if remaining.is_zero() || cancel.is_cancelled() {
                break;
            }
            if let Err(e) = sender.poll_requests(remaining.min(poll_timeout)).await {
                log::warn!("http poll failed: {}", e);
            }
        }
    }
    Ok(())
}

async fn receive_tcp(
    config: &StreamConfig,
    args: &ReceiveArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut receiver = TcpReceiver::from_config(config, &args.host).await?;
    let mut frames = 0u64;
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = receiver.receive_frame() => outcome,
        };
        match outcome {
            Ok(ReceiveOutcome::Frame(frame)) => {
                frames += 1;
                log::debug!("frame {} ({}x{})", frames, frame.width, frame.height);
                if let Some(dir) = &args.dump_dir {
                    if frames % args.dump_every.max(1) == 1 {
                        dump(dir, frames, frame.data, frame.width, frame.height, frame.format)
                            .await?;
                    }
                }
            }
            Ok(ReceiveOutcome::NeedMoreData) => {}
            Err(StreamError::PeerClosed) => break,
            Err(e) => return Err(e.into()),
        }
    }
    log::info!(
        "received {} packets, decoded {} frames",
        receiver.packets_received(),
        frames
    );
    Ok(())
}

async fn receive_http(
    config: &StreamConfig,
    args: &ReceiveArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut receiver = HttpReceiver::from_config(config, &args.host)?;
    let mut ticker = tokio::time::interval(frame_interval(config));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frames = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match receiver.receive_frame().await {
            Ok(ReceiveOutcome::Frame(frame)) => {
                frames += 1;
                log::debug!("frame {} ({}x{})", frames, frame.width, frame.height);
                if let Some(dir) = &args.dump_dir {
                    if frames % args.dump_every.max(1) == 1 {
                        dump(dir, frames, frame.data, frame.width, frame.height, frame.format)
                            .await?;
                    }
                }
            }
            Ok(ReceiveOutcome::NeedMoreData) => {}
            Err(e @ (StreamError::Http(_) | StreamError::HttpStatus(_))) => {
                log::warn!("poll failed: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    log::info!("polled {} times, decoded {} frames", receiver.polls(), frames);
    Ok(())
}

async fn dump(
    dir: &Path,
    index: u64,
    data: &[u8],
    width: u32,
    height: u32,
    format: framecast::PackedFormat,
) -> anyhow::Result<()> {
    let path = dir.join(format!("frame_{:06}.ppm", index));
    ppm::save_frame_as_ppm(&path, data, width, height, format).await?;
    log::info!("saved {}", path.display());
    Ok(())
}
