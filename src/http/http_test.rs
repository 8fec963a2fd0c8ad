use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use ffmpeg_codec::{
    DecoderSettings, EncoderSettings, PackedFormat, encoder_available, solid_color, test_pattern,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{FrameEnvelope, HttpFrameServer, HttpReceiver, HttpSender, SharedLatestFrame};
use crate::error::StreamError;
use crate::pipeline::{EncodeStage, ReceiveOutcome};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 64;

fn codec_available() -> bool {
    if !encoder_available("libx264") {
        eprintln!("skip: encoder libx264 not available");
        return false;
    }
    true
}

async fn sender() -> anyhow::Result<HttpSender> {
    let settings = EncoderSettings {
        width: WIDTH,
        height: HEIGHT,
        ..Default::default()
    };
    Ok(HttpSender::bind(settings, PackedFormat::Rgba, "127.0.0.1:0").await?)
}

fn receiver(sender: &HttpSender) -> anyhow::Result<HttpReceiver> {
    let base = format!("http://{}", sender.local_addr());
    Ok(HttpReceiver::new(
        &base,
        DecoderSettings::default(),
        PackedFormat::Rgba,
    )?)
}

#[tokio::test]
async fn test_frame_is_last_produced_packet() -> anyhow::Result<()> {
    if !codec_available() {
        return Ok(());
    }
    let mut sender = sender().await?;
    let url = format!("http://{}/frame", sender.local_addr());
    let client = reqwest::Client::builder().no_proxy().build()?;

    let request = tokio::spawn(client.get(&url).send());
    while !request.is_finished() {
        sender.poll_requests(Duration::from_millis(20)).await?;
    }
    assert_eq!(request.await??.status(), 204);
    assert!(!sender.is_streaming());

    let mut produced = 0;
    for i in 0..3 {
        produced += sender.send_frame(&test_pattern(WIDTH, HEIGHT, PackedFormat::Rgba, i))?;
    }
    assert!(produced > 0, "encoder produced nothing for 3 frames");
    assert!(sender.is_streaming());
    let stored = sender.latest().snapshot().expect("latest frame");

    let request = tokio::spawn(client.get(&url).send());
    while !request.is_finished() {
        sender.poll_requests(Duration::from_millis(20)).await?;
    }
    let response = request.await??;
    assert_eq!(response.status(), 200);
    let envelope: FrameEnvelope = response.json().await?;
    assert_eq!(STANDARD.decode(&envelope.frame)?, stored.packet);
    assert_eq!((envelope.width, envelope.height), (WIDTH, HEIGHT));
    assert_eq!(envelope.timestamp, 3);
    Ok(())
}

#[tokio::test]
async fn test_detached_server_rejects_polling() -> anyhow::Result<()> {
    if !codec_available() {
        return Ok(());
    }
    let mut sender = sender().await?;
    let cancel = CancellationToken::new();
    let handle = sender.spawn_server(cancel.clone())?;

    assert!(matches!(
        sender.poll_requests(Duration::from_millis(1)).await,
        Err(StreamError::ServerDetached)
    ));
    assert!(matches!(
        sender.spawn_server(cancel.clone()),
        Err(StreamError::ServerDetached)
    ));

    cancel.cancel();
    handle.await?;
    Ok(())
}

#[tokio::test]
async fn test_polling_receiver_decodes_frames() -> anyhow::Result<()> {
    if !codec_available() {
        return Ok(());
    }
    let mut sender = sender().await?;
    let cancel = CancellationToken::new();
    let handle = sender.spawn_server(cancel.clone())?;
    let mut receiver = receiver(&sender)?;

    assert!(matches!(
        receiver.receive_frame().await?,
        ReceiveOutcome::NeedMoreData
    ));

    let color = (30u8, 180u8, 60u8);
    let frame = solid_color(WIDTH, HEIGHT, PackedFormat::Rgba, color);
    let mut ready = 0;
    for _ in 0..5 {
        sender.send_frame(&frame)?;
        if let ReceiveOutcome::Frame(decoded) = receiver.receive_frame().await? {
            assert_eq!((decoded.width, decoded.height), (WIDTH, HEIGHT));
            assert_eq!(decoded.format, PackedFormat::Rgba);
            let px = &decoded.data[0..4];
            assert!(px[0].abs_diff(color.0) <= 20, "red {}", px[0]);
            assert!(px[1].abs_diff(color.1) <= 20, "green {}", px[1]);
            assert!(px[2].abs_diff(color.2) <= 20, "blue {}", px[2]);
            ready += 1;
        }
    }
    assert!(ready >= 1, "no frame decoded");

    // nothing new published: the same timestamp is not decoded twice
    let decoded = receiver.frames_decoded();
    assert!(matches!(
        receiver.receive_frame().await?,
        ReceiveOutcome::NeedMoreData
    ));
    assert_eq!(receiver.frames_decoded(), decoded);
    assert_eq!(receiver.last_timestamp(), Some(5));

    cancel.cancel();
    handle.await?;
    Ok(())
}

#[tokio::test]
async fn test_receiver_reports_missing_server() -> anyhow::Result<()> {
    if !codec_available() {
        return Ok(());
    }
    let addr = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await?
        .local_addr()?;
    let mut receiver = HttpReceiver::new(
        &format!("http://{}/", addr),
        DecoderSettings::default(),
        PackedFormat::Bgra,
    )?;
    assert_eq!(receiver.frame_url(), format!("http://{}/frame", addr));
    assert!(matches!(
        receiver.receive_frame().await,
        Err(StreamError::Http(_))
    ));
    Ok(())
}

async fn fetch_frame(sender: &mut HttpSender) -> anyhow::Result<FrameEnvelope> {
    let url = format!("http://{}/frame", sender.local_addr());
    let client = reqwest::Client::builder().no_proxy().build()?;
    let request: JoinHandle<reqwest::Result<reqwest::Response>> =
        tokio::spawn(client.get(url).send());
    while !request.is_finished() {
        sender.poll_requests(Duration::from_millis(20)).await?;
    }
    let response = request.await??;
    assert_eq!(response.status(), 200);
    Ok(response.json().await?)
}

#[tokio::test]
async fn test_flushed_packet_gets_new_timestamp() -> anyhow::Result<()> {
    if !codec_available() {
        return Ok(());
    }
    // lookahead makes the encoder hold frames back until flush
    let settings = EncoderSettings {
        width: WIDTH,
        height: HEIGHT,
        low_latency: false,
        ..Default::default()
    };
    let mut sender = HttpSender::bind(settings, PackedFormat::Rgba, "127.0.0.1:0").await?;
    for i in 0..5 {
        sender.send_frame(&test_pattern(WIDTH, HEIGHT, PackedFormat::Rgba, i))?;
    }
    let before = sender.latest().snapshot().map(|frame| frame.sequence);

    let flushed = sender.finish()?;
    assert!(flushed > 0, "encoder held nothing back");
    let stored = sender.latest().snapshot().expect("flushed packet published");
    if let Some(before) = before {
        assert!(stored.sequence > before, "{} !> {}", stored.sequence, before);
    }

    let envelope = fetch_frame(&mut sender).await?;
    assert_eq!(envelope.timestamp, stored.sequence);
    assert_eq!(STANDARD.decode(&envelope.frame)?, stored.packet);
    Ok(())
}

#[tokio::test]
async fn test_resolution_change_reaches_receiver() -> anyhow::Result<()> {
    if !codec_available() {
        return Ok(());
    }
    let latest = SharedLatestFrame::new();
    let server = HttpFrameServer::bind("127.0.0.1:0", latest.clone()).await?;
    let base = format!("http://{}", server.local_addr()?);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.run(cancel.clone()));
    let mut receiver = HttpReceiver::new(&base, DecoderSettings::default(), PackedFormat::Bgra)?;

    let mut result = Ok(());
    'sizes: for (width, height) in [(WIDTH, HEIGHT), (WIDTH / 2, HEIGHT / 2)] {
        let settings = EncoderSettings {
            width,
            height,
            ..Default::default()
        };
        let mut stage = EncodeStage::open(settings, PackedFormat::Bgra)?;
        for i in 0..3 {
            let frame = test_pattern(width, height, PackedFormat::Bgra, i);
            for packet in stage.encode(&frame)? {
                latest.publish(packet.data().clone(), width, height, stage.frame_count());
                match receiver.receive_frame().await {
                    Ok(_) => {}
                    Err(e) => {
                        result = Err(e);
                        break 'sizes;
                    }
                }
            }
        }
    }

    assert!(
        matches!(result, Err(StreamError::Conversion(_))),
        "got {:?}",
        result
    );
    assert!(receiver.frames_decoded() >= 1);

    cancel.cancel();
    handle.await?;
    Ok(())
}
