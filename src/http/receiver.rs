use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use ffmpeg_codec::{DecoderSettings, PackedFormat};
use reqwest::StatusCode;

use super::server::FrameEnvelope;
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::pipeline::{DecodeStage, ReceiveOutcome};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls an [`HttpSender`](super::HttpSender) for its latest packet and decodes it.
///
/// Packets published between two polls are never seen, so the picture can show
/// artefacts until the next key frame; decoder faults are logged and reported as
/// `NeedMoreData` rather than ending the stream. Conversion faults, such as the
/// sender changing resolution, are returned.
pub struct HttpReceiver {
    stage: DecodeStage,
    client: reqwest::Client,
    frame_url: String,
    last_timestamp: Option<i64>,
    polls: u64,
}

impl HttpReceiver {
    pub fn new(base_url: &str, settings: DecoderSettings, format: PackedFormat) -> Result<Self> {
        let stage = DecodeStage::open(settings, format)?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| StreamError::Setup(e.into()))?;
        let frame_url = format!("{}/frame", base_url.trim_end_matches('/'));
        log::info!("polling {}", frame_url);

        Ok(Self {
            stage,
            client,
            frame_url,
            last_timestamp: None,
            polls: 0,
        })
    }

    pub fn from_config(config: &StreamConfig, host: &str) -> Result<Self> {
        let format = config.packed_format().map_err(StreamError::Setup)?;
        let base_url = format!("http://{}:{}", host, config.network.http_port);
        Self::new(&base_url, config.decoder_settings(), format)
    }

    pub fn frame_url(&self) -> &str {
        &self.frame_url
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn frames_decoded(&self) -> u64 {
        self.stage.frames_decoded()
    }

    /// Fetches `/frame` once. No frame yet, an already seen timestamp and a codec
    /// that is still buffering all come back as `NeedMoreData`.
    pub async fn receive_frame(&mut self) -> Result<ReceiveOutcome<'_>> {
        self.polls += 1;
        let response = self.client.get(&self.frame_url).send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NO_CONTENT => return Ok(ReceiveOutcome::NeedMoreData),
            status => return Err(StreamError::HttpStatus(status.as_u16())),
        }

        let envelope: FrameEnvelope = response.json().await?;
        if self.last_timestamp == Some(envelope.timestamp) {
            return Ok(ReceiveOutcome::NeedMoreData);
        }
        let packet = STANDARD
            .decode(envelope.frame.as_bytes())
            .map_err(|e| StreamError::Payload(e.to_string()))?;
        if packet.is_empty() {
            return Err(StreamError::Payload("empty frame".to_string()));
        }
        self.last_timestamp = Some(envelope.timestamp);
        log::trace!(
            "fetched packet {} of {} bytes",
            envelope.timestamp,
            packet.len()
        );

        match self.stage.decode(&packet, Some(envelope.timestamp)) {
            // a missed reference frame only spoils pictures until the next key frame
            Err(StreamError::Codec(e)) => {
                log::warn!("dropping packet {}: {}", envelope.timestamp, e);
                Ok(ReceiveOutcome::NeedMoreData)
            }
            other => other,
        }
    }
}
