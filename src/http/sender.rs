use std::net::SocketAddr;
use std::time::Duration;

use ffmpeg_codec::{CompressedPacket, EncoderSettings, PackedFormat};
use tokio::net::ToSocketAddrs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::server::{HttpFrameServer, SharedLatestFrame};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::pipeline::EncodeStage;

/// Encodes frames and publishes the most recent packet over HTTP.
///
/// There is no client session: each `GET /frame` sees whatever packet was stored
/// last. The server is driven either by calling [`poll_requests`](Self::poll_requests)
/// between frames or by detaching it with [`spawn_server`](Self::spawn_server).
pub struct HttpSender {
    stage: EncodeStage,
    latest: SharedLatestFrame,
    server: Option<HttpFrameServer>,
    local_addr: SocketAddr,
}

impl HttpSender {
    pub async fn bind(
        settings: EncoderSettings,
        format: PackedFormat,
        addr: impl ToSocketAddrs,
    ) -> Result<Self> {
        let stage = EncodeStage::open(settings, format)?;
        let latest = SharedLatestFrame::new();
        let server = HttpFrameServer::bind(addr, latest.clone()).await?;
        let local_addr = server.local_addr().map_err(|e| StreamError::Setup(e.into()))?;

        Ok(Self {
            stage,
            latest,
            server: Some(server),
            local_addr,
        })
    }

    pub async fn from_config(config: &StreamConfig) -> Result<Self> {
        let format = config.packed_format().map_err(StreamError::Setup)?;
        Self::bind(config.encoder_settings(), format, config.http_bind_addr()).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn latest(&self) -> &SharedLatestFrame {
        &self.latest
    }

    /// True once a packet has been published.
    pub fn is_streaming(&self) -> bool {
        !self.latest.is_empty()
    }

    pub fn frames_sent(&self) -> i64 {
        self.stage.frame_count()
    }

    /// Encodes one tightly packed frame and publishes the last packet it produced,
    /// replacing the previous one. Returns the number of packets produced.
    pub fn send_frame(&mut self, data: &[u8]) -> Result<usize> {
        let packets = self.stage.encode(data)?;
        self.publish(&packets);
        Ok(packets.len())
    }

    /// Flushes the encoder and publishes the last packet it was holding, under a
    /// timestamp newer than any `send_frame` publication.
    pub fn finish(&mut self) -> Result<usize> {
        let packets = self.stage.flush()?;
        self.publish(&packets);
        Ok(packets.len())
    }

    fn publish(&self, packets: &[CompressedPacket]) {
        if let Some(last) = packets.last() {
            let sequence = self.latest.publish(
                last.data().clone(),
                self.stage.width(),
                self.stage.height(),
                self.stage.frame_count(),
            );
            log::trace!("published {} as {}", last, sequence);
        }
    }

    /// Serves pending requests, waiting at most `timeout` for the first one.
    pub async fn poll_requests(&mut self, timeout: Duration) -> Result<usize> {
        let server = self.server.as_mut().ok_or(StreamError::ServerDetached)?;
        server.poll(timeout).await
    }

    /// Moves the server onto a background task that runs until `cancel` fires.
    /// Frames keep flowing through [`send_frame`](Self::send_frame).
    pub fn spawn_server(&mut self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let server = self.server.take().ok_or(StreamError::ServerDetached)?;
        Ok(tokio::spawn(server.run(cancel)))
    }
}
