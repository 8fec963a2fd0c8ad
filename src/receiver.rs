use std::net::SocketAddr;

use ffmpeg_codec::{DecoderSettings, PackedFormat};
use futures::StreamExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::FramedRead;

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::framing::PacketCodec;
use crate::pipeline::{DecodeStage, ReceiveOutcome};

/// Receives packets from a [`TcpSender`](crate::sender::TcpSender) and turns them
/// back into packed frames, one packet per `receive_frame` call.
pub struct TcpReceiver {
    // Field order is drop order: codec and conversion, then the socket.
    stage: DecodeStage,
    stream: Option<FramedRead<TcpStream, PacketCodec>>,
    peer: SocketAddr,
    packets_received: u64,
}

impl TcpReceiver {
    pub async fn connect(
        addr: impl ToSocketAddrs,
        settings: DecoderSettings,
        format: PackedFormat,
    ) -> Result<Self> {
        let stage = DecodeStage::open(settings, format)?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| StreamError::Setup(e.into()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| StreamError::Setup(e.into()))?;
        let peer = stream
            .peer_addr()
            .map_err(|e| StreamError::Setup(e.into()))?;
        log::info!("connected to {}", peer);

        Ok(Self {
            stage,
            stream: Some(FramedRead::new(stream, PacketCodec)),
            peer,
            packets_received: 0,
        })
    }

    pub async fn from_config(config: &StreamConfig, host: &str) -> Result<Self> {
        let format = config.packed_format().map_err(StreamError::Setup)?;
        Self::connect(
            (host, config.network.tcp_port),
            config.decoder_settings(),
            format,
        )
        .await
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn frames_decoded(&self) -> u64 {
        self.stage.frames_decoded()
    }

    /// Reads one framed packet and decodes it.
    ///
    /// `NeedMoreData` means the codec is still buffering and the caller should call
    /// again. A returned frame borrows an internal buffer that the next call
    /// overwrites. Transport faults close the connection.
    pub async fn receive_frame(&mut self) -> Result<ReceiveOutcome<'_>> {
        let stream = self.stream.as_mut().ok_or(StreamError::NotConnected)?;
        let packet = match stream.next().await {
            Some(Ok(packet)) => packet,
            Some(Err(e)) => {
                log::error!("receive from {} failed: {}", self.peer, e);
                self.stream = None;
                return Err(e);
            }
            None => {
                log::info!("connection closed by {}", self.peer);
                self.stream = None;
                return Err(StreamError::PeerClosed);
            }
        };
        self.packets_received += 1;
        log::trace!("received packet of {} bytes", packet.len());

        self.stage.decode(&packet, None)
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            log::info!("connection to {} closed", self.peer);
        }
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod stream_test;
