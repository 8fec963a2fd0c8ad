use std::net::SocketAddr;

use bytes::Bytes;
use ffmpeg_codec::{EncoderSettings, PackedFormat};
use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::codec::FramedWrite;

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::framing::PacketCodec;
use crate::pipeline::EncodeStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Listening,
    Connected,
    Closed,
}

enum Connection {
    Listening(TcpListener),
    Connected {
        sink: FramedWrite<TcpStream, PacketCodec>,
        peer: SocketAddr,
    },
    Closed,
}

/// Streams encoded frames to exactly one TCP client.
///
/// `bind` opens the codec and starts listening, `wait_connection` accepts the single
/// client and drops the listener, then each `send_frame` writes every packet the
/// encoder produced for that frame.
pub struct TcpSender {
    // Field order is drop order: codec and conversion, then the socket.
    stage: EncodeStage,
    connection: Connection,
    packets_sent: u64,
}

impl TcpSender {
    pub async fn bind(
        settings: EncoderSettings,
        format: PackedFormat,
        addr: impl ToSocketAddrs,
    ) -> Result<Self> {
        let stage = EncodeStage::open(settings, format)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StreamError::Setup(e.into()))?;
        log::info!(
            "waiting for connection on {}",
            listener
                .local_addr()
                .map_err(|e| StreamError::Setup(e.into()))?
        );

        Ok(Self {
            stage,
            connection: Connection::Listening(listener),
            packets_sent: 0,
        })
    }

    pub async fn from_config(config: &StreamConfig) -> Result<Self> {
        let format = config.packed_format().map_err(StreamError::Setup)?;
        Self::bind(config.encoder_settings(), format, config.tcp_bind_addr()).await
    }

    pub fn state(&self) -> SenderState {
        match self.connection {
            Connection::Listening(_) => SenderState::Listening,
            Connection::Connected { .. } => SenderState::Connected,
            Connection::Closed => SenderState::Closed,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.connection {
            Connection::Listening(listener) => Ok(listener.local_addr()?),
            Connection::Connected { sink, .. } => Ok(sink.get_ref().local_addr()?),
            Connection::Closed => Err(StreamError::NotConnected),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.connection {
            Connection::Connected { peer, .. } => Some(*peer),
            _ => None,
        }
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn frames_sent(&self) -> i64 {
        self.stage.frame_count()
    }

    /// Blocks until the one client connects. The listening socket is closed once
    /// the client is accepted. Cancel-safe: if the returned future is dropped
    /// before a client arrives, the sender is still listening.
    pub async fn wait_connection(&mut self) -> Result<SocketAddr> {
        let Connection::Listening(listener) = &self.connection else {
            return Err(StreamError::Setup(anyhow::anyhow!(
                "sender is not listening"
            )));
        };

        let (stream, peer) = listener.accept().await.inspect_err(|e| {
            log::error!("accept failed: {}", e);
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            // keep listening; this client is dropped
            log::warn!("client {} rejected: {}", peer, e);
            return Err(e.into());
        }
        log::info!("client connected from {}", peer);

        // replacing the state drops the listener
        self.connection = Connection::Connected {
            sink: FramedWrite::new(stream, PacketCodec),
            peer,
        };
        Ok(peer)
    }

    /// Encodes one tightly packed frame and sends every packet it produced. Returns
    /// the number of packets written, which is 0 while the encoder is buffering.
    /// A transport fault closes the connection.
    pub async fn send_frame(&mut self, data: &[u8]) -> Result<usize> {
        if !matches!(self.connection, Connection::Connected { .. }) {
            return Err(StreamError::NotConnected);
        }
        let packets = self.stage.encode(data)?;
        let packets = packets.into_iter().map(|p| p.into_data()).collect();
        self.write_packets(packets).await
    }

    /// Flushes the encoder, sends what it was holding and shuts the connection down.
    pub async fn finish(&mut self) -> Result<usize> {
        let packets = self.stage.flush()?;
        let packets = packets.into_iter().map(|p| p.into_data()).collect();
        let sent = self.write_packets(packets).await?;
        self.close().await;
        Ok(sent)
    }

    async fn write_packets(&mut self, packets: Vec<Bytes>) -> Result<usize> {
        let Connection::Connected { sink, peer } = &mut self.connection else {
            return Err(StreamError::NotConnected);
        };
        let count = packets.len();
        let mut result = Ok(());
        for packet in packets {
            log::trace!("sending packet of {} bytes to {}", packet.len(), peer);
            result = sink.feed(packet).await;
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = sink.flush().await;
        }

        match result {
            Ok(()) => {
                self.packets_sent += count as u64;
                Ok(count)
            }
            Err(e) => {
                log::error!("send to {} failed: {}", peer, e);
                self.connection = Connection::Closed;
                Err(e)
            }
        }
    }

    /// Closes whatever socket is held. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Connection::Connected { sink, peer } =
            std::mem::replace(&mut self.connection, Connection::Closed)
        {
            let mut stream = sink.into_inner();
            if let Err(e) = stream.shutdown().await {
                log::debug!("shutdown of {} failed: {}", peer, e);
            }
            log::info!("connection to {} closed", peer);
        }
    }
}
