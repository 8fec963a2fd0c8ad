use crate::framing::MAX_PACKET_SIZE;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Socket bind/listen/connect or session construction failed.
    #[error("setup failed: {0}")]
    Setup(#[source] anyhow::Error),

    #[error("codec error: {0}")]
    Codec(#[source] anyhow::Error),

    /// Pixel conversion failed, or a decoded frame no longer matches the bound
    /// conversion context.
    #[error("conversion error: {0}")]
    Conversion(#[source] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    PeerClosed,

    #[error("invalid packet length {len} (allowed 1..={max})", max = MAX_PACKET_SIZE)]
    InvalidLength { len: usize },

    #[error("frame buffer has {actual} bytes, expected {expected}")]
    InvalidFrameSize { expected: usize, actual: usize },

    #[error("no client connected")]
    NotConnected,

    #[error("http server is running as a background task")]
    ServerDetached,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected http status {0}")]
    HttpStatus(u16),

    #[error("malformed frame payload: {0}")]
    Payload(String),
}

impl StreamError {
    /// Faults that end the current connection but not the process.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StreamError::Io(_) | StreamError::PeerClosed | StreamError::InvalidLength { .. }
        )
    }
}
