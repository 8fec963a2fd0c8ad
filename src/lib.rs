//! Compressed video frame streaming.
//!
//! A sender encodes caller-supplied packed BGRA/RGBA frames and ships the compressed
//! packets either to a single TCP client ([`sender::TcpSender`]) or as the "latest
//! frame" of a small HTTP server ([`http::HttpSender`]). Receivers decode the packets
//! back into packed frames one caller-driven step at a time.

pub mod config;
pub mod error;
pub mod framing;
pub mod http;
pub mod pipeline;
pub mod ppm;
pub mod receiver;
pub mod sender;

pub use config::StreamConfig;
pub use error::{Result, StreamError};
pub use ffmpeg_codec::{PackedFormat, solid_color, test_pattern};
pub use pipeline::{DecodedFrame, ReceiveOutcome};
pub use receiver::TcpReceiver;
pub use sender::{SenderState, TcpSender};
