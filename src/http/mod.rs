//! HTTP transport.
//!
//! The sender keeps only the most recent compressed packet and serves it as JSON on
//! `GET /frame`, next to a small browser viewer on `/` and `/viewer`. Receivers poll.

mod receiver;
mod sender;
mod server;

pub use receiver::HttpReceiver;
pub use sender::HttpSender;
pub use server::{
    FrameEnvelope, HttpFrameServer, LatestFrame, MAX_CONNECTIONS_PER_POLL, SharedLatestFrame,
    router,
};

#[cfg(test)]
#[path = "http_test.rs"]
mod http_test;
