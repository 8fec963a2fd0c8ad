//! Length-prefixed packet framing used on the TCP transport, in both directions.
//!
//! Wire unit:
//! ```text
//! ┌─────────────────────┬──────────────────────────┐
//! │ Length (4B, BE u32) │ Payload (Length bytes)   │
//! └─────────────────────┴──────────────────────────┘
//! ```
//! No handshake, magic or version field. A length of 0 or above
//! [`MAX_PACKET_SIZE`] is a protocol violation and ends the connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StreamError;

pub const HEADER_SIZE: usize = 4;

/// Hard cap on a single packet payload: 1 MiB.
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct PacketCodec;

impl PacketCodec {
    fn check_len(len: usize) -> Result<(), StreamError> {
        if len == 0 || len > MAX_PACKET_SIZE {
            return Err(StreamError::InvalidLength { len });
        }
        Ok(())
    }
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        // Rejected before any payload byte is waited for.
        Self::check_len(len)?;

        let total = HEADER_SIZE + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => {
                log::debug!("peer closed with {} bytes of a partial packet", src.len());
                Err(StreamError::PeerClosed)
            }
        }
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = StreamError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Self::check_len(item.len())?;
        dst.reserve(HEADER_SIZE + item.len());
        dst.put_u32(item.len() as u32);
        dst.put_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
#[path = "framing_test.rs"]
mod framing_test;
