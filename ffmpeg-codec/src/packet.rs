use std::fmt::{Display, Formatter};

use bytes::Bytes;

/// One unit of compressed bitstream, not necessarily a whole frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPacket {
    data: Bytes,
    pts: i64,
    is_key: bool,
}

impl CompressedPacket {
    pub fn new(data: impl Into<Bytes>, pts: i64, is_key: bool) -> Self {
        Self {
            data: data.into(),
            pts,
            is_key,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Presentation index assigned by the encoder's frame counter.
    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }
}

impl From<&ffmpeg_next::codec::packet::Packet> for CompressedPacket {
    fn from(packet: &ffmpeg_next::codec::packet::Packet) -> Self {
        Self {
            data: packet
                .data()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
            pts: packet.pts().unwrap_or(0),
            is_key: packet.is_key(),
        }
    }
}

impl Display for CompressedPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "CompressedPacket size: {}, pts: {}, is_key: {}",
            self.data.len(),
            self.pts,
            self.is_key
        )
    }
}
