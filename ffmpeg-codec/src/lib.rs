use std::sync::OnceLock;

/// Registers FFmpeg components. Safe to call from every session constructor:
/// the registration itself runs once per process and later calls return the
/// cached outcome.
pub fn init() -> anyhow::Result<()> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| {
        ffmpeg_next::init().map_err(|e| e.to_string())?;
        ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Error);
        log::debug!("ffmpeg initialised");
        Ok(())
    })
    .clone()
    .map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod converter;
pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod hw;
pub mod packet;

pub use converter::{ConversionKey, PixelConverter};
pub use decoder::{DecoderSettings, VideoDecoder};
pub use encoder::{EncoderSettings, VideoEncoder, encoder_available};
pub use frame::{PackedFormat, RawFrame, solid_color, test_pattern};
pub use packet::CompressedPacket;

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;
