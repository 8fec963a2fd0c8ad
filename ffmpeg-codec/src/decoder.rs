use crate::{hw::find_hw_decoder, packet::CompressedPacket};

#[derive(Debug, Clone)]
pub struct DecoderSettings {
    pub codec: String,
    pub prefer_hardware: bool,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            codec: "h264".to_string(),
            prefer_hardware: false,
        }
    }
}

/// An open decoder session. Each submitted packet yields at most one frame; a codec
/// that still needs input is reported as `Ok(None)`.
pub struct VideoDecoder {
    inner: ffmpeg_next::codec::decoder::Video,
    codec_name: String,
    decoded: ffmpeg_next::frame::Video,
    frame_count: u64,
}

impl VideoDecoder {
    pub fn open(settings: DecoderSettings) -> anyhow::Result<Self> {
        crate::init()?;
        let sw_codec = ffmpeg_next::decoder::find_by_name(&settings.codec)
            .ok_or(anyhow::anyhow!("decoder not found: {}", settings.codec))?;

        let hw_codec = if settings.prefer_hardware {
            find_hw_decoder(sw_codec.id())
        } else {
            None
        };

        let (inner, codec_name) = match hw_codec {
            Some(hw_codec) => {
                let hw_name = hw_codec.name().to_string();
                match Self::open_codec(hw_codec) {
                    Ok(dec) => (dec, hw_name),
                    Err(e) => {
                        log::warn!(
                            "hardware decoder {} failed: {}, falling back to {}",
                            hw_name,
                            e,
                            settings.codec
                        );
                        (Self::open_codec(sw_codec)?, settings.codec.clone())
                    }
                }
            }
            None => (Self::open_codec(sw_codec)?, settings.codec.clone()),
        };
        log::info!("decoder opened: {}", codec_name);

        Ok(Self {
            inner,
            codec_name,
            decoded: ffmpeg_next::frame::Video::empty(),
            frame_count: 0,
        })
    }

    fn open_codec(codec: ffmpeg_next::Codec) -> anyhow::Result<ffmpeg_next::codec::decoder::Video> {
        let ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        let decoder = ctx.decoder().open_as(codec)?.video()?;
        Ok(decoder)
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    /// Frames produced so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Feeds one packet of bitstream. The returned frame is owned by the decoder and
    /// valid until the next call.
    pub fn decode(
        &mut self,
        data: &[u8],
        pts: Option<i64>,
    ) -> anyhow::Result<Option<&ffmpeg_next::frame::Video>> {
        if data.is_empty() {
            anyhow::bail!("empty packet");
        }
        let mut packet = ffmpeg_next::codec::packet::Packet::copy(data);
        packet.set_pts(pts);
        packet.set_dts(pts);
        self.inner.send_packet(&packet)?;
        self.receive_frame()
    }

    pub fn decode_packet(
        &mut self,
        packet: &CompressedPacket,
    ) -> anyhow::Result<Option<&ffmpeg_next::frame::Video>> {
        self.decode(packet.data(), Some(packet.pts()))
    }

    /// Signals end of stream and returns every frame the codec was still holding,
    /// copied out since they outlive the internal buffer.
    pub fn flush(&mut self) -> anyhow::Result<Vec<ffmpeg_next::frame::Video>> {
        self.inner.send_eof()?;
        let mut frames = Vec::new();
        while let Some(frame) = self.receive_frame()? {
            frames.push(frame.clone());
        }
        Ok(frames)
    }

    fn receive_frame(&mut self) -> anyhow::Result<Option<&ffmpeg_next::frame::Video>> {
        match self.inner.receive_frame(&mut self.decoded) {
            Ok(()) => {
                self.frame_count += 1;
                Ok(Some(&self.decoded))
            }
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
