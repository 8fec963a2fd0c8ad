use ffmpeg_next::{Dictionary, Rational, format::Pixel};

use crate::{
    hw::{find_hw_encoder, planar_format_for_encoder},
    packet::CompressedPacket,
};

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: usize,
    /// Key frame interval.
    pub gop: u32,
    pub max_b_frames: usize,
    pub codec: String,
    /// `preset=ultrafast` and `tune=zerolatency`.
    pub low_latency: bool,
    pub prefer_hardware: bool,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 30,
            bitrate: 2_000_000,
            gop: 10,
            max_b_frames: 1,
            codec: "libx264".to_string(),
            low_latency: true,
            prefer_hardware: false,
        }
    }
}

/// Whether a software encoder called `name` is compiled into the linked FFmpeg.
pub fn encoder_available(name: &str) -> bool {
    crate::init().is_ok() && ffmpeg_next::encoder::find_by_name(name).is_some()
}

/// An open encoder session. Frames go in with a strictly increasing presentation
/// index starting at 0; every packet the codec has ready comes out of the same call.
pub struct VideoEncoder {
    inner: ffmpeg_next::codec::encoder::Video,
    codec_name: String,
    input_format: Pixel,
    width: u32,
    height: u32,
    frame_index: i64,
}

impl VideoEncoder {
    pub fn open(settings: EncoderSettings) -> anyhow::Result<Self> {
        crate::init()?;
        if settings.width == 0 || settings.height == 0 {
            anyhow::bail!("invalid encoder size {}x{}", settings.width, settings.height);
        }
        if settings.frame_rate == 0 {
            anyhow::bail!("invalid encoder frame rate 0");
        }

        let sw_codec = ffmpeg_next::encoder::find_by_name(&settings.codec)
            .ok_or(anyhow::anyhow!("codec not found: {}", settings.codec))?;

        let hw_codec = if settings.prefer_hardware {
            find_hw_encoder(&settings.codec)
        } else {
            None
        };

        let opened = match hw_codec {
            Some(hw_codec) => {
                let hw_name = hw_codec.name().to_string();
                log::info!("attempting hardware encoder: {}", hw_name);
                match Self::open_codec(hw_codec, &hw_name, &settings) {
                    Ok(enc) => Ok((enc, hw_name)),
                    Err(e) => {
                        log::warn!(
                            "hardware encoder {} failed: {}, falling back to {}",
                            hw_name,
                            e,
                            settings.codec
                        );
                        Self::open_codec(sw_codec, &settings.codec, &settings)
                            .map(|enc| (enc, settings.codec.clone()))
                    }
                }
            }
            None => Self::open_codec(sw_codec, &settings.codec, &settings)
                .map(|enc| (enc, settings.codec.clone())),
        };
        let (encoder, codec_name) = opened?;
        log::info!(
            "encoder opened: {} {}x{} @{}fps, bitrate {}, gop {}, b-frames {}",
            codec_name,
            settings.width,
            settings.height,
            settings.frame_rate,
            settings.bitrate,
            settings.gop,
            settings.max_b_frames
        );

        Ok(Self {
            inner: encoder,
            input_format: planar_format_for_encoder(&codec_name),
            codec_name,
            width: settings.width,
            height: settings.height,
            frame_index: 0,
        })
    }

    fn open_codec(
        codec: ffmpeg_next::Codec,
        codec_name: &str,
        settings: &EncoderSettings,
    ) -> anyhow::Result<ffmpeg_next::codec::encoder::Video> {
        let ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        let mut encoder = ctx.encoder().video()?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(planar_format_for_encoder(codec_name));
        encoder.set_time_base(Rational::new(1, settings.frame_rate as i32));
        encoder.set_frame_rate(Some(Rational::new(settings.frame_rate as i32, 1)));
        encoder.set_bit_rate(settings.bitrate);
        encoder.set_gop(settings.gop);
        encoder.set_max_b_frames(settings.max_b_frames);

        let mut opts = Dictionary::new();
        if settings.low_latency {
            opts.set("preset", "ultrafast");
            opts.set("tune", "zerolatency");
        }
        let encoder = encoder.open_with(opts)?;
        Ok(encoder)
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Planar format frames must be in before `encode`.
    pub fn input_format(&self) -> Pixel {
        self.input_format
    }

    /// Number of frames submitted so far; also the next presentation index.
    pub fn frame_count(&self) -> i64 {
        self.frame_index
    }

    /// Submits one frame and returns every packet the codec has ready, which may be none.
    pub fn encode(
        &mut self,
        frame: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<Vec<CompressedPacket>> {
        if frame.width() != self.width
            || frame.height() != self.height
            || frame.format() != self.input_format
        {
            anyhow::bail!(
                "frame {}x{} {:?} does not match encoder {}x{} {:?}",
                frame.width(),
                frame.height(),
                frame.format(),
                self.width,
                self.height,
                self.input_format
            );
        }
        frame.set_pts(Some(self.frame_index));
        self.inner.send_frame(frame)?;
        self.frame_index += 1;

        let mut packets = Vec::new();
        self.drain(&mut packets)?;
        log::trace!(
            "encoded frame {} into {} packets",
            self.frame_index - 1,
            packets.len()
        );
        Ok(packets)
    }

    /// Signals end of stream and returns the packets still buffered in the codec.
    pub fn flush(&mut self) -> anyhow::Result<Vec<CompressedPacket>> {
        self.inner.send_eof()?;
        let mut packets = Vec::new();
        self.drain(&mut packets)?;
        Ok(packets)
    }

    fn drain(&mut self, out: &mut Vec<CompressedPacket>) -> anyhow::Result<()> {
        while let Some(packet) = self.receive_packet()? {
            out.push(packet);
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> anyhow::Result<Option<CompressedPacket>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match self.inner.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(CompressedPacket::from(&packet))),
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
