use std::fmt::{Display, Formatter};

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{self, flag::Flags};

use crate::encoder::VideoEncoder;
use crate::frame::{self, PackedFormat, RawFrame};

/// Identity of a conversion context. A context is only ever reused for the exact
/// tuple it was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionKey {
    pub width: u32,
    pub height: u32,
    pub src: Pixel,
    pub dst: Pixel,
}

impl ConversionKey {
    /// Caller frames in `format` to whatever the encoder consumes.
    pub fn for_encoder(format: PackedFormat, encoder: &VideoEncoder) -> Self {
        Self {
            width: encoder.width(),
            height: encoder.height(),
            src: format.pixel(),
            dst: encoder.input_format(),
        }
    }

    /// A decoded frame's own size and layout to `format`.
    pub fn for_decoded(frame: &ffmpeg_next::frame::Video, format: PackedFormat) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            src: frame.format(),
            dst: format.pixel(),
        }
    }
}

impl Display for ConversionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "{}x{} {:?} -> {:?}",
            self.width, self.height, self.src, self.dst
        )
    }
}

/// Pixel format conversion between the packed layouts callers use and the planar
/// layouts codecs use. Owns its scaling context and the destination frame, both
/// created once and reused on every call.
pub struct PixelConverter {
    key: ConversionKey,
    context: scaling::Context,
    staging: ffmpeg_next::frame::Video,
    output: ffmpeg_next::frame::Video,
}

impl PixelConverter {
    pub fn new(key: ConversionKey) -> anyhow::Result<Self> {
        if key.width == 0 || key.height == 0 {
            anyhow::bail!("invalid conversion size {}x{}", key.width, key.height);
        }
        if key.src == Pixel::None || key.dst == Pixel::None {
            anyhow::bail!("invalid pixel format pair for conversion: {}", key);
        }
        let context = scaling::Context::get(
            key.src,
            key.width,
            key.height,
            key.dst,
            key.width,
            key.height,
            Flags::BILINEAR,
        )
        .map_err(|e| anyhow::anyhow!("create conversion context {}: {}", key, e))?;
        log::info!("conversion context created: {}", key);

        Ok(Self {
            key,
            context,
            staging: ffmpeg_next::frame::Video::new(key.src, key.width, key.height),
            output: ffmpeg_next::frame::Video::new(key.dst, key.width, key.height),
        })
    }

    pub fn key(&self) -> ConversionKey {
        self.key
    }

    /// Packed caller frame to the destination (planar) format. The returned frame is
    /// owned by the converter and overwritten by the next call.
    pub fn pack(&mut self, src: &RawFrame<'_>) -> anyhow::Result<&mut ffmpeg_next::frame::Video> {
        if src.width() != self.key.width
            || src.height() != self.key.height
            || src.format().pixel() != self.key.src
        {
            anyhow::bail!(
                "frame {}x{} {} does not match conversion {}",
                src.width(),
                src.height(),
                src.format(),
                self.key
            );
        }
        frame::copy_into_plane(src, &mut self.staging);
        self.context.run(&self.staging, &mut self.output)?;
        Ok(&mut self.output)
    }

    /// Codec frame to the destination (packed) format, written tightly packed into
    /// `out`, which is cleared first.
    pub fn unpack(
        &mut self,
        src: &ffmpeg_next::frame::Video,
        out: &mut Vec<u8>,
    ) -> anyhow::Result<()> {
        if src.width() != self.key.width
            || src.height() != self.key.height
            || src.format() != self.key.src
        {
            anyhow::bail!(
                "decoded frame {}x{} {:?} does not match conversion {}",
                src.width(),
                src.height(),
                src.format(),
                self.key
            );
        }
        self.context.run(src, &mut self.output)?;
        frame::copy_from_plane(&self.output, out);
        Ok(())
    }
}

unsafe impl Send for PixelConverter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PackedFormat, solid_color};

    fn init() {
        crate::init().unwrap();
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        init();
        let key = ConversionKey {
            width: 0,
            height: 16,
            src: Pixel::BGRA,
            dst: Pixel::YUV420P,
        };
        assert!(PixelConverter::new(key).is_err());
    }

    #[test]
    fn test_pack_rejects_mismatched_frame() {
        init();
        let key = ConversionKey {
            width: 16,
            height: 16,
            src: Pixel::BGRA,
            dst: Pixel::YUV420P,
        };
        let mut converter = PixelConverter::new(key).unwrap();
        let data = solid_color(8, 8, PackedFormat::Bgra, (0, 0, 0));
        let frame = RawFrame::new(&data, 8, 8, PackedFormat::Bgra).unwrap();
        assert!(converter.pack(&frame).is_err());
    }

    #[test]
    fn test_pack_unpack_solid_color() {
        init();
        let (width, height) = (32, 16);
        let mut to_planar = PixelConverter::new(ConversionKey {
            width,
            height,
            src: Pixel::BGRA,
            dst: Pixel::YUV420P,
        })
        .unwrap();
        let mut to_packed = PixelConverter::new(ConversionKey {
            width,
            height,
            src: Pixel::YUV420P,
            dst: Pixel::BGRA,
        })
        .unwrap();

        let data = solid_color(width, height, PackedFormat::Bgra, (200, 40, 90));
        let frame = RawFrame::new(&data, width, height, PackedFormat::Bgra).unwrap();
        let planar = to_planar.pack(&frame).unwrap().clone();
        assert_eq!(planar.format(), Pixel::YUV420P);

        let mut out = Vec::new();
        to_packed.unpack(&planar, &mut out).unwrap();
        assert_eq!(out.len(), data.len());
        for (got, want) in out.iter().zip(data.iter()) {
            assert!((*got as i32 - *want as i32).abs() <= 6, "{} vs {}", got, want);
        }
    }
}
