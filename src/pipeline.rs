//! Encode and decode stages shared by every transport.
//!
//! ```text
//! send:    packed frame ─► PixelConverter ─► VideoEncoder ─► 0..n CompressedPacket
//! receive: packet bytes ─► VideoDecoder ─► 0..1 frame ─► PixelConverter ─► packed frame
//! ```

use ffmpeg_codec::{
    CompressedPacket, ConversionKey, DecoderSettings, EncoderSettings, PackedFormat,
    PixelConverter, RawFrame, VideoDecoder, VideoEncoder,
};

use crate::error::{Result, StreamError};

/// Converts caller frames and feeds them to the encoder.
pub struct EncodeStage {
    // Field order is drop order: codec session first, then conversion context.
    encoder: VideoEncoder,
    converter: PixelConverter,
    format: PackedFormat,
}

impl EncodeStage {
    pub fn open(settings: EncoderSettings, format: PackedFormat) -> Result<Self> {
        let encoder = VideoEncoder::open(settings).map_err(StreamError::Setup)?;
        let converter = PixelConverter::new(ConversionKey::for_encoder(format, &encoder))
            .map_err(StreamError::Setup)?;
        Ok(Self {
            encoder,
            converter,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.encoder.width()
    }

    pub fn height(&self) -> u32 {
        self.encoder.height()
    }

    pub fn format(&self) -> PackedFormat {
        self.format
    }

    /// Frames submitted so far.
    pub fn frame_count(&self) -> i64 {
        self.encoder.frame_count()
    }

    /// Encodes one tightly packed frame. Zero packets is a normal outcome while the
    /// codec is buffering.
    pub fn encode(&mut self, data: &[u8]) -> Result<Vec<CompressedPacket>> {
        let expected = self.format.frame_len(self.width(), self.height());
        if data.len() != expected {
            return Err(StreamError::InvalidFrameSize {
                expected,
                actual: data.len(),
            });
        }
        let raw = RawFrame::new(data, self.width(), self.height(), self.format)
            .map_err(StreamError::Codec)?;
        let planar = self.converter.pack(&raw).map_err(StreamError::Conversion)?;
        self.encoder.encode(planar).map_err(StreamError::Codec)
    }

    /// Drains the packets the codec is still holding at end of stream.
    pub fn flush(&mut self) -> Result<Vec<CompressedPacket>> {
        self.encoder.flush().map_err(StreamError::Codec)
    }
}

/// A decoded frame in the caller's packed layout. Borrowed from the receiver and
/// valid until its next receive call.
#[derive(Debug, Clone, Copy)]
pub struct DecodedFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: PackedFormat,
}

/// Result of one receive step. Fatal faults travel as `Err`.
#[derive(Debug)]
pub enum ReceiveOutcome<'a> {
    Frame(DecodedFrame<'a>),
    /// The codec needs more packets before it can emit a frame; call again.
    NeedMoreData,
}

impl ReceiveOutcome<'_> {
    pub fn is_frame(&self) -> bool {
        matches!(self, ReceiveOutcome::Frame(_))
    }
}

/// Decodes packets and converts frames to the caller's packed layout. The conversion
/// context is created on the first decoded frame, once its size is known.
pub struct DecodeStage {
    decoder: VideoDecoder,
    converter: Option<PixelConverter>,
    format: PackedFormat,
    output: Vec<u8>,
}

impl DecodeStage {
    pub fn open(settings: DecoderSettings, format: PackedFormat) -> Result<Self> {
        let decoder = VideoDecoder::open(settings).map_err(StreamError::Setup)?;
        Ok(Self {
            decoder,
            converter: None,
            format,
            output: Vec::new(),
        })
    }

    pub fn format(&self) -> PackedFormat {
        self.format
    }

    pub fn frames_decoded(&self) -> u64 {
        self.decoder.frame_count()
    }

    /// The conversion the stage is bound to, once the first frame has been decoded.
    pub fn conversion_key(&self) -> Option<ConversionKey> {
        self.converter.as_ref().map(PixelConverter::key)
    }

    pub fn decode(&mut self, data: &[u8], pts: Option<i64>) -> Result<ReceiveOutcome<'_>> {
        let frame = match self.decoder.decode(data, pts).map_err(StreamError::Codec)? {
            Some(frame) => frame,
            None => return Ok(ReceiveOutcome::NeedMoreData),
        };

        let key = ConversionKey::for_decoded(frame, self.format);
        let converter = match self.converter {
            Some(ref mut converter) => {
                if converter.key() != key {
                    return Err(StreamError::Conversion(anyhow::anyhow!(
                        "decoded frame changed to {}, conversion is bound to {}",
                        key,
                        converter.key()
                    )));
                }
                converter
            }
            None => self
                .converter
                .insert(PixelConverter::new(key).map_err(StreamError::Setup)?),
        };
        converter
            .unpack(frame, &mut self.output)
            .map_err(StreamError::Conversion)?;

        Ok(ReceiveOutcome::Frame(DecodedFrame {
            data: &self.output,
            width: key.width,
            height: key.height,
            format: self.format,
        }))
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
