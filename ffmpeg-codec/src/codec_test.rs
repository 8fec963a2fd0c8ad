use ffmpeg_next::format::Pixel;

use crate::{
    converter::{ConversionKey, PixelConverter},
    decoder::{DecoderSettings, VideoDecoder},
    encoder::{EncoderSettings, VideoEncoder},
    frame::{PackedFormat, RawFrame, test_pattern},
    packet::CompressedPacket,
};

fn encoder_available(name: &str) -> bool {
    crate::init().unwrap();
    if ffmpeg_next::encoder::find_by_name(name).is_none() {
        eprintln!("skip: encoder {} not available", name);
        return false;
    }
    true
}

fn encode_frames(
    encoder: &mut VideoEncoder,
    converter: &mut PixelConverter,
    width: u32,
    height: u32,
    count: u32,
) -> anyhow::Result<Vec<CompressedPacket>> {
    let mut packets = Vec::new();
    for i in 0..count {
        let data = test_pattern(width, height, PackedFormat::Bgra, i);
        let raw = RawFrame::new(&data, width, height, PackedFormat::Bgra)?;
        let planar = converter.pack(&raw)?;
        packets.extend(encoder.encode(planar)?);
    }
    Ok(packets)
}

#[test]
fn test_open_unknown_encoder_fails() {
    crate::init().unwrap();
    let settings = EncoderSettings {
        codec: "no-such-encoder".to_string(),
        ..Default::default()
    };
    assert!(VideoEncoder::open(settings).is_err());
}

#[test]
fn test_open_unknown_decoder_fails() {
    let settings = DecoderSettings {
        codec: "no-such-decoder".to_string(),
        prefer_hardware: false,
    };
    assert!(VideoDecoder::open(settings).is_err());
}

#[test]
fn test_encoder_rejects_mismatched_frame() -> anyhow::Result<()> {
    if !encoder_available("libx264") {
        return Ok(());
    }
    let mut encoder = VideoEncoder::open(EncoderSettings {
        width: 64,
        height: 64,
        ..Default::default()
    })?;
    let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, 32, 32);
    assert!(encoder.encode(&mut frame).is_err());
    assert_eq!(encoder.frame_count(), 0);
    Ok(())
}

#[test]
fn test_presentation_index_strictly_increasing() -> anyhow::Result<()> {
    if !encoder_available("libx264") {
        return Ok(());
    }
    let (width, height) = (64, 48);
    let mut encoder = VideoEncoder::open(EncoderSettings {
        width,
        height,
        ..Default::default()
    })?;
    let mut converter = PixelConverter::new(ConversionKey {
        width,
        height,
        src: Pixel::BGRA,
        dst: encoder.input_format(),
    })?;

    let mut packets = encode_frames(&mut encoder, &mut converter, width, height, 8)?;
    packets.extend(encoder.flush()?);
    assert_eq!(encoder.frame_count(), 8);
    assert!(!packets.is_empty());
    assert!(packets[0].is_key());

    let mut pts: Vec<i64> = packets.iter().map(|p| p.pts()).collect();
    pts.sort();
    pts.dedup();
    assert_eq!(pts.len(), packets.len());
    assert!(pts.iter().all(|p| (0..8).contains(p)));
    Ok(())
}

#[test]
fn test_encode_decode_liveness_with_b_frames() -> anyhow::Result<()> {
    if !encoder_available("libx264") {
        return Ok(());
    }
    let (width, height) = (64, 64);
    let gop = 10u32;
    let b_frames = 1usize;
    let mut encoder = VideoEncoder::open(EncoderSettings {
        width,
        height,
        gop,
        max_b_frames: b_frames,
        // zerolatency disables b-frames; keep them to exercise reordering.
        low_latency: false,
        ..Default::default()
    })?;
    let mut converter = PixelConverter::new(ConversionKey {
        width,
        height,
        src: Pixel::BGRA,
        dst: encoder.input_format(),
    })?;

    let count = gop + b_frames as u32 + 1;
    let mut packets = encode_frames(&mut encoder, &mut converter, width, height, count)?;
    packets.extend(encoder.flush()?);

    let mut decoder = VideoDecoder::open(DecoderSettings::default())?;
    let mut presented = Vec::new();
    for packet in &packets {
        if let Some(frame) = decoder.decode_packet(packet)? {
            assert_eq!(frame.width(), width);
            assert_eq!(frame.height(), height);
            presented.push(frame.pts().unwrap_or_default());
        }
    }
    for frame in decoder.flush()? {
        presented.push(frame.pts().unwrap_or_default());
    }

    assert!(
        presented.len() >= gop as usize,
        "decoded {} of {} frames",
        presented.len(),
        count
    );
    assert!(presented.windows(2).all(|w| w[0] <= w[1]), "{:?}", presented);
    Ok(())
}
