use ffmpeg_codec::{
    CompressedPacket, DecoderSettings, EncoderSettings, PackedFormat, encoder_available,
    solid_color, test_pattern,
};

use super::{DecodeStage, EncodeStage, ReceiveOutcome};
use crate::error::StreamError;

fn codec_available() -> bool {
    if !encoder_available("libx264") {
        eprintln!("skip: encoder libx264 not available");
        return false;
    }
    true
}

fn encode_stage(width: u32, height: u32) -> anyhow::Result<EncodeStage> {
    let settings = EncoderSettings {
        width,
        height,
        ..Default::default()
    };
    Ok(EncodeStage::open(settings, PackedFormat::Bgra)?)
}

fn encode(stage: &mut EncodeStage, count: u32) -> anyhow::Result<Vec<CompressedPacket>> {
    let mut packets = Vec::new();
    for i in 0..count {
        let frame = test_pattern(stage.width(), stage.height(), stage.format(), i);
        packets.extend(stage.encode(&frame)?);
    }
    Ok(packets)
}

#[test]
fn test_encode_rejects_wrong_buffer_size() -> anyhow::Result<()> {
    if !codec_available() {
        return Ok(());
    }
    let mut stage = encode_stage(32, 32)?;
    let frame = solid_color(16, 16, PackedFormat::Bgra, (1, 2, 3));
    assert!(matches!(
        stage.encode(&frame),
        Err(StreamError::InvalidFrameSize {
            expected: 4096,
            actual: 1024
        })
    ));
    assert_eq!(stage.frame_count(), 0);
    Ok(())
}

#[test]
fn test_conversion_bound_once_on_first_frame() -> anyhow::Result<()> {
    if !codec_available() {
        return Ok(());
    }
    let mut encoder = encode_stage(64, 48)?;
    let packets = encode(&mut encoder, 6)?;
    assert!(!packets.is_empty());

    let mut decoder = DecodeStage::open(DecoderSettings::default(), PackedFormat::Rgba)?;
    assert!(decoder.conversion_key().is_none());

    let mut bound = None;
    let mut frames = 0;
    for packet in &packets {
        let outcome = decoder.decode(packet.data(), Some(packet.pts()))?;
        if let ReceiveOutcome::Frame(frame) = outcome {
            assert_eq!((frame.width, frame.height), (64, 48));
            assert_eq!(frame.data.len(), PackedFormat::Rgba.frame_len(64, 48));
            frames += 1;
        }
        match (bound, decoder.conversion_key()) {
            (None, key) => bound = key,
            (Some(first), Some(key)) => assert_eq!(first, key, "conversion rebuilt"),
            (Some(_), None) => panic!("conversion dropped"),
        }
    }
    assert!(frames >= 2, "decoded {} frames", frames);
    let key = bound.expect("conversion bound after first frame");
    assert_eq!((key.width, key.height), (64, 48));
    Ok(())
}

#[test]
fn test_geometry_change_is_conversion_error() -> anyhow::Result<()> {
    if !codec_available() {
        return Ok(());
    }
    let mut decoder = DecodeStage::open(DecoderSettings::default(), PackedFormat::Bgra)?;
    let mut large = encode_stage(64, 64)?;
    let mut decoded = false;
    for packet in encode(&mut large, 3)? {
        decoded |= decoder.decode(packet.data(), None)?.is_frame();
    }
    assert!(decoded);
    let bound = decoder.conversion_key().expect("bound");

    // a new stream at another size carries its own parameter sets
    let mut small = encode_stage(32, 32)?;
    let mut rejected = false;
    for packet in encode(&mut small, 3)? {
        match decoder.decode(packet.data(), None) {
            Err(StreamError::Conversion(_)) => {
                rejected = true;
                break;
            }
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }
    }
    assert!(rejected, "resized frame was converted");
    assert_eq!(decoder.conversion_key(), Some(bound));
    Ok(())
}
