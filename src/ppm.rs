//! Binary PPM (`P6`) dumps of packed frames, for eyeballing receiver output.

use std::path::Path;

use ffmpeg_codec::PackedFormat;

use crate::error::{Result, StreamError};

/// Converts a tightly packed BGRA/RGBA frame to a `P6` image, dropping alpha.
pub fn encode_ppm(data: &[u8], width: u32, height: u32, format: PackedFormat) -> Result<Vec<u8>> {
    let expected = format.frame_len(width, height);
    if data.len() != expected {
        return Err(StreamError::InvalidFrameSize {
            expected,
            actual: data.len(),
        });
    }

    let header = format!("P6\n{} {}\n255\n", width, height);
    let (r, g, b) = format.rgb_offsets();
    let mut out = Vec::with_capacity(header.len() + width as usize * height as usize * 3);
    out.extend_from_slice(header.as_bytes());
    for px in data.chunks_exact(4) {
        out.extend_from_slice(&[px[r], px[g], px[b]]);
    }
    Ok(out)
}

pub async fn save_frame_as_ppm(
    path: impl AsRef<Path>,
    data: &[u8],
    width: u32,
    height: u32,
    format: PackedFormat,
) -> Result<()> {
    let image = encode_ppm(data, width, height, format)?;
    tokio::fs::write(path.as_ref(), image).await?;
    log::debug!("wrote {}", path.as_ref().display());
    Ok(())
}
