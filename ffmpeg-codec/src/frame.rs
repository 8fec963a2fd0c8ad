use std::fmt::{Display, Formatter};
use std::str::FromStr;

use ffmpeg_next::format::Pixel;

/// Every packed format handled here is 32-bit with four interleaved channels.
pub const BYTES_PER_PIXEL: usize = 4;

/// Interleaved 4-channel layouts accepted from callers and handed back to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PackedFormat {
    #[default]
    Bgra,
    Rgba,
}

impl PackedFormat {
    pub fn pixel(&self) -> Pixel {
        match self {
            PackedFormat::Bgra => Pixel::BGRA,
            PackedFormat::Rgba => Pixel::RGBA,
        }
    }

    /// Channel offsets of (red, green, blue) inside one pixel.
    pub fn rgb_offsets(&self) -> (usize, usize, usize) {
        match self {
            PackedFormat::Bgra => (2, 1, 0),
            PackedFormat::Rgba => (0, 1, 2),
        }
    }

    pub fn frame_len(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }
}

impl FromStr for PackedFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bgra" => Ok(PackedFormat::Bgra),
            "rgba" => Ok(PackedFormat::Rgba),
            other => anyhow::bail!("unsupported packed pixel format: {}", other),
        }
    }
}

impl Display for PackedFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            PackedFormat::Bgra => write!(f, "bgra"),
            PackedFormat::Rgba => write!(f, "rgba"),
        }
    }
}

/// A caller-owned, tightly packed frame (`width * height * 4` bytes, no row padding).
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    format: PackedFormat,
}

impl<'a> RawFrame<'a> {
    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        format: PackedFormat,
    ) -> anyhow::Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("invalid video size {}x{}", width, height);
        }
        let expected = format.frame_len(width, height);
        if data.len() != expected {
            anyhow::bail!(
                "packed {} frame of {}x{} needs {} bytes, got {}",
                format,
                width,
                height,
                expected,
                data.len()
            );
        }
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PackedFormat {
        self.format
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }
}

/// Copies a tightly packed frame into plane 0 of an ffmpeg frame whose rows may be padded.
pub(crate) fn copy_into_plane(src: &RawFrame<'_>, dst: &mut ffmpeg_next::frame::Video) {
    let row = src.row_bytes();
    let stride = dst.stride(0);
    let plane = dst.data_mut(0);
    for (y, line) in src.data().chunks_exact(row).enumerate() {
        let start = y * stride;
        plane[start..start + row].copy_from_slice(line);
    }
}

/// Copies plane 0 of a packed ffmpeg frame into `out`, dropping any row padding.
pub(crate) fn copy_from_plane(src: &ffmpeg_next::frame::Video, out: &mut Vec<u8>) {
    let row = src.width() as usize * BYTES_PER_PIXEL;
    let height = src.height() as usize;
    let stride = src.stride(0);
    let plane = src.data(0);
    out.clear();
    out.reserve(row * height);
    for y in 0..height {
        let start = y * stride;
        out.extend_from_slice(&plane[start..start + row]);
    }
}

/// A synthetic moving gradient in the given packed layout, one value per channel
/// derived from the frame number and pixel position.
pub fn test_pattern(width: u32, height: u32, format: PackedFormat, frame: u32) -> Vec<u8> {
    let (r, g, b) = format.rgb_offsets();
    let mut data = vec![0u8; format.frame_len(width, height)];
    for y in 0..height {
        for x in 0..width {
            let idx = (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL;
            data[idx + b] = ((frame + x) % 256) as u8;
            data[idx + g] = ((frame + y) % 256) as u8;
            data[idx + r] = ((frame + x + y) % 256) as u8;
            data[idx + 3] = 255;
        }
    }
    data
}

/// A frame filled with a single (red, green, blue) colour and opaque alpha.
pub fn solid_color(width: u32, height: u32, format: PackedFormat, rgb: (u8, u8, u8)) -> Vec<u8> {
    let (r, g, b) = format.rgb_offsets();
    let mut pixel = [255u8; BYTES_PER_PIXEL];
    pixel[r] = rgb.0;
    pixel[g] = rgb.1;
    pixel[b] = rgb.2;
    pixel.repeat(width as usize * height as usize)
}
