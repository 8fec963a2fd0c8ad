//! Hardware codec discovery.
//!
//! Sessions that set `prefer_hardware` try the first variant FFmpeg was built with
//! and fall back to the software codec when none exists or the device fails to open.

use ffmpeg_next::{Codec, codec::Id, format::Pixel};

/// Device backends recognised in codec names, e.g. `h264_nvenc`.
const BACKENDS: &[&str] = &["nvenc", "cuvid", "vaapi", "qsv", "v4l2m2m"];

struct Variants {
    id: Id,
    /// Software encoder names this family answers to.
    aliases: &'static [&'static str],
    encoders: &'static [&'static str],
    decoders: &'static [&'static str],
}

const FAMILIES: &[Variants] = &[
    Variants {
        id: Id::H264,
        aliases: &["libx264", "libopenh264", "h264"],
        encoders: &["h264_nvenc", "h264_vaapi", "h264_qsv", "h264_v4l2m2m"],
        decoders: &["h264_cuvid", "h264_qsv", "h264_v4l2m2m"],
    },
    Variants {
        id: Id::HEVC,
        aliases: &["libx265", "hevc", "h265"],
        encoders: &["hevc_nvenc", "hevc_vaapi", "hevc_qsv", "hevc_v4l2m2m"],
        decoders: &["hevc_cuvid", "hevc_qsv", "hevc_v4l2m2m"],
    },
    Variants {
        id: Id::AV1,
        aliases: &["libaom-av1", "libsvtav1", "av1"],
        encoders: &["av1_nvenc", "av1_vaapi", "av1_qsv"],
        decoders: &["av1_cuvid", "av1_qsv"],
    },
];

fn first_available(names: &[&str], find: impl Fn(&str) -> Option<Codec>) -> Option<Codec> {
    names.iter().find_map(|name| {
        let codec = find(name)?;
        log::info!("found hardware codec: {}", name);
        Some(codec)
    })
}

/// Hardware decoder for the bitstream `id`, if FFmpeg has one.
pub fn find_hw_decoder(id: Id) -> Option<Codec> {
    let family = FAMILIES.iter().find(|f| f.id == id)?;
    first_available(family.decoders, ffmpeg_next::decoder::find_by_name)
}

/// Hardware encoder standing in for the software encoder `codec_name`.
pub fn find_hw_encoder(codec_name: &str) -> Option<Codec> {
    let family = FAMILIES.iter().find(|f| f.aliases.contains(&codec_name))?;
    first_available(family.encoders, ffmpeg_next::encoder::find_by_name)
}

pub fn is_hw_codec_name(codec_name: &str) -> bool {
    BACKENDS.iter().any(|backend| codec_name.ends_with(backend))
}

/// Planar input format for an encoder: hardware encoders commonly want NV12,
/// software ones get YUV420P.
pub fn planar_format_for_encoder(codec_name: &str) -> Pixel {
    if is_hw_codec_name(codec_name) {
        Pixel::NV12
    } else {
        Pixel::YUV420P
    }
}
