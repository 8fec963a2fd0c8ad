//! Stream configuration, loaded from TOML.

use std::path::Path;
use std::time::Duration;

use ffmpeg_codec::{DecoderSettings, EncoderSettings, PackedFormat};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub video: VideoConfig,
    pub codec: CodecConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Packed layout of caller frames: "bgra" or "rgba".
    pub pixel_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub encoder: String,
    pub decoder: String,
    /// Bits per second.
    pub bitrate: usize,
    pub gop: u32,
    pub max_b_frames: usize,
    pub low_latency: bool,
    pub prefer_hardware: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub tcp_port: u16,
    pub http_port: u16,
    /// Upper bound of one HTTP readiness wait.
    pub http_poll_timeout_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 30,
            pixel_format: "bgra".to_string(),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            encoder: "libx264".to_string(),
            decoder: "h264".to_string(),
            bitrate: 2_000_000,
            gop: 10,
            max_b_frames: 1,
            low_latency: true,
            prefer_hardware: false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            tcp_port: 9000,
            http_port: 8080,
            http_poll_timeout_ms: 100,
        }
    }
}

impl StreamConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {}: {}", path.display(), e))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: StreamConfig = toml::from_str(text)?;
        config.packed_format()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn packed_format(&self) -> anyhow::Result<PackedFormat> {
        self.video.pixel_format.parse()
    }

    pub fn http_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.network.http_poll_timeout_ms)
    }

    pub fn tcp_bind_addr(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.tcp_port)
    }

    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.http_port)
    }

    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            width: self.video.width,
            height: self.video.height,
            frame_rate: self.video.frame_rate,
            bitrate: self.codec.bitrate,
            gop: self.codec.gop,
            max_b_frames: self.codec.max_b_frames,
            codec: self.codec.encoder.clone(),
            low_latency: self.codec.low_latency,
            prefer_hardware: self.codec.prefer_hardware,
        }
    }

    pub fn decoder_settings(&self) -> DecoderSettings {
        DecoderSettings {
            codec: self.codec.decoder.clone(),
            prefer_hardware: self.codec.prefer_hardware,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let text = StreamConfig::default().to_toml().unwrap();
        let config = StreamConfig::from_toml(&text).unwrap();
        assert_eq!(config.video.width, 640);
        assert_eq!(config.codec.gop, 10);
        assert_eq!(config.network.http_poll_timeout_ms, 100);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = StreamConfig::from_toml(
            r#"
            [video]
            width = 64
            height = 32

            [network]
            tcp_port = 7000
            "#,
        )
        .unwrap();
        assert_eq!(config.video.width, 64);
        assert_eq!(config.video.frame_rate, 30);
        assert_eq!(config.codec.encoder, "libx264");
        assert_eq!(config.tcp_bind_addr(), "0.0.0.0:7000");

        let settings = config.encoder_settings();
        assert_eq!((settings.width, settings.height), (64, 32));
        assert_eq!(settings.bitrate, 2_000_000);
    }

    #[test]
    fn test_rejects_unknown_pixel_format() {
        let result = StreamConfig::from_toml(
            r#"
            [video]
            pixel_format = "nv12"
            "#,
        );
        assert!(result.is_err());
    }
}
