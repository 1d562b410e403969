use crate::foundation::core::Fps;
use crate::foundation::error::{ExportError, ExportResult};

/// Video codec of the exported MP4.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264 / AVC, High Profile Level 4.0.
    #[default]
    H264,
    /// H.265 / HEVC, Main Profile Level 4.0.
    Hevc,
}

/// Per-level decoder limits a configuration must fit in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelLimits {
    /// Maximum luma samples per picture.
    pub max_picture_samples: u64,
    /// Maximum luma samples per second.
    pub max_sample_rate: u64,
    /// Maximum video bitrate in bits per second.
    pub max_bitrate: u64,
    /// Maximum width or height in pixels.
    pub max_dimension: u32,
}

impl VideoCodec {
    /// Codec string written into the container and used for player compatibility checks.
    ///
    /// These exact strings are part of the output contract: `avc1.640028` is High Profile
    /// (0x64), no constraint flags, level 4.0 (0x28); `hvc1.1.6.L120.B0` is Main Profile, level
    /// 4.0 (120 = 30 * 4.0), main tier.
    pub fn codec_string(self) -> &'static str {
        match self {
            Self::H264 => "avc1.640028",
            Self::Hevc => "hvc1.1.6.L120.B0",
        }
    }

    /// Sample entry fourcc in the MP4 `stsd` box.
    pub fn sample_entry(self) -> [u8; 4] {
        match self {
            Self::H264 => *b"avc1",
            Self::Hevc => *b"hvc1",
        }
    }

    /// Level 4.0 limits for this codec's profile.
    pub fn limits(self) -> LevelLimits {
        match self {
            // H.264 Table A-1, level 4.0: MaxFS 8192 MBs, MaxMBPS 245760, MaxBR 20000 kbit/s
            // scaled by 1.25 for High Profile.
            Self::H264 => LevelLimits {
                max_picture_samples: 8_192 * 256,
                max_sample_rate: 245_760 * 256,
                max_bitrate: 25_000_000,
                max_dimension: 4_096,
            },
            // H.265 Table A.8/A.9, level 4.0 main tier.
            Self::Hevc => LevelLimits {
                max_picture_samples: 2_228_224,
                max_sample_rate: 66_846_720,
                max_bitrate: 12_000_000,
                max_dimension: 4_222,
            },
        }
    }

    /// Parse `"h264"` / `"avc"` / `"hevc"` / `"h265"` (case-insensitive).
    pub fn parse(s: &str) -> ExportResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h264" | "avc" | "avc1" => Ok(Self::H264),
            "hevc" | "h265" | "hvc1" => Ok(Self::Hevc),
            other => Err(ExportError::validation(format!(
                "unknown video codec '{other}' (expected h264 or hevc)"
            ))),
        }
    }
}

/// Video encoder configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoEncoderConfig {
    /// Output codec.
    pub codec: VideoCodec,
    /// Width in pixels (even, non-zero).
    pub width: u32,
    /// Height in pixels (even, non-zero).
    pub height: u32,
    /// Constant output frame rate.
    pub fps: Fps,
    /// Target bitrate in bits per second.
    pub bitrate: u64,
}

impl VideoEncoderConfig {
    /// Structural checks independent of any backend.
    pub fn validate(&self) -> ExportResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ExportError::validation(
                "video width/height must be non-zero",
            ));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(ExportError::validation(
                "video width/height must be even (required for 4:2:0 output)",
            ));
        }
        if self.bitrate == 0 {
            return Err(ExportError::validation("video bitrate must be non-zero"));
        }
        Ok(())
    }

    /// Check the configuration against the codec level limits.
    ///
    /// Returns a human-readable reason on rejection.
    pub fn check_level_limits(&self) -> Result<(), String> {
        let limits = self.codec.limits();
        let codec = self.codec.codec_string();
        if self.width > limits.max_dimension || self.height > limits.max_dimension {
            return Err(format!(
                "{}x{} exceeds the maximum dimension {} of {codec}",
                self.width, self.height, limits.max_dimension
            ));
        }
        let picture = u64::from(self.width) * u64::from(self.height);
        if picture > limits.max_picture_samples {
            return Err(format!(
                "{}x{} exceeds the maximum frame size of {codec}",
                self.width, self.height
            ));
        }
        let rate = (picture as f64 * self.fps.as_f64()).ceil() as u64;
        if rate > limits.max_sample_rate {
            return Err(format!(
                "{}x{} at {:.3} fps exceeds the maximum sample rate of {codec}",
                self.width,
                self.height,
                self.fps.as_f64()
            ));
        }
        if self.bitrate > limits.max_bitrate {
            return Err(format!(
                "bitrate {} exceeds the maximum {} of {codec}",
                self.bitrate, limits.max_bitrate
            ));
        }
        Ok(())
    }

    /// Keyframe interval in frames (two seconds of video, at least one frame).
    pub fn keyframe_interval(&self) -> u64 {
        ((self.fps.as_f64() * 2.0).round() as u64).max(1)
    }
}

/// Default AAC bitrate in bits per second.
pub const DEFAULT_AUDIO_BITRATE: u64 = 128_000;

/// AAC-LC audio encoder configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioEncoderConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Target bitrate in bits per second.
    pub bitrate: u64,
}

impl AudioEncoderConfig {
    /// Check the configuration is expressible as AAC-LC in an MP4 `esds`.
    pub fn check_aac(&self) -> Result<(), String> {
        if crate::encode::adts::sampling_frequency_index(self.sample_rate).is_none() {
            return Err(format!(
                "sample rate {} Hz is not an AAC sampling frequency",
                self.sample_rate
            ));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(format!(
                "{} channels requested; AAC export supports mono or stereo",
                self.channels
            ));
        }
        if self.bitrate == 0 {
            return Err("audio bitrate must be non-zero".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/config.rs"]
mod tests;
