use crate::foundation::error::{ExportError, ExportResult};

/// Sample rate of the mixed audio track and of the AAC stream.
pub const MIX_SAMPLE_RATE: u32 = 48_000;

/// Channel count of the mixed audio track (stereo).
pub const MIX_CHANNELS: u16 = 2;

/// Audio is handed to the encoder in windows of this many frames (one second at 48 kHz).
pub const AUDIO_WINDOW_FRAMES: usize = MIX_SAMPLE_RATE as usize;

/// Absolute 0-based frame index in export timeline space.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Frames-per-second represented as a rational `num/den`.
///
/// Deserializes from either a plain integer (`30`) or `{ "num": 30000, "den": 1001 }`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> ExportResult<Self> {
        if den == 0 {
            return Err(ExportError::validation("Fps den must be > 0"));
        }
        if num == 0 {
            return Err(ExportError::validation("Fps num must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }

    /// Convert frame count to seconds.
    pub fn frames_to_secs(self, frames: u64) -> f64 {
        (frames as f64) * self.frame_duration_secs()
    }

    /// Convert seconds to a frame count, rounding partial frames up.
    pub fn secs_to_frames_ceil(self, secs: f64) -> u64 {
        // Absorb float noise so that e.g. 3.0s at 30fps is exactly 90 frames.
        let frames = secs * self.as_f64();
        (frames - 1e-9).ceil().max(0.0) as u64
    }

    /// Presentation timestamp of `frame` in microseconds.
    pub fn frame_timestamp_us(self, frame: FrameIndex) -> i64 {
        let num = u128::from(frame.0) * 1_000_000 * u128::from(self.den);
        (num / u128::from(self.num)) as i64
    }

    /// Timescale and per-frame tick delta used for the MP4 video track.
    ///
    /// 90 kHz is used whenever a frame lasts a whole number of ticks at that rate; otherwise the
    /// track runs at `num` ticks per second with `den` ticks per frame.
    pub fn track_timing(self) -> (u32, u32) {
        let ticks = 90_000u64 * u64::from(self.den);
        if ticks.is_multiple_of(u64::from(self.num)) {
            (90_000, (ticks / u64::from(self.num)) as u32)
        } else {
            (self.num, self.den)
        }
    }
}

impl<'de> serde::Deserialize<'de> for Fps {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Whole(u32),
            Ratio { num: u32, den: u32 },
        }

        let (num, den) = match Repr::deserialize(deserializer)? {
            Repr::Whole(n) => (n, 1),
            Repr::Ratio { num, den } => (num, den),
        };
        Fps::new(num, den).map_err(serde::de::Error::custom)
    }
}

/// Straight-alpha RGBA8 color.
///
/// Deserializes from `"#RRGGBB"` / `"#RRGGBBAA"` or a `[r, g, b, a]` byte array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Rgba8(pub [u8; 4]);

impl Rgba8 {
    /// Opaque black.
    pub const BLACK: Self = Self([0, 0, 0, 255]);

    /// Parse a `#RRGGBB` or `#RRGGBBAA` hex string.
    pub fn parse_hex(s: &str) -> ExportResult<Self> {
        let s = s.trim();
        let s = s.strip_prefix('#').unwrap_or(s);

        fn hex_byte(pair: &str) -> ExportResult<u8> {
            u8::from_str_radix(pair, 16)
                .map_err(|_| ExportError::validation(format!("invalid hex byte \"{pair}\"")))
        }

        match s.len() {
            6 | 8 if s.is_ascii() => {
                let r = hex_byte(&s[0..2])?;
                let g = hex_byte(&s[2..4])?;
                let b = hex_byte(&s[4..6])?;
                let a = if s.len() == 8 { hex_byte(&s[6..8])? } else { 255 };
                Ok(Self([r, g, b, a]))
            }
            _ => Err(ExportError::validation(
                "hex color must be #RRGGBB or #RRGGBBAA (case-insensitive)",
            )),
        }
    }
}

impl<'de> serde::Deserialize<'de> for Rgba8 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Hex(String),
            Arr([u8; 4]),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Hex(s) => Rgba8::parse_hex(&s).map_err(serde::de::Error::custom),
            Repr::Arr(v) => Ok(Rgba8(v)),
        }
    }
}

/// Number of samples per channel covering `secs` at `sample_rate` (rounded up).
pub fn samples_for_duration(secs: f64, sample_rate: u32) -> usize {
    let samples = secs * f64::from(sample_rate);
    // Absorb float noise so that 5.0s at 48kHz is exactly 240_000 samples.
    (samples - 1e-7).ceil().max(0.0) as usize
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
