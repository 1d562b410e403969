use crate::audio::source::AudioSource;
use crate::ffmpeg::caps::Capabilities;
use crate::ffmpeg::process::ffmpeg_command;
use crate::foundation::core::{MIX_CHANNELS, MIX_SAMPLE_RATE};
use crate::foundation::error::{ExportError, ExportResult};
use std::io::Write as _;

/// Decoded interleaved PCM.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioPcm {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Interleaved `f32` samples.
    pub interleaved_f32: Vec<f32>,
}

impl AudioPcm {
    /// Samples per channel.
    pub fn len_frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.interleaved_f32.len() / usize::from(self.channels)
        }
    }
}

/// Decodes fetched source bytes into PCM at the mix rate.
///
/// Corrupt or unsupported input must be reported as [`ExportError::DecodeFailed`].
pub trait PcmDecoder: Send + Sync {
    /// Fail with [`ExportError::UnsupportedEnvironment`] when decoding cannot work at all here.
    fn check_environment(&self) -> ExportResult<()>;
    /// Decode `bytes` (fetched from `source`) to 48 kHz PCM.
    fn decode(&self, source: &AudioSource, bytes: &[u8]) -> ExportResult<AudioPcm>;
}

/// Decoder running the system `ffmpeg` on a spooled copy of the source bytes.
#[derive(Clone, Debug)]
pub struct FfmpegPcmDecoder {
    caps: Capabilities,
}

impl FfmpegPcmDecoder {
    /// Decoder gated on already probed capabilities.
    pub fn new(caps: Capabilities) -> Self {
        Self { caps }
    }

    /// Decoder gated on a fresh capability probe.
    pub fn probe() -> Self {
        Self::new(Capabilities::probe())
    }
}

impl PcmDecoder for FfmpegPcmDecoder {
    fn check_environment(&self) -> ExportResult<()> {
        self.caps.require_offline_audio()
    }

    fn decode(&self, source: &AudioSource, bytes: &[u8]) -> ExportResult<AudioPcm> {
        let failed = |reason: String| ExportError::DecodeFailed {
            source_ref: source.as_str().to_owned(),
            reason,
        };

        // Containers like MP4 need a seekable input, so decode from a file instead of a pipe.
        let mut spool = tempfile::NamedTempFile::new()
            .map_err(|e| failed(format!("failed to create spool file: {e}")))?;
        spool
            .write_all(bytes)
            .and_then(|()| spool.flush())
            .map_err(|e| failed(format!("failed to write spool file: {e}")))?;

        let out = ffmpeg_command()
            .arg("-i")
            .arg(spool.path())
            .args([
                "-vn",
                "-f",
                "f32le",
                "-acodec",
                "pcm_f32le",
                "-ac",
                &MIX_CHANNELS.to_string(),
                "-ar",
                &MIX_SAMPLE_RATE.to_string(),
                "pipe:1",
            ])
            .stdin(std::process::Stdio::null())
            .output()
            .map_err(|e| failed(format!("failed to run ffmpeg: {e}")))?;

        if !out.status.success() {
            return Err(failed(
                String::from_utf8_lossy(&out.stderr).trim().to_owned(),
            ));
        }
        if out.stdout.is_empty() {
            return Err(failed("source contains no audio samples".to_owned()));
        }
        if !out.stdout.len().is_multiple_of(4) {
            return Err(failed(
                "decoded audio byte length is not aligned to f32 samples".to_owned(),
            ));
        }

        let interleaved_f32 = out
            .stdout
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(AudioPcm {
            sample_rate: MIX_SAMPLE_RATE,
            channels: MIX_CHANNELS,
            interleaved_f32,
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/audio/decode.rs"]
mod tests;
