use crate::encode::config::VideoCodec;
use crate::foundation::error::{ExportError, ExportResult};
use std::collections::BTreeSet;
use std::process::{Command, Stdio};

/// Media capabilities of the current runtime, probed once per job.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Capabilities {
    /// `ffmpeg` could be invoked from `PATH`.
    pub ffmpeg: bool,
    /// Names of available video encoders.
    pub video_encoders: BTreeSet<String>,
    /// Names of available audio encoders.
    pub audio_encoders: BTreeSet<String>,
}

impl Capabilities {
    /// Probe the system `ffmpeg`.
    ///
    /// A missing binary yields an empty capability set rather than an error; callers decide
    /// which capabilities they require.
    pub fn probe() -> Self {
        let out = Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();
        match out {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout);
                let mut caps = Self::from_encoder_list(&text);
                caps.ffmpeg = true;
                tracing::debug!(
                    video = caps.video_encoders.len(),
                    audio = caps.audio_encoders.len(),
                    "probed ffmpeg encoders"
                );
                caps
            }
            Ok(out) => {
                tracing::warn!(status = %out.status, "ffmpeg -encoders failed");
                Self::default()
            }
            Err(e) => {
                tracing::debug!(error = %e, "ffmpeg is not available");
                Self::default()
            }
        }
    }

    /// Parse the table printed by `ffmpeg -encoders`.
    pub fn from_encoder_list(text: &str) -> Self {
        let mut caps = Self::default();
        let mut in_table = false;
        for line in text.lines() {
            let line = line.trim();
            if !in_table {
                in_table = line.starts_with("------");
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(flags), Some(name)) = (parts.next(), parts.next()) else {
                continue;
            };
            match flags.chars().next() {
                Some('V') => {
                    caps.video_encoders.insert(name.to_owned());
                }
                Some('A') => {
                    caps.audio_encoders.insert(name.to_owned());
                }
                _ => {}
            }
        }
        caps
    }

    /// Offline audio decode/resample is available.
    pub fn offline_audio(&self) -> bool {
        self.ffmpeg
    }

    /// Fail with [`ExportError::UnsupportedEnvironment`] when offline audio decode is missing.
    pub fn require_offline_audio(&self) -> ExportResult<()> {
        if self.offline_audio() {
            Ok(())
        } else {
            Err(ExportError::UnsupportedEnvironment(
                "offline audio rendering requires ffmpeg on PATH".to_owned(),
            ))
        }
    }

    /// Name of the ffmpeg encoder used for `codec`, when one is available.
    pub fn video_encoder_for(&self, codec: VideoCodec) -> Option<&'static str> {
        let candidate = match codec {
            VideoCodec::H264 => "libx264",
            VideoCodec::Hevc => "libx265",
        };
        self.video_encoders.contains(candidate).then_some(candidate)
    }

    /// The native AAC encoder is available.
    pub fn has_aac(&self) -> bool {
        self.audio_encoders.contains("aac")
    }
}
