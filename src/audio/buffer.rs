use crate::foundation::error::{ExportError, ExportResult};

/// Planar `f32` PCM produced by the audio mixer.
///
/// Every entry of `channels` holds the same number of samples. Samples are not clipped or
/// normalized; values outside `[-1, 1]` pass through unchanged.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixedAudioBuffer {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels (length of `channels`).
    pub number_of_channels: u16,
    /// One sample array per channel.
    pub channels: Vec<Vec<f32>>,
}

/// One interleaved slice of a [`MixedAudioBuffer`], ready for an audio encoder.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioWindow {
    /// Index of the first frame of this window within the whole buffer.
    pub start_frame: u64,
    /// Number of frames (samples per channel) in this window.
    pub frames: usize,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Interleaved samples, `frames * channels` long.
    pub interleaved: Vec<f32>,
}

impl MixedAudioBuffer {
    /// Allocate a silent buffer of `frames` samples per channel.
    pub fn silent(sample_rate: u32, number_of_channels: u16, frames: usize) -> Self {
        Self {
            sample_rate,
            number_of_channels,
            channels: vec![vec![0.0; frames]; usize::from(number_of_channels)],
        }
    }

    /// Samples per channel.
    pub fn len_frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Buffer duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len_frames() as f64 / f64::from(self.sample_rate)
    }

    /// Check the planar invariants: declared channel count matches, all arrays equal length.
    pub fn validate(&self) -> ExportResult<()> {
        if self.sample_rate == 0 {
            return Err(ExportError::validation("audio sampleRate must be non-zero"));
        }
        if self.number_of_channels == 0 {
            return Err(ExportError::validation(
                "audio numberOfChannels must be non-zero",
            ));
        }
        if self.channels.len() != usize::from(self.number_of_channels) {
            return Err(ExportError::validation(format!(
                "audio declares {} channels but carries {} channel arrays",
                self.number_of_channels,
                self.channels.len()
            )));
        }
        let len = self.len_frames();
        if self.channels.iter().any(|c| c.len() != len) {
            return Err(ExportError::validation(
                "audio channel arrays must all have the same length",
            ));
        }
        Ok(())
    }

    /// Interleave frames `[start, start + frames)` into a new vector.
    ///
    /// The range is clamped to the buffer length.
    pub fn interleave_range(&self, start: usize, frames: usize) -> Vec<f32> {
        let len = self.len_frames();
        let start = start.min(len);
        let end = start.saturating_add(frames).min(len);
        let ch = self.channels.len();
        let mut out = Vec::with_capacity((end - start) * ch);
        for i in start..end {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }

    /// Iterate the buffer in consecutive windows of `window_frames` frames.
    ///
    /// Window boundaries are sample-accurate; the last window holds the remainder, so the
    /// windows cover exactly `len_frames()` frames.
    pub fn windows(&self, window_frames: usize) -> AudioWindows<'_> {
        AudioWindows {
            buffer: self,
            window_frames: window_frames.max(1),
            next: 0,
        }
    }
}

/// Iterator returned by [`MixedAudioBuffer::windows`].
pub struct AudioWindows<'a> {
    buffer: &'a MixedAudioBuffer,
    window_frames: usize,
    next: usize,
}

impl Iterator for AudioWindows<'_> {
    type Item = AudioWindow;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.buffer.len_frames();
        if self.next >= len {
            return None;
        }
        let start = self.next;
        let frames = self.window_frames.min(len - start);
        self.next += frames;
        Some(AudioWindow {
            start_frame: start as u64,
            frames,
            channels: self.buffer.number_of_channels,
            interleaved: self.buffer.interleave_range(start, frames),
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/audio/buffer.rs"]
mod tests;
