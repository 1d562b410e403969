use crate::audio::buffer::MixedAudioBuffer;
use crate::audio::decode::{AudioPcm, FfmpegPcmDecoder, PcmDecoder};
use crate::audio::source::{AudioSource, DefaultFetcher, SourceFetcher};
use crate::ffmpeg::caps::Capabilities;
use crate::foundation::cancel::CancelToken;
use crate::foundation::core::{MIX_CHANNELS, MIX_SAMPLE_RATE, samples_for_duration};
use crate::foundation::error::{ExportError, ExportResult};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

/// Mixes N audio sources into one fixed-length planar buffer.
///
/// Sources are fetched and decoded in parallel; each one that decodes is summed into the output
/// starting at sample 0. Sources failing to fetch or decode are skipped with a warning.
#[derive(Clone)]
pub struct AudioMixer {
    fetcher: Arc<dyn SourceFetcher>,
    decoder: Arc<dyn PcmDecoder>,
}

impl std::fmt::Debug for AudioMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioMixer").finish_non_exhaustive()
    }
}

impl AudioMixer {
    /// Mixer with custom fetch and decode stages.
    pub fn new(fetcher: Arc<dyn SourceFetcher>, decoder: Arc<dyn PcmDecoder>) -> Self {
        Self { fetcher, decoder }
    }

    /// Mixer reading local/HTTP sources and decoding them with `ffmpeg`.
    pub fn with_defaults(base_dir: impl Into<PathBuf>, caps: Capabilities) -> Self {
        Self::new(
            Arc::new(DefaultFetcher::new(base_dir)),
            Arc::new(FfmpegPcmDecoder::new(caps)),
        )
    }

    /// Mix `sources` into a buffer of `ceil(max_duration * 48000)` frames per channel.
    ///
    /// Returns `Ok(None)` when `sources` is empty: the export simply has no audio track.
    pub fn mix(
        &self,
        sources: &[AudioSource],
        max_duration: f64,
    ) -> ExportResult<Option<MixedAudioBuffer>> {
        self.mix_until(sources, max_duration, &CancelToken::new())
    }

    /// [`mix`](Self::mix), giving up with [`ExportError::Cancelled`] once `cancel` is set.
    ///
    /// The token is checked before every fetch and every decode.
    #[tracing::instrument(skip(self, sources, cancel), fields(sources = sources.len()))]
    pub fn mix_until(
        &self,
        sources: &[AudioSource],
        max_duration: f64,
        cancel: &CancelToken,
    ) -> ExportResult<Option<MixedAudioBuffer>> {
        if sources.is_empty() {
            return Ok(None);
        }
        if !max_duration.is_finite() || max_duration < 0.0 {
            return Err(ExportError::validation(format!(
                "maxDuration must be a finite, non-negative number of seconds (got {max_duration})"
            )));
        }
        self.decoder.check_environment()?;

        let decoded: Vec<ExportResult<AudioPcm>> =
            sources.par_iter().map(|source| self.load(source, cancel)).collect();
        cancel.check()?;

        let frames = samples_for_duration(max_duration, MIX_SAMPLE_RATE);
        let mut out = MixedAudioBuffer::silent(MIX_SAMPLE_RATE, MIX_CHANNELS, frames);
        let mut mixed = 0usize;
        for (source, result) in sources.iter().zip(decoded) {
            match result {
                Ok(pcm) => {
                    add_from_origin(&mut out, &pcm);
                    mixed += 1;
                }
                Err(e) if e.is_soft() => {
                    tracing::warn!(source = source.as_str(), error = %e, "skipping audio source");
                }
                Err(e) => return Err(e),
            }
        }

        if mixed == 0 {
            return Err(ExportError::NoDecodableSources {
                attempted: sources.len(),
            });
        }
        tracing::debug!(mixed, frames, "audio mix complete");
        Ok(Some(out))
    }

    fn load(&self, source: &AudioSource, cancel: &CancelToken) -> ExportResult<AudioPcm> {
        cancel.check()?;
        let bytes = self.fetcher.fetch(source)?;
        cancel.check()?;
        let pcm = self.decoder.decode(source, &bytes)?;
        if pcm.sample_rate != MIX_SAMPLE_RATE || pcm.channels == 0 {
            return Err(ExportError::DecodeFailed {
                source_ref: source.as_str().to_owned(),
                reason: format!(
                    "decoder returned {} Hz / {} channels, expected {MIX_SAMPLE_RATE} Hz",
                    pcm.sample_rate, pcm.channels
                ),
            });
        }
        Ok(pcm)
    }
}

/// Sum `pcm` into `out` from frame 0, truncating at the output length.
///
/// Mono sources feed every output channel; extra source channels are ignored.
fn add_from_origin(out: &mut MixedAudioBuffer, pcm: &AudioPcm) {
    let src_channels = usize::from(pcm.channels);
    let frames = out.len_frames().min(pcm.len_frames());
    for (c, channel) in out.channels.iter_mut().enumerate() {
        let src_c = c.min(src_channels - 1);
        for (i, dst) in channel[..frames].iter_mut().enumerate() {
            *dst += pcm.interleaved_f32[i * src_channels + src_c];
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/audio/mix.rs"]
mod tests;
