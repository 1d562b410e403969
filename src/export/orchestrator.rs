//! Export orchestrator: mixes audio on the audio worker, renders every frame and streams it to
//! the video worker, then collects the finished MP4.

use crate::audio::buffer::MixedAudioBuffer;
use crate::audio::mix::AudioMixer;
use crate::encode::backend::EncoderBackend;
use crate::encode::ffmpeg::FfmpegBackend;
use crate::encode::frame::VideoFrame;
use crate::export::project::Project;
use crate::export::render::FrameRenderer;
use crate::ffmpeg::caps::Capabilities;
use crate::foundation::cancel::CancelToken;
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{ExportError, ExportResult};
use crate::worker::audio::AudioWorker;
use crate::worker::protocol::{EncodeOptions, ProcessPayload, StartPayload};
use crate::worker::video::VideoWorker;
use std::path::PathBuf;
use std::sync::Arc;

/// Frames allowed to wait in the video worker's queue.
const DEFAULT_QUEUE_DEPTH: usize = 4;

/// Lifecycle of an [`ExportJob`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Configuring,
    Encoding,
    Finalizing,
    Done,
    Error,
    Cancelled,
}

/// Result of a successful export.
#[derive(Clone, Debug)]
pub struct ExportOutput {
    /// The MP4 file.
    pub bytes: Vec<u8>,
    /// Frames rendered and submitted.
    pub frames: u64,
    /// Whether the file carries an audio track.
    pub has_audio: bool,
}

/// One export of one project. A job runs at most once.
pub struct ExportJob {
    project: Project,
    base_dir: PathBuf,
    backend: Option<Arc<dyn EncoderBackend>>,
    mixer: Option<AudioMixer>,
    queue_depth: usize,
    cancel: CancelToken,
    state: JobState,
    status: String,
}

impl std::fmt::Debug for ExportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportJob")
            .field("base_dir", &self.base_dir)
            .field("state", &self.state)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl ExportJob {
    /// Create a job for `project`. Relative media references resolve against `base_dir`.
    pub fn new(project: Project, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            project,
            base_dir: base_dir.into(),
            backend: None,
            mixer: None,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            cancel: CancelToken::new(),
            state: JobState::Idle,
            status: "idle".to_owned(),
        }
    }

    /// Use `backend` instead of probing for `ffmpeg`.
    pub fn with_backend(mut self, backend: Arc<dyn EncoderBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use `mixer` instead of the default fetch + `ffmpeg` decode stages.
    pub fn with_mixer(mut self, mixer: AudioMixer) -> Self {
        self.mixer = Some(mixer);
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Token that cancels this job from any thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Readable status line; names the failed stage after an error.
    pub fn status(&self) -> &str {
        &self.status
    }

    fn transition(&mut self, state: JobState, status: impl Into<String>) {
        self.state = state;
        self.status = status.into();
        tracing::info!(state = ?state, status = %self.status, "export job");
    }

    /// Run the export to completion.
    #[tracing::instrument(skip(self), fields(pages = self.project.pages.len()))]
    pub fn run(&mut self) -> ExportResult<ExportOutput> {
        if self.state != JobState::Idle {
            return Err(ExportError::invalid_state(format!(
                "export job already ran (state {:?})",
                self.state
            )));
        }
        match self.run_inner() {
            Ok(out) => {
                self.transition(JobState::Done, "export complete");
                Ok(out)
            }
            Err(e) => {
                let state = if matches!(e, ExportError::Cancelled) {
                    JobState::Cancelled
                } else {
                    JobState::Error
                };
                self.transition(state, e.status_message());
                Err(e)
            }
        }
    }

    fn run_inner(&mut self) -> ExportResult<ExportOutput> {
        self.transition(JobState::Configuring, "preparing export");
        self.project.validate()?;
        self.cancel.check()?;

        let (backend, mixer) = self.resolve_stages();
        let settings = self.project.settings;
        let total_frames = self.project.total_frames();
        let wants_audio = settings.audio && !self.project.audio_sources.is_empty();

        // Mix on the audio worker while images are decoded here.
        let audio_worker = if wants_audio {
            let worker = AudioWorker::spawn(mixer, self.cancel.clone())?;
            worker.request(ProcessPayload {
                audio_sources: self.project.audio_sources.clone(),
                max_duration: self.project.duration_secs(),
            })?;
            Some(worker)
        } else {
            None
        };
        let renderer = FrameRenderer::prepare(&self.project, &self.base_dir)?;
        let audio: Option<MixedAudioBuffer> = match &audio_worker {
            Some(worker) => worker.wait()?,
            None => None,
        };
        drop(audio_worker);
        let has_audio = audio.as_ref().is_some_and(|a| a.len_frames() > 0);

        let video = VideoWorker::spawn(backend, self.cancel.clone(), self.queue_depth)?;
        video.start(StartPayload {
            export_width: settings.width,
            export_height: settings.height,
            options: EncodeOptions {
                codec: settings.codec,
                bitrate: settings.bitrate,
                frame_rate: settings.fps,
            },
            audio,
        })?;

        self.transition(JobState::Encoding, format!("encoding {total_frames} frames"));
        let log_every = u64::from(settings.fps.num / settings.fps.den.max(1)).max(1);
        for i in 0..total_frames {
            self.cancel.check()?;
            let index = FrameIndex(i);
            let pixels = renderer.render(index)?;
            let frame = VideoFrame::new(
                renderer.width(),
                renderer.height(),
                settings.fps.frame_timestamp_us(index),
                pixels,
            )?;
            video.submit_frame(frame)?;
            if (i + 1).is_multiple_of(log_every) {
                tracing::debug!(frame = i + 1, total = total_frames, "frames submitted");
            }
        }

        self.transition(JobState::Finalizing, "finalizing MP4");
        let bytes = video.finish()?;
        Ok(ExportOutput {
            bytes,
            frames: total_frames,
            has_audio,
        })
    }

    /// Injected stages win; otherwise capabilities are probed once and shared.
    fn resolve_stages(&mut self) -> (Arc<dyn EncoderBackend>, AudioMixer) {
        let caps = (self.backend.is_none() || self.mixer.is_none())
            .then(Capabilities::probe)
            .unwrap_or_default();
        let backend = self
            .backend
            .take()
            .unwrap_or_else(|| Arc::new(FfmpegBackend::with_capabilities(caps.clone())));
        let mixer = self
            .mixer
            .take()
            .unwrap_or_else(|| AudioMixer::with_defaults(self.base_dir.clone(), caps));
        (backend, mixer)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/export/orchestrator.rs"]
mod tests;
