//! Video encoder & muxer worker.
//!
//! [`VideoEncodeJob`] is the state machine that owns the encoders and the muxer. It runs on a
//! dedicated thread behind [`VideoWorker`], which the orchestrator talks to with
//! [`VideoRequest`] messages.

use crate::audio::buffer::MixedAudioBuffer;
use crate::encode::backend::{AudioEncoder, EncoderBackend, VideoEncoder};
use crate::encode::chunk::EncodedChunk;
use crate::encode::config::{AudioEncoderConfig, DEFAULT_AUDIO_BITRATE, VideoEncoderConfig};
use crate::encode::frame::VideoFrame;
use crate::foundation::cancel::CancelToken;
use crate::foundation::core::AUDIO_WINDOW_FRAMES;
use crate::foundation::error::{EncoderKind, ExportError, ExportResult};
use crate::mux::mp4::{AudioTrackConfig, Mp4Muxer, VideoTrackConfig};
use crate::worker::protocol::{StartPayload, VideoReply, VideoRequest};
use crate::worker::supervisor::spawn_supervised;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

/// Lifecycle of a [`VideoEncodeJob`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Created, not configured.
    Uninitialized,
    /// Encoders configured, no frame seen yet.
    Ready,
    /// At least one frame accepted.
    Encoding,
    /// Flushing encoders and writing the container.
    Finalizing,
    /// The container was produced.
    Done,
    /// A failure ended the job.
    Error,
    /// The cancel token ended the job.
    Cancelled,
}

impl WorkerState {
    /// Frames are encoded only in these states.
    pub fn accepts_frames(self) -> bool {
        matches!(self, Self::Ready | Self::Encoding)
    }

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

type FeederMsg = ExportResult<EncodedChunk>;

/// Background thread feeding 1-second PCM windows to the audio encoder.
///
/// Windows are encoded while video frames are still arriving; the encoder is flushed only when
/// [`finish`](Self::finish) signals that the video encoder has been flushed.
struct AudioFeeder {
    chunks: mpsc::Receiver<FeederMsg>,
    flush: Option<mpsc::Sender<()>>,
    halt: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl AudioFeeder {
    fn spawn(
        mut encoder: Box<dyn AudioEncoder>,
        audio: MixedAudioBuffer,
        cancel: CancelToken,
    ) -> ExportResult<Self> {
        let (tx, rx) = mpsc::channel::<FeederMsg>();
        let (flush_tx, flush_rx) = mpsc::channel::<()>();
        let halt = CancelToken::new();
        let feeder_halt = halt.clone();
        let panic_tx = tx.clone();
        let handle = spawn_supervised(
            "audio-feeder",
            move || {
                let res = feed_windows(encoder.as_mut(), &audio, &cancel, &feeder_halt, &tx)
                    .and_then(|fed| {
                        // A closed flush channel means the job was abandoned.
                        if !fed || flush_rx.recv().is_err() {
                            return Ok(());
                        }
                        for chunk in encoder.flush()? {
                            if tx.send(Ok(chunk)).is_err() {
                                break;
                            }
                        }
                        Ok(())
                    });
                if let Err(e) = res {
                    let _ = tx.send(Err(e));
                }
            },
            move |e| {
                let _ = panic_tx.send(Err(e));
            },
        )?;
        Ok(Self {
            chunks: rx,
            flush: Some(flush_tx),
            halt,
            handle: Some(handle),
        })
    }

    /// Chunks produced so far, without blocking.
    fn poll(&self) -> ExportResult<Vec<EncodedChunk>> {
        let mut out = Vec::new();
        while let Ok(msg) = self.chunks.try_recv() {
            out.push(msg?);
        }
        Ok(out)
    }

    /// Flush the audio encoder, wait for the feeder to exit and return the remaining chunks.
    fn finish(mut self) -> ExportResult<Vec<EncodedChunk>> {
        if let Some(flush) = self.flush.take() {
            // The feeder may already have exited with an error; it is read from `chunks` below.
            let _ = flush.send(());
        }
        let mut out = Vec::new();
        let mut failure = None;
        for msg in self.chunks.iter() {
            match msg {
                Ok(chunk) => out.push(chunk),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if failure.is_some() {
            self.halt.cancel();
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
            && failure.is_none()
        {
            failure = Some(ExportError::WorkerDisconnected("audio-feeder".to_owned()));
        }
        tracing::debug!(chunks = out.len(), "audio feeder finished");
        match failure {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}

impl Drop for AudioFeeder {
    fn drop(&mut self) {
        self.halt.cancel();
        self.flush = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Encode every window. Returns `false` when the feeder was halted or abandoned early.
fn feed_windows(
    encoder: &mut dyn AudioEncoder,
    audio: &MixedAudioBuffer,
    cancel: &CancelToken,
    halt: &CancelToken,
    tx: &mpsc::Sender<FeederMsg>,
) -> ExportResult<bool> {
    let mut windows = 0usize;
    for window in audio.windows(AUDIO_WINDOW_FRAMES) {
        cancel.check()?;
        if halt.is_cancelled() {
            return Ok(false);
        }
        encoder.encode(&window)?;
        windows += 1;
        for chunk in encoder.take_output()? {
            if tx.send(Ok(chunk)).is_err() {
                return Ok(false);
            }
        }
    }
    tracing::debug!(windows, "audio windows submitted");
    Ok(true)
}

struct Session {
    video: Box<dyn VideoEncoder>,
    muxer: Mp4Muxer,
    audio: Option<AudioFeeder>,
    frames: u64,
}

impl Session {
    fn drain(&mut self) -> ExportResult<()> {
        for chunk in self.video.take_output()? {
            self.muxer.add_video_chunk(chunk)?;
        }
        if let Some(feeder) = &self.audio {
            for chunk in feeder.poll()? {
                self.muxer.add_audio_chunk(chunk)?;
            }
        }
        Ok(())
    }
}

/// Encoder/muxer state machine for one export.
///
/// `uninitialized → ready → encoding → finalizing → done`, with `error` and `cancelled`
/// reachable from every non-terminal state. One job produces at most one file.
pub struct VideoEncodeJob {
    backend: Arc<dyn EncoderBackend>,
    cancel: CancelToken,
    state: WorkerState,
    session: Option<Session>,
    failure: Option<String>,
}

impl std::fmt::Debug for VideoEncodeJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoEncodeJob")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("frames", &self.session.as_ref().map(|s| s.frames))
            .finish()
    }
}

impl VideoEncodeJob {
    /// Create an unconfigured job.
    pub fn new(backend: Arc<dyn EncoderBackend>, cancel: CancelToken) -> Self {
        Self {
            backend,
            cancel,
            state: WorkerState::Uninitialized,
            session: None,
            failure: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Number of frames handed to the encoder.
    pub fn frames_submitted(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.frames)
    }

    /// Check support for the requested configuration, then create encoders and the muxer.
    ///
    /// Nothing is created unless both video and (if present) audio configurations pass the
    /// backend's support query.
    pub fn configure(&mut self, start: StartPayload) -> ExportResult<()> {
        if self.state != WorkerState::Uninitialized {
            return Err(ExportError::invalid_state(format!(
                "configure called in state {:?}",
                self.state
            )));
        }
        match self.try_configure(start) {
            Ok(session) => {
                self.session = Some(session);
                self.state = WorkerState::Ready;
                tracing::info!(backend = self.backend.name(), "video worker ready");
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn try_configure(&self, start: StartPayload) -> ExportResult<Session> {
        self.cancel.check()?;
        let video_cfg = VideoEncoderConfig {
            codec: start.options.codec,
            width: start.export_width,
            height: start.export_height,
            fps: start.options.frame_rate,
            bitrate: start.options.bitrate,
        };
        video_cfg.validate()?;
        self.backend
            .check_video_config(&video_cfg)
            .map_err(|reason| ExportError::unsupported_config(EncoderKind::Video, reason))?;

        let audio = match start.audio {
            Some(buf) if buf.len_frames() > 0 => {
                buf.validate()?;
                let cfg = AudioEncoderConfig {
                    sample_rate: buf.sample_rate,
                    channels: buf.number_of_channels,
                    bitrate: DEFAULT_AUDIO_BITRATE,
                };
                self.backend
                    .check_audio_config(&cfg)
                    .map_err(|reason| ExportError::unsupported_config(EncoderKind::Audio, reason))?;
                Some((cfg, buf))
            }
            Some(_) => {
                tracing::debug!("audio buffer is empty; exporting without an audio track");
                None
            }
            None => None,
        };

        let video = self.backend.create_video_encoder(&video_cfg)?;
        let (timescale, _) = video_cfg.fps.track_timing();
        let video_track = VideoTrackConfig {
            codec: video_cfg.codec,
            width: video_cfg.width,
            height: video_cfg.height,
            timescale,
        };

        let (audio_track, feeder) = match audio {
            Some((cfg, buf)) => {
                let encoder = self.backend.create_audio_encoder(&cfg)?;
                let track = AudioTrackConfig {
                    sample_rate: cfg.sample_rate,
                    channels: cfg.channels,
                    bitrate: cfg.bitrate,
                    priming_samples: encoder.priming_samples(),
                    presentation_samples: Some(buf.len_frames() as u64),
                };
                let feeder = AudioFeeder::spawn(encoder, buf, self.cancel.clone())?;
                (Some(track), Some(feeder))
            }
            None => (None, None),
        };

        tracing::debug!(
            codec = video_cfg.codec.codec_string(),
            width = video_cfg.width,
            height = video_cfg.height,
            fps = video_cfg.fps.as_f64(),
            bitrate = video_cfg.bitrate,
            audio = feeder.is_some(),
            "configured encoders"
        );
        Ok(Session {
            video,
            muxer: Mp4Muxer::new(video_track, audio_track),
            audio: feeder,
            frames: 0,
        })
    }

    /// Encode one frame.
    ///
    /// Frames arriving outside `ready`/`encoding` are dropped. The frame is released once the
    /// encoder has seen it, whether or not encoding succeeded. Returns an error only on the
    /// transition into `error` or `cancelled`.
    pub fn submit_frame(&mut self, frame: VideoFrame) -> ExportResult<()> {
        if !self.state.accepts_frames() {
            tracing::debug!(
                state = ?self.state,
                timestamp_us = frame.timestamp_us(),
                "dropping frame"
            );
            return Ok(());
        }
        if let Err(e) = self.cancel.check() {
            return Err(self.fail(e));
        }
        let Some(session) = self.session.as_mut() else {
            return Err(self.fail(ExportError::invalid_state("encoder session is missing")));
        };

        self.state = WorkerState::Encoding;
        let res = session.video.encode(&frame);
        drop(frame);
        let res = res.and_then(|()| {
            session.frames += 1;
            session.drain()
        });
        res.map_err(|e| self.fail(e))
    }

    /// Flush video, then audio, then finalize the container.
    pub fn finish(&mut self) -> ExportResult<Vec<u8>> {
        match self.state {
            WorkerState::Ready | WorkerState::Encoding => {}
            WorkerState::Uninitialized => {
                return Err(self.fail(ExportError::invalid_state(
                    "finish called before the encoder was configured",
                )));
            }
            WorkerState::Cancelled => return Err(ExportError::Cancelled),
            WorkerState::Error => {
                return Err(ExportError::invalid_state(format!(
                    "finish called after the job failed: {}",
                    self.failure.as_deref().unwrap_or("unknown error")
                )));
            }
            WorkerState::Finalizing | WorkerState::Done => {
                return Err(ExportError::invalid_state("finish called more than once"));
            }
        }
        if let Err(e) = self.cancel.check() {
            return Err(self.fail(e));
        }
        let Some(session) = self.session.take() else {
            return Err(self.fail(ExportError::invalid_state("encoder session is missing")));
        };

        self.state = WorkerState::Finalizing;
        match Self::finalize(session) {
            Ok(bytes) => {
                self.state = WorkerState::Done;
                tracing::info!(bytes = bytes.len(), "video worker done");
                Ok(bytes)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn finalize(mut session: Session) -> ExportResult<Vec<u8>> {
        if session.frames == 0 {
            return Err(ExportError::NoVideoFrames);
        }

        for chunk in session.video.take_output()? {
            session.muxer.add_video_chunk(chunk)?;
        }
        for chunk in session.video.flush()? {
            session.muxer.add_video_chunk(chunk)?;
        }
        if let Some(feeder) = session.audio.take() {
            for chunk in feeder.finish()? {
                session.muxer.add_audio_chunk(chunk)?;
            }
        }

        if session.muxer.video_samples() == 0 {
            return Err(ExportError::EmptyOutput);
        }
        tracing::debug!(
            frames = session.frames,
            video_samples = session.muxer.video_samples(),
            audio_samples = session.muxer.audio_samples(),
            "encoders flushed"
        );
        let bytes = session.muxer.finalize()?;
        if bytes.is_empty() {
            return Err(ExportError::EmptyOutput);
        }
        Ok(bytes)
    }

    /// Record a terminal failure and tear down encoders.
    fn fail(&mut self, e: ExportError) -> ExportError {
        self.session = None;
        if matches!(e, ExportError::Cancelled) {
            tracing::info!("video worker cancelled");
            self.state = WorkerState::Cancelled;
        } else {
            tracing::error!(error = %e, state = ?self.state, "video worker failed");
            self.state = WorkerState::Error;
            self.failure = Some(e.to_string());
        }
        e
    }
}

/// Handle to a video worker thread.
///
/// `submit_frame` queues frames on a bounded channel and returns without waiting for encoding;
/// the first asynchronous failure is reported by the next call.
pub struct VideoWorker {
    requests: Option<mpsc::SyncSender<VideoRequest>>,
    replies: mpsc::Receiver<VideoReply>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for VideoWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoWorker").finish_non_exhaustive()
    }
}

const WORKER: &str = "video-worker";

impl VideoWorker {
    /// Spawn the worker thread. At most `queue_depth` frames wait in the channel.
    pub fn spawn(
        backend: Arc<dyn EncoderBackend>,
        cancel: CancelToken,
        queue_depth: usize,
    ) -> ExportResult<Self> {
        let (req_tx, req_rx) = mpsc::sync_channel::<VideoRequest>(queue_depth.max(1));
        let (rep_tx, rep_rx) = mpsc::channel::<VideoReply>();
        let panic_tx = rep_tx.clone();
        let handle = spawn_supervised(
            WORKER,
            move || {
                let job = VideoEncodeJob::new(backend, cancel);
                run_video_worker(job, req_rx, rep_tx);
            },
            move |e| {
                let _ = panic_tx.send(VideoReply::Error(e));
            },
        )?;
        Ok(Self {
            requests: Some(req_tx),
            replies: rep_rx,
            handle: Some(handle),
        })
    }

    fn send(&self, req: VideoRequest) -> ExportResult<()> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| ExportError::WorkerDisconnected(WORKER.to_owned()))?;
        requests.send(req).map_err(|_| self.disconnected())
    }

    /// Error for a closed request channel: the worker's own report if it left one.
    ///
    /// The request receiver only closes while the worker thread is exiting, so this wait ends
    /// as soon as the supervisor has reported or the thread is gone.
    fn disconnected(&self) -> ExportError {
        match self.replies.recv() {
            Ok(VideoReply::Error(e)) => e,
            Ok(VideoReply::Cancelled) => ExportError::Cancelled,
            _ => ExportError::WorkerDisconnected(WORKER.to_owned()),
        }
    }

    /// Configure the worker and wait for `Ready`.
    pub fn start(&self, payload: StartPayload) -> ExportResult<()> {
        self.send(VideoRequest::Start(payload))?;
        match self.replies.recv() {
            Ok(VideoReply::Ready) => Ok(()),
            Ok(VideoReply::Error(e)) => Err(e),
            Ok(VideoReply::Cancelled) => Err(ExportError::Cancelled),
            Ok(VideoReply::Done(_)) => Err(ExportError::invalid_state(
                "video worker replied 'done' to 'start'",
            )),
            Err(_) => Err(ExportError::WorkerDisconnected(WORKER.to_owned())),
        }
    }

    /// Queue one frame. Blocks only while the queue is full.
    pub fn submit_frame(&self, frame: VideoFrame) -> ExportResult<()> {
        match self.replies.try_recv() {
            Ok(VideoReply::Error(e)) => return Err(e),
            Ok(VideoReply::Cancelled) => return Err(ExportError::Cancelled),
            Ok(_) | Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => {
                return Err(ExportError::WorkerDisconnected(WORKER.to_owned()));
            }
        }
        self.send(VideoRequest::Frame(frame))
    }

    /// Finish the export and wait for the container bytes. Consumes the worker.
    pub fn finish(mut self) -> ExportResult<Vec<u8>> {
        self.send(VideoRequest::Finish)?;
        let result = loop {
            match self.replies.recv() {
                Ok(VideoReply::Done(bytes)) => break Ok(bytes),
                Ok(VideoReply::Error(e)) => break Err(e),
                Ok(VideoReply::Cancelled) => break Err(ExportError::Cancelled),
                Ok(VideoReply::Ready) => continue,
                Err(_) => break Err(ExportError::WorkerDisconnected(WORKER.to_owned())),
            }
        };
        self.shutdown();
        result
    }

    fn shutdown(&mut self) {
        self.requests = None;
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("video worker thread exited abnormally");
        }
    }
}

impl Drop for VideoWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_video_worker(
    mut job: VideoEncodeJob,
    requests: mpsc::Receiver<VideoRequest>,
    replies: mpsc::Sender<VideoReply>,
) {
    for req in requests {
        let reply = match req {
            VideoRequest::Start(payload) => Some(match job.configure(payload) {
                Ok(()) => VideoReply::Ready,
                Err(e) => VideoReply::from_error(e),
            }),
            VideoRequest::Frame(frame) => job.submit_frame(frame).err().map(VideoReply::from_error),
            VideoRequest::Finish => {
                let reply = match job.finish() {
                    Ok(bytes) => VideoReply::Done(bytes),
                    Err(e) => VideoReply::from_error(e),
                };
                let _ = replies.send(reply);
                return;
            }
        };
        if let Some(reply) = reply
            && replies.send(reply).is_err()
        {
            return;
        }
    }
    tracing::debug!(state = ?job.state(), "video worker request channel closed");
}

#[cfg(test)]
#[path = "../../tests/unit/worker/video.rs"]
mod tests;
