//! Messages exchanged between the orchestrator and the workers.
//!
//! Every request and reply is a tagged enum sent over a channel; large buffers (frames, PCM,
//! the finished file) move by value. The payload structs serialize as camelCase JSON, and
//! [`AudioRequest`] as a `{type, payload}` envelope. Video messages carry frames and errors by
//! value and stay in-process; an error reply is put on the wire as an [`ErrorPayload`].

use crate::audio::buffer::MixedAudioBuffer;
use crate::audio::source::AudioSource;
use crate::encode::config::VideoCodec;
use crate::encode::frame::VideoFrame;
use crate::foundation::core::Fps;
use crate::foundation::error::{ExportError, ExportStage};

/// Encoder options chosen for an export.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeOptions {
    /// Output video codec.
    pub codec: VideoCodec,
    /// Target video bitrate in bits per second.
    pub bitrate: u64,
    /// Constant output frame rate.
    pub frame_rate: Fps,
}

/// Payload of the video worker's `start` message.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    /// Output width in pixels.
    pub export_width: u32,
    /// Output height in pixels.
    pub export_height: u32,
    /// Encoder options.
    pub options: EncodeOptions,
    /// Mixed audio to encode alongside the video, if the export has sound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<MixedAudioBuffer>,
}

/// Payload of the audio worker's `process` message.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPayload {
    /// Sources to mix, all starting at offset 0.
    pub audio_sources: Vec<AudioSource>,
    /// Output length in seconds.
    pub max_duration: f64,
}

/// Wire view of an error reply.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    /// Human-readable message.
    pub message: String,
    /// Stage the failure is attributed to.
    pub stage: ExportStage,
}

impl From<&ExportError> for ErrorPayload {
    fn from(e: &ExportError) -> Self {
        Self {
            message: e.to_string(),
            stage: e.stage(),
        }
    }
}

/// Orchestrator → video worker.
#[derive(Debug)]
pub enum VideoRequest {
    /// Configure encoders and the muxer.
    Start(StartPayload),
    /// Encode one frame. No reply; failures arrive as a later `Error`.
    Frame(VideoFrame),
    /// Flush everything and finalize the container.
    Finish,
}

/// Video worker → orchestrator.
#[derive(Debug)]
pub enum VideoReply {
    /// Encoders are configured and frames are accepted.
    Ready,
    /// The finished MP4 file.
    Done(Vec<u8>),
    /// The job failed; no further replies follow except to `Finish`.
    Error(ExportError),
    /// The job observed its cancel token.
    Cancelled,
}

impl VideoReply {
    /// Map a failure to its reply, keeping cancellation distinct from errors.
    pub fn from_error(e: ExportError) -> Self {
        match e {
            ExportError::Cancelled => Self::Cancelled,
            other => Self::Error(other),
        }
    }
}

/// Orchestrator → audio worker.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum AudioRequest {
    /// Mix the given sources.
    Process(ProcessPayload),
}

/// Audio worker → orchestrator.
#[derive(Debug)]
pub enum AudioReply {
    /// The mix, or `None` when there were no sources.
    Done(Option<MixedAudioBuffer>),
    /// Mixing failed.
    Error(ExportError),
}

#[cfg(test)]
#[path = "../../tests/unit/worker/protocol.rs"]
mod tests;
