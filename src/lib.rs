//! studio-export renders multi-page, multi-layer projects to fast-start MP4 files.
//!
//! The pipeline has three actors connected by tagged messages:
//!
//! - the [`AudioMixer`], run on an [`AudioWorker`] thread, fetches, decodes and mixes audio
//!   sources into one planar 48 kHz stereo [`MixedAudioBuffer`];
//! - the [`VideoWorker`] owns a [`VideoEncodeJob`]: H.264/HEVC and AAC encoders behind an
//!   [`EncoderBackend`] plus the in-crate [`Mp4Muxer`];
//! - the [`ExportJob`] orchestrator renders every frame of a [`Project`] and streams it to the
//!   video worker.
//!
//! The default backend drives the system `ffmpeg` binary over pipes.
#![forbid(unsafe_code)]

mod foundation;

pub(crate) mod audio;
pub(crate) mod encode;
pub(crate) mod export;
pub(crate) mod ffmpeg;
pub(crate) mod mux;
pub(crate) mod worker;

pub use crate::foundation::cancel::CancelToken;
pub use crate::foundation::core::{
    AUDIO_WINDOW_FRAMES, Fps, FrameIndex, MIX_CHANNELS, MIX_SAMPLE_RATE, Rgba8,
    samples_for_duration,
};
pub use crate::foundation::error::{EncoderKind, ExportError, ExportResult, ExportStage};

pub use crate::audio::buffer::{AudioWindow, MixedAudioBuffer};
pub use crate::audio::decode::{AudioPcm, FfmpegPcmDecoder, PcmDecoder};
pub use crate::audio::mix::AudioMixer;
pub use crate::audio::source::{AudioSource, DefaultFetcher, SourceFetcher};

pub use crate::encode::backend::{AudioEncoder, EncoderBackend, VideoEncoder};
pub use crate::encode::chunk::{DecoderConfig, EncodedChunk};
pub use crate::encode::config::{AudioEncoderConfig, VideoCodec, VideoEncoderConfig};
pub use crate::encode::ffmpeg::FfmpegBackend;
pub use crate::encode::frame::VideoFrame;
pub use crate::ffmpeg::caps::Capabilities;
pub use crate::ffmpeg::process::is_ffmpeg_on_path;

pub use crate::mux::inspect::{Mp4Info, TrackInfo, probe_mp4};
pub use crate::mux::mp4::{AudioTrackConfig, Mp4Muxer, VideoTrackConfig};

pub use crate::worker::audio::AudioWorker;
pub use crate::worker::protocol::{
    AudioReply, AudioRequest, EncodeOptions, ErrorPayload, ProcessPayload, StartPayload,
    VideoReply, VideoRequest,
};
pub use crate::worker::video::{VideoEncodeJob, VideoWorker, WorkerState};

pub use crate::export::orchestrator::{ExportJob, ExportOutput, JobState};
pub use crate::export::project::{ExportSettings, Layer, LayerContent, Page, Project};
pub use crate::export::render::FrameRenderer;
