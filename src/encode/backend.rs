use crate::audio::buffer::AudioWindow;
use crate::encode::chunk::EncodedChunk;
use crate::encode::config::{AudioEncoderConfig, VideoEncoderConfig};
use crate::encode::frame::VideoFrame;
use crate::foundation::error::ExportResult;

/// Streaming video encoder.
///
/// Frames go in through [`encode`](Self::encode) in presentation order; compressed chunks come
/// out, in the same order, through [`take_output`](Self::take_output) while encoding continues
/// and through [`flush`](Self::flush) at the end.
pub trait VideoEncoder: Send {
    /// Submit one frame. The encoder must not keep a reference to the frame.
    ///
    /// Keyframe placement is the encoder's job: the first frame and then one every
    /// [`VideoEncoderConfig::keyframe_interval`] frames.
    fn encode(&mut self, frame: &VideoFrame) -> ExportResult<()>;
    /// Collect chunks that are ready without blocking.
    fn take_output(&mut self) -> ExportResult<Vec<EncodedChunk>>;
    /// Finish encoding and return every remaining chunk. The encoder is spent afterwards.
    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>>;
}

/// Streaming AAC encoder fed with interleaved PCM windows.
pub trait AudioEncoder: Send {
    /// Submit one window of interleaved PCM.
    fn encode(&mut self, window: &AudioWindow) -> ExportResult<()>;
    /// Collect chunks that are ready without blocking.
    fn take_output(&mut self) -> ExportResult<Vec<EncodedChunk>>;
    /// Finish encoding and return every remaining chunk. The encoder is spent afterwards.
    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>>;
    /// Decoder delay the encoder inserts at the start of the stream, in samples.
    fn priming_samples(&self) -> u32 {
        0
    }
}

/// Source of encoders for one runtime.
///
/// Configurations are queried before anything is created: `check_*` must reject every
/// configuration that `create_*` cannot honor, so rejection happens before the job commits.
pub trait EncoderBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;
    /// Answer whether the video configuration is supported, with a reason when it is not.
    fn check_video_config(&self, cfg: &VideoEncoderConfig) -> Result<(), String>;
    /// Answer whether the audio configuration is supported, with a reason when it is not.
    fn check_audio_config(&self, cfg: &AudioEncoderConfig) -> Result<(), String>;
    /// Create a video encoder for a configuration that passed the check.
    fn create_video_encoder(&self, cfg: &VideoEncoderConfig) -> ExportResult<Box<dyn VideoEncoder>>;
    /// Create an audio encoder for a configuration that passed the check.
    fn create_audio_encoder(&self, cfg: &AudioEncoderConfig) -> ExportResult<Box<dyn AudioEncoder>>;
}
