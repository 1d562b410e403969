use crate::audio::buffer::AudioWindow;
use crate::encode::adts::AdtsParser;
use crate::encode::annexb::AccessUnitAssembler;
use crate::encode::backend::{AudioEncoder, EncoderBackend, VideoEncoder};
use crate::encode::chunk::EncodedChunk;
use crate::encode::config::{AudioEncoderConfig, VideoCodec, VideoEncoderConfig};
use crate::encode::frame::VideoFrame;
use crate::ffmpeg::caps::Capabilities;
use crate::ffmpeg::process::{FfmpegProcess, ffmpeg_command};
use crate::foundation::error::{EncoderKind, ExportError, ExportResult};
use std::io::Read;
use std::process::{ChildStdout, Command};
use std::sync::mpsc;
use std::thread::JoinHandle;

/// Decoder delay of ffmpeg's native AAC encoder.
const AAC_PRIMING_SAMPLES: u32 = 1024;

/// Encoder backend that runs the system `ffmpeg` binary.
///
/// Raw frames and PCM are streamed to `ffmpeg` over stdin; the elementary streams it writes to
/// stdout (Annex B video, ADTS audio) are parsed into MP4 samples on reader threads while input
/// is still being written.
#[derive(Clone, Debug)]
pub struct FfmpegBackend {
    caps: Capabilities,
}

impl FfmpegBackend {
    /// Probe the runtime and build a backend from what was found.
    pub fn probe() -> Self {
        Self::with_capabilities(Capabilities::probe())
    }

    /// Build a backend from already probed capabilities.
    pub fn with_capabilities(caps: Capabilities) -> Self {
        Self { caps }
    }

    /// Capabilities this backend was built with.
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }
}

impl EncoderBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn check_video_config(&self, cfg: &VideoEncoderConfig) -> Result<(), String> {
        cfg.validate().map_err(|e| e.to_string())?;
        if !self.caps.ffmpeg {
            return Err("ffmpeg is not available on PATH".to_owned());
        }
        if self.caps.video_encoder_for(cfg.codec).is_none() {
            return Err(format!(
                "no {} encoder is available in this ffmpeg build",
                cfg.codec.codec_string()
            ));
        }
        cfg.check_level_limits()
    }

    fn check_audio_config(&self, cfg: &AudioEncoderConfig) -> Result<(), String> {
        if !self.caps.has_aac() {
            return Err("no AAC encoder is available in this ffmpeg build".to_owned());
        }
        cfg.check_aac()
    }

    fn create_video_encoder(&self, cfg: &VideoEncoderConfig) -> ExportResult<Box<dyn VideoEncoder>> {
        let encoder = self.caps.video_encoder_for(cfg.codec).ok_or_else(|| {
            ExportError::unsupported_config(EncoderKind::Video, "no matching ffmpeg encoder")
        })?;
        Ok(Box::new(FfmpegVideoEncoder::spawn(*cfg, encoder)?))
    }

    fn create_audio_encoder(&self, cfg: &AudioEncoderConfig) -> ExportResult<Box<dyn AudioEncoder>> {
        Ok(Box::new(FfmpegAudioEncoder::spawn(*cfg)?))
    }
}

/// Incremental parser for an encoder's stdout.
trait StreamParser: Send + 'static {
    fn push(&mut self, bytes: &[u8], out: &mut Vec<EncodedChunk>) -> Result<(), String>;
    fn finish(&mut self, out: &mut Vec<EncodedChunk>) -> Result<(), String>;
}

impl StreamParser for AccessUnitAssembler {
    fn push(&mut self, bytes: &[u8], out: &mut Vec<EncodedChunk>) -> Result<(), String> {
        AccessUnitAssembler::push(self, bytes, out)
    }

    fn finish(&mut self, out: &mut Vec<EncodedChunk>) -> Result<(), String> {
        AccessUnitAssembler::finish(self, out)
    }
}

impl StreamParser for AdtsParser {
    fn push(&mut self, bytes: &[u8], out: &mut Vec<EncodedChunk>) -> Result<(), String> {
        AdtsParser::push(self, bytes, out)
    }

    fn finish(&mut self, out: &mut Vec<EncodedChunk>) -> Result<(), String> {
        AdtsParser::finish(self, out)
    }
}

type ChunkMsg = Result<EncodedChunk, String>;

/// One `ffmpeg` process plus the thread parsing its output.
struct PipeEncoder {
    kind: EncoderKind,
    process: FfmpegProcess,
    chunks: mpsc::Receiver<ChunkMsg>,
    reader: Option<JoinHandle<()>>,
}

impl PipeEncoder {
    fn spawn<P: StreamParser>(kind: EncoderKind, cmd: Command, parser: P) -> ExportResult<Self> {
        let (process, stdout) = FfmpegProcess::spawn(cmd)
            .map_err(|e| ExportError::encoder(kind, format!("{e:#}")))?;
        let (tx, rx) = mpsc::channel();
        let reader = std::thread::Builder::new()
            .name(format!("{kind}-encoder-reader"))
            .spawn(move || read_stream(stdout, parser, tx))
            .map_err(|e| ExportError::encoder(kind, format!("failed to spawn reader thread: {e}")))?;
        Ok(Self {
            kind,
            process,
            chunks: rx,
            reader: Some(reader),
        })
    }

    fn write(&mut self, bytes: &[u8]) -> ExportResult<()> {
        if let Err(e) = self.process.write_all(bytes) {
            // The process most likely died; its stderr is the useful diagnostic.
            let detail = match self.process.wait() {
                Err(stderr) => stderr,
                Ok(()) => e.to_string(),
            };
            return Err(ExportError::encoder(
                self.kind,
                format!("failed to write to encoder: {detail}"),
            ));
        }
        Ok(())
    }

    fn take_output(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        let mut out = Vec::new();
        loop {
            match self.chunks.try_recv() {
                Ok(Ok(chunk)) => out.push(chunk),
                Ok(Err(msg)) => return Err(ExportError::encoder(self.kind, msg)),
                Err(_) => break,
            }
        }
        Ok(out)
    }

    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        self.process.close_stdin();
        let mut out = Vec::new();
        let mut parse_error = None;
        // The reader drops its sender at end of stream.
        for msg in self.chunks.iter() {
            match msg {
                Ok(chunk) => out.push(chunk),
                Err(msg) => parse_error = parse_error.or(Some(msg)),
            }
        }
        if let Some(reader) = self.reader.take() {
            reader
                .join()
                .map_err(|_| ExportError::encoder(self.kind, "encoder reader thread panicked"))?;
        }
        self.process
            .wait()
            .map_err(|msg| ExportError::encoder(self.kind, msg))?;
        if let Some(msg) = parse_error {
            return Err(ExportError::encoder(self.kind, msg));
        }
        Ok(out)
    }
}

fn read_stream<P: StreamParser>(mut stdout: ChildStdout, mut parser: P, tx: mpsc::Sender<ChunkMsg>) {
    let mut buf = vec![0u8; 64 * 1024];
    let mut out = Vec::new();
    let failure = loop {
        let n = match stdout.read(&mut buf) {
            Ok(0) => break parser.finish(&mut out).err(),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => break Some(format!("failed to read encoder output: {e}")),
        };
        let res = parser.push(&buf[..n], &mut out);
        for chunk in out.drain(..) {
            if tx.send(Ok(chunk)).is_err() {
                return;
            }
        }
        if let Err(msg) = res {
            break Some(msg);
        }
    };
    for chunk in out.drain(..) {
        let _ = tx.send(Ok(chunk));
    }
    if let Some(msg) = failure {
        let _ = tx.send(Err(msg));
        // Keep draining so ffmpeg never blocks on a full stdout pipe.
        let _ = std::io::copy(&mut stdout, &mut std::io::sink());
    }
}

/// H.264 / HEVC encoder backed by `libx264` / `libx265`.
pub struct FfmpegVideoEncoder {
    cfg: VideoEncoderConfig,
    pipe: PipeEncoder,
}

impl FfmpegVideoEncoder {
    fn spawn(cfg: VideoEncoderConfig, encoder: &str) -> ExportResult<Self> {
        let (_, frame_ticks) = cfg.fps.track_timing();
        let mut cmd = ffmpeg_command();
        cmd.args([
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &format!("{}/{}", cfg.fps.num, cfg.fps.den),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            encoder,
            "-pix_fmt",
            "yuv420p",
            "-b:v",
            &cfg.bitrate.to_string(),
            "-g",
            &cfg.keyframe_interval().to_string(),
        ]);
        match cfg.codec {
            VideoCodec::H264 => {
                cmd.args([
                    "-profile:v",
                    "high",
                    "-level:v",
                    "4.0",
                    "-bf",
                    "0",
                    "-x264-params",
                    "aud=1",
                    "-f",
                    "h264",
                ]);
            }
            VideoCodec::Hevc => {
                cmd.args([
                    "-profile:v",
                    "main",
                    "-x265-params",
                    "aud=1:bframes=0:level-idc=40:log-level=error",
                    "-f",
                    "hevc",
                ]);
            }
        }
        cmd.arg("pipe:1");

        let parser = AccessUnitAssembler::new(cfg.codec, frame_ticks);
        let pipe = PipeEncoder::spawn(EncoderKind::Video, cmd, parser)?;
        tracing::debug!(
            codec = cfg.codec.codec_string(),
            width = cfg.width,
            height = cfg.height,
            "spawned ffmpeg video encoder"
        );
        Ok(Self { cfg, pipe })
    }
}

impl VideoEncoder for FfmpegVideoEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> ExportResult<()> {
        if frame.width() != self.cfg.width || frame.height() != self.cfg.height {
            return Err(ExportError::encoder(
                EncoderKind::Video,
                format!(
                    "frame size mismatch: got {}x{}, expected {}x{}",
                    frame.width(),
                    frame.height(),
                    self.cfg.width,
                    self.cfg.height
                ),
            ));
        }
        self.pipe.write(frame.data())
    }

    fn take_output(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        self.pipe.take_output()
    }

    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        self.pipe.flush()
    }
}

/// AAC-LC encoder backed by ffmpeg's native `aac` encoder.
pub struct FfmpegAudioEncoder {
    cfg: AudioEncoderConfig,
    pipe: PipeEncoder,
    scratch: Vec<u8>,
}

impl FfmpegAudioEncoder {
    fn spawn(cfg: AudioEncoderConfig) -> ExportResult<Self> {
        let mut cmd = ffmpeg_command();
        cmd.args([
            "-f",
            "f32le",
            "-ar",
            &cfg.sample_rate.to_string(),
            "-ac",
            &cfg.channels.to_string(),
            "-i",
            "pipe:0",
            "-vn",
            "-c:a",
            "aac",
            "-b:a",
            &cfg.bitrate.to_string(),
            "-f",
            "adts",
            "pipe:1",
        ]);
        let pipe = PipeEncoder::spawn(EncoderKind::Audio, cmd, AdtsParser::default())?;
        tracing::debug!(
            sample_rate = cfg.sample_rate,
            channels = cfg.channels,
            "spawned ffmpeg audio encoder"
        );
        Ok(Self {
            cfg,
            pipe,
            scratch: Vec::new(),
        })
    }
}

impl AudioEncoder for FfmpegAudioEncoder {
    fn encode(&mut self, window: &AudioWindow) -> ExportResult<()> {
        if window.channels != self.cfg.channels {
            return Err(ExportError::encoder(
                EncoderKind::Audio,
                format!(
                    "window has {} channels, encoder expects {}",
                    window.channels, self.cfg.channels
                ),
            ));
        }
        self.scratch.clear();
        self.scratch.reserve(window.interleaved.len() * 4);
        for &sample in &window.interleaved {
            self.scratch.extend_from_slice(&sample.to_le_bytes());
        }
        let bytes = std::mem::take(&mut self.scratch);
        let res = self.pipe.write(&bytes);
        self.scratch = bytes;
        res
    }

    fn take_output(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        self.pipe.take_output()
    }

    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        self.pipe.flush()
    }

    fn priming_samples(&self) -> u32 {
        AAC_PRIMING_SAMPLES
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/ffmpeg.rs"]
mod tests;
