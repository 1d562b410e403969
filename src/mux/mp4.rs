//! In-memory fast-start MP4 muxer.
//!
//! Samples are appended to an in-memory `mdat` payload as they arrive; [`Mp4Muxer::finalize`]
//! writes `ftyp`, then a `moov` describing every sample, then the `mdat`. Each sample is its own
//! chunk, so audio and video may arrive in any interleaving.

use crate::encode::chunk::{DecoderConfig, EncodedChunk};
use crate::encode::config::VideoCodec;
use crate::foundation::error::{ExportError, ExportResult};
use crate::mux::boxes::{BoxSink, put_matrix, write_box, write_descriptor, write_full_box};

const MOVIE_TIMESCALE: u32 = 1000;
const VIDEO_TRACK_ID: u32 = 1;
const AUDIO_TRACK_ID: u32 = 2;
/// ISO-639-2 "und", packed.
const LANGUAGE_UND: u16 = 0x55c4;

/// Video track parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoTrackConfig {
    /// Sample entry codec.
    pub codec: VideoCodec,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Ticks per second of chunk timestamps.
    pub timescale: u32,
}

/// Audio track parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioTrackConfig {
    /// Sample rate in Hz; also the track timescale.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Target bitrate, advertised in the decoder config descriptor.
    pub bitrate: u64,
    /// Encoder delay in samples, hidden with an edit list.
    pub priming_samples: u32,
    /// Exact length of the source PCM in samples, when known. Bounds the edit list so the
    /// padding of the last AAC frame is not presented.
    pub presentation_samples: Option<u64>,
}

#[derive(Clone, Copy, Debug)]
struct SampleEntry {
    offset: u64,
    size: u32,
    timestamp: u64,
    duration: u32,
    is_key: bool,
}

#[derive(Debug)]
struct Track {
    timescale: u32,
    config: Option<DecoderConfig>,
    samples: Vec<SampleEntry>,
}

impl Track {
    fn new(timescale: u32) -> Self {
        Self {
            timescale,
            config: None,
            samples: Vec::new(),
        }
    }

    fn push(&mut self, name: &str, chunk: EncodedChunk, offset: u64) -> ExportResult<()> {
        let size = u32::try_from(chunk.data.len())
            .map_err(|_| ExportError::mux(format!("{name} sample exceeds 4 GiB")))?;
        if chunk.config.is_none() && self.samples.is_empty() {
            return Err(ExportError::mux(format!(
                "first {name} sample carries no decoder configuration"
            )));
        }
        // Decode deltas follow the actual timestamps, so a gap stretches the previous sample.
        let prev_duration = match self.samples.last() {
            Some(prev) if chunk.timestamp <= prev.timestamp => {
                return Err(ExportError::mux(format!(
                    "{name} sample timestamps must increase ({} after {})",
                    chunk.timestamp, prev.timestamp
                )));
            }
            Some(prev) => Some(u32::try_from(chunk.timestamp - prev.timestamp).map_err(|_| {
                ExportError::mux(format!("{name} sample gap does not fit a 32-bit duration"))
            })?),
            None => None,
        };

        if let (Some(prev), Some(duration)) = (self.samples.last_mut(), prev_duration) {
            prev.duration = duration;
        }
        if let Some(config) = chunk.config {
            if self.config.is_none() {
                self.config = Some(config);
            } else {
                tracing::debug!(track = name, "ignoring repeated decoder config");
            }
        }
        self.samples.push(SampleEntry {
            offset,
            size,
            timestamp: chunk.timestamp,
            duration: chunk.duration,
            is_key: chunk.is_key,
        });
        Ok(())
    }

    /// Media duration in track ticks.
    fn duration(&self) -> u64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp + u64::from(last.duration),
            _ => 0,
        }
    }
}

/// Accumulates encoded samples for one video track and an optional audio track.
#[derive(Debug)]
pub struct Mp4Muxer {
    video_cfg: VideoTrackConfig,
    audio_cfg: Option<AudioTrackConfig>,
    video: Track,
    audio: Option<Track>,
    mdat: Vec<u8>,
}

impl Mp4Muxer {
    /// Create a muxer for one video track and, optionally, one AAC track.
    pub fn new(video: VideoTrackConfig, audio: Option<AudioTrackConfig>) -> Self {
        Self {
            video: Track::new(video.timescale),
            audio: audio.map(|a| Track::new(a.sample_rate)),
            video_cfg: video,
            audio_cfg: audio,
            mdat: Vec::new(),
        }
    }

    /// Append one video sample. Samples must arrive in presentation order.
    pub fn add_video_chunk(&mut self, chunk: EncodedChunk) -> ExportResult<()> {
        let offset = self.mdat.len() as u64;
        let data_len = chunk.data.len();
        self.mdat.extend_from_slice(&chunk.data);
        if let Err(e) = self.video.push("video", chunk, offset) {
            self.mdat.truncate(self.mdat.len() - data_len);
            return Err(e);
        }
        Ok(())
    }

    /// Append one audio sample. Samples must arrive in presentation order.
    pub fn add_audio_chunk(&mut self, chunk: EncodedChunk) -> ExportResult<()> {
        let Some(track) = self.audio.as_mut() else {
            return Err(ExportError::mux("muxer was created without an audio track"));
        };
        let offset = self.mdat.len() as u64;
        let data_len = chunk.data.len();
        self.mdat.extend_from_slice(&chunk.data);
        if let Err(e) = track.push("audio", chunk, offset) {
            self.mdat.truncate(self.mdat.len() - data_len);
            return Err(e);
        }
        Ok(())
    }

    /// Number of video samples added so far.
    pub fn video_samples(&self) -> usize {
        self.video.samples.len()
    }

    /// Number of audio samples added so far.
    pub fn audio_samples(&self) -> usize {
        self.audio.as_ref().map_or(0, |t| t.samples.len())
    }

    /// Write the container. Consumes the muxer, so a container is finalized exactly once.
    pub fn finalize(self) -> ExportResult<Vec<u8>> {
        if self.video.samples.is_empty() {
            return Err(ExportError::mux("video track has no samples"));
        }
        let audio = match (self.audio_cfg, self.audio.as_ref()) {
            (Some(cfg), Some(track)) if !track.samples.is_empty() => Some((cfg, track)),
            (Some(_), _) => {
                tracing::debug!("audio track has no samples; writing video only");
                None
            }
            _ => None,
        };

        let ftyp = self.ftyp();
        let mdat_payload = self.mdat.len() as u64;
        let mdat_header: u64 = if mdat_payload + 8 > u64::from(u32::MAX) {
            16
        } else {
            8
        };

        let mut moov = self.moov(audio, 0, false)?;
        let data_start = ftyp.len() as u64 + moov.len() as u64 + mdat_header;
        let wide = data_start + mdat_payload > u64::from(u32::MAX);
        if wide {
            moov = self.moov(audio, 0, true)?;
        }
        let data_start = ftyp.len() as u64 + moov.len() as u64 + mdat_header;
        let moov = self.moov(audio, data_start, wide)?;

        let mut out = Vec::with_capacity(ftyp.len() + moov.len() + 16 + self.mdat.len());
        out.put_bytes(&ftyp);
        out.put_bytes(&moov);
        if mdat_header == 16 {
            out.put_u32(1);
            out.put_bytes(b"mdat");
            out.put_u64(mdat_payload + 16);
        } else {
            out.put_u32((mdat_payload + 8) as u32);
            out.put_bytes(b"mdat");
        }
        out.put_bytes(&self.mdat);

        tracing::debug!(
            bytes = out.len(),
            video_samples = self.video.samples.len(),
            audio_samples = audio.map_or(0, |(_, t)| t.samples.len()),
            co64 = wide,
            "finalized mp4"
        );
        Ok(out)
    }

    fn ftyp(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_box(&mut out, b"ftyp", |b| {
            b.put_bytes(b"isom");
            b.put_u32(0x200);
            b.put_bytes(b"isom");
            b.put_bytes(b"iso2");
            b.put_bytes(&self.video_cfg.codec.sample_entry());
            b.put_bytes(b"mp41");
        });
        out
    }

    fn moov(
        &self,
        audio: Option<(AudioTrackConfig, &Track)>,
        data_start: u64,
        wide: bool,
    ) -> ExportResult<Vec<u8>> {
        let video_movie = to_movie_time(self.video.duration(), self.video.timescale);
        let audio_movie = audio.map_or(0, |(cfg, track)| {
            to_movie_time(presented_samples(cfg, track), track.timescale)
        });
        let movie_duration = video_movie.max(audio_movie);
        let next_track_id = if audio.is_some() {
            AUDIO_TRACK_ID + 1
        } else {
            VIDEO_TRACK_ID + 1
        };

        let mut out = Vec::new();
        let mut failure = None;
        write_box(&mut out, b"moov", |b| {
            write_mvhd(b, movie_duration, next_track_id);
            if let Err(e) = self.video_trak(b, video_movie, data_start, wide) {
                failure = Some(e);
                return;
            }
            if let Some((cfg, track)) = audio
                && let Err(e) = write_audio_trak(b, cfg, track, audio_movie, data_start, wide)
            {
                failure = Some(e);
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    fn video_trak(
        &self,
        out: &mut Vec<u8>,
        movie_duration: u64,
        data_start: u64,
        wide: bool,
    ) -> ExportResult<()> {
        let cfg = self.video_cfg;
        let track = &self.video;
        let sample_entry = video_sample_entry(cfg, track.config.as_ref())?;
        let media_duration = u32_field(track.duration(), "video media duration")?;
        let movie_duration = u32_field(movie_duration, "video track duration")?;

        write_box(out, b"trak", |b| {
            write_tkhd(b, VIDEO_TRACK_ID, movie_duration, false, cfg.width, cfg.height);
            write_box(b, b"mdia", |b| {
                write_mdhd(b, track.timescale, media_duration);
                write_hdlr(b, b"vide", "VideoHandler");
                write_box(b, b"minf", |b| {
                    write_full_box(b, b"vmhd", 0, 1, |b| b.put_zeros(8));
                    write_dinf(b);
                    write_stbl(b, &sample_entry, track, true, data_start, wide);
                });
            });
        });
        Ok(())
    }
}

fn write_audio_trak(
    out: &mut Vec<u8>,
    cfg: AudioTrackConfig,
    track: &Track,
    movie_duration: u64,
    data_start: u64,
    wide: bool,
) -> ExportResult<()> {
    let sample_entry = audio_sample_entry(cfg, track.config.as_ref())?;
    let media_duration = u32_field(track.duration(), "audio media duration")?;
    let movie_duration = u32_field(movie_duration, "audio track duration")?;
    let priming = cfg.priming_samples;

    write_box(out, b"trak", |b| {
        write_tkhd(b, AUDIO_TRACK_ID, movie_duration, true, 0, 0);
        if priming > 0 {
            write_box(b, b"edts", |b| {
                write_full_box(b, b"elst", 0, 0, |b| {
                    b.put_u32(1);
                    b.put_u32(movie_duration);
                    b.put_u32(priming);
                    b.put_u16(1);
                    b.put_u16(0);
                });
            });
        }
        write_box(b, b"mdia", |b| {
            write_mdhd(b, track.timescale, media_duration);
            write_hdlr(b, b"soun", "SoundHandler");
            write_box(b, b"minf", |b| {
                write_full_box(b, b"smhd", 0, 0, |b| b.put_zeros(4));
                write_dinf(b);
                write_stbl(b, &sample_entry, track, false, data_start, wide);
            });
        });
    });
    Ok(())
}

/// Audio samples presented after the edit list skips the priming samples.
fn presented_samples(cfg: AudioTrackConfig, track: &Track) -> u64 {
    let available = track.duration().saturating_sub(u64::from(cfg.priming_samples));
    cfg.presentation_samples
        .map_or(available, |exact| exact.min(available))
}

fn to_movie_time(ticks: u64, timescale: u32) -> u64 {
    if timescale == 0 {
        return 0;
    }
    let scaled = u128::from(ticks) * u128::from(MOVIE_TIMESCALE);
    scaled.div_ceil(u128::from(timescale)) as u64
}

fn u32_field(v: u64, what: &str) -> ExportResult<u32> {
    u32::try_from(v).map_err(|_| ExportError::mux(format!("{what} {v} does not fit in 32 bits")))
}

fn write_mvhd(out: &mut Vec<u8>, duration: u64, next_track_id: u32) {
    let duration = u32::try_from(duration).unwrap_or(u32::MAX);
    write_full_box(out, b"mvhd", 0, 0, |b| {
        b.put_u32(0); // creation_time
        b.put_u32(0); // modification_time
        b.put_u32(MOVIE_TIMESCALE);
        b.put_u32(duration);
        b.put_u32(0x0001_0000); // rate 1.0
        b.put_u16(0x0100); // volume 1.0
        b.put_zeros(10);
        put_matrix(b);
        b.put_zeros(24);
        b.put_u32(next_track_id);
    });
}

fn write_tkhd(out: &mut Vec<u8>, track_id: u32, duration: u32, audio: bool, width: u32, height: u32) {
    // enabled | in_movie | in_preview
    write_full_box(out, b"tkhd", 0, 0x7, |b| {
        b.put_u32(0);
        b.put_u32(0);
        b.put_u32(track_id);
        b.put_u32(0);
        b.put_u32(duration);
        b.put_zeros(8);
        b.put_u16(0); // layer
        b.put_u16(0); // alternate_group
        b.put_u16(if audio { 0x0100 } else { 0 });
        b.put_u16(0);
        put_matrix(b);
        b.put_u32(width << 16);
        b.put_u32(height << 16);
    });
}

fn write_mdhd(out: &mut Vec<u8>, timescale: u32, duration: u32) {
    write_full_box(out, b"mdhd", 0, 0, |b| {
        b.put_u32(0);
        b.put_u32(0);
        b.put_u32(timescale);
        b.put_u32(duration);
        b.put_u16(LANGUAGE_UND);
        b.put_u16(0);
    });
}

fn write_hdlr(out: &mut Vec<u8>, handler: &[u8; 4], name: &str) {
    write_full_box(out, b"hdlr", 0, 0, |b| {
        b.put_u32(0);
        b.put_bytes(handler);
        b.put_zeros(12);
        b.put_bytes(name.as_bytes());
        b.put_u8(0);
    });
}

fn write_dinf(out: &mut Vec<u8>) {
    write_box(out, b"dinf", |b| {
        write_full_box(b, b"dref", 0, 0, |b| {
            b.put_u32(1);
            // Media data lives in this file.
            write_full_box(b, b"url ", 0, 1, |_| {});
        });
    });
}

fn video_sample_entry(cfg: VideoTrackConfig, config: Option<&DecoderConfig>) -> ExportResult<Vec<u8>> {
    let (config_box, record): (&[u8; 4], &[u8]) = match (cfg.codec, config) {
        (VideoCodec::H264, Some(DecoderConfig::Avc(rec))) => (b"avcC", rec),
        (VideoCodec::Hevc, Some(DecoderConfig::Hevc(rec))) => (b"hvcC", rec),
        (codec, _) => {
            return Err(ExportError::mux(format!(
                "video track is missing a {} decoder configuration",
                codec.codec_string()
            )));
        }
    };
    let width = u16::try_from(cfg.width).map_err(|_| ExportError::mux("video width exceeds 65535"))?;
    let height =
        u16::try_from(cfg.height).map_err(|_| ExportError::mux("video height exceeds 65535"))?;

    let mut out = Vec::new();
    write_box(&mut out, &cfg.codec.sample_entry(), |b| {
        b.put_zeros(6);
        b.put_u16(1); // data_reference_index
        b.put_zeros(16);
        b.put_u16(width);
        b.put_u16(height);
        b.put_u32(0x0048_0000); // 72 dpi
        b.put_u32(0x0048_0000);
        b.put_u32(0);
        b.put_u16(1); // frame_count
        b.put_zeros(32); // compressorname
        b.put_u16(0x0018);
        b.put_u16(0xffff);
        write_box(b, config_box, |b| b.put_bytes(record));
    });
    Ok(out)
}

fn audio_sample_entry(cfg: AudioTrackConfig, config: Option<&DecoderConfig>) -> ExportResult<Vec<u8>> {
    let Some(DecoderConfig::Aac(asc)) = config else {
        return Err(ExportError::mux(
            "audio track is missing an AAC AudioSpecificConfig",
        ));
    };
    let rate = u16::try_from(cfg.sample_rate)
        .map_err(|_| ExportError::mux("audio sample rate exceeds 65535 Hz"))?;
    let bitrate = u32::try_from(cfg.bitrate).unwrap_or(u32::MAX);

    let mut out = Vec::new();
    write_box(&mut out, b"mp4a", |b| {
        b.put_zeros(6);
        b.put_u16(1); // data_reference_index
        b.put_zeros(8);
        b.put_u16(cfg.channels);
        b.put_u16(16); // samplesize
        b.put_u16(0);
        b.put_u16(0);
        b.put_u32(u32::from(rate) << 16);
        write_full_box(b, b"esds", 0, 0, |b| {
            write_descriptor(b, 0x03, |b| {
                b.put_u16(AUDIO_TRACK_ID as u16); // ES_ID
                b.put_u8(0);
                write_descriptor(b, 0x04, |b| {
                    b.put_u8(0x40); // MPEG-4 Audio
                    b.put_u8(0x15); // AudioStream, upstream = 0, reserved = 1
                    b.put_bytes(&[0, 0, 0]); // bufferSizeDB
                    b.put_u32(bitrate);
                    b.put_u32(bitrate);
                    write_descriptor(b, 0x05, |b| b.put_bytes(asc));
                });
                write_descriptor(b, 0x06, |b| b.put_u8(0x02));
            });
        });
    });
    Ok(out)
}

fn write_stbl(
    out: &mut Vec<u8>,
    sample_entry: &[u8],
    track: &Track,
    write_sync_table: bool,
    data_start: u64,
    wide: bool,
) {
    write_box(out, b"stbl", |b| {
        write_full_box(b, b"stsd", 0, 0, |b| {
            b.put_u32(1);
            b.put_bytes(sample_entry);
        });

        let mut runs: Vec<(u32, u32)> = Vec::new();
        for s in &track.samples {
            match runs.last_mut() {
                Some((count, delta)) if *delta == s.duration => *count += 1,
                _ => runs.push((1, s.duration)),
            }
        }
        write_full_box(b, b"stts", 0, 0, |b| {
            b.put_u32(runs.len() as u32);
            for (count, delta) in &runs {
                b.put_u32(*count);
                b.put_u32(*delta);
            }
        });

        if write_sync_table {
            let keys: Vec<u32> = track
                .samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_key)
                .map(|(i, _)| i as u32 + 1)
                .collect();
            write_full_box(b, b"stss", 0, 0, |b| {
                b.put_u32(keys.len() as u32);
                for k in &keys {
                    b.put_u32(*k);
                }
            });
        }

        write_full_box(b, b"stsc", 0, 0, |b| {
            b.put_u32(1);
            b.put_u32(1); // first_chunk
            b.put_u32(1); // samples_per_chunk
            b.put_u32(1); // sample_description_index
        });

        write_full_box(b, b"stsz", 0, 0, |b| {
            b.put_u32(0);
            b.put_u32(track.samples.len() as u32);
            for s in &track.samples {
                b.put_u32(s.size);
            }
        });

        if wide {
            write_full_box(b, b"co64", 0, 0, |b| {
                b.put_u32(track.samples.len() as u32);
                for s in &track.samples {
                    b.put_u64(data_start + s.offset);
                }
            });
        } else {
            write_full_box(b, b"stco", 0, 0, |b| {
                b.put_u32(track.samples.len() as u32);
                for s in &track.samples {
                    b.put_u32((data_start + s.offset) as u32);
                }
            });
        }
    });
}

#[cfg(test)]
#[path = "../../tests/unit/mux/mp4.rs"]
mod tests;
