use super::*;
use crate::encode::chunk::DecoderConfig;
use crate::encode::config::DEFAULT_AUDIO_BITRATE;
use crate::ffmpeg::process::is_ffmpeg_on_path;
use crate::foundation::core::{Fps, FrameIndex};

fn video_cfg(codec: VideoCodec, width: u32, height: u32) -> VideoEncoderConfig {
    VideoEncoderConfig {
        codec,
        width,
        height,
        fps: Fps::new(30, 1).unwrap(),
        bitrate: 1_000_000,
    }
}

fn audio_cfg() -> AudioEncoderConfig {
    AudioEncoderConfig {
        sample_rate: 48_000,
        channels: 2,
        bitrate: DEFAULT_AUDIO_BITRATE,
    }
}

fn caps_with(video: &[&str], audio: &[&str]) -> Capabilities {
    Capabilities {
        ffmpeg: true,
        video_encoders: video.iter().map(|s| (*s).to_owned()).collect(),
        audio_encoders: audio.iter().map(|s| (*s).to_owned()).collect(),
    }
}

/// A backend with the real probe result, when it can encode `codec` and AAC.
fn live_backend(codec: VideoCodec) -> Option<FfmpegBackend> {
    if !is_ffmpeg_on_path() {
        return None;
    }
    let backend = FfmpegBackend::probe();
    let caps = backend.capabilities();
    (caps.video_encoder_for(codec).is_some() && caps.has_aac()).then_some(backend)
}

#[test]
fn missing_ffmpeg_rejects_every_video_config() {
    let backend = FfmpegBackend::with_capabilities(Capabilities::default());
    let err = backend
        .check_video_config(&video_cfg(VideoCodec::H264, 640, 360))
        .unwrap_err();
    assert!(err.contains("ffmpeg is not available"), "{err}");
    assert!(backend.check_audio_config(&audio_cfg()).is_err());
}

#[test]
fn missing_encoders_are_named() {
    let backend = FfmpegBackend::with_capabilities(caps_with(&["libx264"], &[]));
    assert!(
        backend
            .check_video_config(&video_cfg(VideoCodec::H264, 640, 360))
            .is_ok()
    );
    let err = backend
        .check_video_config(&video_cfg(VideoCodec::Hevc, 640, 360))
        .unwrap_err();
    assert!(err.contains("hvc1.1.6.L120.B0"), "{err}");
    let err = backend.check_audio_config(&audio_cfg()).unwrap_err();
    assert!(err.contains("AAC"), "{err}");
}

#[test]
fn level_limits_are_part_of_the_support_query() {
    let backend = FfmpegBackend::with_capabilities(caps_with(&["libx264", "libx265"], &["aac"]));
    assert!(
        backend
            .check_video_config(&video_cfg(VideoCodec::H264, 1920, 1080))
            .is_ok()
    );
    assert!(
        backend
            .check_video_config(&video_cfg(VideoCodec::H264, 2560, 1440))
            .is_err()
    );
    assert!(
        backend
            .check_video_config(&video_cfg(VideoCodec::Hevc, 1921, 1080))
            .is_err()
    );
    assert!(backend.check_audio_config(&audio_cfg()).is_ok());
}

#[test]
fn h264_frames_come_back_as_length_prefixed_samples() {
    let Some(backend) = live_backend(VideoCodec::H264) else {
        eprintln!("skipping: ffmpeg with libx264 not available");
        return;
    };
    let cfg = video_cfg(VideoCodec::H264, 64, 64);
    let mut enc = backend.create_video_encoder(&cfg).unwrap();
    let fps = cfg.fps;
    let mut chunks = Vec::new();
    for i in 0..5u64 {
        let shade = (i * 40) as u8;
        let frame = VideoFrame::new(
            64,
            64,
            fps.frame_timestamp_us(FrameIndex(i)),
            vec![shade; 64 * 64 * 4],
        )
        .unwrap();
        enc.encode(&frame).unwrap();
        chunks.extend(enc.take_output().unwrap());
    }
    chunks.extend(enc.flush().unwrap());

    assert_eq!(chunks.len(), 5);
    assert!(chunks[0].is_key);
    assert!(matches!(&chunks[0].config, Some(DecoderConfig::Avc(rec)) if rec[0] == 1));
    assert!(chunks[1..].iter().all(|c| c.config.is_none()));
    let timestamps: Vec<u64> = chunks.iter().map(|c| c.timestamp).collect();
    assert_eq!(timestamps, vec![0, 3000, 6000, 9000, 12000]);
    for c in &chunks {
        let len = u32::from_be_bytes([c.data[0], c.data[1], c.data[2], c.data[3]]) as usize;
        assert!(len + 4 <= c.data.len());
    }
}

#[test]
fn wrong_frame_size_is_an_encoder_error() {
    let Some(backend) = live_backend(VideoCodec::H264) else {
        eprintln!("skipping: ffmpeg with libx264 not available");
        return;
    };
    let mut enc = backend
        .create_video_encoder(&video_cfg(VideoCodec::H264, 64, 64))
        .unwrap();
    let frame = VideoFrame::new(32, 32, 0, vec![0; 32 * 32 * 4]).unwrap();
    assert!(matches!(
        enc.encode(&frame),
        Err(ExportError::Encoder {
            encoder: EncoderKind::Video,
            ..
        })
    ));
}

#[test]
fn aac_windows_come_back_as_raw_frames() {
    if !is_ffmpeg_on_path() {
        eprintln!("skipping: ffmpeg not on PATH");
        return;
    }
    let backend = FfmpegBackend::probe();
    if !backend.capabilities().has_aac() {
        eprintln!("skipping: ffmpeg lacks an AAC encoder");
        return;
    }
    let mut enc = backend.create_audio_encoder(&audio_cfg()).unwrap();
    assert_eq!(enc.priming_samples(), 1024);
    let frames = 48_000usize;
    let interleaved: Vec<f32> = (0..frames)
        .flat_map(|i| {
            let s = (i as f32 * 440.0 * std::f32::consts::TAU / 48_000.0).sin() * 0.25;
            [s, s]
        })
        .collect();
    enc.encode(&AudioWindow {
        start_frame: 0,
        frames,
        channels: 2,
        interleaved,
    })
    .unwrap();
    let mut chunks = enc.take_output().unwrap();
    chunks.extend(enc.flush().unwrap());

    // 48 000 frames plus 1024 priming samples, padded to whole AAC frames.
    assert!((47..=49).contains(&chunks.len()), "{} frames", chunks.len());
    assert_eq!(chunks[0].config, Some(DecoderConfig::Aac(vec![0x11, 0x90])));
    assert!(chunks.iter().all(|c| c.duration == 1024 && !c.data.is_empty()));
    assert_eq!(chunks[2].timestamp, 2048);
}
