use super::*;
use crate::mux::inspect::probe_mp4;

fn avc_config() -> DecoderConfig {
    DecoderConfig::Avc(vec![1, 0x64, 0x00, 0x28, 0xff, 0xe1, 0x00, 0x00, 0x01, 0x00, 0x00])
}

fn video_cfg() -> VideoTrackConfig {
    VideoTrackConfig {
        codec: VideoCodec::H264,
        width: 64,
        height: 48,
        timescale: 90_000,
    }
}

fn audio_cfg(priming: u32, presentation: Option<u64>) -> AudioTrackConfig {
    AudioTrackConfig {
        sample_rate: 48_000,
        channels: 2,
        bitrate: 128_000,
        priming_samples: priming,
        presentation_samples: presentation,
    }
}

fn video_chunk(i: u64, is_key: bool) -> EncodedChunk {
    EncodedChunk {
        data: vec![0, 0, 0, 2, if is_key { 0x65 } else { 0x41 }, i as u8],
        timestamp: i * 3000,
        duration: 3000,
        is_key,
        config: (i == 0).then(avc_config),
    }
}

fn audio_chunk(i: u64) -> EncodedChunk {
    EncodedChunk {
        data: vec![0x21, 0x10, i as u8],
        timestamp: i * 1024,
        duration: 1024,
        is_key: true,
        config: (i == 0).then(|| DecoderConfig::Aac(vec![0x11, 0x90])),
    }
}

#[test]
fn writes_fast_start_layout_with_samples_in_order() {
    let mut mux = Mp4Muxer::new(video_cfg(), Some(audio_cfg(1024, None)));
    for i in 0..4 {
        mux.add_video_chunk(video_chunk(i, i % 2 == 0)).unwrap();
        mux.add_audio_chunk(audio_chunk(i)).unwrap();
    }
    assert_eq!(mux.video_samples(), 4);
    assert_eq!(mux.audio_samples(), 4);
    let file = mux.finalize().unwrap();

    let info = probe_mp4(&file).unwrap();
    assert_eq!(info.top_level, vec!["ftyp", "moov", "mdat"]);
    assert_eq!(info.major_brand, "isom");

    let video = info.video().unwrap();
    assert_eq!(video.sample_entry, "avc1");
    assert_eq!((video.width, video.height), (64, 48));
    assert_eq!(video.timescale, 90_000);
    assert_eq!(video.sample_durations, vec![3000; 4]);
    assert_eq!(video.sync_samples, Some(vec![1, 3]));
    assert_eq!(video.decoder_config, match avc_config() {
        DecoderConfig::Avc(rec) => rec,
        _ => unreachable!(),
    });
    for i in 0..4 {
        assert_eq!(video.sample(&file, i).unwrap()[5], i as u8, "sample {i} out of order");
    }

    let audio = info.audio().unwrap();
    assert_eq!(audio.sample_entry, "mp4a");
    assert_eq!(audio.channels, 2);
    assert_eq!(audio.sample_rate, 48_000);
    assert_eq!(audio.decoder_config, vec![0x11, 0x90]);
    assert_eq!(audio.sync_samples, None);
    assert_eq!(audio.sample_count(), 4);
    // 4096 samples minus 1024 priming = 3072 samples = 64 ms.
    assert_eq!(audio.edit, Some((64, 1024)));
    assert_eq!(audio.sample(&file, 3).unwrap(), &[0x21, 0x10, 3]);
    assert!(!video.co64 && !audio.co64);
}

#[test]
fn edit_list_is_bounded_by_presentation_length() {
    let mut mux = Mp4Muxer::new(video_cfg(), Some(audio_cfg(1024, Some(2000))));
    mux.add_video_chunk(video_chunk(0, true)).unwrap();
    for i in 0..3 {
        mux.add_audio_chunk(audio_chunk(i)).unwrap();
    }
    let info = probe_mp4(&mux.finalize().unwrap()).unwrap();
    // ceil(2000 / 48 kHz in ms) = 42 ms.
    assert_eq!(info.audio().unwrap().edit, Some((42, 1024)));
}

#[test]
fn hevc_track_uses_hvc1_entry() {
    let cfg = VideoTrackConfig {
        codec: VideoCodec::Hevc,
        ..video_cfg()
    };
    let mut mux = Mp4Muxer::new(cfg, None);
    let mut chunk = video_chunk(0, true);
    chunk.config = Some(DecoderConfig::Hevc(vec![1; 23]));
    mux.add_video_chunk(chunk).unwrap();
    let info = probe_mp4(&mux.finalize().unwrap()).unwrap();
    assert_eq!(info.tracks.len(), 1);
    assert_eq!(info.video().unwrap().sample_entry, "hvc1");
    assert_eq!(info.video().unwrap().decoder_config, vec![1; 23]);
}

#[test]
fn mismatched_decoder_config_is_rejected() {
    let cfg = VideoTrackConfig {
        codec: VideoCodec::Hevc,
        ..video_cfg()
    };
    let mut mux = Mp4Muxer::new(cfg, None);
    mux.add_video_chunk(video_chunk(0, true)).unwrap();
    assert!(matches!(mux.finalize(), Err(ExportError::Mux(_))));
}

#[test]
fn timestamps_must_increase() {
    let mut mux = Mp4Muxer::new(video_cfg(), None);
    mux.add_video_chunk(video_chunk(0, true)).unwrap();
    mux.add_video_chunk(video_chunk(2, false)).unwrap();
    let err = mux.add_video_chunk(video_chunk(1, false)).unwrap_err();
    assert!(matches!(err, ExportError::Mux(_)));
    // The rejected sample leaves no trace.
    assert_eq!(mux.video_samples(), 2);
    let info = probe_mp4(&mux.finalize().unwrap()).unwrap();
    // The gap between samples 0 and 2 stretches the first sample.
    assert_eq!(info.video().unwrap().sample_durations, vec![6000, 3000]);
}

#[test]
fn first_sample_needs_decoder_config() {
    let mut mux = Mp4Muxer::new(video_cfg(), Some(audio_cfg(0, None)));
    let err = mux.add_video_chunk(video_chunk(1, true)).unwrap_err();
    assert!(matches!(err, ExportError::Mux(_)));
    let mut first_audio = audio_chunk(0);
    first_audio.config = None;
    assert!(mux.add_audio_chunk(first_audio).is_err());
}

#[test]
fn audio_requires_an_audio_track() {
    let mut mux = Mp4Muxer::new(video_cfg(), None);
    assert!(matches!(
        mux.add_audio_chunk(audio_chunk(0)),
        Err(ExportError::Mux(_))
    ));
}

#[test]
fn empty_video_track_cannot_be_finalized() {
    let mux = Mp4Muxer::new(video_cfg(), None);
    assert!(matches!(mux.finalize(), Err(ExportError::Mux(_))));
}

#[test]
fn empty_audio_track_is_omitted() {
    let mut mux = Mp4Muxer::new(video_cfg(), Some(audio_cfg(1024, None)));
    mux.add_video_chunk(video_chunk(0, true)).unwrap();
    let info = probe_mp4(&mux.finalize().unwrap()).unwrap();
    assert!(info.audio().is_none());
    assert_eq!(info.movie_duration, 34); // ceil(3000 / 90) ms
}

#[test]
fn no_priming_means_no_edit_list() {
    let mut mux = Mp4Muxer::new(video_cfg(), Some(audio_cfg(0, None)));
    mux.add_video_chunk(video_chunk(0, true)).unwrap();
    mux.add_audio_chunk(audio_chunk(0)).unwrap();
    let info = probe_mp4(&mux.finalize().unwrap()).unwrap();
    assert_eq!(info.audio().unwrap().edit, None);
}

#[test]
fn movie_time_rounds_up() {
    assert_eq!(to_movie_time(90_000, 90_000), 1000);
    assert_eq!(to_movie_time(1, 90_000), 1);
    assert_eq!(to_movie_time(144_000, 48_000), 3000);
    assert_eq!(to_movie_time(5, 0), 0);
}
