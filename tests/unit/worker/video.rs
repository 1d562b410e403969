use super::*;
use crate::encode::config::VideoCodec;
use crate::foundation::core::{Fps, FrameIndex};
use crate::mux::inspect::probe_mp4;
use crate::worker::fake::FakeBackend;
use crate::worker::protocol::EncodeOptions;
use std::sync::atomic::{AtomicUsize, Ordering};

const W: u32 = 64;
const H: u32 = 48;

fn fps() -> Fps {
    Fps::new(30, 1).unwrap()
}

fn start(width: u32, audio: Option<MixedAudioBuffer>) -> StartPayload {
    StartPayload {
        export_width: width,
        export_height: H,
        options: EncodeOptions {
            codec: VideoCodec::H264,
            bitrate: 1_000_000,
            frame_rate: fps(),
        },
        audio,
    }
}

fn frame(i: u64, released: &Arc<AtomicUsize>) -> VideoFrame {
    let r = released.clone();
    VideoFrame::new(
        W,
        H,
        fps().frame_timestamp_us(FrameIndex(i)),
        vec![0; (W * H * 4) as usize],
    )
    .unwrap()
    .with_release_hook(move || {
        r.fetch_add(1, Ordering::SeqCst);
    })
}

fn job(backend: &FakeBackend) -> VideoEncodeJob {
    VideoEncodeJob::new(Arc::new(backend.clone()), CancelToken::new())
}

fn tone(secs: f64) -> MixedAudioBuffer {
    let frames = (secs * 48_000.0) as usize;
    MixedAudioBuffer::silent(48_000, 2, frames)
}

#[test]
fn frames_are_muxed_in_submission_order() {
    let backend = FakeBackend::default();
    let released = Arc::new(AtomicUsize::new(0));
    let mut job = job(&backend);
    job.configure(start(W, None)).unwrap();
    assert_eq!(job.state(), WorkerState::Ready);
    for i in 0..4 {
        job.submit_frame(frame(i, &released)).unwrap();
        assert_eq!(job.state(), WorkerState::Encoding);
    }
    let file = job.finish().unwrap();
    assert_eq!(job.state(), WorkerState::Done);
    assert_eq!(released.load(Ordering::SeqCst), 4);

    let info = probe_mp4(&file).unwrap();
    let video = info.video().unwrap();
    assert_eq!(video.sample_count(), 4);
    assert_eq!(video.timescale, 90_000);
    assert_eq!(video.sample_durations, vec![3000; 4]);
    for i in 0..4u64 {
        let ts = fps().frame_timestamp_us(FrameIndex(i));
        assert_eq!(video.sample(&file, i as usize).unwrap(), &ts.to_be_bytes()[..]);
    }
    assert!(info.audio().is_none());
}

#[test]
fn unsupported_video_config_never_accepts_frames() {
    let backend = FakeBackend {
        max_width: Some(32),
        ..FakeBackend::default()
    };
    let released = Arc::new(AtomicUsize::new(0));
    let mut job = job(&backend);
    let err = job.configure(start(W, None)).unwrap_err();
    assert!(matches!(
        err,
        ExportError::UnsupportedEncoderConfig {
            encoder: EncoderKind::Video,
            ..
        }
    ));
    assert_eq!(job.state(), WorkerState::Error);

    job.submit_frame(frame(0, &released)).unwrap();
    assert_eq!(job.frames_submitted(), 0);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(backend.events().is_empty(), "nothing may be created after rejection");
    assert!(matches!(job.finish(), Err(ExportError::InvalidState(_))));
}

#[test]
fn unsupported_audio_config_is_rejected_before_creating_encoders() {
    let backend = FakeBackend {
        reject_audio: Some("no AAC encoder".to_owned()),
        ..FakeBackend::default()
    };
    let mut job = job(&backend);
    let err = job.configure(start(W, Some(tone(1.0)))).unwrap_err();
    match err {
        ExportError::UnsupportedEncoderConfig { encoder, reason } => {
            assert_eq!(encoder, EncoderKind::Audio);
            assert_eq!(reason, "no AAC encoder");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(backend.events().is_empty());
}

#[test]
fn odd_dimensions_are_invalid() {
    let backend = FakeBackend::default();
    let mut job = job(&backend);
    let err = job.configure(start(W + 1, None)).unwrap_err();
    assert!(matches!(err, ExportError::Validation(_)));
}

#[test]
fn configure_twice_is_a_state_error() {
    let backend = FakeBackend::default();
    let mut job = job(&backend);
    job.configure(start(W, None)).unwrap();
    assert!(matches!(
        job.configure(start(W, None)),
        Err(ExportError::InvalidState(_))
    ));
    // The misuse does not tear down the running job.
    assert_eq!(job.state(), WorkerState::Ready);
}

#[test]
fn finish_without_frames_is_an_error() {
    let backend = FakeBackend::default();
    let mut job = job(&backend);
    job.configure(start(W, None)).unwrap();
    assert!(matches!(job.finish(), Err(ExportError::NoVideoFrames)));
    assert_eq!(job.state(), WorkerState::Error);
}

#[test]
fn finish_before_configure_is_a_state_error() {
    let backend = FakeBackend::default();
    let mut job = job(&backend);
    assert!(matches!(job.finish(), Err(ExportError::InvalidState(_))));
    assert_eq!(job.state(), WorkerState::Error);
}

#[test]
fn finish_twice_is_a_state_error() {
    let backend = FakeBackend::default();
    let released = Arc::new(AtomicUsize::new(0));
    let mut job = job(&backend);
    job.configure(start(W, None)).unwrap();
    job.submit_frame(frame(0, &released)).unwrap();
    job.finish().unwrap();
    assert!(matches!(job.finish(), Err(ExportError::InvalidState(_))));
    assert_eq!(job.state(), WorkerState::Done);
}

#[test]
fn silent_encoder_output_is_an_empty_output_error() {
    let backend = FakeBackend {
        produce_nothing: true,
        ..FakeBackend::default()
    };
    let released = Arc::new(AtomicUsize::new(0));
    let mut job = job(&backend);
    job.configure(start(W, None)).unwrap();
    job.submit_frame(frame(0, &released)).unwrap();
    assert!(matches!(job.finish(), Err(ExportError::EmptyOutput)));
}

#[test]
fn frames_are_released_exactly_once_across_a_failure() {
    let backend = FakeBackend {
        fail_video_at: Some(3),
        ..FakeBackend::default()
    };
    let released = Arc::new(AtomicUsize::new(0));
    let mut job = job(&backend);
    job.configure(start(W, None)).unwrap();

    let results: Vec<_> = (0..5).map(|i| job.submit_frame(frame(i, &released))).collect();
    assert!(results[0].is_ok() && results[1].is_ok());
    assert!(matches!(
        results[2],
        Err(ExportError::Encoder {
            encoder: EncoderKind::Video,
            ..
        })
    ));
    // Later frames are dropped, not encoded.
    assert!(results[3].is_ok() && results[4].is_ok());
    assert_eq!(released.load(Ordering::SeqCst), 5);
    assert_eq!(job.state(), WorkerState::Error);

    match job.finish() {
        Err(ExportError::InvalidState(msg)) => assert!(msg.contains("simulated failure"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn frames_before_configure_are_dropped() {
    let backend = FakeBackend::default();
    let released = Arc::new(AtomicUsize::new(0));
    let mut job = job(&backend);
    job.submit_frame(frame(0, &released)).unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(job.state(), WorkerState::Uninitialized);
    job.configure(start(W, None)).unwrap();
    assert!(matches!(job.finish(), Err(ExportError::NoVideoFrames)));
}

#[test]
fn cancellation_is_a_distinct_terminal_state() {
    let backend = FakeBackend::default();
    let cancel = CancelToken::new();
    let released = Arc::new(AtomicUsize::new(0));
    let mut job = VideoEncodeJob::new(Arc::new(backend), cancel.clone());
    job.configure(start(W, Some(tone(3.0)))).unwrap();
    job.submit_frame(frame(0, &released)).unwrap();
    cancel.cancel();
    assert!(matches!(
        job.submit_frame(frame(1, &released)),
        Err(ExportError::Cancelled)
    ));
    assert_eq!(job.state(), WorkerState::Cancelled);
    assert!(job.state().is_terminal());
    assert!(matches!(job.finish(), Err(ExportError::Cancelled)));
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[test]
fn audio_is_windowed_and_flushed_after_video() {
    let backend = FakeBackend::default();
    let released = Arc::new(AtomicUsize::new(0));
    let mut job = job(&backend);
    job.configure(start(W, Some(tone(2.5)))).unwrap();
    for i in 0..75 {
        job.submit_frame(frame(i, &released)).unwrap();
    }
    let file = job.finish().unwrap();

    let events = backend.events();
    let windows: Vec<_> = events
        .iter()
        .filter(|e| e.starts_with("audio.window@"))
        .cloned()
        .collect();
    assert_eq!(
        windows,
        vec!["audio.window@0", "audio.window@48000", "audio.window@96000"]
    );
    let pos = |name: &str| events.iter().position(|e| e == name).unwrap();
    assert!(pos("video.flush") < pos("audio.flush"));
    assert!(pos("audio.window@96000") < pos("audio.flush"));

    let info = probe_mp4(&file).unwrap();
    assert_eq!(info.video().unwrap().sample_count(), 75);
    // 120_000 frames: 117 full AAC frames plus the flushed remainder.
    assert_eq!(info.audio().unwrap().sample_count(), 118);
}

#[test]
fn empty_audio_buffer_exports_video_only() {
    let backend = FakeBackend::default();
    let released = Arc::new(AtomicUsize::new(0));
    let mut job = job(&backend);
    job.configure(start(W, Some(tone(0.0)))).unwrap();
    job.submit_frame(frame(0, &released)).unwrap();
    let info = probe_mp4(&job.finish().unwrap()).unwrap();
    assert!(info.audio().is_none());
    assert!(!backend.events().iter().any(|e| e == "audio.create"));
}

#[test]
fn audio_encoder_failure_names_the_audio_encoder() {
    let backend = FakeBackend {
        fail_audio: true,
        ..FakeBackend::default()
    };
    let released = Arc::new(AtomicUsize::new(0));
    let mut job = job(&backend);
    job.configure(start(W, Some(tone(1.0)))).unwrap();
    let mut first_error = None;
    for i in 0..3 {
        if let Err(e) = job.submit_frame(frame(i, &released)) {
            first_error.get_or_insert(e);
        }
    }
    if let Err(e) = job.finish() {
        first_error.get_or_insert(e);
    }
    assert!(matches!(
        first_error,
        Some(ExportError::Encoder {
            encoder: EncoderKind::Audio,
            ..
        })
    ));
    assert_eq!(job.state(), WorkerState::Error);
}

#[test]
fn worker_thread_round_trip() {
    let backend = FakeBackend::default();
    let released = Arc::new(AtomicUsize::new(0));
    let worker = VideoWorker::spawn(Arc::new(backend), CancelToken::new(), 2).unwrap();
    worker.start(start(W, Some(tone(0.5)))).unwrap();
    for i in 0..10 {
        worker.submit_frame(frame(i, &released)).unwrap();
    }
    let file = worker.finish().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 10);
    let info = probe_mp4(&file).unwrap();
    assert_eq!(info.video().unwrap().sample_count(), 10);
    assert!(info.audio().is_some());
}

#[test]
fn worker_reports_rejected_config() {
    let backend = FakeBackend {
        reject_video: Some("too large".to_owned()),
        ..FakeBackend::default()
    };
    let worker = VideoWorker::spawn(Arc::new(backend), CancelToken::new(), 2).unwrap();
    assert!(matches!(
        worker.start(start(W, None)),
        Err(ExportError::UnsupportedEncoderConfig { .. })
    ));
}

#[test]
fn worker_panic_becomes_an_error_reply() {
    let backend = FakeBackend {
        panic_video_at: Some(2),
        ..FakeBackend::default()
    };
    let released = Arc::new(AtomicUsize::new(0));
    let worker = VideoWorker::spawn(Arc::new(backend), CancelToken::new(), 1).unwrap();
    worker.start(start(W, None)).unwrap();
    let mut first_error = None;
    for i in 0..6 {
        if let Err(e) = worker.submit_frame(frame(i, &released)) {
            first_error.get_or_insert(e);
        }
    }
    if let Err(e) = worker.finish() {
        first_error.get_or_insert(e);
    }
    match first_error {
        Some(ExportError::WorkerPanicked { worker, message }) => {
            assert_eq!(worker, "video-worker");
            assert!(message.contains("fake encoder crashed"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(released.load(Ordering::SeqCst), 6);
}

#[test]
fn worker_cancellation_is_reported_as_cancelled() {
    let cancel = CancelToken::new();
    let released = Arc::new(AtomicUsize::new(0));
    let worker = VideoWorker::spawn(Arc::new(FakeBackend::default()), cancel.clone(), 4).unwrap();
    worker.start(start(W, None)).unwrap();
    worker.submit_frame(frame(0, &released)).unwrap();
    cancel.cancel();
    let _ = worker.submit_frame(frame(1, &released));
    assert!(matches!(worker.finish(), Err(ExportError::Cancelled)));
}
