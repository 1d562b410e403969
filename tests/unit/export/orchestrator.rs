use super::*;
use crate::audio::decode::{AudioPcm, PcmDecoder};
use crate::audio::source::{AudioSource, SourceFetcher};
use crate::foundation::core::{Fps, MIX_SAMPLE_RATE};
use crate::mux::inspect::probe_mp4;
use crate::worker::fake::FakeBackend;
use crate::export::project::Layer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// References starting with "slow" take three seconds to fetch.
const SLOW_FETCH: Duration = Duration::from_secs(3);

/// References starting with "bad" fail to decode; everything else is one second of stereo.
#[derive(Default)]
struct Stub {
    decodes: AtomicUsize,
}

impl SourceFetcher for Stub {
    fn fetch(&self, source: &AudioSource) -> ExportResult<Vec<u8>> {
        if source.as_str().starts_with("slow") {
            std::thread::sleep(SLOW_FETCH);
        }
        Ok(source.as_str().as_bytes().to_vec())
    }
}

impl PcmDecoder for Stub {
    fn check_environment(&self) -> ExportResult<()> {
        Ok(())
    }

    fn decode(&self, source: &AudioSource, _bytes: &[u8]) -> ExportResult<AudioPcm> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if source.as_str().starts_with("bad") {
            return Err(ExportError::DecodeFailed {
                source_ref: source.as_str().to_owned(),
                reason: "not audio".to_owned(),
            });
        }
        Ok(AudioPcm {
            sample_rate: MIX_SAMPLE_RATE,
            channels: 2,
            interleaved_f32: vec![0.1; MIX_SAMPLE_RATE as usize * 2],
        })
    }
}

fn project(audio_sources: &[&str]) -> Project {
    let mut p = Project::from_json(
        r##"{
            "settings": {"width": 64, "height": 48, "fps": 10, "bitrate": 1000000},
            "pages": [
                {"duration": 0.5, "background": "#336699",
                 "layers": [{"type": "solid", "color": "#ffffff", "x": 8, "y": 8, "width": 16, "height": 16, "fadeIn": 0.2}]},
                {"duration": 0.3}
            ]
        }"##,
    )
    .unwrap();
    p.audio_sources = audio_sources.iter().map(|s| AudioSource::from(*s)).collect();
    p
}

fn job(p: Project, backend: &FakeBackend, stub: &Arc<Stub>) -> ExportJob {
    ExportJob::new(p, ".")
        .with_backend(Arc::new(backend.clone()))
        .with_mixer(AudioMixer::new(stub.clone(), stub.clone()))
}

#[test]
fn renders_every_frame_in_order() {
    let backend = FakeBackend::default();
    let stub = Arc::new(Stub::default());
    let mut job = job(project(&[]), &backend, &stub);
    assert_eq!(job.state(), JobState::Idle);

    let out = job.run().unwrap();
    assert_eq!(job.state(), JobState::Done);
    assert_eq!(job.status(), "export complete");
    assert_eq!(out.frames, 8);
    assert!(!out.has_audio);
    assert_eq!(stub.decodes.load(Ordering::SeqCst), 0);

    let info = probe_mp4(&out.bytes).unwrap();
    let video = info.video().unwrap();
    assert_eq!(video.sample_count(), 8);
    assert_eq!((video.width, video.height), (64, 48));
    let fps = Fps::new(10, 1).unwrap();
    for i in 0..8u64 {
        let ts = fps.frame_timestamp_us(FrameIndex(i));
        assert_eq!(video.sample(&out.bytes, i as usize).unwrap(), &ts.to_be_bytes()[..]);
    }
    assert!(info.audio().is_none());
}

#[test]
fn audio_sources_become_an_audio_track() {
    let backend = FakeBackend::default();
    let stub = Arc::new(Stub::default());
    let mut job = job(project(&["a.wav", "bad.wav"]), &backend, &stub);
    let out = job.run().unwrap();
    assert!(out.has_audio);
    assert_eq!(stub.decodes.load(Ordering::SeqCst), 2);

    let info = probe_mp4(&out.bytes).unwrap();
    // 0.8 s at 48 kHz = 38_400 frames: 37 full AAC frames plus the flushed remainder.
    assert_eq!(info.audio().unwrap().sample_count(), 38);
    let events = backend.events();
    assert_eq!(
        events.iter().filter(|e| e.starts_with("audio.window@")).count(),
        1
    );
}

#[test]
fn audio_toggle_skips_the_mixer() {
    let backend = FakeBackend::default();
    let stub = Arc::new(Stub::default());
    let mut p = project(&["a.wav"]);
    p.settings.audio = false;
    let out = job(p, &backend, &stub).run().unwrap();
    assert!(!out.has_audio);
    assert_eq!(stub.decodes.load(Ordering::SeqCst), 0);
    assert!(!backend.events().iter().any(|e| e == "audio.create"));
}

#[test]
fn invalid_settings_fail_before_any_work() {
    let backend = FakeBackend::default();
    let stub = Arc::new(Stub::default());
    let mut p = project(&["a.wav"]);
    p.settings.width = 63;
    let mut job = job(p, &backend, &stub);
    assert!(matches!(job.run(), Err(ExportError::Validation(_))));
    assert_eq!(job.state(), JobState::Error);
    assert!(job.status().starts_with("export failed: invalid export settings"));
    assert!(backend.events().is_empty());
    assert_eq!(stub.decodes.load(Ordering::SeqCst), 0);
}

#[test]
fn undecodable_audio_names_the_audio_stage() {
    let backend = FakeBackend::default();
    let stub = Arc::new(Stub::default());
    let mut job = job(project(&["bad-1.mp3", "bad-2.mp3"]), &backend, &stub);
    assert!(matches!(
        job.run(),
        Err(ExportError::NoDecodableSources { attempted: 2 })
    ));
    assert!(job.status().starts_with("export failed while decoding audio sources"));
    assert!(!backend.events().iter().any(|e| e == "video.create"));
}

#[test]
fn render_setup_failure_does_not_wait_for_the_mix() {
    let backend = FakeBackend::default();
    let stub = Arc::new(Stub::default());
    let mut p = project(&["slow.mp3"]);
    let missing: Layer = serde_json::from_str(
        r#"{"type":"image","source":"missing.png","x":0,"y":0,"width":8,"height":8}"#,
    )
    .unwrap();
    p.pages[0].layers.push(missing);
    let mut job = job(p, &backend, &stub);

    let started = Instant::now();
    let err = job.run().unwrap_err();
    assert!(started.elapsed() < SLOW_FETCH, "{:?}", started.elapsed());
    assert!(
        matches!(&err, ExportError::Validation(m) if m.contains("missing.png")),
        "{err:?}"
    );
    assert_eq!(job.state(), JobState::Error);
    // The abandoned mix stops before decoding.
    std::thread::sleep(SLOW_FETCH + Duration::from_millis(500));
    assert_eq!(stub.decodes.load(Ordering::SeqCst), 0);
}

#[test]
fn rejected_encoder_config_names_the_device() {
    let backend = FakeBackend {
        reject_video: Some("level 4.0 exceeded".to_owned()),
        ..FakeBackend::default()
    };
    let stub = Arc::new(Stub::default());
    let mut job = job(project(&[]), &backend, &stub);
    assert!(matches!(
        job.run(),
        Err(ExportError::UnsupportedEncoderConfig { .. })
    ));
    assert_eq!(job.state(), JobState::Error);
    assert!(job.status().contains("cannot encode the requested format"));
    assert!(job.status().contains("level 4.0 exceeded"));
}

#[test]
fn encoder_failure_mid_stream_fails_the_job() {
    let backend = FakeBackend {
        fail_video_at: Some(4),
        ..FakeBackend::default()
    };
    let stub = Arc::new(Stub::default());
    let mut job = job(project(&[]), &backend, &stub);
    assert!(matches!(
        job.run(),
        Err(ExportError::Encoder { .. } | ExportError::InvalidState(_))
    ));
    assert_eq!(job.state(), JobState::Error);
}

#[test]
fn cancelled_job_ends_cancelled() {
    let backend = FakeBackend::default();
    let stub = Arc::new(Stub::default());
    let mut job = job(project(&["a.wav"]), &backend, &stub);
    job.cancel_token().cancel();
    assert!(matches!(job.run(), Err(ExportError::Cancelled)));
    assert_eq!(job.state(), JobState::Cancelled);
    assert_eq!(job.status(), "export cancelled");
}

#[test]
fn a_job_runs_once() {
    let backend = FakeBackend::default();
    let stub = Arc::new(Stub::default());
    let mut job = job(project(&[]), &backend, &stub);
    job.run().unwrap();
    assert!(matches!(job.run(), Err(ExportError::InvalidState(_))));
    assert_eq!(job.state(), JobState::Done);
}
