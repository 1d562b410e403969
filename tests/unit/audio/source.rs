use super::*;

#[test]
fn remote_detection_ignores_case_and_leading_space() {
    assert!(AudioSource::new("https://cdn.example.com/a.mp3").is_remote());
    assert!(AudioSource::new("  HTTP://example.com/a.wav").is_remote());
    assert!(!AudioSource::new("file:///tmp/a.wav").is_remote());
    assert!(!AudioSource::new("music/a.wav").is_remote());
    assert!(!AudioSource::new("http").is_remote());
}

#[test]
fn sources_serialize_as_plain_strings() {
    let s: AudioSource = serde_json::from_str(r#""clips/intro.mp3""#).unwrap();
    assert_eq!(s, AudioSource::from("clips/intro.mp3"));
    assert_eq!(serde_json::to_string(&s).unwrap(), r#""clips/intro.mp3""#);
}

#[test]
fn local_references_resolve_against_the_base_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let file = dir.path().join("sub").join("tone.raw");
    std::fs::write(&file, b"abc").unwrap();

    let fetcher = DefaultFetcher::new(dir.path());
    assert_eq!(fetcher.base_dir(), dir.path());
    assert_eq!(fetcher.fetch(&"sub/tone.raw".into()).unwrap(), b"abc");

    let absolute = AudioSource::new(file.to_string_lossy().into_owned());
    assert_eq!(fetcher.fetch(&absolute).unwrap(), b"abc");

    let url = AudioSource::new(format!("file://{}", file.display()));
    assert_eq!(fetcher.fetch(&url).unwrap(), b"abc");
}

#[test]
fn missing_file_is_a_soft_fetch_failure() {
    let dir = tempfile::tempdir().unwrap();
    let err = DefaultFetcher::new(dir.path())
        .fetch(&"nope.wav".into())
        .unwrap_err();
    match &err {
        ExportError::FetchFailed { source_ref, reason } => {
            assert_eq!(source_ref, "nope.wav");
            assert!(reason.contains("nope.wav"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_soft());
}
