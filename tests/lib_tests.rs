//! `MediaScanner` facade with a scripted analyzer: lookups, listings, jobs, manual mode.

mod common;

use common::{FakeAnalyzer, memory_store};
use mediascan::engine::limiter::ProcessLimiter;
use mediascan::errors::RequestError;
use mediascan::jobs::JobKind;
use mediascan::scanner::ProgressSignal;
use mediascan::service::{MediaScanner, strip_extension};
use mediascan::utils::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct Setup {
    _dir: tempfile::TempDir,
    root: PathBuf,
    marker: PathBuf,
    analyzer: Arc<FakeAnalyzer>,
    scanner: Arc<MediaScanner>,
}

fn setup() -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().canonicalize().unwrap();
    let root = base.join("media");
    std::fs::create_dir_all(root.join("news")).unwrap();
    std::fs::write(root.join("clip.mov"), b"not really a movie").unwrap();
    std::fs::write(root.join("news/intro.mov"), b"intro").unwrap();

    let mut config = Config::default();
    config.paths.media = root.clone();
    config.paths.manual_mode_marker = base.join(".manualMode");
    config.paths.previews = base.join("_previews");
    config.paths.waveforms = base.join("_waveforms");
    let marker = config.paths.manual_mode_marker.clone();

    let analyzer = FakeAnalyzer::new();
    let scanner = Arc::new(MediaScanner::with_parts(
        config,
        &root,
        memory_store(),
        analyzer.clone(),
        Arc::new(ProcessLimiter::new()),
        Arc::new(ProgressSignal::new()),
    ));
    Setup {
        _dir: dir,
        root,
        marker,
        analyzer,
        scanner,
    }
}

fn poll_until_done(scanner: &MediaScanner, kind: &str, name: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let line = scanner.poll_job(kind, name, true).unwrap();
        if !line.contains("IN PROGRESS") {
            return scanner.poll_job(kind, name, false).unwrap();
        }
        assert!(Instant::now() < deadline, "job {kind} {name} never finished");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_lookup_stays_inside_media_root() {
    let s = setup();
    let found = s.scanner.lookup("news/intro.mov").unwrap();
    assert_eq!(found.id, "NEWS/INTRO");
    assert_eq!(found.path, s.root.join("news/intro.mov"));
    assert!(s.scanner.lookup("news").is_none());
    assert!(s.scanner.lookup("missing.mov").is_none());
    assert!(s.scanner.lookup("../media/clip.mov").is_none());
    assert!(s.scanner.lookup(&s.root.join("clip.mov").to_string_lossy()).is_none());
}

#[test]
fn test_scan_then_list_and_retrieve() {
    let s = setup();
    assert_eq!(s.scanner.scan_now("nope.mov"), "404 FILE NOT FOUND\r\n");
    assert_eq!(s.scanner.scan_now("clip.mov"), "202 MEDIA INFO GENERATE OK\r\n");

    let cls = s.scanner.cls().unwrap();
    assert!(cls.starts_with("200 CLS OK\r\n\"CLIP\"  MOVIE  18 "));
    assert!(cls.ends_with("\r\n\r\n"));

    let cinf = s.scanner.cinf("clip").unwrap();
    assert!(cinf.starts_with("201 CINF OK\r\n\"CLIP\""));
    assert_eq!(s.scanner.cinf("other").unwrap(), "404 CINF ERROR\r\n");

    let tls = s.scanner.thumbnail_list().unwrap();
    assert!(tls.starts_with("200 THUMBNAIL LIST OK\r\n\"CLIP\" "));
    assert_eq!(
        s.scanner.thumbnail("CLIP").unwrap(),
        "201 THUMBNAIL RETRIEVE OK\r\niVBORw==\r\n"
    );
    assert_eq!(
        s.scanner.thumbnail("other").unwrap(),
        "404 THUMBNAIL RETRIEVE ERROR\r\n"
    );

    // Known record: a second explicit scan re-probes it.
    s.scanner.scan_now("clip.mov");
    assert_eq!(s.analyzer.probes(), 2);
}

#[test]
fn test_thumbnail_generation_lines() {
    let s = setup();
    assert_eq!(
        s.scanner.generate_thumbnail("CLIP").unwrap(),
        "501 THUMBNAIL GENERATE ERROR\r\n"
    );
    s.scanner.scan_now("clip.mov");
    assert_eq!(
        s.scanner.generate_thumbnail("clip").unwrap(),
        "202 THUMBNAIL GENERATE OK\r\n"
    );

    s.scanner.scan_now("news/intro.mov");
    let before = s.analyzer.thumbs();
    let regenerated = s.scanner.spawn_generate_all_thumbnails().unwrap().join().unwrap();
    assert_eq!(regenerated, 2);
    assert_eq!(s.analyzer.thumbs(), before + 2);
}

#[test]
fn test_jobs_through_the_facade() {
    let s = setup();
    assert_eq!(
        s.scanner.accept_job("metadata", "missing.mov").unwrap(),
        "404 FILE NOT FOUND\r\n"
    );
    assert!(matches!(
        s.scanner.accept_job("transcode", "clip.mov"),
        Err(RequestError::UnknownJobKind(_))
    ));

    assert_eq!(
        s.scanner.accept_job("media_info", "clip.mov").unwrap(),
        "202 MEDIA INFO QUEUED OK\r\n"
    );
    // No record yet: the re-probe fails and the fallback full scan writes it.
    assert_eq!(
        poll_until_done(&s.scanner, "media_info", "clip.mov"),
        "202 MEDIA INFO OK\r\n"
    );
    assert!(s.scanner.store().get("CLIP").unwrap().unwrap().cinf.is_some());
    assert_eq!(
        s.scanner.poll_job("media_info", "clip.mov", false).unwrap(),
        "404 MEDIA INFO NOT FOUND\r\n"
    );

    s.scanner.accept_job("thumbnail", "clip").unwrap();
    assert_eq!(
        poll_until_done(&s.scanner, "thumbnail", "clip"),
        "202 THUMBNAIL GENERATE OK\r\n"
    );
}

#[test]
fn test_job_ids() {
    assert_eq!(
        MediaScanner::job_id(JobKind::Metadata, "news\\intro.mov").unwrap(),
        "NEWS/INTRO"
    );
    assert_eq!(
        MediaScanner::job_id(JobKind::Thumbnail, "news/intro").unwrap(),
        "NEWS/INTRO"
    );
    assert_eq!(strip_extension("v1.2/clip"), "v1.2/clip");
}

#[test]
fn test_manual_mode_is_persisted() {
    let s = setup();
    assert_eq!(s.scanner.manual_mode_json(), r#"{"manualMode":false}"#);
    assert_eq!(s.scanner.set_manual_mode(true), r#"{"manualMode":true}"#);
    assert!(s.marker.exists());
    assert!(s.scanner.manual_mode());
    s.scanner.set_manual_mode(false);
    assert!(!s.marker.exists());
}

#[test]
fn test_status_json() {
    let s = setup();
    assert_eq!(s.scanner.update_seq().unwrap(), r#"{"update_seq":0}"#);
    s.scanner.scan_now("clip.mov");
    assert_eq!(s.scanner.update_seq().unwrap(), r#"{"update_seq":1}"#);
    assert!(s.scanner.media_info("CLIP").unwrap().is_none());
    let disks: serde_json::Value = serde_json::from_str(&s.scanner.fs_stats().unwrap()).unwrap();
    assert!(disks.is_array());
}
