//! End-to-end orchestrator behavior against a mocked scraper and
//! download pipeline: pool bounds, reconciliation and job cache cleanup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use spotfetch::config::AppConfig;
use spotfetch::downloader::cache::JobCache;
use spotfetch::downloader::orchestrator::DownloadOrchestrator;
use spotfetch::downloader::tracker::{DownloadStatus, DownloadTracker};
use spotfetch::downloader::{reconcile_key, DownloadHooks, Downloader, TrackMetadata};
use spotfetch::errors::Result;
use spotfetch::scraper::{MetadataSource, ScrapeResult};

const PLAYLIST_URL: &str = "https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M";

struct MockSource {
    result: ScrapeResult,
}

#[async_trait]
impl MetadataSource for MockSource {
    async fn fetch(&self, _url: &str) -> Result<ScrapeResult> {
        Ok(self.result.clone())
    }
}

/// Fake pipeline: sleeps briefly, tracks peak concurrency, optionally
/// fails the first N attempts for configured tracks, and writes the
/// target file on success.
struct MockDownloader {
    base_dir: PathBuf,
    active: AtomicUsize,
    max_active: AtomicUsize,
    failures_left: Mutex<HashMap<String, u32>>,
    queries_seen: Mutex<HashMap<String, Vec<String>>>,
}

impl MockDownloader {
    fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            failures_left: Mutex::new(HashMap::new()),
            queries_seen: Mutex::new(HashMap::new()),
        }
    }

    fn fail_first(self, name: &str, artist: &str, times: u32) -> Self {
        self.failures_left
            .lock()
            .unwrap()
            .insert(reconcile_key(name, artist), times);
        self
    }

    fn attempts_for(&self, name: &str, artist: &str) -> usize {
        self.queries_seen
            .lock()
            .unwrap()
            .get(&reconcile_key(name, artist))
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn last_query_for(&self, name: &str, artist: &str) -> Option<String> {
        self.queries_seen
            .lock()
            .unwrap()
            .get(&reconcile_key(name, artist))
            .and_then(|queries| queries.last().cloned())
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download_and_tag(&self, meta: &TrackMetadata, hooks: &DownloadHooks) -> Result<bool> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        let key = meta.reconcile_key();
        self.queries_seen
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push(meta.search_query());

        {
            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(&key) {
                if *left > 0 {
                    *left -= 1;
                    return Ok(false);
                }
            }
        }

        hooks.progress(1.0);
        tokio::fs::write(self.target_path(meta), b"audio").await?;
        Ok(true)
    }

    fn target_path(&self, meta: &TrackMetadata) -> PathBuf {
        let dir = meta
            .output_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.clone());
        dir.join(format!("{}.mp3", meta.file_stem()))
    }
}

fn playlist_result(name: &str, tracks: Vec<(&str, &str)>) -> ScrapeResult {
    ScrapeResult {
        tracks: tracks
            .into_iter()
            .map(|(title, artist)| {
                let mut track = TrackMetadata::new(title, artist);
                track.album = Some("Test Album".to_string());
                track
            })
            .collect(),
        collection_name: Some(name.to_string()),
    }
}

fn build_orchestrator(
    base_dir: PathBuf,
    max_concurrent: usize,
    source: ScrapeResult,
    downloader: Arc<MockDownloader>,
) -> (DownloadOrchestrator, Arc<DownloadTracker>) {
    let config = AppConfig {
        download_path: base_dir,
        max_concurrent_downloads: max_concurrent,
        ..AppConfig::default()
    };
    let tracker = Arc::new(DownloadTracker::new());
    let orchestrator = DownloadOrchestrator::new(
        config,
        Arc::new(MockSource { result: source }),
        downloader,
        tracker.clone(),
        Arc::new(AtomicBool::new(false)),
    );
    (orchestrator, tracker)
}

#[tokio::test]
async fn pool_never_exceeds_configured_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let tracks: Vec<(String, String)> = (0..10)
        .map(|i| (format!("Track {}", i), "Artist".to_string()))
        .collect();
    let scraped = playlist_result(
        "Big Mix",
        tracks.iter().map(|(t, a)| (t.as_str(), a.as_str())).collect(),
    );
    let downloader = Arc::new(MockDownloader::new(dir.path().to_path_buf()));
    let (orchestrator, _tracker) =
        build_orchestrator(dir.path().to_path_buf(), 3, scraped, downloader.clone());

    let report = orchestrator.run(PLAYLIST_URL).await.unwrap();
    assert_eq!(report.total, 10);
    assert_eq!(report.downloaded, 10);
    assert_eq!(report.failed, 0);
    assert!(report.cache_cleared);
    assert!(
        downloader.max_active.load(Ordering::SeqCst) <= 3,
        "saw {} concurrent downloads",
        downloader.max_active.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn reconciliation_retries_only_missing_tracks_with_wider_query() {
    let dir = tempfile::tempdir().unwrap();
    let scraped = playlist_result(
        "Mix",
        vec![("Easy One", "Artist"), ("Hard One", "Artist"), ("Easy Two", "Artist")],
    );
    let downloader =
        Arc::new(MockDownloader::new(dir.path().to_path_buf()).fail_first("Hard One", "Artist", 2));
    let (orchestrator, tracker) =
        build_orchestrator(dir.path().to_path_buf(), 2, scraped, downloader.clone());

    let report = orchestrator.run(PLAYLIST_URL).await.unwrap();
    assert_eq!(report.downloaded, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.reconcile_passes, 2);
    assert!(report.cache_cleared);

    // Easy tracks ran once; the hard one needed the initial attempt plus
    // two reconciliation passes.
    assert_eq!(downloader.attempts_for("Easy One", "Artist"), 1);
    assert_eq!(downloader.attempts_for("Easy Two", "Artist"), 1);
    assert_eq!(downloader.attempts_for("Hard One", "Artist"), 3);
    assert_eq!(
        downloader.last_query_for("Hard One", "Artist").as_deref(),
        Some("Hard One Artist Test Album")
    );

    // Snapshot is gone once everything is on disk.
    let cache = JobCache::for_dir(&dir.path().join("Mix"));
    assert!(!cache.exists());

    let summary = tracker.get_summary();
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 2);
}

#[tokio::test]
async fn exhausted_reconciliation_keeps_the_job_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let scraped = playlist_result("Mix", vec![("Good", "Artist"), ("Gone", "Artist")]);
    let downloader =
        Arc::new(MockDownloader::new(dir.path().to_path_buf()).fail_first("Gone", "Artist", 99));
    let (orchestrator, _tracker) =
        build_orchestrator(dir.path().to_path_buf(), 2, scraped, downloader.clone());

    let report = orchestrator.run(PLAYLIST_URL).await.unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.reconcile_passes, 3);
    assert!(!report.cache_cleared);

    let cache = JobCache::for_dir(&dir.path().join("Mix"));
    assert!(cache.exists());
    let job = cache.load().await.unwrap();
    assert_eq!(job.tracks.len(), 2);
}

#[tokio::test]
async fn duplicate_playlist_entries_download_once() {
    let dir = tempfile::tempdir().unwrap();
    let scraped = playlist_result(
        "Mix",
        vec![("Song", "Artist"), ("SONG", "artist"), ("Other", "Artist")],
    );
    let downloader = Arc::new(MockDownloader::new(dir.path().to_path_buf()));
    let (orchestrator, _tracker) =
        build_orchestrator(dir.path().to_path_buf(), 2, scraped, downloader.clone());

    let report = orchestrator.run(PLAYLIST_URL).await.unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(downloader.attempts_for("Song", "Artist"), 1);
}

#[tokio::test]
async fn free_text_input_downloads_directly() {
    let dir = tempfile::tempdir().unwrap();
    let downloader = Arc::new(MockDownloader::new(dir.path().to_path_buf()));
    let (orchestrator, tracker) = build_orchestrator(
        dir.path().to_path_buf(),
        2,
        ScrapeResult::default(),
        downloader.clone(),
    );

    let report = orchestrator.run("daft punk around the world").await.unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.downloaded, 1);
    assert!(dir.path().join("daft punk around the world.mp3").exists());

    let items = tracker.get_all_downloads();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, DownloadStatus::Completed);
}

#[tokio::test]
async fn already_present_tracks_are_not_redownloaded() {
    let dir = tempfile::tempdir().unwrap();
    let scraped = playlist_result("Mix", vec![("Here", "Artist"), ("Missing", "Artist")]);
    let downloader = Arc::new(MockDownloader::new(dir.path().to_path_buf()));

    let playlist_dir = dir.path().join("Mix");
    tokio::fs::create_dir_all(&playlist_dir).await.unwrap();
    tokio::fs::write(playlist_dir.join("Here - Artist.mp3"), b"audio")
        .await
        .unwrap();

    let (orchestrator, _tracker) =
        build_orchestrator(dir.path().to_path_buf(), 2, scraped, downloader.clone());
    let report = orchestrator.run(PLAYLIST_URL).await.unwrap();

    assert_eq!(report.already_present, 1);
    assert_eq!(report.downloaded, 1);
    assert_eq!(downloader.attempts_for("Here", "Artist"), 0);
    assert_eq!(downloader.attempts_for("Missing", "Artist"), 1);
}
