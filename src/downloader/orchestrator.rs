//! Job-level coordination: resolves a URL to tracks, fans downloads out
//! over a bounded worker pool, then reconciles playlist jobs until every
//! track is on disk or the retry budget runs out.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::downloader::cache::{JobCache, PlaylistJob};
use crate::downloader::tracker::{DownloadStatus, DownloadTracker};
use crate::downloader::{DownloadHooks, Downloader, TrackMetadata};
use crate::errors::{AppError, Result};
use crate::scraper::{MetadataSource, ScrapeResult};
use crate::utils::{ensure_dir_exists, generate_download_id};
use crate::validation::{classify_url, validate_download_path, UrlKind};

/// How many reconciliation passes a playlist job gets before leftover
/// tracks are reported as failed.
const RECONCILE_PASSES: u32 = 3;

/// Outcome of one `run` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobReport {
    pub total: usize,
    /// Tracks that were already on disk before the job started.
    pub already_present: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub reconcile_passes: u32,
    pub playlist_name: Option<String>,
    pub cache_cleared: bool,
}

pub struct DownloadOrchestrator {
    config: AppConfig,
    source: Arc<dyn MetadataSource>,
    downloader: Arc<dyn Downloader>,
    tracker: Arc<DownloadTracker>,
    cancel: Arc<AtomicBool>,
}

impl DownloadOrchestrator {
    pub fn new(
        config: AppConfig,
        source: Arc<dyn MetadataSource>,
        downloader: Arc<dyn Downloader>,
        tracker: Arc<DownloadTracker>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            source,
            downloader,
            tracker,
            cancel,
        }
    }

    pub fn tracker(&self) -> Arc<DownloadTracker> {
        self.tracker.clone()
    }

    /// Requests cooperative cancellation. In-flight subprocesses are
    /// killed at the next progress line; queued tracks never start.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        info!("Cancellation requested");
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Entry point for any user input: a Spotify track/album/playlist URL
    /// or free text that becomes a direct search download.
    pub async fn run(&self, input: &str) -> Result<JobReport> {
        match classify_url(input) {
            UrlKind::Track => {
                let scraped = self.source.fetch(input).await?;
                let track = scraped
                    .tracks
                    .into_iter()
                    .next()
                    .ok_or_else(|| AppError::Api("track URL yielded no metadata".to_string()))?;
                self.run_single(track).await
            }
            UrlKind::Album | UrlKind::Playlist => {
                let scraped = self.source.fetch(input).await?;
                self.run_collection(input, scraped).await
            }
            UrlKind::Search => {
                let mut track = TrackMetadata::new(input.trim(), "");
                track.query = Some(input.trim().to_string());
                self.run_single(track).await
            }
        }
    }

    /// Single tracks skip the pool and run on the caller's task.
    async fn run_single(&self, track: TrackMetadata) -> Result<JobReport> {
        if self.downloader.target_path(&track).exists() {
            return Ok(JobReport {
                total: 1,
                already_present: 1,
                downloaded: 0,
                failed: 0,
                reconcile_passes: 0,
                playlist_name: None,
                cache_cleared: false,
            });
        }

        let ok = run_one(self.downloader.clone(), self.tracker.clone(), track).await;
        Ok(JobReport {
            total: 1,
            already_present: 0,
            downloaded: usize::from(ok),
            failed: usize::from(!ok),
            reconcile_passes: 0,
            playlist_name: None,
            cache_cleared: false,
        })
    }

    async fn run_collection(&self, url: &str, scraped: ScrapeResult) -> Result<JobReport> {
        let name = scraped.collection_name.clone();
        let dir = match &name {
            Some(n) => validate_download_path(&self.config.download_path, n)?,
            None => self.config.download_path.clone(),
        };
        ensure_dir_exists(&dir).await?;

        let mut tracks = dedupe_tracks(scraped.tracks);
        for track in &mut tracks {
            track.output_dir = Some(dir.clone());
            track.playlist_name = name.clone();
        }
        if tracks.is_empty() {
            return Err(AppError::Api("collection yielded no tracks".to_string()));
        }

        let cache = JobCache::for_dir(&dir);
        cache
            .save(&PlaylistJob::new(url, name.clone(), tracks.clone()))
            .await?;

        let total = tracks.len();
        let mut already_present = 0usize;
        let pending: Vec<TrackMetadata> = tracks
            .iter()
            .filter(|track| {
                let exists = self.downloader.target_path(track).exists();
                if exists {
                    already_present += 1;
                }
                !exists
            })
            .cloned()
            .collect();

        info!(
            "Starting job for {:?}: {} tracks ({} already present)",
            name.as_deref().unwrap_or("collection"),
            total,
            already_present
        );
        self.run_pool(pending).await?;

        let mut passes = 0;
        while passes < RECONCILE_PASSES && !self.cancelled() {
            let missing = self.missing_tracks(&tracks);
            if missing.is_empty() {
                break;
            }
            passes += 1;
            info!(
                "Reconciliation pass {}/{}: {} tracks still missing",
                passes,
                RECONCILE_PASSES,
                missing.len()
            );
            let retries = missing.into_iter().map(widen_query_for_retry).collect();
            self.run_pool(retries).await?;
        }

        let still_missing = self.missing_tracks(&tracks).len();
        let cache_cleared = still_missing == 0 && !self.cancelled();
        if cache_cleared {
            cache.remove().await?;
        } else if still_missing > 0 {
            warn!(
                "Job finished with {} tracks missing; keeping snapshot {:?}",
                still_missing,
                cache.path()
            );
        }

        Ok(JobReport {
            total,
            already_present,
            downloaded: total - already_present - still_missing,
            failed: still_missing,
            reconcile_passes: passes,
            playlist_name: name,
            cache_cleared,
        })
    }

    /// Resumes a previously interrupted playlist job from its on-disk
    /// snapshot.
    pub async fn resume(&self, dir: &Path) -> Result<JobReport> {
        let cache = JobCache::for_dir(dir);
        if !cache.exists() {
            return Err(AppError::File(format!(
                "no job snapshot found in {:?}",
                dir
            )));
        }
        let job = cache.load().await?;
        let scraped = ScrapeResult {
            tracks: job.tracks,
            collection_name: job.playlist_name,
        };
        self.run_collection(&job.url, scraped).await
    }

    fn missing_tracks(&self, tracks: &[TrackMetadata]) -> Vec<TrackMetadata> {
        tracks
            .iter()
            .filter(|track| !self.downloader.target_path(track).exists())
            .cloned()
            .collect()
    }

    /// Fans the tracks out over at most `max_concurrent_downloads`
    /// workers and waits for all of them.
    async fn run_pool(&self, tracks: Vec<TrackMetadata>) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_downloads));
        let mut handles = Vec::with_capacity(tracks.len());

        for track in tracks {
            if self.cancelled() {
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::Processing(format!("worker pool closed: {}", e)))?;
            let downloader = self.downloader.clone();
            let tracker = self.tracker.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                run_one(downloader, tracker, track).await
            }));
        }

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Download worker panicked: {}", e);
            }
        }
        Ok(())
    }
}

/// Runs the full pipeline for one track, mirroring the outcome into the
/// tracker. Returns whether the track ended up on disk.
async fn run_one(
    downloader: Arc<dyn Downloader>,
    tracker: Arc<DownloadTracker>,
    track: TrackMetadata,
) -> bool {
    let id = track.download_id.clone();
    tracker.add_download(&id, &track.name, &track.artist);
    tracker.update_status(&id, DownloadStatus::Downloading);

    let hooks = DownloadHooks {
        on_progress: Some(Arc::new({
            let tracker = tracker.clone();
            let id = id.clone();
            move |fraction| tracker.update_progress(&id, fraction)
        })),
        on_log: Some(Arc::new(|message| info!("{}", message))),
    };

    match downloader.download_and_tag(&track, &hooks).await {
        Ok(true) => {
            tracker.set_completed(&id, Some(downloader.target_path(&track)));
            true
        }
        Ok(false) => {
            tracker.set_error(&id, "no usable match found");
            false
        }
        Err(e) => {
            warn!("Download failed for '{}': {}", track.name, e);
            tracker.set_error(&id, &e.to_string());
            false
        }
    }
}

/// Reconciliation retries search with the album appended, which usually
/// resolves tracks whose plain title matched the wrong upload.
fn widen_query_for_retry(mut track: TrackMetadata) -> TrackMetadata {
    track.query = Some(match &track.album {
        Some(album) => format!("{} {} {}", track.name, track.artist, album),
        None => format!("{} {}", track.name, track.artist),
    });
    // Fresh tracker entry for the retry; the failed one stays visible.
    track.download_id = generate_download_id();
    track
}

/// Playlists routinely contain the same track twice; the first occurrence
/// wins.
fn dedupe_tracks(tracks: Vec<TrackMetadata>) -> Vec<TrackMetadata> {
    let mut seen = HashSet::new();
    tracks
        .into_iter()
        .filter(|track| seen.insert(track.reconcile_key()))
        .collect()
}
