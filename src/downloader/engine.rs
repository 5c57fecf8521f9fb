//! The real download pipeline: search, fetch via yt-dlp, verify, convert
//! if needed, then tag.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::config::AppConfig;
use crate::converter::AudioConverter;
use crate::downloader::{DownloadHooks, Downloader, TrackMetadata};
use crate::errors::{AppError, Result};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::search::YoutubeSearcher;
use crate::tagger;
use crate::utils::{ensure_dir_exists, Throttler};

/// Progress callbacks are throttled to at most one per interval.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

pub struct DownloadEngine {
    config: AppConfig,
    searcher: YoutubeSearcher,
    client: Client,
    cancel: Arc<AtomicBool>,
}

impl DownloadEngine {
    pub fn new(
        config: AppConfig,
        searcher: YoutubeSearcher,
        client: Client,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            searcher,
            client,
            cancel,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn output_dir(&self, meta: &TrackMetadata) -> PathBuf {
        meta.output_dir
            .clone()
            .unwrap_or_else(|| self.config.download_path.clone())
    }

    /// Runs yt-dlp once, streaming progress lines to the hooks. A nonzero
    /// exit is reported as a network error so the retry policy applies.
    async fn run_ytdlp(
        &self,
        video_url: &str,
        output_template: &str,
        hooks: &DownloadHooks,
    ) -> Result<()> {
        let mut child = Command::new("yt-dlp")
            .arg("-x")
            .arg("--audio-format")
            .arg(self.config.format_extension())
            .arg("--audio-quality")
            .arg(format!("{}K", self.config.quality_bitrate()))
            .arg("--socket-timeout")
            .arg(self.config.timeout_seconds.to_string())
            .arg("-o")
            .arg(output_template)
            .arg("--newline")
            .arg("--no-playlist")
            .arg(video_url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::Processing(format!("failed to run yt-dlp: {}", e)))?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            let mut throttler = Throttler::new(PROGRESS_INTERVAL);
            while let Ok(Some(line)) = lines.next_line().await {
                if self.cancelled() {
                    let _ = child.kill().await;
                    return Err(AppError::Processing("download cancelled".to_string()));
                }
                if let Some(fraction) = parse_progress_line(&line) {
                    if throttler.ready() || fraction >= 1.0 {
                        hooks.progress(fraction);
                    }
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AppError::Processing(format!("yt-dlp did not finish: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Network(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or("").trim()
            )));
        }
        Ok(())
    }

    /// When yt-dlp produced a different container than requested, convert
    /// the sibling file into the target format.
    async fn recover_output(&self, dir: &Path, stem: &str, target: &Path) -> Result<bool> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches_stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s == stem)
                .unwrap_or(false);
            if matches_stem && path != target {
                info!("Converting {:?} into requested format", path);
                let converter = AudioConverter::new(self.config.quality_bitrate());
                converter.convert(&path, target).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn tag_output(&self, target: &Path, meta: &TrackMetadata) {
        let cover = match &meta.cover_url {
            Some(url) => tagger::fetch_cover_art(&self.client, url).await,
            None => None,
        };
        if let Err(e) = tagger::tag_file(target.to_path_buf(), meta.clone(), cover).await {
            warn!("Tagging failed for {:?}: {}", target, e);
        }
    }
}

#[async_trait]
impl Downloader for DownloadEngine {
    async fn download_and_tag(&self, meta: &TrackMetadata, hooks: &DownloadHooks) -> Result<bool> {
        if self.cancelled() {
            return Err(AppError::Processing("download cancelled".to_string()));
        }

        let target = self.target_path(meta);
        if target.exists() {
            hooks.log(&format!("Already downloaded: {}", meta.file_stem()));
            hooks.progress(1.0);
            return Ok(true);
        }

        let dir = self.output_dir(meta);
        ensure_dir_exists(&dir).await?;

        let query = meta.search_query();
        let video_url = match self
            .searcher
            .search(&query, meta.duration_ms, Some(&meta.artist))
            .await?
        {
            Some(url) => url,
            None => {
                hooks.log(&format!("No match found for: {}", query));
                return Ok(false);
            }
        };

        hooks.log(&format!("Downloading: {}", meta.file_stem()));
        let stem = meta.file_stem();
        let template = dir.join(format!("{}.%(ext)s", stem));
        let template = template.to_string_lossy().into_owned();

        let policy = RetryPolicy::from_attempts(self.config.retry_attempts);
        let fetched = retry_with_backoff(&policy, &format!("download of {}", stem), || {
            self.run_ytdlp(&video_url, &template, hooks)
        })
        .await;

        if let Err(e) = fetched {
            if e.is_retryable() {
                hooks.log(&format!("Download failed after retries: {}", e));
                return Ok(false);
            }
            return Err(e);
        }

        if !target.exists() && !self.recover_output(&dir, &stem, &target).await? {
            return Err(AppError::File(format!(
                "download finished but {:?} is missing",
                target
            )));
        }

        self.tag_output(&target, meta).await;
        hooks.progress(1.0);
        debug!("Finished {:?}", target);
        Ok(true)
    }

    fn target_path(&self, meta: &TrackMetadata) -> PathBuf {
        self.output_dir(meta)
            .join(format!("{}.{}", meta.file_stem(), self.config.format_extension()))
    }
}

/// Extracts a completion fraction from a yt-dlp `[download]  42.3%` line.
pub fn parse_progress_line(line: &str) -> Option<f32> {
    // Compiled per call; download output is a few hundred lines at most.
    let pattern = Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").ok()?;
    let percent: f32 = pattern.captures(line)?.get(1)?.as_str().parse().ok()?;
    Some((percent / 100.0).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use crate::ratelimit::AdaptiveRateLimiter;
    use std::sync::atomic::AtomicUsize;

    fn test_engine(download_path: PathBuf) -> DownloadEngine {
        let config = AppConfig {
            download_path,
            ..AppConfig::default()
        };
        let client = build_client(config.timeout_seconds).unwrap();
        let limiter = Arc::new(AdaptiveRateLimiter::new(10, Duration::from_secs(1), 1, 10));
        let searcher = YoutubeSearcher::new(client.clone(), limiter, RetryPolicy::default());
        DownloadEngine::new(config, searcher, client, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn parses_progress_lines() {
        assert_eq!(
            parse_progress_line("[download]  42.3% of 3.52MiB at 1.2MiB/s"),
            Some(0.423)
        );
        assert_eq!(parse_progress_line("[download] 100% of 3.52MiB"), Some(1.0));
        assert_eq!(parse_progress_line("[ExtractAudio] Destination: x.mp3"), None);
    }

    #[test]
    fn target_path_uses_output_dir_override() {
        let engine = test_engine(PathBuf::from("/srv/music"));
        let mut meta = TrackMetadata::new("Song", "Artist");
        assert_eq!(
            engine.target_path(&meta),
            PathBuf::from("/srv/music/Song - Artist.mp3")
        );
        meta.output_dir = Some(PathBuf::from("/srv/music/Playlist"));
        assert_eq!(
            engine.target_path(&meta),
            PathBuf::from("/srv/music/Playlist/Song - Artist.mp3")
        );
    }

    #[tokio::test]
    async fn existing_file_short_circuits_without_searching() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path().to_path_buf());
        let meta = TrackMetadata::new("Song", "Artist");
        tokio::fs::write(engine.target_path(&meta), b"audio").await.unwrap();

        let progress_max = Arc::new(AtomicUsize::new(0));
        let seen = progress_max.clone();
        let hooks = DownloadHooks {
            on_progress: Some(Arc::new(move |fraction| {
                seen.fetch_max((fraction * 100.0) as usize, Ordering::SeqCst);
            })),
            on_log: None,
        };

        assert!(engine.download_and_tag(&meta, &hooks).await.unwrap());
        assert_eq!(progress_max.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn cancelled_engine_refuses_work() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = Arc::new(AtomicBool::new(true));
        let config = AppConfig {
            download_path: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        let client = build_client(config.timeout_seconds).unwrap();
        let limiter = Arc::new(AdaptiveRateLimiter::new(10, Duration::from_secs(1), 1, 10));
        let searcher = YoutubeSearcher::new(client.clone(), limiter, RetryPolicy::default());
        let engine = DownloadEngine::new(config, searcher, client, cancel);

        let meta = TrackMetadata::new("Song", "Artist");
        assert!(engine
            .download_and_tag(&meta, &DownloadHooks::default())
            .await
            .is_err());
    }
}
