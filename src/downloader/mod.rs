pub mod cache;
pub mod engine;
pub mod orchestrator;
pub mod tracker;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::utils::{generate_download_id, track_file_stem};

/// Canonical track shape every internal component consumes. Built once at
/// the scraper boundary; immutable once handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub name: String,
    pub artist: String,
    pub duration_ms: Option<u64>,
    pub album: Option<String>,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub cover_url: Option<String>,
    /// Overrides the configured download directory (playlist/album folder).
    pub output_dir: Option<PathBuf>,
    /// Explicit search query override; defaults to "name artist".
    pub query: Option<String>,
    pub playlist_name: Option<String>,
    pub download_id: String,
}

impl TrackMetadata {
    pub fn new(name: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artist: artist.into(),
            duration_ms: None,
            album: None,
            year: None,
            track_number: None,
            cover_url: None,
            output_dir: None,
            query: None,
            playlist_name: None,
            download_id: generate_download_id(),
        }
    }

    pub fn search_query(&self) -> String {
        match &self.query {
            Some(query) => query.clone(),
            None => format!("{} {}", self.name, self.artist).trim().to_string(),
        }
    }

    /// Sanitized "Name - Artist" file stem.
    pub fn file_stem(&self) -> String {
        track_file_stem(&self.name, &self.artist)
    }

    /// The one canonical key used to match completed downloads against a
    /// playlist snapshot during reconciliation.
    pub fn reconcile_key(&self) -> String {
        reconcile_key(&self.name, &self.artist)
    }
}

pub fn reconcile_key(name: &str, artist: &str) -> String {
    format!(
        "{} - {}",
        name.trim().to_lowercase(),
        artist.trim().to_lowercase()
    )
}

pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;
pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Observer capabilities handed to the engine. Delivery is synchronous on
/// the calling thread; consumers hop threads themselves if they need to.
#[derive(Clone, Default)]
pub struct DownloadHooks {
    pub on_progress: Option<ProgressFn>,
    pub on_log: Option<LogFn>,
}

impl DownloadHooks {
    pub fn progress(&self, fraction: f32) {
        if let Some(f) = &self.on_progress {
            f(fraction.clamp(0.0, 1.0));
        }
    }

    pub fn log(&self, message: &str) {
        if let Some(f) = &self.on_log {
            f(message);
        }
    }
}

/// Seam between the orchestrator and the engine; lets tests substitute a
/// counting mock for the real yt-dlp pipeline.
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    /// Full pipeline for a single track. `Ok(true)` = file present on
    /// disk (downloaded now or earlier), `Ok(false)` = no match or fetch
    /// exhausted; hard errors are reserved for invariant violations.
    async fn download_and_tag(&self, meta: &TrackMetadata, hooks: &DownloadHooks) -> Result<bool>;

    /// Deterministic target path for a track; used for skip-if-exists
    /// pre-filtering and reconciliation checks.
    fn target_path(&self, meta: &TrackMetadata) -> PathBuf;
}
