//! On-disk playlist job snapshot. Written when a playlist job starts,
//! deleted only once every track in it is on disk, so an interrupted run
//! can be resumed and reconciled later.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::downloader::TrackMetadata;
use crate::errors::Result;

const JOB_FILE_NAME: &str = "playlist.json";

/// Snapshot of a playlist job as it looked when the run started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistJob {
    pub url: String,
    pub playlist_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tracks: Vec<TrackMetadata>,
}

impl PlaylistJob {
    pub fn new(url: impl Into<String>, playlist_name: Option<String>, tracks: Vec<TrackMetadata>) -> Self {
        Self {
            url: url.into(),
            playlist_name,
            created_at: Utc::now(),
            tracks,
        }
    }
}

pub struct JobCache {
    path: PathBuf,
}

impl JobCache {
    /// Cache file lives inside the job's output directory so each playlist
    /// folder carries its own snapshot.
    pub fn for_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(JOB_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub async fn save(&self, job: &PlaylistJob) -> Result<()> {
        let content = serde_json::to_string_pretty(job)?;
        tokio::fs::write(&self.path, content).await?;
        debug!("Saved playlist job snapshot to {:?}", self.path);
        Ok(())
    }

    pub async fn load(&self) -> Result<PlaylistJob> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Removes the snapshot. Called only after reconciliation proves every
    /// track is present.
    pub async fn remove(&self) -> Result<()> {
        if self.exists() {
            tokio::fs::remove_file(&self.path).await?;
            info!("Removed completed playlist job snapshot {:?}", self.path);
        }
        Ok(())
    }
}
