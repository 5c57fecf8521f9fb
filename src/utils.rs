use std::path::Path;
use std::time::{Duration, Instant};

use log::info;

use crate::errors::Result;
use crate::validation::sanitize_filename;

/// Generates a unique ID for downloads.
pub fn generate_download_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Builds the canonical "Name - Artist" file stem for a track, sanitized
/// for the filesystem. Falls back to a placeholder when everything was
/// stripped away.
pub fn track_file_stem(name: &str, artist: &str) -> String {
    let stem = if artist.trim().is_empty() {
        sanitize_filename(name)
    } else {
        sanitize_filename(&format!("{} - {}", name, artist))
    };
    if !stem.chars().any(char::is_alphanumeric) {
        "Unknown_Song - Unknown_Artist".to_string()
    } else {
        stem
    }
}

/// Creates a directory if it doesn't exist.
pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Drops calls that arrive faster than the configured interval. Used to
/// keep progress callbacks below ~10 updates per second.
pub struct Throttler {
    interval: Duration,
    last_fire: Option<Instant>,
}

impl Throttler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fire: None,
        }
    }

    /// Returns true (and arms the interval) if enough time has passed
    /// since the previous accepted call.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last_fire {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_fire = Some(now);
                true
            }
        }
    }
}
