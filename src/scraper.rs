//! Spotify metadata boundary. Raw scrape payloads arrive as loosely shaped
//! JSON; everything past this module sees only [`TrackMetadata`].

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use tokio::process::Command;

use crate::downloader::TrackMetadata;
use crate::errors::{AppError, Result};
use crate::validation::{is_safe_url, is_spotify_url};

/// Fetched metadata for one URL: the tracks plus the collection name when
/// the URL was a playlist or album.
#[derive(Debug, Clone, Default)]
pub struct ScrapeResult {
    pub tracks: Vec<TrackMetadata>,
    pub collection_name: Option<String>,
}

/// Where track metadata comes from. The orchestrator only depends on this
/// trait so tests can feed it canned payloads.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ScrapeResult>;
}

/// Bridges to an external scraper program that prints a JSON document on
/// stdout. The command and its arguments are configurable so any scraper
/// speaking the format can be dropped in.
pub struct CommandScraper {
    program: String,
    args: Vec<String>,
}

impl CommandScraper {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl MetadataSource for CommandScraper {
    async fn fetch(&self, url: &str) -> Result<ScrapeResult> {
        if !is_spotify_url(url) {
            return Err(AppError::Validation(format!("not a Spotify URL: {}", url)));
        }
        if !is_safe_url(url) {
            return Err(AppError::Validation(format!("unsafe URL rejected: {}", url)));
        }

        debug!("Invoking scraper {} for {}", self.program, url);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .output()
            .await
            .map_err(|e| AppError::Api(format!("failed to run scraper '{}': {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Api(format!(
                "scraper exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let payload: Value = serde_json::from_slice(&output.stdout)?;
        parse_scrape_payload(&payload)
    }
}

/// Normalizes the scrape document. Accepts tracks as a bare array or under
/// an `items`/`tracks` key, with or without per-item `{"track": ...}`
/// wrappers; artists may be objects with a `name` or plain strings.
pub fn parse_scrape_payload(payload: &Value) -> Result<ScrapeResult> {
    let collection_name = payload
        .get("name")
        .or_else(|| payload.get("playlist_name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let raw_tracks = if let Some(list) = payload.as_array() {
        list.as_slice()
    } else if let Some(list) = payload.get("tracks").and_then(track_list) {
        list
    } else if let Some(list) = payload.get("items").and_then(Value::as_array) {
        list.as_slice()
    } else if payload.get("track").is_some() || payload.get("name").is_some() {
        // Single-track document.
        return Ok(ScrapeResult {
            tracks: parse_track(payload).into_iter().collect(),
            collection_name: None,
        });
    } else {
        return Err(AppError::Api(
            "scrape payload has no recognizable track list".to_string(),
        ));
    };

    let mut tracks = Vec::with_capacity(raw_tracks.len());
    for raw in raw_tracks {
        match parse_track(raw) {
            Some(track) => tracks.push(track),
            None => warn!("Skipping track entry without a name: {}", raw),
        }
    }

    Ok(ScrapeResult {
        tracks,
        collection_name,
    })
}

fn track_list(tracks: &Value) -> Option<&[Value]> {
    tracks
        .as_array()
        .map(Vec::as_slice)
        .or_else(|| tracks.get("items").and_then(Value::as_array).map(Vec::as_slice))
}

fn parse_track(raw: &Value) -> Option<TrackMetadata> {
    // Playlist items nest the track under a "track" key.
    let obj = raw.get("track").filter(|v| v.is_object()).unwrap_or(raw);

    let name = obj.get("name").and_then(Value::as_str)?.trim();
    if name.is_empty() {
        return None;
    }

    let artist = first_artist(obj).unwrap_or_default();
    let mut track = TrackMetadata::new(name, artist);

    track.duration_ms = obj.get("duration_ms").and_then(Value::as_u64);
    track.album = obj
        .get("album")
        .and_then(|album| album.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    track.cover_url = obj
        .get("album")
        .and_then(|album| album.get("images"))
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(|image| image.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string);
    track.year = obj
        .get("album")
        .and_then(|album| album.get("release_date"))
        .and_then(Value::as_str)
        .and_then(|date| date.get(..4))
        .and_then(|year| year.parse().ok());
    track.track_number = obj
        .get("track_number")
        .and_then(Value::as_u64)
        .map(|n| n as u32);

    Some(track)
}

fn first_artist(obj: &Value) -> Option<String> {
    let artists = obj.get("artists")?;
    match artists {
        Value::Array(list) => list.first().and_then(|artist| match artist {
            Value::String(s) => Some(s.clone()),
            other => other
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
