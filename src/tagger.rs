//! Embeds track metadata and cover art into finished audio files with
//! `lofty`. Tag writes are blocking IO and run on the blocking pool.

use std::path::{Path, PathBuf};

use lofty::config::{ParseOptions, WriteOptions};
use lofty::file::TaggedFileExt;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::{Accessor, AudioFile};
use lofty::probe::Probe;
use lofty::tag::Tag;
use log::{debug, warn};
use reqwest::Client;

use crate::downloader::TrackMetadata;
use crate::errors::{AppError, Result};

const MAX_COVER_BYTES: u64 = 10 * 1024 * 1024;

/// Writes title/artist/album/year/track tags plus optional cover art into
/// the file's primary tag. Blocking; call through [`tag_file`] from async
/// contexts.
pub fn apply_tags(path: &Path, meta: &TrackMetadata, cover: Option<Picture>) -> Result<()> {
    let mut tagged_file = Probe::open(path)
        .map_err(|e| AppError::Processing(format!("cannot probe {:?}: {}", path, e)))?
        .options(ParseOptions::new().read_properties(false))
        .read()
        .map_err(|e| AppError::Processing(format!("cannot read tags from {:?}: {}", path, e)))?;

    if tagged_file.primary_tag_mut().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .primary_tag_mut()
        .ok_or_else(|| AppError::Processing(format!("no writable tag for {:?}", path)))?;

    tag.set_title(meta.name.clone());
    if !meta.artist.is_empty() {
        tag.set_artist(meta.artist.clone());
    }
    if let Some(album) = &meta.album {
        tag.set_album(album.clone());
    }
    if let Some(year) = meta.year {
        tag.set_year(year);
    }
    if let Some(track_number) = meta.track_number {
        tag.set_track(track_number);
    }
    if let Some(picture) = cover {
        tag.push_picture(picture);
    }

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|e| AppError::Processing(format!("cannot write tags to {:?}: {}", path, e)))?;

    debug!("Tagged {:?}", path);
    Ok(())
}

/// Async wrapper that moves the blocking tag write off the runtime.
pub async fn tag_file(path: PathBuf, meta: TrackMetadata, cover: Option<Picture>) -> Result<()> {
    tokio::task::spawn_blocking(move || apply_tags(&path, &meta, cover))
        .await
        .map_err(|e| AppError::Processing(format!("tagging task failed: {}", e)))?
}

/// Downloads cover art for embedding. HTTPS only, image/* content type,
/// size capped; any failure degrades to `None` since a missing cover never
/// fails a download.
pub async fn fetch_cover_art(client: &Client, url: &str) -> Option<Picture> {
    if !url.starts_with("https://") {
        warn!("Skipping cover art with non-https URL: {}", url);
        return None;
    }

    let response = match client.get(url).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            warn!("Cover art fetch returned HTTP {}", response.status());
            return None;
        }
        Err(e) => {
            warn!("Cover art fetch failed: {}", e);
            return None;
        }
    };

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.starts_with("image/") {
        warn!("Cover art has non-image content type: {}", content_type);
        return None;
    }
    if let Some(length) = response.content_length() {
        if length > MAX_COVER_BYTES {
            warn!("Cover art too large: {} bytes", length);
            return None;
        }
    }

    let bytes = match response.bytes().await {
        Ok(bytes) if bytes.len() as u64 <= MAX_COVER_BYTES => bytes,
        Ok(bytes) => {
            warn!("Cover art too large: {} bytes", bytes.len());
            return None;
        }
        Err(e) => {
            warn!("Cover art body read failed: {}", e);
            return None;
        }
    };

    let mime = if content_type.contains("png") {
        MimeType::Png
    } else {
        MimeType::Jpeg
    };
    Some(Picture::new_unchecked(
        PictureType::CoverFront,
        Some(mime),
        None,
        bytes.to_vec(),
    ))
}
