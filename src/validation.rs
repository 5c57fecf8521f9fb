//! URL classification and path/filename hygiene. Pure functions, no state.

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::errors::{AppError, Result};

const SPOTIFY_HOSTS: [&str; 2] = ["open.spotify.com", "spotify.link"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Track,
    Album,
    Playlist,
    /// Anything that is not a Spotify URL is treated as a free-text search.
    Search,
}

pub fn classify_url(input: &str) -> UrlKind {
    let parsed = match Url::parse(input.trim()) {
        Ok(url) => url,
        Err(_) => return UrlKind::Search,
    };

    let host = parsed.host_str().unwrap_or("");
    if !SPOTIFY_HOSTS.contains(&host) {
        return UrlKind::Search;
    }

    let path = parsed.path().to_ascii_lowercase();
    if path.starts_with("/track/") {
        UrlKind::Track
    } else if path.starts_with("/album/") {
        UrlKind::Album
    } else if path.starts_with("/playlist/") {
        UrlKind::Playlist
    } else {
        UrlKind::Search
    }
}

pub fn is_spotify_url(input: &str) -> bool {
    classify_url(input) != UrlKind::Search
}

/// Rejects non-http(s) schemes and hosts that resolve into loopback or
/// private address space.
pub fn is_safe_url(input: &str) -> bool {
    let parsed = match Url::parse(input.trim()) {
        Ok(url) => url,
        Err(_) => return false,
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let host = match parsed.host_str() {
        Some(host) => host,
        None => return false,
    };

    if matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]") {
        return false;
    }

    if let Some(rest) = host.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next().and_then(|s| s.parse::<u8>().ok()) {
            if (16..=31).contains(&second) {
                return false;
            }
        }
    }

    !(host.starts_with("10.") || host.starts_with("192.168."))
}

/// Strips traversal sequences, replaces characters that are invalid on
/// common filesystems and caps the length at 255.
pub fn sanitize_filename(filename: &str) -> String {
    let stripped = filename.replace("../", "").replace("..\\", "");

    let mut sanitized: String = stripped
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    sanitized = sanitized.trim().to_string();

    if sanitized.len() > 255 {
        sanitized.truncate(
            sanitized
                .char_indices()
                .take_while(|(i, _)| *i < 255)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0),
        );
    }

    sanitized
}

/// Joins a sanitized subpath under `base` and proves the result stays
/// inside `base`. The subpath is flattened to a single component, so a
/// hostile `../../etc` ends up as a plain directory name.
pub fn validate_download_path(base: &Path, sub_path: &str) -> Result<PathBuf> {
    if sub_path.is_empty() {
        return Ok(base.to_path_buf());
    }

    let safe = sanitize_filename(sub_path);
    if safe.is_empty() {
        return Err(AppError::Validation(
            "subdirectory name is empty after sanitization".to_string(),
        ));
    }

    let joined = base.join(&safe);

    // Belt and braces: sanitization already removed separators, but a
    // lexical containment check catches anything that slipped through.
    let mut depth: i32 = 0;
    for component in joined.strip_prefix(base).unwrap_or(&joined).components() {
        match component {
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
            _ => {}
        }
        if depth < 0 {
            return Err(AppError::Validation(format!(
                "path traversal detected in '{}'",
                sub_path
            )));
        }
    }

    Ok(joined)
}
