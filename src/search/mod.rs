//! YouTube match selection: issue a results-page search, parse the embedded
//! `ytInitialData` JSON, score candidates against the target track and pick
//! a winner.

use std::sync::Arc;

use log::{debug, info, warn};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{AppError, Result};
use crate::ratelimit::AdaptiveRateLimiter;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// How many results are considered for scoring.
const CANDIDATE_WINDOW: usize = 10;
/// Duration differences inside the tolerance cost nothing.
const DURATION_TOLERANCE_SECS: f64 = 10.0;
/// Beyond this the candidate is a mix or a snippet, not the track.
const DURATION_CUTOFF_SECS: f64 = 60.0;
const DURATION_PENALTY_WEIGHT: f64 = 2.0;

const BONUS_OFFICIAL_AUDIO: f64 = 25.0;
const BONUS_TOPIC: f64 = 15.0;
const BONUS_OFFICIAL_VIDEO: f64 = 10.0;

/// A single search result under consideration. Ephemeral: produced per
/// search call, discarded after scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub video_id: String,
    pub title: String,
    pub duration_secs: u64,
    pub url: String,
}

pub struct YoutubeSearcher {
    client: Client,
    limiter: Arc<AdaptiveRateLimiter>,
    retry: RetryPolicy,
}

impl YoutubeSearcher {
    pub fn new(client: Client, limiter: Arc<AdaptiveRateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            client,
            limiter,
            retry,
        }
    }

    /// Finds the best-matching video URL for a track. `Ok(None)` means no
    /// usable match (empty query, zero candidates, unparsable markup);
    /// network failures that survive the retry policy surface as errors.
    pub async fn search(
        &self,
        query: &str,
        target_duration_ms: Option<u64>,
        artist_hint: Option<&str>,
    ) -> Result<Option<String>> {
        let query = query.trim();
        if query.is_empty() {
            debug!("Skipping search: empty query");
            return Ok(None);
        }

        info!("Searching YouTube for: {}", query);
        let biased = format!("{} official audio", query);
        let url = format!(
            "https://www.youtube.com/results?search_query={}",
            urlencoding::encode(&biased)
        );

        let body = retry_with_backoff(&self.retry, "youtube search", || self.fetch_page(&url)).await?;

        let candidates = match parse_candidates(&body) {
            Some(candidates) if !candidates.is_empty() => candidates,
            _ => {
                warn!("No candidates parsed for query: {}", query);
                return Ok(None);
            }
        };

        let best = select_best(&candidates, query, target_duration_ms, artist_hint);
        if let Some(candidate) = best {
            debug!(
                "Selected '{}' ({}s) for query '{}'",
                candidate.title, candidate.duration_secs, query
            );
        }
        Ok(best.map(|c| c.url.clone()))
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.limiter.acquire().await;

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            self.limiter.on_rate_limit_error().await;
            return Err(AppError::Network("HTTP 429 Too Many Requests".to_string()));
        }
        if status.is_server_error() {
            return Err(AppError::Network(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(AppError::Processing(format!(
                "search request rejected with HTTP {}",
                status
            )));
        }

        self.limiter.on_success().await;
        Ok(response.text().await?)
    }
}

/// Extracts video candidates from the results page. Returns `None` when the
/// page layout is unrecognized (the endpoint is externally owned and breaks
/// from time to time).
pub fn parse_candidates(body: &str) -> Option<Vec<SearchCandidate>> {
    let pattern = Regex::new(r"var ytInitialData = (\{.*?\});").ok()?;
    let raw = pattern.captures(body)?.get(1)?.as_str();
    let data: Value = serde_json::from_str(raw).ok()?;

    let contents = search_result_contents(&data)?;

    let mut candidates = Vec::new();
    for item in contents {
        let video = match item.get("videoRenderer") {
            Some(video) => video,
            None => continue,
        };

        let video_id = video.get("videoId").and_then(Value::as_str);
        let title = video
            .pointer("/title/runs/0/text")
            .and_then(Value::as_str);
        let (video_id, title) = match (video_id, title) {
            (Some(id), Some(title)) => (id, title),
            _ => continue,
        };

        let duration_text = video
            .pointer("/lengthText/simpleText")
            .and_then(Value::as_str)
            .unwrap_or("0:00");

        candidates.push(SearchCandidate {
            video_id: video_id.to_string(),
            title: title.to_string(),
            duration_secs: parse_duration_text(duration_text),
            url: format!("https://www.youtube.com/watch?v={}", video_id),
        });
    }

    Some(candidates)
}

/// The renderer path differs between search and browse responses; accept
/// both shapes.
fn search_result_contents(data: &Value) -> Option<&Vec<Value>> {
    const PATHS: [&str; 2] = [
        "/contents/twoColumnSearchResultsRenderer/primaryContents/sectionListRenderer/contents/0/itemSectionRenderer/contents",
        "/contents/twoColumnBrowseResultsRenderer/tabs/0/tabRenderer/content/sectionListRenderer/contents/0/itemSectionRenderer/contents",
    ];
    PATHS
        .iter()
        .find_map(|path| data.pointer(path).and_then(Value::as_array))
}

/// Parses "MM:SS" or "H:MM:SS" length labels; anything else is zero.
pub fn parse_duration_text(text: &str) -> u64 {
    let parts: Vec<u64> = text
        .split(':')
        .map(|p| p.trim().parse::<u64>().unwrap_or(0))
        .collect();
    match parts.as_slice() {
        [m, s] => m * 60 + s,
        [h, m, s] => h * 3600 + m * 60 + s,
        _ => 0,
    }
}

/// Scores the leading candidates and returns the winner; ties keep the
/// first-seen candidate. `None` when every candidate is disqualified.
pub fn select_best<'a>(
    candidates: &'a [SearchCandidate],
    query: &str,
    target_duration_ms: Option<u64>,
    artist_hint: Option<&str>,
) -> Option<&'a SearchCandidate> {
    let mut best: Option<(&SearchCandidate, f64)> = None;

    for candidate in candidates.iter().take(CANDIDATE_WINDOW) {
        let score = match score_candidate(candidate, query, target_duration_ms, artist_hint) {
            Some(score) => score,
            None => continue,
        };
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((candidate, score)),
        }
    }

    best.map(|(candidate, _)| candidate)
}

/// `None` means disqualified (duration wildly off target).
pub fn score_candidate(
    candidate: &SearchCandidate,
    query: &str,
    target_duration_ms: Option<u64>,
    artist_hint: Option<&str>,
) -> Option<f64> {
    let penalty = duration_penalty(candidate.duration_secs, target_duration_ms)?;

    let title = candidate.title.to_lowercase();
    let query = query.to_lowercase();

    let title_similarity = strsim::normalized_levenshtein(&query, &title) * 100.0;

    let artist_similarity = artist_hint
        .map(|artist| partial_match(&artist.to_lowercase(), &title))
        .unwrap_or(0.0);

    Some(title_similarity + 0.5 * artist_similarity + keyword_bonus(&title) - penalty)
}

fn duration_penalty(candidate_secs: u64, target_ms: Option<u64>) -> Option<f64> {
    let target_ms = match target_ms {
        Some(ms) => ms,
        None => return Some(0.0),
    };

    let diff = (candidate_secs as f64 - target_ms as f64 / 1000.0).abs();
    if diff > DURATION_CUTOFF_SECS {
        return None;
    }
    if diff <= DURATION_TOLERANCE_SECS {
        Some(0.0)
    } else {
        Some(diff * DURATION_PENALTY_WEIGHT)
    }
}

/// Only the strongest marker counts; "official audio" also contains
/// "audio", so stacking would double-reward.
fn keyword_bonus(title_lower: &str) -> f64 {
    if title_lower.contains("official audio") {
        BONUS_OFFICIAL_AUDIO
    } else if title_lower.contains("topic") {
        BONUS_TOPIC
    } else if title_lower.contains("official music video") {
        BONUS_OFFICIAL_VIDEO
    } else {
        0.0
    }
}

/// Best similarity of `needle` against any same-length word window of
/// `haystack`, 0-100. Containment short-circuits to a full score so that
/// "Artist - Song" and "Song (Artist)" both register.
fn partial_match(needle: &str, haystack: &str) -> f64 {
    if needle.is_empty() {
        return 0.0;
    }
    if haystack.contains(needle) {
        return 100.0;
    }

    let needle_words = needle.split_whitespace().count().max(1);
    let words: Vec<&str> = haystack.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }

    let mut best: f64 = 0.0;
    for window in words.windows(needle_words.min(words.len())) {
        let segment = window.join(" ");
        best = best.max(strsim::normalized_levenshtein(needle, &segment) * 100.0);
    }
    best
}
