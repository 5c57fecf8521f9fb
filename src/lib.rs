//! spotfetch resolves Spotify track, album and playlist URLs to their
//! best-matching YouTube uploads and downloads them as tagged audio files.
//!
//! The pipeline is scrape -> search -> score -> fetch -> tag, with a
//! bounded worker pool for collections and an on-disk job snapshot that
//! lets interrupted playlist runs be reconciled later.

pub mod config;
pub mod converter;
pub mod downloader;
pub mod errors;
pub mod http;
pub mod ratelimit;
pub mod retry;
pub mod scraper;
pub mod search;
pub mod tagger;
pub mod utils;
pub mod validation;
