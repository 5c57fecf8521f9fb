use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;

use spotfetch::config::{AppConfig, AudioFormat, AudioQuality};
use spotfetch::downloader::engine::DownloadEngine;
use spotfetch::downloader::orchestrator::DownloadOrchestrator;
use spotfetch::downloader::tracker::DownloadTracker;
use spotfetch::http::build_client;
use spotfetch::ratelimit::AdaptiveRateLimiter;
use spotfetch::retry::RetryPolicy;
use spotfetch::scraper::CommandScraper;
use spotfetch::search::YoutubeSearcher;

#[derive(Parser)]
#[command(name = "spotfetch", version, about = "Download Spotify tracks, albums and playlists as tagged audio files")]
struct Cli {
    /// Spotify track/album/playlist URL, free-text search, or with
    /// --resume a directory holding an interrupted job snapshot
    input: String,

    /// Download directory (overrides the configured one)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Audio format: mp3, m4a or flac
    #[arg(short, long)]
    format: Option<AudioFormat>,

    /// Audio quality: 128, 256 or 320
    #[arg(short, long)]
    quality: Option<AudioQuality>,

    /// Maximum concurrent downloads (1-10)
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Metadata scraper command; receives the URL as its last argument
    /// and prints JSON on stdout
    #[arg(long, default_value = "spotfetch-scraper")]
    scraper: String,

    /// Resume the playlist job cached in the input directory
    #[arg(long)]
    resume: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load()?;
    if let Some(output) = cli.output {
        config.download_path = output;
    }
    if let Some(format) = cli.format {
        config.file_format = format;
    }
    if let Some(quality) = cli.quality {
        config.download_quality = quality;
    }
    if let Some(concurrency) = cli.concurrency {
        config.max_concurrent_downloads = concurrency;
    }
    config.validate()?;

    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let client = build_client(config.timeout_seconds)?;
    let limiter = Arc::new(AdaptiveRateLimiter::new(30, Duration::from_secs(60), 1, 60));
    let searcher = YoutubeSearcher::new(
        client.clone(),
        limiter,
        RetryPolicy::from_attempts(config.retry_attempts),
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let engine = Arc::new(DownloadEngine::new(
        config.clone(),
        searcher,
        client,
        cancel.clone(),
    ));
    let source = Arc::new(CommandScraper::new(cli.scraper, Vec::new()));
    let tracker = Arc::new(DownloadTracker::new());
    let orchestrator = Arc::new(DownloadOrchestrator::new(
        config, source, engine, tracker, cancel,
    ));

    {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.cancel();
            }
        });
    }

    let report = if cli.resume {
        orchestrator.resume(&PathBuf::from(&cli.input)).await?
    } else {
        orchestrator.run(&cli.input).await?
    };

    if let Some(name) = &report.playlist_name {
        info!("Job '{}' finished", name);
    }
    println!(
        "{} downloaded, {} already present, {} failed ({} total)",
        report.downloaded, report.already_present, report.failed, report.total
    );
    if report.reconcile_passes > 0 {
        println!("Reconciliation passes used: {}", report.reconcile_passes);
    }

    if report.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
