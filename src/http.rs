//! Shared HTTP client. One pooled connection set serves every worker so
//! concurrent searches and artwork fetches don't pay per-request setup.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

use crate::errors::Result;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub fn build_client(timeout_seconds: u64) -> Result<Client> {
    let timeout = Duration::from_secs(timeout_seconds);

    let client = ClientBuilder::new()
        .pool_max_idle_per_host(8)
        .pool_idle_timeout(Some(Duration::from_secs(30)))
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(15).min(timeout))
        .user_agent(USER_AGENT)
        .gzip(true)
        .brotli(true)
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .build()?;

    Ok(client)
}
