//! Remote image acquisition.
//!
//! Every item resolves to either a decoded RGB image or an explicit
//! absence. Network failures, bad statuses and undecodable bodies are all
//! retried the same way and end as `None`, never as an error to the caller.

use std::thread::sleep;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use indicatif::ProgressBar;
use rayon::prelude::*;
use reqwest::blocking::Client;

use crate::config::FetchConfig;
use crate::errors::{PipelineError, PipelineResult};

/// Source of item images. Implementations must never fail hard.
pub trait ImageSource: Send + Sync {
    fn fetch(&self, url: &str) -> Option<RgbImage>;
}

/// Bounded retry with linear backoff: after attempt `n` fails the
/// fetcher waits `n * backoff_step` before trying again.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_step: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step: Duration::from_millis(1500),
        }
    }
}

/// Blocking HTTP image fetcher shared by all download workers.
pub struct HttpImageFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl HttpImageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build image HTTP client")?;
        Ok(Self {
            client,
            policy: config.retry_policy(),
        })
    }

    fn try_fetch(&self, url: &str) -> Result<RgbImage> {
        let resp = self.client.get(url).send()?;
        let status = resp.status();
        if !status.is_success() {
            bail!("status {status}");
        }
        let bytes = resp.bytes().context("failed to read body")?;
        decode_rgb(&bytes)
    }
}

impl ImageSource for HttpImageFetcher {
    fn fetch(&self, url: &str) -> Option<RgbImage> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        if let Err(err) = url::Url::parse(url) {
            log::warn!("{}", fetch_error(url, format!("malformed url: {err}")));
            return None;
        }

        let attempts = self.policy.max_retries.max(1);
        for attempt in 1..=attempts {
            match self.try_fetch(url) {
                Ok(image) => return Some(image),
                Err(err) if attempt < attempts => {
                    let wait = self.policy.backoff(attempt);
                    log::warn!(
                        "image fetch failed ({err:#}). retrying in {:.1}s",
                        wait.as_secs_f32()
                    );
                    sleep(wait);
                }
                Err(err) => {
                    log::error!(
                        "{} after {attempts} attempts",
                        fetch_error(url, format!("{err:#}"))
                    );
                }
            }
        }
        None
    }
}

fn fetch_error(url: &str, reason: String) -> PipelineError {
    PipelineError::ImageFetch {
        url: url.to_string(),
        reason,
    }
}

/// Decode bytes into a 3-channel RGB image.
///
/// HTML bodies (error pages served with 200) are rejected before decoding.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        bail!("empty body");
    }
    if is_html_content(bytes) {
        bail!("body is html, not an image");
    }
    let img = image::load_from_memory(bytes).context("failed to decode image")?;
    Ok(img.to_rgb8())
}

/// Checks if bytes look like HTML content (case-insensitive check of first 50 bytes).
fn is_html_content(bytes: &[u8]) -> bool {
    let check_len = bytes.len().min(50);
    let prefix_lower = bytes[0..check_len].trim_ascii_start().to_ascii_lowercase();

    prefix_lower.starts_with(b"<!doctype") || prefix_lower.starts_with(b"<html")
}

/// Fetch every url on a bounded worker pool.
///
/// Result `i` always belongs to `urls[i]`; completion order is irrelevant.
pub fn fetch_all(
    source: &dyn ImageSource,
    urls: &[&str],
    workers: usize,
    progress: &ProgressBar,
) -> PipelineResult<Vec<Option<RgbImage>>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("image-fetch-{i}"))
        .build()
        .map_err(|e| PipelineError::config(format!("failed to build image fetch pool: {e}")))?;

    progress.set_length(urls.len() as u64);
    let images = pool.install(|| {
        urls.par_iter()
            .map(|url| {
                let image = source.fetch(url);
                progress.inc(1);
                image
            })
            .collect()
    });
    progress.finish_and_clear();
    Ok(images)
}
