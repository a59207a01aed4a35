use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info, warn};

use crate::config::FetchSettings;

/// Desktop browser user agents rotated per request.
const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Markers of a bot-check page served with a 200.
const CHALLENGE_MARKERS: [&str; 4] = [
    "captcha",
    "enter the characters you see below",
    "type the characters you see in this image",
    "robot check",
];

/// Jitter added to every backoff, in seconds.
const JITTER_SECS: (f64, f64) = (1.0, 3.0);

/// HTTP fetcher with a bounded retry loop.
pub struct Fetcher {
    client: reqwest::Client,
    max_retries: u32,
    user_agent: Option<String>,
}

/// Why an attempt did not produce a usable body.
#[derive(Debug)]
enum Attempt {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl Fetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/rss+xml,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            client,
            max_retries: settings.max_retries,
            user_agent: settings.user_agent.clone().filter(|ua| !ua.is_empty()),
        })
    }

    /// Underlying client, for JSON APIs and the notifier.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// GET an HTML page, treating bot-check pages as a retryable failure.
    ///
    /// Retries on transport errors, 429/5xx and challenge pages. Other 4xx
    /// fail immediately. Returns the last error once attempts are exhausted.
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        self.fetch_text(url, true).await
    }

    /// GET a feed or API body. Same retry loop, no challenge-page check.
    pub async fn fetch_feed(&self, url: &str) -> Result<String> {
        self.fetch_text(url, false).await
    }

    async fn fetch_text(&self, url: &str, check_challenge: bool) -> Result<String> {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let jitter = rand::thread_rng().gen_range(JITTER_SECS.0..JITTER_SECS.1);
                let delay = backoff_delay(attempt, jitter);
                info!(
                    "Backoff {attempt}/{}: {:.1}s before {url}",
                    self.max_retries,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }

            match self.try_once(url, check_challenge).await {
                Ok(body) => return Ok(body),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retryable(e)) => {
                    warn!("Fetch {}/{} failed for {url}: {e}", attempt + 1, self.max_retries + 1);
                    if attempt >= self.max_retries {
                        return Err(e.context(format!("max retries exceeded for {url}")));
                    }
                }
            }
            attempt += 1;
        }
    }

    async fn try_once(
        &self,
        url: &str,
        check_challenge: bool,
    ) -> std::result::Result<String, Attempt> {
        let ua = self.user_agent.clone().unwrap_or_else(random_user_agent);
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, ua)
            .send()
            .await
            .map_err(|e| Attempt::Retryable(anyhow::Error::new(e)))?;

        let status = resp.status();
        if !status.is_success() {
            let err = anyhow::anyhow!("HTTP {status} from {url}");
            return Err(if is_retryable_status(status) {
                Attempt::Retryable(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Attempt::Retryable(anyhow::Error::new(e)))?;
        if check_challenge && is_challenge_page(&body) {
            return Err(Attempt::Retryable(anyhow::anyhow!("challenge page from {url}")));
        }
        debug!("Fetched {} bytes from {url}", body.len());
        Ok(body)
    }
}

fn random_user_agent() -> String {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
        .to_string()
}

/// Delay before retry `attempt` (1-based): `2^attempt` seconds plus `jitter` seconds.
pub fn backoff_delay(attempt: u32, jitter_secs: f64) -> Duration {
    let base = 2u64.saturating_pow(attempt.min(16)) as f64;
    Duration::from_secs_f64(base + jitter_secs.max(0.0))
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// True for bot-check pages served in place of content.
pub fn is_challenge_page(body: &str) -> bool {
    let lower = body.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Sleep a random duration in `[min_secs, max_secs]` for request pacing.
pub async fn pause(min_secs: f64, max_secs: f64) {
    let secs = if max_secs > min_secs {
        rand::thread_rng().gen_range(min_secs..=max_secs)
    } else {
        min_secs
    };
    tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(backoff_delay(1, 0.0), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, 0.0), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, 1.5), Duration::from_secs_f64(9.5));
    }

    #[test]
    fn backoff_ignores_negative_jitter() {
        assert_eq!(backoff_delay(1, -4.0), Duration::from_secs(2));
    }

    #[test]
    fn challenge_detection() {
        assert!(is_challenge_page("<html><title>Robot Check</title></html>"));
        assert!(is_challenge_page("Please solve this CAPTCHA"));
        assert!(!is_challenge_page("<span id=\"productTitle\">Widget</span>"));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn fetcher_builds_from_defaults() {
        let fetcher = Fetcher::new(&FetchSettings::default()).unwrap();
        assert_eq!(fetcher.max_retries, 3);
        assert!(fetcher.user_agent.is_none());
    }
}
