//! Rate-limited blocking HTTP fetch with retry/backoff.
//!
//! One `Fetcher` is shared by every worker; all request pacing goes through a
//! single [`RateLimiter`] so the outbound rate is bounded globally no matter
//! how many threads fetch concurrently.

use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Browser User-Agent the site expects.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_10_1) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/39.0.2171.95 Safari/537.36";
/// Age-gate cookie required by the site.
const AGE_COOKIE: &str = "over18=yes";

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_MIN_INTERVAL_MS: u64 = 100;
const MAX_BACKOFF_SECS: f64 = 8.0;

/// HTTP status codes retried with backoff.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Errors from the fetch layer. Every variant names the URL involved.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to fetch {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body: {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Serializes dispatch timing across all fetch callers.
///
/// `acquire` blocks until at least `min_interval` has passed since the
/// previously granted acquisition. Only the scheduling decision holds the
/// lock; the sleep happens outside it, so concurrent callers serialize on
/// grant times, not on the wait itself.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_at: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        // The first acquisition is paced too.
        RateLimiter {
            min_interval,
            next_at: Mutex::new(Instant::now() + min_interval),
        }
    }

    pub fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let sleep_for = {
            let mut next_at = self.next_at.lock().expect("rate limiter lock");
            let now = Instant::now();
            if now < *next_at {
                let wait = *next_at - now;
                *next_at += self.min_interval;
                wait
            } else {
                *next_at = now + self.min_interval;
                Duration::ZERO
            }
        };
        if !sleep_for.is_zero() {
            std::thread::sleep(sleep_for);
        }
    }
}

/// A fetched response: body bytes plus the Content-Type header, if any.
#[derive(Debug)]
pub struct FetchResponse {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Blocking GET with a fixed User-Agent, the age-gate cookie, per-request
/// timeout, and retry with exponential backoff. Shared across worker threads.
#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::blocking::Client,
    limiter: Arc<RateLimiter>,
    retries: u32,
}

impl Fetcher {
    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::default()
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// GET `url`, retrying transient failures (429/5xx, timeouts, connection
    /// errors) up to the configured retry count with backoff
    /// `min(8s, 2^attempt)` plus a little jitter. Non-retryable HTTP errors
    /// surface immediately. Every attempt goes through the rate limiter.
    pub fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire();
            let result = self
                .client
                .get(url)
                .header(reqwest::header::COOKIE, AGE_COOKIE)
                .send();
            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let content_type = response
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        match response.bytes() {
                            Ok(bytes) => {
                                return Ok(FetchResponse {
                                    bytes: bytes.to_vec(),
                                    content_type,
                                })
                            }
                            Err(e) => {
                                // Truncated body counts as a transient failure.
                                if attempt >= self.retries {
                                    return Err(FetchError::BodyRead {
                                        url: url.to_string(),
                                        source: e,
                                    });
                                }
                            }
                        }
                    } else if !RETRYABLE_STATUSES.contains(&status.as_u16())
                        || attempt >= self.retries
                    {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                }
                Err(e) => {
                    let transient = e.is_timeout() || e.is_connect() || e.is_request();
                    if !transient || attempt >= self.retries {
                        return Err(FetchError::Network {
                            url: url.to_string(),
                            source: e,
                        });
                    }
                }
            }
            std::thread::sleep(backoff_delay(attempt));
            attempt += 1;
        }
    }

    /// GET `url` and decode the body as UTF-8 (lossily; the site serves UTF-8).
    pub fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.fetch(url)?;
        Ok(String::from_utf8_lossy(&response.bytes).into_owned())
    }
}

/// Exponential backoff capped at 8 seconds, plus 0..0.25s of jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = MAX_BACKOFF_SECS.min(2f64.powi(attempt.min(16) as i32));
    let jitter: f64 = rand::thread_rng().gen_range(0.0..0.25);
    Duration::from_secs_f64(base + jitter)
}

/// Builder for [`Fetcher`]: user agent, timeout, retries, request spacing,
/// and the TLS-verification toggle (off by default).
#[derive(Debug)]
pub struct FetcherBuilder {
    user_agent: String,
    timeout_secs: u64,
    retries: u32,
    min_interval: Duration,
    verify_tls: bool,
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        FetcherBuilder {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retries: DEFAULT_RETRIES,
            min_interval: Duration::from_millis(DEFAULT_MIN_INTERVAL_MS),
            verify_tls: false,
        }
    }
}

impl FetcherBuilder {
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    /// Per-request timeout in seconds. Default 60.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Additional attempts after the first for transient failures. Default 3.
    pub fn retries(mut self, n: u32) -> Self {
        self.retries = n;
        self
    }

    /// Minimum spacing between dispatched requests. Zero disables pacing.
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Verify TLS certificates. Default false.
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    pub fn build(self) -> Result<Fetcher, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(self.user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Fetcher {
            client,
            limiter: Arc::new(RateLimiter::new(self.min_interval)),
            retries: self.retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn rate_limiter_zero_interval_is_noop() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn rate_limiter_spaces_grants_across_threads() {
        let interval = Duration::from_millis(100);
        let limiter = Arc::new(RateLimiter::new(interval));
        let grants: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            let grants = Arc::clone(&grants);
            handles.push(std::thread::spawn(move || {
                for _ in 0..2 {
                    limiter.acquire();
                    grants.lock().unwrap().push(Instant::now());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut times = grants.lock().unwrap().clone();
        times.sort();
        assert_eq!(times.len(), 6);
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            // Small tolerance for thread wakeup jitter between sleep end and
            // timestamp capture.
            assert!(
                gap >= Duration::from_millis(90),
                "grants only {:?} apart",
                gap
            );
        }
    }

    #[test]
    fn backoff_caps_at_eight_seconds() {
        let d = backoff_delay(10);
        assert!(d >= Duration::from_secs(8));
        assert!(d < Duration::from_secs_f64(8.3));
    }

    #[test]
    fn backoff_grows_exponentially_before_cap() {
        let d0 = backoff_delay(0);
        assert!(d0 >= Duration::from_secs(1) && d0 < Duration::from_secs_f64(1.3));
        let d2 = backoff_delay(2);
        assert!(d2 >= Duration::from_secs(4) && d2 < Duration::from_secs_f64(4.3));
    }

    #[test]
    fn builder_defaults() {
        let b = FetcherBuilder::default();
        assert_eq!(b.timeout_secs, 60);
        assert_eq!(b.retries, 3);
        assert!(!b.verify_tls);
        assert_eq!(b.min_interval, Duration::from_millis(100));
    }
}
