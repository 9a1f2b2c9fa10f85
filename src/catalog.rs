use crate::{
    config::CatalogConfig,
    dates,
    error::CatalogError,
    page::{self, PageExtract, RemoteRecord},
};
use anyhow::{Context, Result};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://steamcommunity.com/sharedfiles/filedetails/?id=";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const USER_AGENT: &str = concat!("modloom/", env!("CARGO_PKG_VERSION"));
const BACKOFF_SLICE: Duration = Duration::from_millis(100);

/// Anything that can produce a [`RemoteRecord`] for a catalog id.
pub trait CatalogSource: Send + Sync {
    fn fetch(&self, catalog_id: &str, cancel: &CancelToken) -> Result<RemoteRecord, CatalogError>;
}

/// Shared cancellation flag with an optional deadline. Clones observe the
/// same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.remaining() == Some(Duration::ZERO)
    }

    /// Time left before the deadline, if one was set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub default_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            default_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

/// Performs a single HTTP GET. Non-2xx statuses are responses, not errors.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, timeout: Option<Duration>) -> Result<HttpResponse>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
    user_agent: String,
}

impl UreqTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration, user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .timeout_write(read_timeout)
            .build();
        let user_agent = if user_agent.trim().is_empty() {
            USER_AGENT.to_string()
        } else {
            user_agent.to_string()
        };
        Self { agent, user_agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(15), USER_AGENT)
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &str, timeout: Option<Duration>) -> Result<HttpResponse> {
        let mut request = self.agent.get(url).set("User-Agent", &self.user_agent);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => return Err(err).context("request catalog page"),
        };
        let status = response.status();
        let retry_after = response.header("Retry-After").map(str::to_string);
        let body = response.into_string().context("read catalog page")?;
        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Waits between attempts.
pub trait Backoff: Send + Sync {
    fn wait(&self, delay: Duration, cancel: &CancelToken);
}

/// Sleeps in short slices so cancellation is noticed promptly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadBackoff;

impl Backoff for ThreadBackoff {
    fn wait(&self, delay: Duration, cancel: &CancelToken) {
        let until = Instant::now() + delay;
        while !cancel.is_cancelled() {
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            thread::sleep(left.min(BACKOFF_SLICE));
        }
    }
}

pub struct CatalogClient<T = UreqTransport, B = ThreadBackoff> {
    base_url: String,
    policy: RetryPolicy,
    transport: T,
    backoff: B,
}

impl CatalogClient {
    pub fn from_config(config: &CatalogConfig) -> Self {
        let transport = UreqTransport::new(
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.read_timeout_secs),
            &config.user_agent,
        );
        Self::with_parts(&config.base_url, config.retry_policy(), transport, ThreadBackoff)
    }
}

impl Default for CatalogClient {
    fn default() -> Self {
        Self::with_parts(
            DEFAULT_BASE_URL,
            RetryPolicy::default(),
            UreqTransport::default(),
            ThreadBackoff,
        )
    }
}

impl<T: Transport, B: Backoff> CatalogClient<T, B> {
    pub fn with_parts(base_url: &str, policy: RetryPolicy, transport: T, backoff: B) -> Self {
        Self {
            base_url: base_url.to_string(),
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
            transport,
            backoff,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn page_url(&self, catalog_id: &str) -> String {
        format!("{}{}", self.base_url, catalog_id.trim())
    }

    /// Fetches and extracts one listing, retrying rate limits and server
    /// errors until the attempt budget runs out.
    pub fn fetch_listing(
        &self,
        catalog_id: &str,
        cancel: &CancelToken,
    ) -> Result<RemoteRecord, CatalogError> {
        let url = self.page_url(catalog_id);
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(CatalogError::Cancelled {
                    catalog_id: catalog_id.to_string(),
                });
            }
            attempts += 1;
            debug!(%url, attempt = attempts, "fetching catalog page");

            let (delay, last) = match self.transport.get(&url, cancel.remaining()) {
                Ok(response) if (200..300).contains(&response.status) => {
                    return match page::extract(&response.body, &url) {
                        PageExtract::Listing(record) => {
                            info!(
                                catalog_id,
                                dependencies = record.dependency_ids.len(),
                                "catalog listing resolved"
                            );
                            Ok(record)
                        }
                        PageExtract::Removed => Err(CatalogError::NotFoundRemotely {
                            catalog_id: catalog_id.to_string(),
                        }),
                    };
                }
                Ok(response) if response.status == 404 => {
                    return Err(CatalogError::NotFoundRemotely {
                        catalog_id: catalog_id.to_string(),
                    });
                }
                Ok(response) if response.status == 429 => {
                    let delay = response
                        .retry_after
                        .as_deref()
                        .and_then(|value| dates::parse_retry_after(value, OffsetDateTime::now_utc()))
                        .unwrap_or(self.policy.default_delay);
                    (delay, "HTTP 429 Too Many Requests".to_string())
                }
                Ok(response) => (self.policy.default_delay, format!("HTTP {}", response.status)),
                Err(err) => (self.policy.default_delay, format!("{err:#}")),
            };

            if attempts >= self.policy.max_attempts {
                warn!(catalog_id, attempts, %last, "giving up on catalog page");
                return Err(CatalogError::TransientFetchFailure {
                    catalog_id: catalog_id.to_string(),
                    attempts,
                    last,
                });
            }

            warn!(
                catalog_id,
                attempt = attempts,
                delay_secs = delay.as_secs_f64(),
                %last,
                "catalog fetch failed, retrying"
            );
            self.backoff.wait(delay, cancel);
        }
    }
}

impl<T: Transport, B: Backoff> CatalogSource for CatalogClient<T, B> {
    fn fetch(&self, catalog_id: &str, cancel: &CancelToken) -> Result<RemoteRecord, CatalogError> {
        self.fetch_listing(catalog_id, cancel)
    }
}
