//! Polite HTTP client: identity, request spacing, retries.
//!
//! Uses async reqwest on a shared runtime but presents a blocking interface,
//! since the harvest loop is strictly sequential.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, FetchError};
use crate::retry::{RetryPolicy, retry_with_backoff};

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Characters of an error body kept in messages
const BODY_SNIPPET_LEN: usize = 300;

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(4)
        .build()
        .expect("failed to build HTTP client")
});

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// One GET against the network (or a stand-in).
pub trait Transport: Send + Sync {
    /// Returns the response body on 2xx, a classified error otherwise.
    fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        user_agent: &str,
        timeout: Duration,
    ) -> Result<String, FetchError>;
}

/// reqwest-backed transport
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpTransport;

impl Transport for HttpTransport {
    fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        user_agent: &str,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        SHARED_RUNTIME.handle().block_on(async {
            let response = SHARED_CLIENT
                .get(url)
                .query(query)
                .header(reqwest::header::USER_AGENT, user_agent)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(&e.without_url()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::from_status(status.as_u16(), snippet(&body)));
            }
            response
                .text()
                .await
                .map_err(|e| FetchError::from_reqwest(&e.without_url()))
        })
    }
}

fn snippet(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Who we are, as announced to the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    client_identifier: String,
    contact: String,
}

impl ClientIdentity {
    pub fn new(
        client_identifier: impl Into<String>,
        contact: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let client_identifier = client_identifier.into().trim().to_string();
        let contact = contact.into().trim().to_string();
        if client_identifier.is_empty() {
            return Err(ConfigError::MissingClientIdentifier);
        }
        if contact.is_empty() {
            return Err(ConfigError::MissingContact);
        }
        if !looks_like_email(&contact) {
            return Err(ConfigError::InvalidContact(contact));
        }
        Ok(Self {
            client_identifier,
            contact,
        })
    }

    pub fn contact(&self) -> &str {
        &self.contact
    }

    /// `<client_identifier> (mailto:<contact>)`
    pub fn user_agent(&self) -> String {
        format!("{} (mailto:{})", self.client_identifier, self.contact)
    }
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !s.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Client settings, validated by [`RateLimitedClient::new`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub client_identifier: String,
    pub contact: String,
    pub retry: RetryPolicy,
    /// Minimum spacing between consecutive request starts
    pub min_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_identifier: concat!("crossharvest/", env!("CARGO_PKG_VERSION")).to_string(),
            contact: String::new(),
            retry: RetryPolicy::default(),
            min_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// HTTP client that identifies itself, spaces out requests, and retries
/// transient failures.
///
/// Request starts are at least `min_interval` apart. Retry waits count toward
/// that spacing.
pub struct RateLimitedClient<T: Transport = HttpTransport> {
    transport: T,
    clock: Arc<dyn Clock>,
    identity: ClientIdentity,
    base_url: String,
    retry: RetryPolicy,
    min_interval: Duration,
    request_timeout: Duration,
    last_request: Mutex<Option<Instant>>,
    requests: AtomicU64,
}

impl RateLimitedClient<HttpTransport> {
    pub fn connect(config: &ClientConfig) -> Result<Self, ConfigError> {
        Self::new(config, HttpTransport, Arc::new(SystemClock))
    }
}

impl<T: Transport> RateLimitedClient<T> {
    pub fn new(config: &ClientConfig, transport: T, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let identity = ClientIdentity::new(&config.client_identifier, &config.contact)?;
        if config.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("base_url", "must not be empty"));
        }
        if config.retry.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "max_retry_attempts",
                "must allow at least one attempt",
            ));
        }
        if config.retry.base_delay > config.retry.max_delay {
            return Err(ConfigError::invalid(
                "backoff_base_delay",
                "must not exceed backoff_max_delay",
            ));
        }
        if config.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be positive"));
        }
        Ok(Self {
            transport,
            clock,
            identity,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry.clone(),
            min_interval: config.min_interval,
            request_timeout: config.request_timeout,
            last_request: Mutex::new(None),
            requests: AtomicU64::new(0),
        })
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Number of HTTP requests sent so far, retries included
    pub fn requests_issued(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// GET `<base_url>/<path>` with `params` plus the `mailto` parameter.
    pub fn get(&self, path: &str, params: &[(&str, String)]) -> Result<String, FetchError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut query = params.to_vec();
        query.push(("mailto", self.identity.contact().to_string()));
        let user_agent = self.identity.user_agent();

        retry_with_backoff(&self.retry, self.clock.as_ref(), path, |_| {
            self.wait_turn();
            self.requests.fetch_add(1, Ordering::Relaxed);
            self.transport
                .get(&url, &query, &user_agent, self.request_timeout)
        })
    }

    /// Like [`get`](Self::get), parsing the body as JSON.
    pub fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<R, FetchError> {
        let body = self.get(path, params)?;
        serde_json::from_str(&body).map_err(|e| FetchError::malformed(e.to_string()))
    }

    /// Block until `min_interval` has passed since the previous request start.
    fn wait_turn(&self) {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(prev) = *last {
            let elapsed = self.clock.now().saturating_duration_since(prev);
            if elapsed < self.min_interval {
                self.clock.sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(self.clock.now());
    }
}
