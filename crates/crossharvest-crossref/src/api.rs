//! Crossref `/works` API: query building, response parsing, count probes.
//!
//! API docs: <https://api.crossref.org/swagger-ui/index.html>

use std::sync::Arc;

use crossharvest_core::{
    ClientConfig, ClientIdentity, Clock, ConfigError, FetchError, HttpTransport, RateLimitedClient,
    SystemClock, Transport,
};
use serde::Deserialize;
use serde_json::Value;

use crate::window::QueryWindow;

pub const CROSSREF_API: &str = "https://api.crossref.org";

/// Largest page the API serves
pub const MAX_ROWS: u32 = 1000;

/// Work type harvested by every window query
pub const WORK_TYPE: &str = "posted-content";

/// Ordering of results within a cursor chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Deposited,
    Created,
    Indexed,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposited => "deposited",
            Self::Created => "created",
            Self::Indexed => "indexed",
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deposited" => Ok(Self::Deposited),
            "created" => Ok(Self::Created),
            "indexed" => Ok(Self::Indexed),
            other => Err(ConfigError::invalid(
                "sort_key",
                format!("{other:?} (expected deposited, created or indexed)"),
            )),
        }
    }
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which fields a page carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Complete work records
    Full,
    /// `select=DOI`: identifiers only
    DoiOnly,
}

/// One `/works` request.
#[derive(Debug, Clone)]
pub struct WorksQuery<'a> {
    pub window: &'a QueryWindow,
    pub rows: u32,
    pub cursor: &'a str,
    pub sort: SortKey,
    pub projection: Projection,
}

impl WorksQuery<'_> {
    /// `from-posted-date:..,until-posted-date:..,type:posted-content[,prefix:..]`
    pub fn filter(&self) -> String {
        let mut filter = format!(
            "from-posted-date:{},until-posted-date:{},type:{WORK_TYPE}",
            self.window.start.format("%Y-%m-%d"),
            self.window.end.format("%Y-%m-%d"),
        );
        if let Some(prefix) = &self.window.prefix {
            filter.push_str(",prefix:");
            filter.push_str(prefix);
        }
        filter
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("filter", self.filter()),
            ("rows", self.rows.to_string()),
            ("cursor", self.cursor.to_string()),
            ("sort", self.sort.as_str().to_string()),
            ("order", "asc".to_string()),
        ];
        if self.projection == Projection::DoiOnly {
            params.push(("select", "DOI".to_string()));
        }
        params
    }
}

/// `message` body of a `/works` list response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorksPage {
    #[serde(default)]
    pub total_results: u64,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    message: T,
}

/// The two calls the harvester needs. Implemented over HTTP by
/// [`CrossrefClient`]; tests substitute in-memory versions.
pub trait WorksApi {
    fn works(&self, query: &WorksQuery<'_>) -> Result<WorksPage, FetchError>;

    /// Direct lookup of one work by DOI
    fn work(&self, doi: &str) -> Result<Value, FetchError>;

    /// HTTP requests issued so far (0 when not tracked)
    fn requests_issued(&self) -> u64 {
        0
    }
}

impl<A: WorksApi + ?Sized> WorksApi for &A {
    fn works(&self, query: &WorksQuery<'_>) -> Result<WorksPage, FetchError> {
        (**self).works(query)
    }

    fn work(&self, doi: &str) -> Result<Value, FetchError> {
        (**self).work(doi)
    }

    fn requests_issued(&self) -> u64 {
        (**self).requests_issued()
    }
}

/// Crossref over the rate-limited HTTP client
pub struct CrossrefClient<T: Transport = HttpTransport> {
    client: RateLimitedClient<T>,
}

impl CrossrefClient<HttpTransport> {
    /// Validate `config` and build a client; an empty `base_url` means the public API.
    pub fn connect(config: &ClientConfig) -> Result<Self, ConfigError> {
        Self::with_transport(config, HttpTransport, Arc::new(SystemClock))
    }
}

impl<T: Transport> CrossrefClient<T> {
    pub fn with_transport(
        config: &ClientConfig,
        transport: T,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let mut config = config.clone();
        if config.base_url.trim().is_empty() {
            config.base_url = CROSSREF_API.to_string();
        }
        Ok(Self {
            client: RateLimitedClient::new(&config, transport, clock)?,
        })
    }

    pub fn identity(&self) -> &ClientIdentity {
        self.client.identity()
    }
}

impl<T: Transport> WorksApi for CrossrefClient<T> {
    fn works(&self, query: &WorksQuery<'_>) -> Result<WorksPage, FetchError> {
        let envelope: Envelope<WorksPage> = self.client.get_json("works", &query.params())?;
        Ok(envelope.message)
    }

    fn work(&self, doi: &str) -> Result<Value, FetchError> {
        let envelope: Envelope<Value> = self.client.get_json(&work_path(doi), &[])?;
        Ok(envelope.message)
    }

    fn requests_issued(&self) -> u64 {
        self.client.requests_issued()
    }
}

/// `works/<doi>` with each path segment percent-encoded; `/` stays literal.
pub fn work_path(doi: &str) -> String {
    let encoded: Vec<_> = doi.trim().split('/').map(urlencoding::encode).collect();
    format!("works/{}", encoded.join("/"))
}

/// Declared result count for `window` (`rows=0`).
///
/// A failed probe is retried once with `rows=1`, which some API edges
/// answer when a zero-row request is refused.
pub fn probe_total<A: WorksApi + ?Sized>(
    api: &A,
    window: &QueryWindow,
    sort: SortKey,
) -> Result<u64, FetchError> {
    let query = |rows| WorksQuery {
        window,
        rows,
        cursor: "*",
        sort,
        projection: Projection::DoiOnly,
    };
    match api.works(&query(0)) {
        Ok(page) => Ok(page.total_results),
        Err(e) => {
            log::debug!("{window}: count probe failed ({e}), retrying with rows=1");
            api.works(&query(1)).map(|page| page.total_results)
        }
    }
}
