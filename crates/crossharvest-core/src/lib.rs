//! Crossharvest Core - shared infrastructure for polite metadata harvesting
//!
//! HTTP client with identity, spacing and retries; error taxonomy; output
//! sinks; logging, progress and shutdown plumbing.

pub mod client;
pub mod clock;
pub mod error;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod sink;

// Re-exports for convenience
pub use client::{
    ClientConfig, ClientIdentity, HttpTransport, RateLimitedClient, SHARED_RUNTIME, Transport,
};
pub use clock::{Clock, SystemClock};
pub use error::{ConfigError, FetchError};
pub use logging::{IndicatifLogger, Verbosity, init_logging};
pub use progress::{ProgressContext, fmt_num};
pub use retry::{RetryPolicy, RetryState, retry_with_backoff};
pub use shutdown::{install_signal_handlers, shutdown_flag};
pub use sink::{NdjsonSink, ProvenanceLog, RecordSink, cleanup_tmp_files, write_snapshot};
