//! Error taxonomy shared by the harvesting pipeline

/// Failure of a single outbound request.
///
/// `Transient` failures (429, 5xx, timeouts, dropped connections) are retried
/// by the client; everything else is `Fatal` and abandons the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    Transient {
        status: Option<u16>,
        message: String,
    },
    Fatal {
        status: Option<u16>,
        message: String,
    },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s} (transient): {message}"),
            Self::Transient {
                status: None,
                message,
            } => write!(f, "transient error: {message}"),
            Self::Fatal {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Fatal {
                status: None,
                message,
            } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 429 || (500..=599).contains(&status) {
            Self::Transient {
                status: Some(status),
                message,
            }
        } else {
            Self::Fatal {
                status: Some(status),
                message,
            }
        }
    }

    /// Classify a reqwest error.
    ///
    /// Timeouts and connection failures are transient, as is any network error
    /// that never produced a status. Builder/decode failures are fatal.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        let message = e.to_string();
        if let Some(status) = e.status() {
            return Self::from_status(status.as_u16(), message);
        }
        if e.is_builder() || e.is_decode() || e.is_redirect() {
            return Self::Fatal {
                status: None,
                message,
            };
        }
        Self::Transient {
            status: None,
            message,
        }
    }

    /// Response body could not be parsed.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Fatal {
            status: None,
            message: format!("malformed response: {}", message.into()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Fatal { status, .. } => *status,
        }
    }

    /// Escalate a transient failure once the retry budget is spent.
    pub fn exhausted(self, attempts: u32) -> Self {
        match self {
            Self::Transient { status, message } => Self::Fatal {
                status,
                message: format!("gave up after {attempts} attempts: {message}"),
            },
            fatal => fatal,
        }
    }
}

/// Invalid or missing configuration, detected at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No contact address configured (required by the API's polite pool)
    MissingContact,
    /// Contact address present but not an email address
    InvalidContact(String),
    /// Blank client identifier
    MissingClientIdentifier,
    /// Any other out-of-range setting
    Invalid { field: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContact => write!(
                f,
                "contact address is required (set --mailto, [client].contact or CROSSREF_MAILTO)"
            ),
            Self::InvalidContact(c) => write!(f, "contact address {c:?} is not an email address"),
            Self::MissingClientIdentifier => write!(f, "client identifier must not be empty"),
            Self::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
