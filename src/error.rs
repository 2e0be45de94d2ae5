//! Error types for scanning, the hosting API and organization runs.
//!
//! Per-component and per-repository failures are recovered where they
//! happen; only [`ValidationError`] and configuration problems end a run.

use std::time::Duration;

/// Failures scoped to a single repository or dependency file.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A dependency file could not be parsed. Scanners recover from this
    /// by skipping the entry.
    #[error("failed to parse {file}: {reason}")]
    ScannerParse { file: String, reason: String },

    /// The repository could not be cloned or its path could not be read.
    #[error("cannot access repository {repository}: {reason}")]
    RepositoryAccess { repository: String, reason: String },

    #[error("scan of {repository} timed out after {seconds}s")]
    Timeout { repository: String, seconds: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Authentication,
    Forbidden,
    NotFound,
}

/// Errors from the hosting API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Quota exhausted; the call can be repeated once the window resets.
    #[error("rate limit exceeded, resets in {}s", .reset_in.as_secs())]
    RateLimited { reset_in: Duration },

    /// Network failure or server error worth retrying.
    #[error("transient API error: {0}")]
    Transient(String),

    /// Authentication, permission or not-found errors. Never retried.
    #[error("{}", terminal_message(.0, .1))]
    Terminal(TerminalKind, String),

    #[error("unexpected API response: {0}")]
    Decode(String),
}

fn terminal_message(kind: &TerminalKind, detail: &str) -> String {
    match kind {
        TerminalKind::Authentication => format!("Authentication failed: {}", detail),
        TerminalKind::Forbidden => format!("Access forbidden: {}", detail),
        TerminalKind::NotFound => format!("Resource not found: {}", detail),
    }
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. } | ApiError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Terminal(TerminalKind::NotFound, _))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transient(err.to_string())
        }
    }
}

/// Precondition failures detected before any repository is scanned.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no read access to organization '{0}'")]
    NoOrganizationAccess(String),

    #[error("private repositories requested but the token cannot read private repositories of '{0}'")]
    MissingPrivateScope(String),

    #[error("invalid scan options: {0}")]
    InvalidOptions(String),

    #[error("access validation failed: {0}")]
    Api(#[from] ApiError),
}

/// Errors that abort an organization scan as a whole.
#[derive(Debug, thiserror::Error)]
pub enum OrgScanError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to list repositories: {0}")]
    Listing(#[source] ApiError),
}
