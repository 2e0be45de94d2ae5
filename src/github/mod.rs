//! GitHub organization access.
//!
//! [`GitHubClient`] talks to the REST API behind a shared [`RateLimiter`]
//! and retries transient failures with a [`RetryPolicy`].
//! [`GitHubProvider`] adapts it to [`crate::source::RepositoryProvider`],
//! cloning repositories into temporary directories.

mod client;
mod filter;
mod rate_limit;
mod retry;

pub use client::{classify_status, clone_url, GitHubClient, GitHubProvider, RateLimitHeaders};
pub use filter::{parse_name_list, RepositoryFilter};
pub use rate_limit::{RateLimitState, RateLimiter};
pub use retry::RetryPolicy;
