use super::rate_limit::{now_epoch, RateLimiter};
use super::retry::RetryPolicy;
use crate::config::GitHubConfig;
use crate::error::{ApiError, ScanError, TerminalKind};
use crate::model::RepositoryDescriptor;
use crate::platform::run_tool;
use crate::source::{AccessReport, Checkout, RepositoryProvider};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

const PER_PAGE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Wait assumed when a 429 carries neither `Retry-After` nor a reset time.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Quota headers of one API response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
    /// Window reset, seconds since the Unix epoch.
    pub reset: Option<u64>,
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        fn parse<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        }
        Self {
            remaining: parse(headers, "x-ratelimit-remaining"),
            limit: parse(headers, "x-ratelimit-limit"),
            reset: parse(headers, "x-ratelimit-reset"),
            retry_after: parse(headers, "retry-after"),
        }
    }
}

/// Whether the `X-OAuth-Scopes` header grants private repository access.
///
/// `None` when the header is absent, as it is for fine-grained tokens.
pub fn has_repo_scope(headers: &HeaderMap) -> Option<bool> {
    let scopes = headers.get("x-oauth-scopes")?.to_str().ok()?;
    Some(scopes.split(',').map(str::trim).any(|scope| scope == "repo"))
}

/// Decides private access from the private repository listing response.
///
/// A scope header is authoritative. Without one, only a non-empty page of
/// private repositories proves access, since GitHub answers `200 []` when
/// the token cannot see them.
pub fn private_access_confirmed(repo_scope: Option<bool>, private_page_len: usize) -> bool {
    match repo_scope {
        Some(granted) => granted,
        None => private_page_len > 0,
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Maps a non-success response to an [`ApiError`]; `None` for 2xx.
///
/// 403 and 429 count as rate limiting when the quota headers say so,
/// when `Retry-After` is present, or when the message mentions it.
pub fn classify_status(
    status: u16,
    headers: &RateLimitHeaders,
    body: &str,
    now_epoch: u64,
) -> Option<ApiError> {
    if (200..300).contains(&status) {
        return None;
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| format!("HTTP {}", status));

    let rate_limit_signal = headers.remaining == Some(0)
        || headers.retry_after.is_some()
        || message.to_lowercase().contains("rate limit");

    let err = match status {
        401 => ApiError::Terminal(TerminalKind::Authentication, message),
        403 | 429 if rate_limit_signal || status == 429 => {
            let reset_in = match (headers.retry_after, headers.reset) {
                (Some(secs), _) => Duration::from_secs(secs),
                (None, Some(reset)) => Duration::from_secs(reset.saturating_sub(now_epoch) + 1),
                (None, None) => DEFAULT_RATE_LIMIT_WAIT,
            };
            ApiError::RateLimited { reset_in }
        }
        403 => ApiError::Terminal(TerminalKind::Forbidden, message),
        404 => ApiError::Terminal(TerminalKind::NotFound, message),
        500..=599 => ApiError::Transient(format!("HTTP {}: {}", status, message)),
        _ => ApiError::Decode(format!("HTTP {}: {}", status, message)),
    };
    Some(err)
}

/// Builds the clone URL for `repo`.
///
/// SSH when requested; otherwise HTTPS, with the token embedded for
/// private repositories.
pub fn clone_url(repo: &RepositoryDescriptor, use_ssh: bool, token: Option<&str>) -> String {
    if use_ssh {
        return repo
            .ssh_url
            .clone()
            .unwrap_or_else(|| format!("git@github.com:{}.git", repo.full_name));
    }

    let https = repo
        .clone_url
        .clone()
        .unwrap_or_else(|| format!("https://github.com/{}.git", repo.full_name));
    match (repo.private, token) {
        (true, Some(token)) => match https.strip_prefix("https://") {
            Some(rest) => format!("https://{}@{}", token, rest),
            None => https,
        },
        _ => https,
    }
}

/// Rate-limited GitHub REST client.
///
/// # Example
///
/// ```no_run
/// use depscan::config::GitHubConfig;
/// use depscan::github::GitHubClient;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = GitHubClient::new(&GitHubConfig::default())?;
///     let repos = client.list_org_repositories("rust-lang").await?;
///     println!("{} repositories", repos.len());
///     Ok(())
/// }
/// ```
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("depscan/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::Decode(format!("invalid token: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            limiter: Arc::new(RateLimiter::new(Duration::from_secs(
                config.max_rate_limit_wait_secs,
            ))),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// GETs `path` (relative to the API root) with rate limiting and retries.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let (value, _) = self.get_json_with_headers(path).await?;
        Ok(value)
    }

    async fn get_json_with_headers<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<(T, HeaderMap), ApiError> {
        let url = format!("{}{}", self.api_url, path);
        self.retry
            .run(&self.limiter, || self.get_once(&url))
            .await
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &str) -> Result<(T, HeaderMap), ApiError> {
        tracing::debug!(url, "GitHub API request");
        let response = self.http.get(url).send().await?;

        let status = response.status().as_u16();
        let quota = RateLimitHeaders::from_headers(response.headers());
        self.limiter
            .observe(quota.remaining, quota.limit, quota.reset)
            .await;

        if (200..300).contains(&status) {
            let headers = response.headers().clone();
            return Ok((response.json().await?, headers));
        }

        let body = response.text().await.unwrap_or_default();
        match classify_status(status, &quota, &body, now_epoch()) {
            Some(err) => Err(err),
            None => Err(ApiError::Decode(format!("HTTP {}", status))),
        }
    }

    /// Every repository of `org`, following pagination until a short page.
    pub async fn list_org_repositories(
        &self,
        org: &str,
    ) -> Result<Vec<RepositoryDescriptor>, ApiError> {
        let mut repos = Vec::new();
        let mut page = 1;

        loop {
            let batch: Vec<RepositoryDescriptor> = self
                .get_json(&format!(
                    "/orgs/{}/repos?type=all&per_page={}&page={}",
                    org, PER_PAGE, page
                ))
                .await?;
            let count = batch.len();
            repos.extend(batch);
            tracing::debug!(org, page, count, "fetched repository page");

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        tracing::info!(org, repositories = repos.len(), "listed organization repositories");
        Ok(repos)
    }

    /// Checks organization access and, if requested, private repository access.
    ///
    /// Missing access is reported in the result; authentication failures
    /// and transport errors are returned as errors.
    pub async fn validate_access(
        &self,
        org: &str,
        include_private: bool,
    ) -> Result<AccessReport, ApiError> {
        let mut report = AccessReport::default();

        match self
            .get_json::<serde_json::Value>(&format!("/orgs/{}", org))
            .await
        {
            Ok(_) => report.org_access = true,
            Err(ApiError::Terminal(TerminalKind::NotFound | TerminalKind::Forbidden, msg)) => {
                tracing::warn!(org, reason = %msg, "organization not accessible");
                return Ok(report);
            }
            Err(e) => return Err(e),
        }

        if include_private && self.token.is_some() {
            match self
                .get_json_with_headers::<Vec<serde_json::Value>>(&format!(
                    "/orgs/{}/repos?type=private&per_page=1",
                    org
                ))
                .await
            {
                Ok((page, headers)) => {
                    let repo_scope = has_repo_scope(&headers);
                    report.private_repos = private_access_confirmed(repo_scope, page.len());
                    if !report.private_repos {
                        tracing::warn!(
                            org,
                            ?repo_scope,
                            "token cannot confirm access to private repositories"
                        );
                    }
                }
                Err(ApiError::Terminal(_, msg)) => {
                    tracing::warn!(org, reason = %msg, "private repositories not accessible");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}

/// [`RepositoryProvider`] backed by the GitHub API and `git clone`.
pub struct GitHubProvider {
    client: GitHubClient,
    use_ssh: bool,
    clone_timeout: Duration,
}

impl GitHubProvider {
    pub fn new(client: GitHubClient, config: &GitHubConfig) -> Self {
        Self {
            client,
            use_ssh: config.use_ssh,
            clone_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_clone_timeout(mut self, timeout: Duration) -> Self {
        self.clone_timeout = timeout;
        self
    }

    pub fn client(&self) -> &GitHubClient {
        &self.client
    }

    fn redact(&self, text: &str) -> String {
        match self.client.token() {
            Some(token) if !token.is_empty() => text.replace(token, "***"),
            _ => text.to_string(),
        }
    }
}

#[async_trait]
impl RepositoryProvider for GitHubProvider {
    async fn validate_access(
        &self,
        organization: &str,
        include_private: bool,
    ) -> Result<AccessReport, ApiError> {
        self.client
            .validate_access(organization, include_private)
            .await
    }

    async fn list_repositories(
        &self,
        organization: &str,
    ) -> Result<Vec<RepositoryDescriptor>, ApiError> {
        self.client.list_org_repositories(organization).await
    }

    async fn materialize(&self, repo: &RepositoryDescriptor) -> Result<Checkout, ScanError> {
        let access_error = |reason: String| ScanError::RepositoryAccess {
            repository: repo.name.clone(),
            reason,
        };

        let dir = tempfile::Builder::new()
            .prefix("depscan-")
            .tempdir()
            .map_err(|e| access_error(format!("failed to create temporary directory: {}", e)))?;
        let target = dir.path().join(&repo.name);

        let url = clone_url(repo, self.use_ssh, self.client.token());
        tracing::debug!(repository = %repo.name, "cloning repository");

        let output = run_tool(
            "git",
            [
                OsStr::new("clone"),
                OsStr::new("--depth"),
                OsStr::new("1"),
                OsStr::new("--quiet"),
                OsStr::new(&url),
                target.as_os_str(),
            ],
            dir.path(),
            self.clone_timeout,
        )
        .await
        .map_err(|e| access_error(self.redact(&e.to_string())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(access_error(format!(
                "git clone failed: {}",
                self.redact(stderr.trim())
            )));
        }

        Ok(Checkout::temporary(dir, target))
    }
}
