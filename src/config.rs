//! Configuration file handling.
//!
//! Loading and saving of depscan configuration from a TOML file, plus
//! environment overrides.
//!
//! # Configuration Location
//!
//! - Linux: `~/.config/depscan/config.toml`
//! - macOS: `~/Library/Application Support/depscan/config.toml`
//! - Windows: `%APPDATA%\depscan\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! [scan]
//! include_dev_dependencies = false
//! parallel_workers = 4
//! batch_size = 10
//! timeout_secs = 300
//!
//! [github]
//! include_private = true
//! include_forks = false
//!
//! [audit]
//! enabled = true
//! ignore_vulnerabilities = ["GHSA-xxxx-xxxx-xxxx"]
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::platform::config_dir;

/// Environment variable holding the hosting API token.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

const LOG_FORMATS: &[&str] = &["pretty", "compact", "json"];

/// Application configuration.
///
/// # Example
///
/// ```no_run
/// use depscan::Config;
///
/// let config = Config::load().unwrap();
/// println!("Workers: {}", config.scan.parallel_workers);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub github: GitHubConfig,
    pub audit: AuditConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Include development-only dependencies (test, dev scopes).
    pub include_dev_dependencies: bool,

    /// Repositories scanned concurrently within one batch.
    pub parallel_workers: usize,

    /// Repositories per batch. Batches run one after another.
    pub batch_size: usize,

    /// Upper bound for scanning a single repository, clone included.
    pub timeout_secs: u64,

    /// Produce a cross-repository deduplicated component list.
    pub combined_report: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_dev_dependencies: false,
            parallel_workers: 4,
            batch_size: 10,
            timeout_secs: 300,
            combined_report: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// API token. When unset, `GITHUB_TOKEN` is used.
    pub token: Option<String>,
    pub api_url: String,
    pub include_private: bool,
    pub include_forks: bool,
    pub include_archived: bool,
    pub use_ssh: bool,
    /// Longest single wait for a rate-limit window to reset.
    pub max_rate_limit_wait_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://api.github.com".to_string(),
            include_private: false,
            include_forks: false,
            include_archived: false,
            use_ssh: false,
            max_rate_limit_wait_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,

    /// Vulnerability IDs to suppress (e.g. "CVE-2021-12345", "GHSA-xxxx").
    pub ignore_vulnerabilities: Vec<String>,
}

impl AuditConfig {
    pub fn should_ignore_vulnerability(&self, vuln_id: &str) -> bool {
        self.ignore_vulnerabilities.iter().any(|id| id == vuln_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,

    /// One of "pretty", "compact" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from the default config file.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Loads configuration from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Saves the configuration to the default config file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Applies `DEPSCAN_*` environment overrides and falls back to
    /// `GITHUB_TOKEN` when no token is configured.
    pub fn apply_env(mut self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok());
        self
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("DEPSCAN_INCLUDE_DEV").and_then(|v| parse_bool(&v)) {
            self.scan.include_dev_dependencies = v;
        }
        if let Some(v) = var("DEPSCAN_PARALLEL_WORKERS").and_then(|v| v.parse().ok()) {
            self.scan.parallel_workers = v;
        }
        if let Some(v) = var("DEPSCAN_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.scan.batch_size = v;
        }
        if self.github.token.is_none() {
            self.github.token = var(TOKEN_ENV).filter(|t| !t.is_empty());
        }
    }

    /// Returns human-readable warnings for suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.scan.parallel_workers == 0 {
            warnings.push("scan.parallel_workers must be at least 1".to_string());
        }
        if self.scan.batch_size == 0 {
            warnings.push("scan.batch_size must be at least 1".to_string());
        }
        if self.scan.timeout_secs == 0 {
            warnings.push("scan.timeout_secs must be at least 1".to_string());
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            warnings.push(format!(
                "Invalid log format '{}', expected one of: {}",
                self.logging.format,
                LOG_FORMATS.join(", ")
            ));
        }

        warnings
    }

    /// Generates a string containing the default configuration.
    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert!(!config.scan.include_dev_dependencies);
        assert_eq!(config.scan.parallel_workers, 4);
        assert_eq!(config.scan.batch_size, 10);
        assert_eq!(config.scan.timeout_secs, 300);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert!(config.github.token.is_none());
        assert_eq!(config.cache.ttl_hours, 24);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scan]
            parallel_workers = 8

            [github]
            token = "from-file"
            "#,
        )
        .unwrap();

        assert_eq!(config.scan.parallel_workers, 8);
        assert_eq!(config.scan.batch_size, 10);
        assert_eq!(config.github.token.as_deref(), Some("from-file"));
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.scan.batch_size = 3;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.scan.batch_size, 3);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(Config::load_from(Path::new("/nonexistent/depscan.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DEPSCAN_INCLUDE_DEV", "true"),
            ("DEPSCAN_PARALLEL_WORKERS", "7"),
            ("GITHUB_TOKEN", "env-token"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert!(config.scan.include_dev_dependencies);
        assert_eq!(config.scan.parallel_workers, 7);
        assert_eq!(config.github.token.as_deref(), Some("env-token"));
    }

    #[test]
    fn test_configured_token_wins_over_env() {
        let mut config = Config::default();
        config.github.token = Some("config-token".to_string());
        config.apply_vars(|k| (k == TOKEN_ENV).then(|| "env-token".to_string()));

        assert_eq!(config.github.token.as_deref(), Some("config-token"));
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = Config::default();
        config.scan.parallel_workers = 0;
        config.logging.format = "xml".to_string();

        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].contains("Invalid log format"));
    }

    #[test]
    fn test_ignore_vulnerabilities() {
        let audit = AuditConfig {
            enabled: true,
            ignore_vulnerabilities: vec!["CVE-2021-12345".to_string()],
        };
        assert!(audit.should_ignore_vulnerability("CVE-2021-12345"));
        assert!(!audit.should_ignore_vulnerability("CVE-2022-99999"));
    }
}
