pub mod aggregator;
pub mod audit;
pub mod cache;
pub mod config;
pub mod detector;
pub mod error;
pub mod github;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod platform;
pub mod scanner;
pub mod source;

pub use aggregator::Aggregator;
pub use cache::Cache;
pub use config::Config;
pub use error::{ApiError, OrgScanError, ScanError, ValidationError};
pub use model::{Component, Ecosystem, OrganizationScanSummary, ScanResult, Scope, Vulnerability};
pub use orchestrator::{OrgScanOptions, OrgScanner, OrganizationReport};
pub use scanner::Scanner;
