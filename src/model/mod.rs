//! Core data types for components, scan results and organization summaries.
//!
//! - [`Component`] - A discovered third-party dependency
//! - [`Ecosystem`] - The package ecosystem it was resolved from
//! - [`ScanResult`] - The deduplicated outcome of scanning one repository
//! - [`RepositoryDescriptor`] - Hosting metadata used for filtering
//! - [`OrganizationScanSummary`] - Aggregate over an organization scan
//! - [`Vulnerability`] - A finding attached by the auditor
//!
//! # Example
//!
//! ```
//! use depscan::model::{Component, Ecosystem, ScanResult};
//!
//! let component = Component::from_ecosystem(Ecosystem::Npm, None, "lodash", "4.17.21");
//! let result = ScanResult::new("my-repo", vec!["Node.js".to_string()], vec![component]);
//!
//! println!("Found {} components", result.components.len());
//! ```

mod component;
mod organization;
mod repository;
mod result;
mod vulnerability;

pub use component::*;
pub use organization::*;
pub use repository::*;
pub use result::*;
pub use vulnerability::*;
