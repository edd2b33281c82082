//! Footprint Core - Profile Backup Size Estimation
//!
//! This crate estimates, per data category, how much disk space a profile
//! backup would take. Measurement is delegated to independently registered
//! resources; the orchestrator runs them in isolation and combines their
//! results into a single report.
//!
//! # Features
//!
//! - **Resource contract**: async [`BackupResource`] trait keyed by a stable [`ResourceKey`]
//! - **Registry**: ordered, duplicate-free [`ResourceRegistry`]
//! - **Isolated measurement**: errors, panics and timeouts are recorded per resource
//! - **Parallel or sequential passes**: deterministic report regardless of completion order
//! - **Built-in catalog**: file-set resources for common profile data
//! - **Fixtures**: exact-size files and best-effort removal for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use footprint_core::{resources, MeasureContext, MeasureOptions, MeasurementService};
//!
//! #[tokio::main]
//! async fn main() -> footprint_core::Result<()> {
//!     let service = MeasurementService::new(resources::default_registry()?);
//!     let ctx = MeasureContext::new("/home/user/.mozilla/firefox/default");
//!
//!     let report = service.measure_all(&ctx, &MeasureOptions::default()).await?;
//!     println!("{} bytes, {} failed", report.total_bytes, report.failed_keys.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fixture;
pub mod measure;
pub mod registry;
pub mod report;
pub mod resource;
pub mod resources;

pub use config::{MeasureConfig, ResourceConfig, CONFIG_FILE_NAMES};
pub use error::{Error, Result};
pub use fixture::{create_sized_file, remove_path, FixtureRequest, RemoveOutcome};
pub use measure::{ExecutionMode, MeasureOptions, MeasurementService, Selection};
pub use registry::{ResourceEntry, ResourceRegistry};
pub use report::{
    fuzzy_kilobytes, AggregateMeasurementError, Failure, FailureKind, MeasurementOutcome,
    MeasurementReport, MeasurementResult, BYTES_IN_KB,
};
pub use resource::{BackupResource, MeasureContext, MeasurementError, ResourceKey};
pub use resources::ProfileFilesResource;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_kilobyte_convention() {
        assert_eq!(BYTES_IN_KB, 1000);
    }
}
