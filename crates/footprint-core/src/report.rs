//! Measurement results and the aggregated report of a pass

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::{MeasurementError, ResourceKey};

/// Bytes per kilobyte (decimal convention)
pub const BYTES_IN_KB: u64 = 1000;

/// Round a byte count to a coarse kilobyte figure.
///
/// Rounds up to whole kilobytes, then to the nearest 10 KB, never below 1.
pub fn fuzzy_kilobytes(bytes: u64) -> u64 {
    let kb = bytes.div_ceil(BYTES_IN_KB);
    let nearest_ten = (kb + 5) / 10 * 10;
    nearest_ten.max(1)
}

/// Category of a per-resource failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// The resource returned an error
    Error,
    /// The per-resource timeout elapsed
    Timeout,
    /// The resource panicked
    Panic,
    /// The measurement was cancelled
    Cancelled,
}

/// A failure marker recorded in place of a size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&MeasurementError> for Failure {
    fn from(err: &MeasurementError) -> Self {
        let kind = match err {
            MeasurementError::Io(_) | MeasurementError::Failed(_) => FailureKind::Error,
            MeasurementError::Timeout(_) => FailureKind::Timeout,
            MeasurementError::Panicked(_) => FailureKind::Panic,
            MeasurementError::Cancelled => FailureKind::Cancelled,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<MeasurementError> for Failure {
    fn from(err: MeasurementError) -> Self {
        Self::from(&err)
    }
}

/// Outcome of one resource's measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MeasurementOutcome {
    /// Measured size in bytes
    Measured { bytes: u64 },
    /// The measurement failed
    Failed(Failure),
}

/// Result of measuring a single resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementResult {
    /// Key of the measured resource
    pub key: ResourceKey,

    /// Size or failure
    pub outcome: MeasurementOutcome,

    /// Whether the measured data requires encryption
    pub requires_encryption: bool,

    /// Time spent measuring, in milliseconds
    pub elapsed_ms: u64,
}

impl MeasurementResult {
    /// A successful measurement
    pub fn measured(key: ResourceKey, bytes: u64) -> Self {
        Self {
            key,
            outcome: MeasurementOutcome::Measured { bytes },
            requires_encryption: false,
            elapsed_ms: 0,
        }
    }

    /// A failed measurement
    pub fn failed(key: ResourceKey, failure: impl Into<Failure>) -> Self {
        Self {
            key,
            outcome: MeasurementOutcome::Failed(failure.into()),
            requires_encryption: false,
            elapsed_ms: 0,
        }
    }

    /// Mark whether the data requires encryption
    pub fn with_encryption(mut self, requires_encryption: bool) -> Self {
        self.requires_encryption = requires_encryption;
        self
    }

    /// Record how long the measurement took
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Measured size, if successful
    pub fn bytes(&self) -> Option<u64> {
        match self.outcome {
            MeasurementOutcome::Measured { bytes } => Some(bytes),
            MeasurementOutcome::Failed(_) => None,
        }
    }

    /// Failure marker, if the measurement failed
    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            MeasurementOutcome::Measured { .. } => None,
            MeasurementOutcome::Failed(failure) => Some(failure),
        }
    }

    /// Whether the measurement succeeded
    pub fn is_success(&self) -> bool {
        self.bytes().is_some()
    }
}

/// Aggregated outcome of one measurement pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementReport {
    /// Per-resource results, in registration order
    pub results: Vec<MeasurementResult>,

    /// Sum of all successful measurements
    pub total_bytes: u64,

    /// Keys whose measurement failed
    pub failed_keys: BTreeSet<ResourceKey>,

    /// Registered keys not selected for this pass
    pub excluded_keys: BTreeSet<ResourceKey>,

    /// When the pass started
    pub started_at: DateTime<Utc>,

    /// Wall time of the pass, in milliseconds
    pub duration_ms: u64,
}

impl MeasurementReport {
    /// Build a report from per-resource results.
    ///
    /// The total and failed set are order-independent reductions over `results`.
    pub fn from_results(
        results: Vec<MeasurementResult>,
        excluded_keys: BTreeSet<ResourceKey>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        let total_bytes = results
            .iter()
            .filter_map(MeasurementResult::bytes)
            .fold(0u64, u64::saturating_add);

        let failed_keys = results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.key.clone())
            .collect();

        Self {
            results,
            total_bytes,
            failed_keys,
            excluded_keys,
            started_at,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Result for a key
    pub fn get(&self, key: &str) -> Option<&MeasurementResult> {
        self.results.iter().find(|r| r.key.as_str() == key)
    }

    /// Keys that measured successfully
    pub fn succeeded_keys(&self) -> BTreeSet<ResourceKey> {
        self.results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.key.clone())
            .collect()
    }

    /// Whether every selected resource measured successfully
    pub fn is_complete(&self) -> bool {
        self.failed_keys.is_empty()
    }

    /// Total in decimal kilobytes, rounded down
    pub fn total_kilobytes(&self) -> u64 {
        self.total_bytes / BYTES_IN_KB
    }

    /// Bytes belonging to resources that require encryption
    pub fn encrypted_bytes(&self) -> u64 {
        self.results
            .iter()
            .filter(|r| r.requires_encryption)
            .filter_map(MeasurementResult::bytes)
            .fold(0u64, u64::saturating_add)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// A fail-fast pass stopped at its first failure
#[derive(Error, Debug)]
#[error("Measurement pass aborted: resource {failed_key} failed: {}", .failure.message)]
pub struct AggregateMeasurementError {
    /// Key of the resource that aborted the pass
    pub failed_key: ResourceKey,

    /// Its failure
    pub failure: Failure,

    /// Results gathered before the pass stopped, the failing one included
    pub partial: MeasurementReport,
}
