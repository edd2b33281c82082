//! Resource contract
//!
//! A resource estimates the on-disk footprint of one data category in a
//! profile. Resources are registered by value under a stable [`ResourceKey`]
//! and measured uniformly by the orchestrator.

use std::borrow::Borrow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, Result};

/// Longest key accepted at registration
pub const MAX_KEY_LEN: usize = 64;

/// Stable identity of a registered resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Validate and wrap a key.
    ///
    /// Keys are short ASCII identifiers: letters, digits, `-`, `_` and `.`.
    pub fn parse(key: &str) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::invalid_key(key, "key is empty"));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(Error::invalid_key(
                key,
                format!("key is longer than {} characters", MAX_KEY_LEN),
            ));
        }
        if let Some(c) = key
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(Error::invalid_key(
                key,
                format!("unexpected character {:?}", c),
            ));
        }
        Ok(Self(key.to_string()))
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ResourceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Read-only environment handed to every `measure` call
#[derive(Debug, Clone)]
pub struct MeasureContext {
    /// Root of the profile being measured
    pub profile_root: PathBuf,

    /// Advisory time budget for the whole pass
    pub budget: Option<Duration>,
}

impl MeasureContext {
    /// Create a context for the given profile root
    pub fn new(profile_root: impl Into<PathBuf>) -> Self {
        Self {
            profile_root: profile_root.into(),
            budget: None,
        }
    }

    /// Set an advisory time budget
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Resolve a profile-relative path
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.profile_root.join(relative)
    }
}

/// Failure of a single resource's measurement
#[derive(Error, Debug)]
pub enum MeasurementError {
    /// Filesystem inspection failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The resource reported a failure of its own
    #[error("{0}")]
    Failed(String),

    /// The measurement exceeded the per-resource timeout
    #[error("Measurement timed out after {0:?}")]
    Timeout(Duration),

    /// The measurement panicked
    #[error("Measurement panicked: {0}")]
    Panicked(String),

    /// The measurement was cancelled before finishing
    #[error("Measurement cancelled")]
    Cancelled,
}

impl MeasurementError {
    /// Create a resource-reported failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Contract every measurable data category implements
#[async_trait]
pub trait BackupResource: Send + Sync {
    /// Stable key identifying this resource.
    ///
    /// Must return the same value on every call.
    fn key(&self) -> &str;

    /// Short human-readable description
    fn description(&self) -> &str {
        ""
    }

    /// Whether the data measured by this resource must be encrypted when backed up
    fn requires_encryption(&self) -> bool {
        false
    }

    /// Estimate the number of bytes this resource would occupy in a backup.
    ///
    /// Implementations inspecting the filesystem must not modify what they measure.
    async fn measure(&self, ctx: &MeasureContext) -> std::result::Result<u64, MeasurementError>;
}
