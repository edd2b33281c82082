//! Configuration file loading
//!
//! `footprint.yaml` sets the default options of a measurement pass and can
//! declare extra file-set resources next to the built-in catalog.

use std::fs;
use std::path::Component;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::measure::{ExecutionMode, MeasureOptions, Selection};
use crate::registry::ResourceRegistry;
use crate::resource::ResourceKey;
use crate::resources::{default_registry, register_definitions, ProfileFilesResource};

/// Configuration file names to search for
pub const CONFIG_FILE_NAMES: &[&str] = &["footprint.yaml", "footprint.yml"];

/// A file-set resource declared in the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    pub key: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub directories: Vec<String>,

    #[serde(default)]
    pub requires_encryption: bool,
}

impl ResourceConfig {
    fn to_resource(&self) -> ProfileFilesResource {
        ProfileFilesResource::new(&self.key)
            .with_description(&self.description)
            .with_files(self.files.iter().map(String::as_str))
            .with_directories(self.directories.iter().map(String::as_str))
            .with_encryption(self.requires_encryption)
    }
}

/// Measurement configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeasureConfig {
    /// Keys measured by default; all when absent
    pub include: Option<Vec<String>>,

    /// Per-resource timeout in milliseconds
    pub per_resource_timeout_ms: Option<u64>,

    /// Keep going after a resource fails
    pub continue_on_error: bool,

    /// Scheduling of the selected resources
    pub mode: ExecutionMode,

    /// Extra resources registered next to the built-ins
    pub resources: Vec<ResourceConfig>,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            include: None,
            per_resource_timeout_ms: None,
            continue_on_error: true,
            mode: ExecutionMode::Parallel,
            resources: Vec::new(),
        }
    }
}

impl MeasureConfig {
    /// Load configuration from the given path, or from the current directory.
    ///
    /// An explicit path must exist. Without one, a missing file yields defaults.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_file(p),
            None => Self::load_from_dir(Utf8Path::new(".")),
        }
    }

    /// Search `dir` for a configuration file, falling back to defaults
    pub fn load_from_dir(dir: &Utf8Path) -> Result<Self> {
        match Self::find_config(dir) {
            Some(path) => Self::load_file(&path),
            None => {
                debug!("No configuration file in {}, using defaults", dir);
                Ok(Self::default())
            }
        }
    }

    /// Load and validate a specific file
    pub fn load_file(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::config_not_found(path.as_str())
            } else {
                Error::Io(e)
            }
        })?;

        debug!("Loading configuration from {}", path);
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn find_config(dir: &Utf8Path) -> Option<Utf8PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> Result<()> {
        if self.per_resource_timeout_ms == Some(0) {
            return Err(Error::invalid_config(
                "per_resource_timeout_ms must be greater than zero",
            ));
        }

        if let Some(include) = &self.include {
            for key in include {
                ResourceKey::parse(key)?;
            }
        }

        for resource in &self.resources {
            ResourceKey::parse(&resource.key)?;
            if resource.files.is_empty() && resource.directories.is_empty() {
                return Err(Error::invalid_config(format!(
                    "resource {} lists no files or directories",
                    resource.key
                )));
            }
            for path in resource.files.iter().chain(&resource.directories) {
                validate_relative(&resource.key, path)?;
            }
        }

        Ok(())
    }

    /// Options for a measurement pass
    pub fn to_options(&self) -> Result<MeasureOptions> {
        let include = match &self.include {
            Some(keys) => Selection::only(keys)?,
            None => Selection::All,
        };

        Ok(MeasureOptions {
            include,
            per_resource_timeout: self.per_resource_timeout_ms.map(Duration::from_millis),
            continue_on_error: self.continue_on_error,
            mode: self.mode,
        })
    }

    /// Resources declared in the configuration
    pub fn resources(&self) -> Vec<ProfileFilesResource> {
        self.resources.iter().map(ResourceConfig::to_resource).collect()
    }

    /// Built-in resources plus the configured ones
    pub fn bootstrap_registry(&self) -> Result<ResourceRegistry> {
        let mut registry = default_registry()?;
        register_definitions(&mut registry, self.resources())?;
        Ok(registry)
    }
}

/// Resource paths stay inside the profile root
fn validate_relative(key: &str, path: &str) -> Result<()> {
    let escapes = std::path::Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

    if path.is_empty() || escapes {
        return Err(Error::invalid_config(format!(
            "resource {} path {:?} must be relative to the profile root",
            key, path
        )));
    }
    Ok(())
}
