//! File-set resources and size helpers

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use super::ResourceDefinition;
use crate::resource::{BackupResource, MeasureContext, MeasurementError};

/// Size of a regular file, `0` if it does not exist.
///
/// Symlinks are not followed.
pub async fn file_size(path: &Path) -> std::io::Result<u64> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(metadata.len()),
        Ok(_) => Ok(0),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Combined size of all regular files below `path`, `0` if it does not exist.
///
/// Symlinks are not followed. Entries vanishing during the walk are skipped.
pub async fn directory_size(path: PathBuf) -> std::io::Result<u64> {
    tokio::task::spawn_blocking(move || walk_size(&path))
        .await
        .map_err(std::io::Error::other)?
}

fn walk_size(path: &Path) -> std::io::Result<u64> {
    if !path.exists() {
        return Ok(0);
    }

    let mut total = 0u64;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().map(|io| io.kind()) == Some(ErrorKind::NotFound) => continue,
            Err(e) => return Err(e.into()),
        };

        if entry.file_type().is_file() {
            match entry.metadata() {
                Ok(metadata) => total = total.saturating_add(metadata.len()),
                Err(e) if e.io_error().map(|io| io.kind()) == Some(ErrorKind::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(total)
}

/// A data category made of files and directories under the profile root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFilesResource {
    key: String,
    description: String,
    files: Vec<PathBuf>,
    directories: Vec<PathBuf>,
    requires_encryption: bool,
}

impl ProfileFilesResource {
    /// Create an empty file set
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: String::new(),
            files: Vec::new(),
            directories: Vec::new(),
            requires_encryption: false,
        }
    }

    /// Build from a static catalog definition
    pub fn from_definition(definition: &ResourceDefinition) -> Self {
        Self::new(definition.key)
            .with_description(definition.description)
            .with_files(definition.files.iter().copied())
            .with_directories(definition.directories.iter().copied())
            .with_encryption(definition.requires_encryption)
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add profile-relative files
    pub fn with_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    /// Add profile-relative directories, measured recursively
    pub fn with_directories<I, P>(mut self, directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.directories
            .extend(directories.into_iter().map(Into::into));
        self
    }

    /// Mark the data as requiring encryption
    pub fn with_encryption(mut self, requires_encryption: bool) -> Self {
        self.requires_encryption = requires_encryption;
        self
    }

    /// Files measured by this resource
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Directories measured by this resource
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }
}

#[async_trait]
impl BackupResource for ProfileFilesResource {
    fn key(&self) -> &str {
        &self.key
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn requires_encryption(&self) -> bool {
        self.requires_encryption
    }

    async fn measure(&self, ctx: &MeasureContext) -> Result<u64, MeasurementError> {
        let mut total = 0u64;

        for file in &self.files {
            total = total.saturating_add(file_size(&ctx.resolve(file)).await?);
        }
        for directory in &self.directories {
            total = total.saturating_add(directory_size(ctx.resolve(directory)).await?);
        }

        debug!("{} spans {} bytes", self.key, total);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::create_sized_file;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_size_missing_is_zero() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(file_size(&temp_dir.path().join("nope")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_size_of_directory_is_zero() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(file_size(temp_dir.path()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_directory_size_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");
        std::fs::create_dir_all(root.join("inner")).unwrap();
        create_sized_file(root.join("a.bin"), 2).await.unwrap();
        create_sized_file(root.join("inner/b.bin"), 3).await.unwrap();

        assert_eq!(directory_size(root).await.unwrap(), 5000);
        assert_eq!(
            directory_size(temp_dir.path().join("missing")).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_profile_files_resource_measures_existing_entries() {
        let temp_dir = TempDir::new().unwrap();
        let profile = temp_dir.path();
        std::fs::create_dir_all(profile.join("sessionstore-backups")).unwrap();
        create_sized_file(profile.join("sessionstore.jsonlz4"), 4).await.unwrap();
        create_sized_file(profile.join("sessionstore-backups/recovery.jsonlz4"), 6)
            .await
            .unwrap();

        let resource = ProfileFilesResource::new("session")
            .with_files(["sessionstore.jsonlz4", "missing.json"])
            .with_directories(["sessionstore-backups"])
            .with_encryption(true);

        let bytes = resource
            .measure(&MeasureContext::new(profile))
            .await
            .unwrap();

        assert_eq!(bytes, 10_000);
        assert!(resource.requires_encryption());
        assert!(profile.join("sessionstore.jsonlz4").exists());
    }
}
