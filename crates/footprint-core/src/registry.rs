//! Resource registry
//!
//! Maps resource keys to resource instances. Entries keep their registration
//! order so that reports iterate deterministically.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::{BackupResource, ResourceKey};

/// A registered resource and the key it was registered under
#[derive(Clone)]
pub struct ResourceEntry {
    key: ResourceKey,
    resource: Arc<dyn BackupResource>,
}

impl ResourceEntry {
    /// Key the resource was registered under
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// The resource instance
    pub fn resource(&self) -> &Arc<dyn BackupResource> {
        &self.resource
    }
}

impl std::fmt::Debug for ResourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEntry")
            .field("key", &self.key)
            .field("requires_encryption", &self.resource.requires_encryption())
            .finish()
    }
}

/// Registry of measurable resources
#[derive(Debug, Default, Clone)]
pub struct ResourceRegistry {
    entries: Vec<ResourceEntry>,
}

impl ResourceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource by value
    pub fn register<R>(&mut self, resource: R) -> Result<()>
    where
        R: BackupResource + 'static,
    {
        self.register_shared(Arc::new(resource))
    }

    /// Register a shared resource handle.
    ///
    /// Fails with a contract violation if the key is invalid or already taken;
    /// the registry is left untouched in that case.
    pub fn register_shared(&mut self, resource: Arc<dyn BackupResource>) -> Result<()> {
        let key = ResourceKey::parse(resource.key())?;

        if self.contains(key.as_str()) {
            return Err(Error::duplicate_key(key.as_str()));
        }

        debug!("Registered resource {}", key);
        self.entries.push(ResourceEntry { key, resource });
        Ok(())
    }

    /// Remove a resource. Absent keys are not an error.
    pub fn unregister(&mut self, key: &str) -> Option<Arc<dyn BackupResource>> {
        let index = self.entries.iter().position(|e| e.key.as_str() == key)?;
        debug!("Unregistered resource {}", key);
        Some(self.entries.remove(index).resource)
    }

    /// Look up a resource by key
    pub fn get(&self, key: &str) -> Result<&Arc<dyn BackupResource>> {
        self.entry(key)
            .map(|e| &e.resource)
            .ok_or_else(|| Error::not_found(key))
    }

    /// Look up the full entry for a key
    pub fn entry(&self, key: &str) -> Option<&ResourceEntry> {
        self.entries.iter().find(|e| e.key.as_str() == key)
    }

    /// Whether a key is registered
    pub fn contains(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    /// All entries in registration order.
    ///
    /// The iterator is `Clone`, and calling `all()` again restarts from the first entry.
    pub fn all(
        &self,
    ) -> impl Iterator<Item = (&ResourceKey, &Arc<dyn BackupResource>)> + Clone + '_ {
        self.entries.iter().map(|e| (&e.key, &e.resource))
    }

    /// Entries in registration order
    pub fn entries(&self) -> &[ResourceEntry] {
        &self.entries
    }

    /// Registered keys in registration order
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
