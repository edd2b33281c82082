//! Built-in resources
//!
//! Static catalog of the data categories found in a browser profile. Each
//! definition becomes a [`ProfileFilesResource`] when the default registry is
//! bootstrapped.

mod files;

pub use files::{directory_size, file_size, ProfileFilesResource};

use crate::error::Result;
use crate::registry::ResourceRegistry;

/// Static description of a file-set resource
#[derive(Debug, Clone, Copy)]
pub struct ResourceDefinition {
    /// Resource key
    pub key: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Profile-relative files
    pub files: &'static [&'static str],
    /// Profile-relative directories, measured recursively
    pub directories: &'static [&'static str],
    /// Whether the data must be encrypted in a backup
    pub requires_encryption: bool,
}

/// Catalog of built-in resources, in registration order
pub static BUILTIN_RESOURCES: &[ResourceDefinition] = &[
    ResourceDefinition {
        key: "places",
        description: "Bookmarks and browsing history",
        files: &["places.sqlite", "places.sqlite-wal"],
        directories: &[],
        requires_encryption: false,
    },
    ResourceDefinition {
        key: "favicons",
        description: "Site icons",
        files: &["favicons.sqlite", "favicons.sqlite-wal"],
        directories: &[],
        requires_encryption: false,
    },
    ResourceDefinition {
        key: "credentials",
        description: "Saved logins, certificates and key store",
        files: &[
            "key4.db",
            "logins.json",
            "logins-backup.json",
            "cert9.db",
            "pkcs11.txt",
            "credentialstate.sqlite",
        ],
        directories: &[],
        requires_encryption: true,
    },
    ResourceDefinition {
        key: "cookies",
        description: "Cookies",
        files: &["cookies.sqlite"],
        directories: &[],
        requires_encryption: true,
    },
    ResourceDefinition {
        key: "form-history",
        description: "Saved form entries",
        files: &["formhistory.sqlite"],
        directories: &[],
        requires_encryption: true,
    },
    ResourceDefinition {
        key: "preferences",
        description: "Preferences, permissions and UI state",
        files: &[
            "prefs.js",
            "user.js",
            "xulstore.json",
            "permissions.sqlite",
            "content-prefs.sqlite",
            "containers.json",
            "handlers.json",
            "search.json.mozlz4",
        ],
        directories: &["chrome"],
        requires_encryption: false,
    },
    ResourceDefinition {
        key: "session",
        description: "Open windows and tabs",
        files: &["sessionstore.jsonlz4"],
        directories: &["sessionstore-backups"],
        requires_encryption: true,
    },
    ResourceDefinition {
        key: "addons",
        description: "Installed extensions and their settings",
        files: &[
            "extensions.json",
            "extension-settings.json",
            "extension-preferences.json",
            "addonStartup.json.lz4",
        ],
        directories: &["extensions", "browser-extension-data"],
        requires_encryption: false,
    },
    ResourceDefinition {
        key: "misc",
        description: "Assorted small state files",
        files: &["times.json", "enumerate_devices.txt", "protections.sqlite"],
        directories: &[],
        requires_encryption: false,
    },
];

/// Look up a built-in definition by key
pub fn builtin(key: &str) -> Option<&'static ResourceDefinition> {
    BUILTIN_RESOURCES.iter().find(|d| d.key == key)
}

/// Registry holding every built-in resource
pub fn default_registry() -> Result<ResourceRegistry> {
    let mut registry = ResourceRegistry::new();
    for definition in BUILTIN_RESOURCES {
        registry.register(ProfileFilesResource::from_definition(definition))?;
    }
    Ok(registry)
}

/// Register additional file-set resources
pub fn register_definitions<I>(registry: &mut ResourceRegistry, resources: I) -> Result<()>
where
    I: IntoIterator<Item = ProfileFilesResource>,
{
    for resource in resources {
        registry.register(resource)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_keys_unique() {
        let keys: HashSet<_> = BUILTIN_RESOURCES.iter().map(|d| d.key).collect();
        assert_eq!(keys.len(), BUILTIN_RESOURCES.len());
    }

    #[test]
    fn test_default_registry_contains_catalog() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.len(), BUILTIN_RESOURCES.len());
        assert!(registry.get("places").is_ok());
        assert!(registry.get("credentials").unwrap().requires_encryption());
        assert!(!registry.get("places").unwrap().requires_encryption());
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(builtin("session").unwrap().directories, &["sessionstore-backups"]);
        assert!(builtin("nope").is_none());
    }

    #[test]
    fn test_register_definitions_rejects_builtin_collision() {
        let mut registry = default_registry().unwrap();
        let err = register_definitions(
            &mut registry,
            [ProfileFilesResource::new("places").with_files(["other.sqlite"])],
        )
        .unwrap_err();

        assert!(matches!(err, Error::DuplicateKey { .. }));
        assert_eq!(registry.len(), BUILTIN_RESOURCES.len());
    }
}
