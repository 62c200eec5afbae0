//! JSON-file backed secret mirror
//!
//! One JSON document maps identifiers to hex secrets. Writes go to a sibling
//! temporary file that is then renamed over the original, so a crash never
//! leaves a half-written store behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::{SecretStore, StoreError};

#[derive(Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

impl Drop for StoreDocument {
    fn drop(&mut self) {
        for secret in self.entries.values_mut() {
            secret.zeroize();
        }
    }
}

/// Create `path` readable by the owner only and flush `bytes` to disk
fn write_private(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(bytes)?;
    file.sync_all()
}

/// Secret mirror persisted as `secrets.json`
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    const DEFAULT_FILE: &'static str = "secrets.json";

    /// Default location: `<config dir>/piv-provision/secrets.json`
    pub fn default_path() -> PathBuf {
        if let Some(config) = dirs::config_dir() {
            return config.join("piv-provision").join(Self::DEFAULT_FILE);
        }
        PathBuf::from("/etc/piv-provision").join(Self::DEFAULT_FILE)
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreDocument, StoreError> {
        if !self.path.exists() {
            debug!("No secret store at {:?} yet", self.path);
            return Ok(StoreDocument::default());
        }

        let content = Zeroizing::new(fs::read_to_string(&self.path).map_err(|source| {
            StoreError::Read {
                path: self.path.clone(),
                source,
            }
        })?);

        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, document: &StoreDocument) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let json = Zeroizing::new(
            serde_json::to_string_pretty(document).map_err(StoreError::Serialize)?,
        );

        let tmp_path = self.path.with_extension("json.tmp");
        let written = write_private(&tmp_path, json.as_bytes())
            .and_then(|()| fs::rename(&tmp_path, &self.path));
        if let Err(source) = written {
            // Never leave a partial copy of the secrets behind
            if let Err(e) = fs::remove_file(&tmp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", tmp_path.display(), e);
                }
            }
            return Err(write_err(source));
        }
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, identifier: &str) -> Result<Option<Zeroizing<String>>, StoreError> {
        let document = self.load()?;
        Ok(document
            .entries
            .get(identifier)
            .map(|secret| Zeroizing::new(secret.clone())))
    }

    fn set(&mut self, identifier: &str, hex_secret: &str) -> Result<(), StoreError> {
        let mut document = self.load()?;
        if let Some(mut previous) = document
            .entries
            .insert(identifier.to_string(), hex_secret.to_string())
        {
            previous.zeroize();
        }
        self.save(&document)?;
        info!("Stored management key under {}", identifier);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_reads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSecretStore::new(temp_dir.path().join("secrets.json"));
        assert!(store.get("anything").unwrap().is_none());
    }

    #[test]
    fn test_set_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("secrets.json");

        let mut store = FileSecretStore::new(&path);
        store.set("id-a", "00112233").unwrap();
        store.set("id-b", "44556677").unwrap();
        store.set("id-a", "8899aabb").unwrap();

        // A fresh handle sees what the first one wrote
        let reopened = FileSecretStore::new(&path);
        assert_eq!(reopened.get("id-a").unwrap().unwrap().as_str(), "8899aabb");
        assert_eq!(reopened.get("id-b").unwrap().unwrap().as_str(), "44556677");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secrets.json");
        let mut store = FileSecretStore::new(&path);
        store.set("id", "00").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secrets.json");
        fs::write(&path, "{ not json").unwrap();

        let store = FileSecretStore::new(&path);
        assert!(matches!(store.get("id"), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_unwritable_location_fails() {
        let temp_dir = TempDir::new().unwrap();
        // A regular file where the parent directory should be
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let mut store = FileSecretStore::new(blocker.join("secrets.json"));
        assert!(matches!(
            store.set("id", "00"),
            Err(StoreError::Write { .. })
        ));
    }

    #[test]
    fn test_failed_save_removes_temporary_copy() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secrets.json");
        // The rename cannot replace a non-empty directory
        fs::create_dir_all(path.join("occupied")).unwrap();

        let store = FileSecretStore::new(&path);
        let mut document = StoreDocument::default();
        document.entries.insert("id".into(), "00112233".into());

        assert!(matches!(
            store.save(&document),
            Err(StoreError::Write { .. })
        ));
        assert!(!path.with_extension("json.tmp").exists());
    }
}
