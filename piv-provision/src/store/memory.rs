//! Process-local secret mirror

use std::collections::{HashMap, HashSet};

use zeroize::{Zeroize, Zeroizing};

use super::{SecretStore, StoreError};

/// Mirror held in memory, with optional per-identifier write failures
#[derive(Default)]
pub struct InMemorySecretStore {
    entries: HashMap<String, String>,
    rejected: HashSet<String>,
    writes: Vec<String>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an identifier without recording a write
    pub fn with_entry(mut self, identifier: &str, hex_secret: &str) -> Self {
        self.entries
            .insert(identifier.to_string(), hex_secret.to_string());
        self
    }

    /// Make every later `set` for `identifier` fail
    pub fn reject_writes_to(&mut self, identifier: &str) {
        self.rejected.insert(identifier.to_string());
    }

    /// Accept writes to `identifier` again
    pub fn accept_writes_to(&mut self, identifier: &str) {
        self.rejected.remove(identifier);
    }

    /// Identifiers in the order they were successfully written
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SecretStore for InMemorySecretStore {
    fn get(&self, identifier: &str) -> Result<Option<Zeroizing<String>>, StoreError> {
        Ok(self
            .entries
            .get(identifier)
            .map(|secret| Zeroizing::new(secret.clone())))
    }

    fn set(&mut self, identifier: &str, hex_secret: &str) -> Result<(), StoreError> {
        if self.rejected.contains(identifier) {
            return Err(StoreError::Rejected(identifier.to_string()));
        }
        if let Some(mut previous) = self
            .entries
            .insert(identifier.to_string(), hex_secret.to_string())
        {
            previous.zeroize();
        }
        self.writes.push(identifier.to_string());
        Ok(())
    }
}

impl Drop for InMemorySecretStore {
    fn drop(&mut self) {
        for secret in self.entries.values_mut() {
            secret.zeroize();
        }
    }
}
