//! Runtime settings resolved from the command line and environment

use std::path::PathBuf;

use log::debug;

use crate::changer::VerifyFailurePolicy;
use crate::device::{self, CardTransport, VirtualCard};
use crate::error::{PivError, PivResult};
use crate::store::FileSecretStore;

/// Environment variable naming the secret store file
pub const STORE_ENV: &str = "PIV_PROVISION_STORE";

/// Environment variable naming a simulated token state file
pub const VIRTUAL_CARD_ENV: &str = "PIV_PROVISION_VIRTUAL_CARD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub store_path: PathBuf,
    /// Use a simulated token persisted here instead of a reader
    pub virtual_card: Option<PathBuf>,
    pub verify_policy: VerifyFailurePolicy,
}

impl Settings {
    pub fn new(
        store_path: Option<PathBuf>,
        virtual_card: Option<PathBuf>,
        abort_on_verify_failure: bool,
    ) -> Self {
        let settings = Self {
            store_path: store_path.unwrap_or_else(FileSecretStore::default_path),
            virtual_card,
            verify_policy: if abort_on_verify_failure {
                VerifyFailurePolicy::Abort
            } else {
                VerifyFailurePolicy::Continue
            },
        };
        debug!("{:?}", settings);
        settings
    }

    pub fn open_store(&self) -> FileSecretStore {
        FileSecretStore::new(&self.store_path)
    }

    /// The simulated token if one is configured, else the first reader
    pub fn open_transport(&self) -> PivResult<Box<dyn CardTransport>> {
        match &self.virtual_card {
            Some(path) => {
                let card = VirtualCard::open(path)
                    .map_err(|e| PivError::DeviceUnavailable(e.to_string()))?;
                Ok(Box::new(card))
            }
            None => device::select_device(),
        }
    }
}
