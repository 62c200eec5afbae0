//! Host-local management key mirror
//!
//! Middleware on the host (the smart-card minidriver) expects the current
//! management key in a local store, keyed by the ATR of the token generation
//! it serves. The rotator treats identifiers as opaque strings.

mod file;
mod memory;

pub use file::FileSecretStore;
pub use memory::InMemorySecretStore;

use std::path::PathBuf;

use thiserror::Error;
use zeroize::Zeroizing;

/// Errors from the persisted mirror
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read secret store {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse secret store {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize secret store: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write secret store {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Secret store refused write for {0}")]
    Rejected(String),
}

/// Durable get/set of hex-encoded secrets by logical identifier
///
/// No transaction spans several identifiers; callers sequence writes and
/// handle partial failure themselves.
pub trait SecretStore {
    /// Current secret under `identifier`, `None` when absent
    fn get(&self, identifier: &str) -> Result<Option<Zeroizing<String>>, StoreError>;

    /// Replace the secret under `identifier`
    fn set(&mut self, identifier: &str, hex_secret: &str) -> Result<(), StoreError>;
}

impl<S: SecretStore + ?Sized> SecretStore for &mut S {
    fn get(&self, identifier: &str) -> Result<Option<Zeroizing<String>>, StoreError> {
        (**self).get(identifier)
    }

    fn set(&mut self, identifier: &str, hex_secret: &str) -> Result<(), StoreError> {
        (**self).set(identifier, hex_secret)
    }
}

impl<S: SecretStore + ?Sized> SecretStore for Box<S> {
    fn get(&self, identifier: &str) -> Result<Option<Zeroizing<String>>, StoreError> {
        (**self).get(identifier)
    }

    fn set(&mut self, identifier: &str, hex_secret: &str) -> Result<(), StoreError> {
        (**self).set(identifier, hex_secret)
    }
}

/// YubiKey generations the minidriver keeps a separate mirror for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceGeneration {
    /// YubiKey 4 series (the legacy mirror)
    YubiKey4,
    /// YubiKey 5 series
    YubiKey5,
}

impl DeviceGeneration {
    /// Every generation, in the order mirrors are written
    pub const ALL: [DeviceGeneration; 2] = [Self::YubiKey4, Self::YubiKey5];

    pub const YUBIKEY4_ATR: &'static [u8] = &[
        0x3B, 0xF8, 0x13, 0x00, 0x00, 0x81, 0x31, 0xFE, 0x15, 0x59, 0x75, 0x62, 0x69, 0x6B, 0x65,
        0x79, 0x34, 0xD4,
    ];

    pub const YUBIKEY5_ATR: &'static [u8] = &[
        0x3B, 0xFD, 0x13, 0x00, 0x00, 0x81, 0x31, 0xFE, 0x15, 0x80, 0x73, 0xC0, 0x21, 0xC0, 0x57,
        0x59, 0x75, 0x62, 0x69, 0x4B, 0x65, 0x79, 0x40,
    ];

    /// Recognise a token generation by its answer-to-reset
    pub fn from_atr(atr: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.atr() == atr)
    }

    pub fn atr(self) -> &'static [u8] {
        match self {
            Self::YubiKey4 => Self::YUBIKEY4_ATR,
            Self::YubiKey5 => Self::YUBIKEY5_ATR,
        }
    }

    /// Mirror identifier: `<atr-hex>/PIV_3DES_KEY`
    pub fn store_identifier(self) -> &'static str {
        match self {
            Self::YubiKey4 => "3bf81300008131fe15597562696b657934d4/PIV_3DES_KEY",
            Self::YubiKey5 => "3bfd1300008131fe158073c021c057597562694b657940/PIV_3DES_KEY",
        }
    }
}

/// Identifiers of every mirror a rotation must update
pub fn mirror_identifiers() -> impl Iterator<Item = &'static str> {
    DeviceGeneration::ALL.into_iter().map(DeviceGeneration::store_identifier)
}
