//! Host-side provisioning of PIV credentials on YubiKey tokens
//!
//! Rotates the 3DES management key while keeping the host key mirror in
//! sync, changes PIN and PUK, and resets the PIV application.
//!
//! Tokens are reached through a [`device::CardTransport`]: a PC/SC reader
//! when built with the `pcsc` feature, or the file-backed
//! [`device::VirtualCard`] simulator.

// Core modules
pub mod apdu;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod secure_buffer;
pub mod tlv;

pub mod device;
pub mod store;

pub mod changer;
pub mod resetter;
pub mod rotator;

pub mod config;
pub mod operations;

pub use changer::{ChangeReport, CredentialChanger, VerifyFailurePolicy};
pub use config::Settings;
pub use device::{CardTransport, DeviceSession, TransportError, VirtualCard};
pub use error::{PivError, PivResult};
pub use keys::{ManagementKey, ReferenceTarget};
pub use operations::{run, Operation};
pub use resetter::FactoryResetter;
pub use rotator::{CredentialRotator, RotationMode, RotationReport, RotationStep};
pub use secure_buffer::SecureBuffer;
pub use store::{DeviceGeneration, FileSecretStore, InMemorySecretStore, SecretStore, StoreError};
