//! Management key rotation
//!
//! Authenticate with the candidate key, generate a fresh one, mirror it to
//! every store identifier, then install it on the device. The device key is
//! only touched once every mirror holds the new value, so the device and the
//! mirrors never disagree after a failure.

use log::{debug, error, info, warn};

use crate::device::{CardTransport, DeviceSession};
use crate::error::{PivError, PivResult};
use crate::keys::{generate_hex_secret, AuthenticationState, ManagementKey};
use crate::secure_buffer::WipeOnDrop;
use crate::store::{mirror_identifiers, DeviceGeneration, SecretStore};

/// Where the key presented to the device comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationMode {
    /// The factory default key
    Default,
    /// The key currently in the secret store
    Random,
}

/// Step a rotation reached; on failure, the step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStep {
    ResolveCandidate,
    Initialize,
    Complete,
    Persist,
    SetManagementKey,
    Done,
}

/// What a successful rotation updated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
    pub identifiers: Vec<&'static str>,
}

/// Authenticate with `key` to learn whether the device holds it
///
/// `Ok(false)` means the card answered and rejected the key.
fn new_key_installed<T: CardTransport>(
    session: &mut DeviceSession<T>,
    key: &ManagementKey,
) -> PivResult<bool> {
    let challenge = session.authenticate_management_key_init()?;
    match session.authenticate_management_key_complete(&challenge, key) {
        Ok(()) => Ok(true),
        Err(PivError::AuthenticationRequired(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Drives one management key rotation against a session and a store
pub struct CredentialRotator<'s, S: SecretStore + ?Sized> {
    store: &'s mut S,
    state: AuthenticationState,
    step: RotationStep,
}

impl<'s, S: SecretStore + ?Sized> CredentialRotator<'s, S> {
    pub fn new(store: &'s mut S) -> Self {
        Self {
            store,
            state: AuthenticationState::NotStarted,
            step: RotationStep::ResolveCandidate,
        }
    }

    pub fn state(&self) -> AuthenticationState {
        self.state
    }

    pub fn step(&self) -> RotationStep {
        self.step
    }

    /// Resolve the candidate for `mode` and rotate
    pub fn rotate<T: CardTransport>(
        &mut self,
        session: &mut DeviceSession<T>,
        mode: RotationMode,
    ) -> PivResult<RotationReport> {
        self.step = RotationStep::ResolveCandidate;
        self.state = AuthenticationState::NotStarted;

        let mut candidate = self.resolve_candidate(session.generation(), mode)?;
        let mut replacement = ManagementKey::placeholder();
        self.rotate_into(session, &mut candidate, &mut replacement)
    }

    /// Candidate key for `mode`; random mode never falls back to the default
    fn resolve_candidate(
        &self,
        generation: Option<DeviceGeneration>,
        mode: RotationMode,
    ) -> PivResult<ManagementKey> {
        match mode {
            RotationMode::Default => Ok(ManagementKey::factory_default()),
            RotationMode::Random => {
                let generation = generation.unwrap_or_else(|| {
                    warn!("Unrecognised token, reading the legacy key mirror");
                    DeviceGeneration::YubiKey4
                });
                let identifier = generation.store_identifier();
                let missing = |reason: String| PivError::ConfigurationMissing {
                    identifier: identifier.to_string(),
                    reason,
                };

                let stored = self
                    .store
                    .get(identifier)
                    .map_err(|e| missing(e.to_string()))?
                    .ok_or_else(|| missing("no key stored".to_string()))?;
                let key = ManagementKey::from_hex(&stored).map_err(|e| missing(e.to_string()))?;
                debug!("Using stored management key from {}", identifier);
                Ok(key)
            }
        }
    }

    /// Write `hex_secret` under every mirror identifier
    ///
    /// Returns the identifiers written and those that failed.
    fn write_mirrors(&mut self, hex_secret: &str) -> (Vec<&'static str>, Vec<&'static str>) {
        let mut written = Vec::new();
        let mut failed = Vec::new();
        for identifier in mirror_identifiers() {
            match self.store.set(identifier, hex_secret) {
                Ok(()) => written.push(identifier),
                Err(e) => {
                    warn!("Failed to store management key under {}: {}", identifier, e);
                    failed.push(identifier);
                }
            }
        }
        (written, failed)
    }

    /// Put the pre-rotation key back under `identifiers`
    fn restore_mirrors(&mut self, identifiers: &[&'static str], candidate: &ManagementKey) -> bool {
        let candidate_hex = candidate.to_hex();
        let mut restored = true;
        for identifier in identifiers {
            if let Err(e) = self.store.set(identifier, &candidate_hex) {
                error!("Failed to restore management key under {}: {}", identifier, e);
                restored = false;
            }
        }
        restored
    }

    /// Authenticate with `candidate` and replace it with a fresh key
    ///
    /// The new key is generated into `replacement`. Both buffers are zeroed
    /// when this returns, whatever the outcome.
    pub fn rotate_into<T: CardTransport>(
        &mut self,
        session: &mut DeviceSession<T>,
        candidate: &mut ManagementKey,
        replacement: &mut ManagementKey,
    ) -> PivResult<RotationReport> {
        let candidate = WipeOnDrop::new(candidate);
        let mut replacement = WipeOnDrop::new(replacement);

        self.step = RotationStep::Initialize;
        let challenge = match session.authenticate_management_key_init() {
            Ok(challenge) => challenge,
            Err(e) => {
                self.state = AuthenticationState::Failed;
                return Err(e);
            }
        };
        self.state = AuthenticationState::Initialized;

        self.step = RotationStep::Complete;
        if let Err(e) = session.authenticate_management_key_complete(&challenge, &candidate) {
            self.state = AuthenticationState::Failed;
            return Err(e);
        }
        self.state = AuthenticationState::Authenticated;

        let new_hex = generate_hex_secret();
        *replacement = ManagementKey::from_hex(&new_hex)?;

        self.step = RotationStep::Persist;
        let (written, failed) = self.write_mirrors(&new_hex);
        if !failed.is_empty() {
            let rolled_back = self.restore_mirrors(&written, &candidate);
            return Err(PivError::StoreWriteFailed {
                failed: failed.iter().map(|id| id.to_string()).collect(),
                rolled_back,
            });
        }

        self.step = RotationStep::SetManagementKey;
        match session.set_management_key(&replacement) {
            Ok(()) => {}
            Err(e @ PivError::CommandFailed { .. }) => {
                // The device answered, so it still holds the candidate
                if self.restore_mirrors(&written, &candidate) {
                    warn!("Device refused the new key, mirrors restored");
                }
                return Err(e);
            }
            Err(e) => {
                warn!("No answer to SET MANAGEMENT KEY ({}), checking which key is live", e);
                match new_key_installed(session, &replacement) {
                    Ok(true) => info!("New management key is live despite the lost answer"),
                    Ok(false) => {
                        if self.restore_mirrors(&written, &candidate) {
                            warn!("Device kept the old key, mirrors restored");
                        }
                        return Err(e);
                    }
                    Err(check) => {
                        error!("Could not confirm the management key change: {}", check);
                        return Err(PivError::UnconfirmedKeyChange(format!(
                            "{}; mirrors hold the new key",
                            e
                        )));
                    }
                }
            }
        }

        self.step = RotationStep::Done;
        info!("Management key rotated, {} mirrors updated", written.len());
        Ok(RotationReport {
            identifiers: written,
        })
    }
}
