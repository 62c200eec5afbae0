//! Top-level operations behind the CLI subcommands
//!
//! Each operation opens one session, hands it to the matching orchestrator
//! and reports one status line per logical step through `status`.

use log::{debug, log_enabled, Level};

use crate::changer::{CredentialChanger, VerifyFailurePolicy};
use crate::device::{CardTransport, DeviceSession};
use crate::error::{PivError, PivResult};
use crate::keys::ReferenceTarget;
use crate::resetter::FactoryResetter;
use crate::rotator::{CredentialRotator, RotationMode, RotationStep};
use crate::secure_buffer::SecureBuffer;
use crate::store::SecretStore;

/// One CLI-selectable operation
#[derive(Debug)]
pub enum Operation {
    Reset,
    ChangeManagementKey(RotationMode),
    ChangePin { old: SecureBuffer, new: SecureBuffer },
    ChangePuk { old: SecureBuffer, new: SecureBuffer },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::ChangeManagementKey(_) => "change-management-key",
            Self::ChangePin { .. } => "change-pin",
            Self::ChangePuk { .. } => "change-puk",
        }
    }
}

fn log_device_info<T: CardTransport>(session: &mut DeviceSession<T>) {
    if !log_enabled!(Level::Debug) {
        return;
    }
    match session.version() {
        Ok((major, minor, patch)) => debug!("Firmware {}.{}.{}", major, minor, patch),
        Err(e) => debug!("Firmware version unavailable: {}", e),
    }
    match session.serial() {
        Ok(serial) => debug!("Serial {}", serial),
        Err(e) => debug!("Serial unavailable: {}", e),
    }
}

fn reset<T: CardTransport>(
    session: &mut DeviceSession<T>,
    status: &mut dyn FnMut(&str),
) -> PivResult<()> {
    let result = FactoryResetter.reset(session);
    match &result {
        Ok(()) => status("YubiKey reset to factory settings"),
        Err(e) => status(&format!("Reset failed: {}", e)),
    }
    result
}

fn rotate<T: CardTransport, S: SecretStore + ?Sized>(
    session: &mut DeviceSession<T>,
    store: &mut S,
    mode: RotationMode,
    status: &mut dyn FnMut(&str),
) -> PivResult<()> {
    let mut rotator = CredentialRotator::new(store);
    let result = rotator.rotate(session, mode);

    match (&result, rotator.step()) {
        (Ok(_), _) => status("Change Management Key successfully completed"),
        (Err(e @ PivError::UnconfirmedKeyChange(_)), _) => status(&format!("Error: {}", e)),
        (Err(_), RotationStep::Initialize) => {
            status("Initialize Management Key Authentication failed")
        }
        (Err(PivError::AuthenticationRequired(reason)), RotationStep::Complete) => {
            status(&format!("Error: {}", reason))
        }
        (Err(_), RotationStep::Complete) => {
            status("Complete Management Key Authentication failed")
        }
        (Err(_), RotationStep::SetManagementKey) => status("Change Management Key failed"),
        (Err(e), _) => status(&format!("Error: {}", e)),
    }
    result.map(|_| ())
}

fn change<T: CardTransport>(
    session: &mut DeviceSession<T>,
    target: ReferenceTarget,
    old: &mut SecureBuffer,
    new: &mut SecureBuffer,
    policy: VerifyFailurePolicy,
    status: &mut dyn FnMut(&str),
) -> PivResult<()> {
    let report = CredentialChanger::new(policy).change(session, target, old, new);

    if let Some(Err(e)) = &report.verify {
        status(&format!("Verify old PIN failed: {}", e));
    }
    match &report.change {
        Some(Ok(())) => status(&format!("Changed {} successfully", target)),
        Some(Err(e)) => status(&format!("Change {} failed: {}", target, e)),
        None => status(&format!("Change {} skipped", target)),
    }
    report.into_result()
}

/// Process exit status for the outcome of [`run`]
///
/// Only a missing token is reported through the exit status; operation
/// failures are reported on the status lines and still exit with 0.
pub fn exit_code(result: &PivResult<()>) -> u8 {
    match result {
        Err(PivError::DeviceUnavailable(_)) => 1,
        _ => 0,
    }
}

/// Run `operation` against the token behind `transport`
pub fn run<T: CardTransport, S: SecretStore + ?Sized>(
    transport: T,
    store: &mut S,
    operation: Operation,
    policy: VerifyFailurePolicy,
    status: &mut dyn FnMut(&str),
) -> PivResult<()> {
    debug!("Running {}", operation.name());

    let mut session = match DeviceSession::open(transport) {
        Ok(session) => session,
        Err(e) => {
            status(&format!("No YubiKey available: {}", e));
            return Err(e);
        }
    };
    log_device_info(&mut session);

    match operation {
        Operation::Reset => reset(&mut session, status),
        Operation::ChangeManagementKey(mode) => rotate(&mut session, store, mode, status),
        Operation::ChangePin { mut old, mut new } => change(
            &mut session,
            ReferenceTarget::Pin,
            &mut old,
            &mut new,
            policy,
            status,
        ),
        Operation::ChangePuk { mut old, mut new } => change(
            &mut session,
            ReferenceTarget::Puk,
            &mut old,
            &mut new,
            policy,
            status,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::{ins, SW};
    use crate::device::VirtualCard;
    use crate::store::{DeviceGeneration, InMemorySecretStore};

    fn run_collect(
        card: &mut VirtualCard,
        store: &mut InMemorySecretStore,
        operation: Operation,
    ) -> (PivResult<()>, Vec<String>) {
        let mut lines = Vec::new();
        let result = run(
            card,
            store,
            operation,
            VerifyFailurePolicy::Continue,
            &mut |line: &str| lines.push(line.to_string()),
        );
        (result, lines)
    }

    #[test]
    fn test_reset_line() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        let mut store = InMemorySecretStore::new();
        let (result, lines) = run_collect(&mut card, &mut store, Operation::Reset);
        assert!(result.is_ok());
        assert_eq!(lines, vec!["YubiKey reset to factory settings"]);
    }

    #[test]
    fn test_rotation_lines() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        let mut store = InMemorySecretStore::new();
        let (result, lines) = run_collect(
            &mut card,
            &mut store,
            Operation::ChangeManagementKey(RotationMode::Default),
        );
        assert!(result.is_ok());
        assert_eq!(lines, vec!["Change Management Key successfully completed"]);

        // Default key no longer works
        let (result, lines) = run_collect(
            &mut card,
            &mut store,
            Operation::ChangeManagementKey(RotationMode::Default),
        );
        assert!(matches!(result, Err(PivError::AuthenticationRequired(_))));
        assert!(lines[0].starts_with("Error: "));
    }

    #[test]
    fn test_initialize_failure_line() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        card.fail_instruction(ins::GENERAL_AUTHENTICATE, SW::FUNCTION_NOT_SUPPORTED);
        let mut store = InMemorySecretStore::new();
        let (_, lines) = run_collect(
            &mut card,
            &mut store,
            Operation::ChangeManagementKey(RotationMode::Default),
        );
        assert_eq!(lines, vec!["Initialize Management Key Authentication failed"]);
    }

    #[test]
    fn test_set_key_failure_line() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        card.fail_instruction(ins::SET_MANAGEMENT_KEY, SW::MEMORY_FAILURE);
        let mut store = InMemorySecretStore::new();
        let (_, lines) = run_collect(
            &mut card,
            &mut store,
            Operation::ChangeManagementKey(RotationMode::Default),
        );
        assert_eq!(lines, vec!["Change Management Key failed"]);
    }

    #[test]
    fn test_change_pin_with_wrong_old_reports_both_steps() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        let mut store = InMemorySecretStore::new();
        let (result, lines) = run_collect(
            &mut card,
            &mut store,
            Operation::ChangePin {
                old: SecureBuffer::from_text("000000"),
                new: SecureBuffer::from_text("654321"),
            },
        );
        assert!(result.is_err());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Verify old PIN failed"));
        assert!(lines[1].starts_with("Change PIN failed"));
    }

    #[test]
    fn test_missing_application() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        card.fail_instruction(ins::SELECT, SW::FILE_NOT_FOUND);
        let mut store = InMemorySecretStore::new();
        let (result, lines) = run_collect(&mut card, &mut store, Operation::Reset);
        assert!(matches!(result, Err(PivError::DeviceUnavailable(_))));
        assert!(lines[0].starts_with("No YubiKey available"));
    }

    #[test]
    fn test_exit_code_only_flags_missing_device() {
        assert_eq!(exit_code(&Ok(())), 0);
        assert_eq!(
            exit_code(&Err(PivError::VerificationFailed {
                target: ReferenceTarget::Puk,
                retries: Some(2)
            })),
            0
        );
        assert_eq!(
            exit_code(&Err(PivError::CommandFailed {
                command: "RESET",
                sw: SW::CONDITIONS_NOT_SATISFIED
            })),
            0
        );
        assert_eq!(
            exit_code(&Err(PivError::DeviceUnavailable("no reader".into()))),
            1
        );
    }

    #[test]
    fn test_oversized_old_pin_is_reported_not_sent() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        let mut store = InMemorySecretStore::new();
        let (result, lines) = run_collect(
            &mut card,
            &mut store,
            Operation::ChangePin {
                old: SecureBuffer::from_text(&"1".repeat(300)),
                new: SecureBuffer::from_text("654321"),
            },
        );
        assert!(matches!(result, Err(PivError::InvalidInput(_))));
        assert_eq!(exit_code(&result), 0);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Verify old PIN failed"));
        assert!(lines[1].starts_with("Change PIN failed"));

        assert_eq!(card.commands(), &[ins::SELECT]);
        assert_eq!(card.credentials().pin, b"123456");
        assert_eq!(card.credentials().pin_retries, 3);
    }
}
