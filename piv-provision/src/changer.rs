//! PIN and PUK changes

use log::{info, warn};

use crate::device::{CardTransport, DeviceSession};
use crate::error::{PivError, PivResult};
use crate::keys::ReferenceTarget;
use crate::secure_buffer::{SecureBuffer, WipeOnDrop};

/// What to do when the old PIN fails the VERIFY pre-check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyFailurePolicy {
    /// Report the failure and still attempt the change
    #[default]
    Continue,
    /// Report the failure and skip the change
    Abort,
}

/// Outcome of each step of one change
#[derive(Debug)]
pub struct ChangeReport {
    pub target: ReferenceTarget,
    /// PIN pre-check; `None` for PUK
    pub verify: Option<PivResult<()>>,
    /// CHANGE REFERENCE DATA; `None` when skipped by policy
    pub change: Option<PivResult<()>>,
}

impl ChangeReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.change, Some(Ok(())))
    }

    /// Collapse to the first error that stopped the change
    pub fn into_result(self) -> PivResult<()> {
        match (self.verify, self.change) {
            (_, Some(result)) => result,
            (Some(Err(e)), None) => Err(e),
            (_, None) => Err(PivError::VerificationFailed {
                target: self.target,
                retries: None,
            }),
        }
    }
}

/// Verify-then-change for PIN and PUK
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialChanger {
    policy: VerifyFailurePolicy,
}

impl CredentialChanger {
    pub fn new(policy: VerifyFailurePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> VerifyFailurePolicy {
        self.policy
    }

    /// Change `target` from `old` to `new`
    ///
    /// Both buffers are zeroed when this returns. No step is retried.
    pub fn change<T: CardTransport>(
        &self,
        session: &mut DeviceSession<T>,
        target: ReferenceTarget,
        old: &mut SecureBuffer,
        new: &mut SecureBuffer,
    ) -> ChangeReport {
        let old = WipeOnDrop::new(old);
        let new = WipeOnDrop::new(new);

        let verify = match target {
            ReferenceTarget::Pin => Some(session.verify_pin(&old)),
            ReferenceTarget::Puk => None,
        };

        if let Some(Err(e)) = &verify {
            warn!("Verify old PIN failed: {}", e);
            if self.policy == VerifyFailurePolicy::Abort {
                return ChangeReport {
                    target,
                    verify,
                    change: None,
                };
            }
        }

        let change = session.change_reference_data(target, &old, &new);
        match &change {
            Ok(()) => info!("{} changed", target),
            Err(e) => warn!("Change {} failed: {}", target, e),
        }

        ChangeReport {
            target,
            verify,
            change: Some(change),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::ins;
    use crate::device::VirtualCard;
    use crate::store::DeviceGeneration;

    fn change(
        card: &mut VirtualCard,
        policy: VerifyFailurePolicy,
        target: ReferenceTarget,
        old: &str,
        new: &str,
    ) -> (ChangeReport, SecureBuffer, SecureBuffer) {
        let mut old = SecureBuffer::from_text(old);
        let mut new = SecureBuffer::from_text(new);
        let mut session = DeviceSession::open(card).unwrap();
        let report = CredentialChanger::new(policy).change(&mut session, target, &mut old, &mut new);
        (report, old, new)
    }

    #[test]
    fn test_change_pin() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        let (report, old, new) = change(
            &mut card,
            VerifyFailurePolicy::Continue,
            ReferenceTarget::Pin,
            "123456",
            "654321",
        );
        assert!(report.succeeded());
        assert!(matches!(report.verify, Some(Ok(()))));
        assert!(old.is_wiped());
        assert!(new.is_wiped());
        assert_eq!(card.credentials().pin, b"654321");
    }

    #[test]
    fn test_change_puk_wrong_old() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        let (report, old, new) = change(
            &mut card,
            VerifyFailurePolicy::Continue,
            ReferenceTarget::Puk,
            "00000000",
            "87654321",
        );
        assert!(report.verify.is_none());
        assert!(!report.succeeded());
        assert!(old.is_wiped());
        assert!(new.is_wiped());
        assert!(matches!(
            report.into_result(),
            Err(PivError::VerificationFailed {
                target: ReferenceTarget::Puk,
                retries: Some(2)
            })
        ));
        assert_eq!(card.credentials().puk, b"12345678");
    }

    #[test]
    fn test_wrong_pin_continue_policy_still_changes() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        let (report, _, _) = change(
            &mut card,
            VerifyFailurePolicy::Continue,
            ReferenceTarget::Pin,
            "111111",
            "222222",
        );
        assert!(matches!(report.verify, Some(Err(_))));
        assert!(matches!(report.change, Some(Err(_))));
        assert_eq!(
            card.commands().iter().filter(|&&i| i == ins::CHANGE_REFERENCE_DATA).count(),
            1
        );
        // One failed VERIFY plus one failed change
        assert_eq!(card.credentials().pin_retries, 1);
    }

    #[test]
    fn test_wrong_pin_abort_policy_skips_change() {
        let mut card = VirtualCard::new(DeviceGeneration::YubiKey5);
        let (report, old, new) = change(
            &mut card,
            VerifyFailurePolicy::Abort,
            ReferenceTarget::Pin,
            "111111",
            "222222",
        );
        assert!(report.change.is_none());
        assert!(old.is_wiped());
        assert!(new.is_wiped());
        assert!(!card.commands().contains(&ins::CHANGE_REFERENCE_DATA));
        assert!(matches!(
            report.into_result(),
            Err(PivError::VerificationFailed {
                target: ReferenceTarget::Pin,
                ..
            })
        ));
    }
}
