//! Factory reset of the PIV application

use log::info;

use crate::device::{CardTransport, DeviceSession};
use crate::error::PivResult;

/// Restores PIN, PUK and management key to their factory values
///
/// No prior authentication is needed; the session blocks PIN and PUK itself
/// before sending RESET.
#[derive(Debug, Default, Clone, Copy)]
pub struct FactoryResetter;

impl FactoryResetter {
    pub fn reset<T: CardTransport>(&self, session: &mut DeviceSession<T>) -> PivResult<()> {
        session.reset_application()?;
        info!("Token reset to factory settings");
        Ok(())
    }
}
