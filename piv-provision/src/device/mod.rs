//! Token access
//!
//! [`CardTransport`] is the raw byte pipe to one inserted token. Real readers
//! come from PC/SC (behind the `pcsc` feature); [`VirtualCard`] is an
//! in-process PIV token with the same contract. [`DeviceSession`] layers the
//! PIV command set on top of either.

#[cfg(feature = "pcsc")]
mod reader;
pub mod session;
pub mod virtual_card;

#[cfg(feature = "pcsc")]
pub use reader::PcscTransport;
pub use session::{Challenge, DeviceSession, PIV_AID};
pub use virtual_card::VirtualCard;

use log::debug;
use thiserror::Error;

use crate::apdu::APDUError;
use crate::error::{PivError, PivResult};

/// Errors from the byte transport underneath a session
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No smart card reader found")]
    NoReader,

    #[error("Card communication failed: {0}")]
    Communication(String),

    #[error("Simulated token state {path:?}: {reason}")]
    State {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error(transparent)]
    Apdu(#[from] APDUError),
}

/// Byte-level exchange with one connected token
pub trait CardTransport {
    /// Answer-to-reset reported when the card was connected
    fn atr(&self) -> &[u8];

    /// Send one command APDU and return the raw response (data + SW1 SW2)
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Release the connection; called once when the session ends
    fn disconnect(&mut self) {}
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn atr(&self) -> &[u8] {
        (**self).atr()
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).transmit(command)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}

impl<T: CardTransport + ?Sized> CardTransport for &mut T {
    fn atr(&self) -> &[u8] {
        (**self).atr()
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).transmit(command)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}

/// Connect to the first smart card reader the system reports
#[cfg(feature = "pcsc")]
pub fn select_device() -> PivResult<Box<dyn CardTransport>> {
    let transport = PcscTransport::connect_first().map_err(|e| {
        debug!("Reader enumeration failed: {}", e);
        PivError::DeviceUnavailable(e.to_string())
    })?;
    Ok(Box::new(transport))
}

/// Connect to the first smart card reader the system reports
#[cfg(not(feature = "pcsc"))]
pub fn select_device() -> PivResult<Box<dyn CardTransport>> {
    debug!("Built without PC/SC support");
    Err(PivError::DeviceUnavailable(
        "built without PC/SC support; use --virtual-card".to_string(),
    ))
}

#[cfg(all(test, not(feature = "pcsc")))]
mod tests {
    use super::*;

    #[test]
    fn test_select_device_without_pcsc() {
        assert!(matches!(
            select_device(),
            Err(PivError::DeviceUnavailable(_))
        ));
    }
}
