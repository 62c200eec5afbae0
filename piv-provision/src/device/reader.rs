//! PC/SC reader transport

use log::{debug, info, warn};
use pcsc::{Attribute, Card, Context, Disposition, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};

use super::{CardTransport, TransportError};

fn pcsc_error(e: pcsc::Error) -> TransportError {
    TransportError::Communication(e.to_string())
}

/// Token in a PC/SC reader
pub struct PcscTransport {
    card: Option<Card>,
    atr: Vec<u8>,
    reader: String,
}

impl PcscTransport {
    /// Open the first reader with a card present
    pub fn connect_first() -> Result<Self, TransportError> {
        let ctx = Context::establish(Scope::User).map_err(pcsc_error)?;

        let mut readers_buf = vec![0u8; 4096];
        let mut readers = ctx.list_readers(&mut readers_buf).map_err(|e| match e {
            pcsc::Error::NoReadersAvailable => TransportError::NoReader,
            other => pcsc_error(other),
        })?;
        let reader = readers.next().ok_or(TransportError::NoReader)?;
        let reader_name = reader.to_string_lossy().into_owned();
        debug!("Connecting to reader {}", reader_name);

        let card = ctx
            .connect(reader, ShareMode::Shared, Protocols::ANY)
            .map_err(pcsc_error)?;
        let atr = card
            .get_attribute_owned(Attribute::AtrString)
            .map_err(pcsc_error)?;

        info!("Connected to {}", reader_name);
        Ok(Self {
            card: Some(card),
            atr,
            reader: reader_name,
        })
    }

    pub fn reader(&self) -> &str {
        &self.reader
    }
}

impl CardTransport for PcscTransport {
    fn atr(&self) -> &[u8] {
        &self.atr
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let card = self
            .card
            .as_ref()
            .ok_or_else(|| TransportError::Communication("card disconnected".to_string()))?;
        let mut buf = [0u8; MAX_BUFFER_SIZE];
        let response = card.transmit(command, &mut buf).map_err(pcsc_error)?;
        let out = response.to_vec();
        zeroize::Zeroize::zeroize(&mut buf[..]);
        Ok(out)
    }

    fn disconnect(&mut self) {
        if let Some(card) = self.card.take() {
            // Reset so no authenticated state survives the session
            if let Err((_, e)) = card.disconnect(Disposition::ResetCard) {
                warn!("Failed to disconnect from {}: {}", self.reader, e);
            }
        }
    }
}
