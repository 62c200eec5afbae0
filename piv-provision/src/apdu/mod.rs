//! APDU (Application Protocol Data Unit) handling
//!
//! Host-side command APDUs for the PIV application plus the parser the
//! simulated token uses to read them back.
//!
//! # Example
//! ```ignore
//! use piv_provision::apdu::{APDU, ins};
//!
//! let verify = APDU::with_data(0x00, ins::VERIFY, 0x00, 0x80, b"123456\xFF\xFF".to_vec());
//! let raw = verify.to_bytes().unwrap();
//! assert_eq!(&raw[..5], &[0x00, 0x20, 0x00, 0x80, 0x08]);
//! ```

mod response;
mod status;

pub use response::Response;
pub use status::SW;

use thiserror::Error;

/// Errors that can occur during APDU parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum APDUError {
    #[error("APDU too short: expected at least 4 bytes, got {0}")]
    TooShort(usize),

    #[error("Lc/Le do not match the APDU length")]
    InvalidLength,

    #[error("Command data is {0} bytes, short APDUs carry at most 255")]
    DataTooLong(usize),

    #[error("Response too short: expected at least 2 status bytes, got {0}")]
    ResponseTooShort(usize),
}

/// A command APDU
///
/// Only the short encoding is used: every PIV command this crate sends
/// carries at most 255 data bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct APDU {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length, 1..=256
    pub le: Option<u16>,
}

impl APDU {
    /// Header-only command
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self::with_data(cla, ins, p1, p2, Vec::new())
    }

    pub fn with_data(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le: None,
        }
    }

    /// Ask for up to `le` response bytes
    pub fn expect(mut self, le: u16) -> Self {
        self.le = Some(le);
        self
    }

    /// CLA INS P1 P2 [Lc Data] [Le]
    pub fn to_bytes(&self) -> Result<Vec<u8>, APDUError> {
        if self.data.len() > MAX_SHORT_DATA {
            return Err(APDUError::DataTooLong(self.data.len()));
        }
        let mut out = vec![self.cla, self.ins, self.p1, self.p2];
        if !self.data.is_empty() {
            out.push(self.data.len() as u8);
            out.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            // Le of 256 is encoded as 00
            out.push(le as u8);
        }
        Ok(out)
    }
}

const MAX_SHORT_DATA: usize = 255;

fn short_le(byte: u8) -> u16 {
    match byte {
        0 => 256,
        n => u16::from(n),
    }
}

/// Parse a short-form command APDU
///
/// An Lc of 00 would start an extended-length body, which is rejected.
pub fn parse_apdu(raw: &[u8]) -> Result<APDU, APDUError> {
    let (mut apdu, body) = match raw {
        [cla, ins, p1, p2, body @ ..] => (APDU::new(*cla, *ins, *p1, *p2), body),
        _ => return Err(APDUError::TooShort(raw.len())),
    };

    match body {
        [] => {}
        [le] => apdu.le = Some(short_le(*le)),
        [0x00, ..] => return Err(APDUError::InvalidLength),
        [lc, rest @ ..] => {
            let lc = usize::from(*lc);
            match rest.len().checked_sub(lc) {
                Some(0) => apdu.data = rest.to_vec(),
                Some(1) => {
                    apdu.data = rest[..lc].to_vec();
                    apdu.le = Some(short_le(rest[lc]));
                }
                _ => return Err(APDUError::InvalidLength),
            }
        }
    }
    Ok(apdu)
}

/// PIV instruction bytes (NIST SP 800-73-4 plus Yubico extensions)
pub mod ins {
    pub const SELECT: u8 = 0xA4;
    pub const VERIFY: u8 = 0x20;
    pub const CHANGE_REFERENCE_DATA: u8 = 0x24;
    pub const GENERAL_AUTHENTICATE: u8 = 0x87;
    pub const GET_RESPONSE: u8 = 0xC0;
    /// Yubico: SET MANAGEMENT KEY
    pub const SET_MANAGEMENT_KEY: u8 = 0xFF;
    /// Yubico: RESET PIV application
    pub const RESET: u8 = 0xFB;
    /// Yubico: GET VERSION
    pub const GET_VERSION: u8 = 0xFD;
    /// Yubico: GET SERIAL
    pub const GET_SERIAL: u8 = 0xF8;
}
