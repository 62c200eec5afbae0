//! Response APDUs
//!
//! The session splits card replies with [`Response::from_bytes`]; the
//! simulated token builds replies with the constructors below.

use super::status::SW;
use super::APDUError;

/// Response data plus the trailing status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
    pub sw: u16,
}

impl Response {
    pub fn new(data: Vec<u8>, sw: u16) -> Self {
        Self { data, sw }
    }

    /// Split raw card output into data and the trailing status word
    pub fn from_bytes(raw: &[u8]) -> Result<Self, APDUError> {
        match raw {
            [data @ .., sw1, sw2] => Ok(Self::new(data.to_vec(), u16::from_be_bytes([*sw1, *sw2]))),
            _ => Err(APDUError::ResponseTooShort(raw.len())),
        }
    }

    pub fn success(data: Vec<u8>) -> Self {
        Self::new(data, SW::SUCCESS)
    }

    pub fn ok() -> Self {
        Self::success(Vec::new())
    }

    pub fn error(sw: u16) -> Self {
        Self::new(Vec::new(), sw)
    }

    /// `61xx`: part of the data, `remaining` more bytes for GET RESPONSE
    pub fn more_data(data: Vec<u8>, remaining: u8) -> Self {
        Self::new(data, SW::bytes_remaining(remaining))
    }

    /// `63Cx` with the retries left
    pub fn counter_warning(retries: u8) -> Self {
        Self::error(SW::counter_warning(retries))
    }

    /// 9000, or 61xx which carries valid data as well
    pub fn is_okay(&self) -> bool {
        self.sw == SW::SUCCESS || self.sw >> 8 == 0x61
    }

    pub fn sw(&self) -> u16 {
        self.sw
    }

    /// Bytes still waiting on the card when SW1 is 61 (00 meaning 256)
    pub fn available_response(&self) -> Option<u8> {
        (self.sw >> 8 == 0x61).then_some(self.sw as u8)
    }

    /// Data followed by SW1 SW2
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.sw.to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response() {
        let resp = Response::success(vec![0x04, 0x03, 0x07]);
        assert!(resp.is_okay());
        assert_eq!(resp.to_bytes(), vec![0x04, 0x03, 0x07, 0x90, 0x00]);
    }

    #[test]
    fn test_error_response() {
        let resp = Response::error(SW::SECURITY_STATUS_NOT_SATISFIED);
        assert!(!resp.is_okay());
        assert_eq!(resp.to_bytes(), vec![0x69, 0x82]);
    }

    #[test]
    fn test_from_bytes_splits_status() {
        let resp = Response::from_bytes(&[0x7C, 0x0A, 0x90, 0x00]).unwrap();
        assert_eq!(resp.data, vec![0x7C, 0x0A]);
        assert_eq!(resp.sw(), SW::SUCCESS);

        let bare = Response::from_bytes(&[0x63, 0xC2]).unwrap();
        assert!(bare.data.is_empty());
        assert_eq!(SW::get_retry_count(bare.sw()), Some(2));
    }

    #[test]
    fn test_from_bytes_too_short() {
        assert_eq!(Response::from_bytes(&[0x90]), Err(APDUError::ResponseTooShort(1)));
    }

    #[test]
    fn test_more_data_response() {
        let resp = Response::more_data(vec![0xAB], 16);
        assert!(resp.is_okay());
        assert_eq!(resp.available_response(), Some(16));
        assert_eq!(Response::ok().available_response(), None);
    }

    #[test]
    fn test_counter_warning() {
        assert_eq!(Response::counter_warning(2).sw(), 0x63C2);
    }
}
