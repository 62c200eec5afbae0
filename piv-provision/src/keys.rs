//! Credential data model
//!
//! Management keys, PIN/PUK reference targets and the per-rotation
//! authentication state.

use std::fmt;

use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{fill_random, TDesOperations};
use crate::error::{PivError, PivResult};
use crate::secure_buffer::SecureBuffer;

/// Length of a 3DES management key in bytes
pub const MANAGEMENT_KEY_LEN: usize = TDesOperations::KEY_SIZE;

/// Length of a hex-encoded management key
pub const MANAGEMENT_KEY_HEX_LEN: usize = MANAGEMENT_KEY_LEN * 2;

/// Well-known factory management key: 01..08 repeated three times
pub const FACTORY_DEFAULT_MANAGEMENT_KEY: [u8; MANAGEMENT_KEY_LEN] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
];

/// A 24-byte 3DES PIV card management key, wiped on drop
#[derive(Debug)]
pub struct ManagementKey {
    buf: SecureBuffer,
}

impl ManagementKey {
    /// The factory default key
    pub fn factory_default() -> Self {
        Self {
            buf: SecureBuffer::new(FACTORY_DEFAULT_MANAGEMENT_KEY.to_vec()),
        }
    }

    /// An all-zero key slot, overwritten by the rotator once a new key exists
    pub fn placeholder() -> Self {
        Self {
            buf: SecureBuffer::zeroed(MANAGEMENT_KEY_LEN),
        }
    }

    /// Copy raw key bytes, checking the length
    pub fn from_bytes(bytes: &[u8]) -> PivResult<Self> {
        if bytes.len() != MANAGEMENT_KEY_LEN {
            return Err(PivError::InvalidKey(format!(
                "expected {} bytes, got {}",
                MANAGEMENT_KEY_LEN,
                bytes.len()
            )));
        }
        Ok(Self {
            buf: SecureBuffer::new(bytes.to_vec()),
        })
    }

    /// Decode a 48-character hex string
    pub fn from_hex(hex_key: &str) -> PivResult<Self> {
        let hex_key = hex_key.trim();
        if hex_key.len() != MANAGEMENT_KEY_HEX_LEN {
            return Err(PivError::InvalidKey(format!(
                "expected {} hex characters, got {}",
                MANAGEMENT_KEY_HEX_LEN,
                hex_key.len()
            )));
        }
        let mut decoded = SecureBuffer::zeroed(MANAGEMENT_KEY_LEN);
        hex::decode_to_slice(hex_key, decoded.as_mut_bytes())
            .map_err(|e| PivError::InvalidKey(e.to_string()))?;
        Ok(Self { buf: decoded })
    }

    /// Hex encoding for the secret mirror
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.buf.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    pub fn is_factory_default(&self) -> bool {
        self.buf.as_bytes() == FACTORY_DEFAULT_MANAGEMENT_KEY
    }

    pub fn is_wiped(&self) -> bool {
        self.buf.is_wiped()
    }
}

impl Zeroize for ManagementKey {
    fn zeroize(&mut self) {
        self.buf.wipe();
    }
}

/// Generate a fresh management key as 48 random hex characters
pub fn generate_hex_secret() -> Zeroizing<String> {
    let mut raw = SecureBuffer::zeroed(MANAGEMENT_KEY_LEN);
    fill_random(raw.as_mut_bytes());
    Zeroizing::new(hex::encode(raw.as_bytes()))
}

/// Which reference data a change operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTarget {
    /// Card holder PIN (key reference 80)
    Pin,
    /// PIN unblocking key (key reference 81)
    Puk,
}

impl ReferenceTarget {
    /// PIV key reference byte used as P2
    pub fn key_reference(self) -> u8 {
        match self {
            Self::Pin => 0x80,
            Self::Puk => 0x81,
        }
    }
}

impl fmt::Display for ReferenceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pin => write!(f, "PIN"),
            Self::Puk => write!(f, "PUK"),
        }
    }
}

/// Progress of the management key handshake within one rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthenticationState {
    #[default]
    NotStarted,
    /// Card issued its witness
    Initialized,
    Authenticated,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_default_pattern() {
        let key = ManagementKey::factory_default();
        assert_eq!(key.as_bytes().len(), 24);
        assert_eq!(&key.as_bytes()[..8], &key.as_bytes()[8..16]);
        assert_eq!(&key.as_bytes()[8..16], &key.as_bytes()[16..]);
        assert!(key.is_factory_default());
        assert_eq!(
            key.to_hex().as_str(),
            "010203040506070801020304050607080102030405060708"
        );
    }

    #[test]
    fn test_generated_secret_shape() {
        let a = generate_hex_secret();
        let b = generate_hex_secret();
        assert_eq!(a.len(), 48);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.as_str(), b.as_str());
        assert_eq!(ManagementKey::from_hex(&a).unwrap().as_bytes().len(), 24);
    }

    #[test]
    fn test_from_hex_round_trip() {
        let hex_key = "0f0e0d0c0b0a09080706050403020100f0e0d0c0b0a09080";
        let key = ManagementKey::from_hex(hex_key).unwrap();
        assert_eq!(key.as_bytes()[0], 0x0F);
        assert_eq!(key.to_hex().as_str(), hex_key);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(matches!(
            ManagementKey::from_hex("0102"),
            Err(PivError::InvalidKey(_))
        ));
        let not_hex = "zz".repeat(24);
        assert!(matches!(
            ManagementKey::from_hex(&not_hex),
            Err(PivError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_from_bytes_length_check() {
        assert!(ManagementKey::from_bytes(&[0u8; 16]).is_err());
        assert!(ManagementKey::from_bytes(&[7u8; 24]).is_ok());
    }

    #[test]
    fn test_zeroize_key() {
        let mut key = ManagementKey::factory_default();
        key.zeroize();
        assert!(key.is_wiped());
        assert_eq!(key.as_bytes().len(), 24);
    }

    #[test]
    fn test_reference_targets() {
        assert_eq!(ReferenceTarget::Pin.key_reference(), 0x80);
        assert_eq!(ReferenceTarget::Puk.key_reference(), 0x81);
        assert_eq!(ReferenceTarget::Puk.to_string(), "PUK");
    }
}
