//! Credentials held by the simulated token

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::keys::{ReferenceTarget, FACTORY_DEFAULT_MANAGEMENT_KEY};

/// Hex (de)serialization for secret byte fields
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(serde::de::Error::custom)
    }
}

/// Management key, PIN and PUK of one token plus retry counters
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenCredentials {
    #[serde(with = "hex_bytes")]
    pub management_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub pin: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub puk: Vec<u8>,
    pub pin_retries: u8,
    pub puk_retries: u8,
    pub serial: u32,
}

impl TokenCredentials {
    pub const DEFAULT_PIN: &'static [u8] = b"123456";
    pub const DEFAULT_PUK: &'static [u8] = b"12345678";
    pub const DEFAULT_RETRIES: u8 = 3;

    /// Factory state with the given serial number
    pub fn factory(serial: u32) -> Self {
        Self {
            management_key: FACTORY_DEFAULT_MANAGEMENT_KEY.to_vec(),
            pin: Self::DEFAULT_PIN.to_vec(),
            puk: Self::DEFAULT_PUK.to_vec(),
            pin_retries: Self::DEFAULT_RETRIES,
            puk_retries: Self::DEFAULT_RETRIES,
            serial,
        }
    }

    pub fn reference(&self, target: ReferenceTarget) -> &[u8] {
        match target {
            ReferenceTarget::Pin => &self.pin,
            ReferenceTarget::Puk => &self.puk,
        }
    }

    pub fn retries(&self, target: ReferenceTarget) -> u8 {
        match target {
            ReferenceTarget::Pin => self.pin_retries,
            ReferenceTarget::Puk => self.puk_retries,
        }
    }

    pub(super) fn retries_mut(&mut self, target: ReferenceTarget) -> &mut u8 {
        match target {
            ReferenceTarget::Pin => &mut self.pin_retries,
            ReferenceTarget::Puk => &mut self.puk_retries,
        }
    }

    pub(super) fn set_reference(&mut self, target: ReferenceTarget, value: Vec<u8>) {
        let slot = match target {
            ReferenceTarget::Pin => &mut self.pin,
            ReferenceTarget::Puk => &mut self.puk,
        };
        slot.zeroize();
        *slot = value;
    }
}

impl Drop for TokenCredentials {
    fn drop(&mut self) {
        self.management_key.zeroize();
        self.pin.zeroize();
        self.puk.zeroize();
    }
}

/// Security conditions satisfied since the application was selected
#[derive(Debug, Default)]
pub struct SecurityState {
    pin_verified: bool,
    management_key_authenticated: bool,
}

impl SecurityState {
    pub fn set_pin_verified(&mut self, verified: bool) {
        self.pin_verified = verified;
    }

    pub fn is_pin_verified(&self) -> bool {
        self.pin_verified
    }

    pub fn set_management_key_authenticated(&mut self, authenticated: bool) {
        self.management_key_authenticated = authenticated;
    }

    pub fn is_management_key_authenticated(&self) -> bool {
        self.management_key_authenticated
    }

    pub fn clear_all(&mut self) {
        self.pin_verified = false;
        self.management_key_authenticated = false;
    }
}
