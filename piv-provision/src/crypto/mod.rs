//! Cryptographic Operations
//!
//! Triple DES for the management-key challenge-response and the OS random
//! source used for challenges and fresh keys.

pub mod tdes;

pub use self::tdes::{TDesError, TDesOperations};

use rand::RngCore;

/// Fill a buffer from the operating system CSPRNG
pub fn fill_random(buf: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(buf);
}
