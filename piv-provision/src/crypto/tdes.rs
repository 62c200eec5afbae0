//! Triple DES Operations
//!
//! 3DES-ECB single-block operations for PIV management key authentication
//! (algorithm reference 0x03).

use des::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use des::TdesEde3;
use log::debug;
use thiserror::Error;

/// 3DES operation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TDesError {
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKey { expected: usize, actual: usize },

    #[error("Invalid block length: expected {expected}, got {actual}")]
    InvalidData { expected: usize, actual: usize },
}

/// Triple DES Operations
pub struct TDesOperations;

impl TDesOperations {
    /// Block size for 3DES
    pub const BLOCK_SIZE: usize = 8;

    /// Key size for 3DES (24 bytes = 192 bits)
    pub const KEY_SIZE: usize = 24;

    /// PIV algorithm reference for 3DES
    pub const ALGORITHM_ID: u8 = 0x03;

    fn check(key: &[u8], block: &[u8]) -> Result<TdesEde3, TDesError> {
        if key.len() != Self::KEY_SIZE {
            return Err(TDesError::InvalidKey {
                expected: Self::KEY_SIZE,
                actual: key.len(),
            });
        }
        if block.len() != Self::BLOCK_SIZE {
            return Err(TDesError::InvalidData {
                expected: Self::BLOCK_SIZE,
                actual: block.len(),
            });
        }
        Ok(TdesEde3::new(GenericArray::from_slice(key)))
    }

    /// Encrypt a single block with 3DES-ECB
    pub fn encrypt_block(key: &[u8], plaintext: &[u8]) -> Result<[u8; 8], TDesError> {
        let cipher = Self::check(key, plaintext)?;
        let mut block = GenericArray::clone_from_slice(plaintext);
        cipher.encrypt_block(&mut block);
        debug!("3DES-ECB encrypted one block");
        let mut out = [0u8; 8];
        out.copy_from_slice(&block);
        Ok(out)
    }

    /// Decrypt a single block with 3DES-ECB
    pub fn decrypt_block(key: &[u8], ciphertext: &[u8]) -> Result<[u8; 8], TDesError> {
        let cipher = Self::check(key, ciphertext)?;
        let mut block = GenericArray::clone_from_slice(ciphertext);
        cipher.decrypt_block(&mut block);
        debug!("3DES-ECB decrypted one block");
        let mut out = [0u8; 8];
        out.copy_from_slice(&block);
        Ok(out)
    }
}
