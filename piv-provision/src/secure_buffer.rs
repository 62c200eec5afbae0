//! Secret byte buffers that are wiped on every exit path
//!
//! [`SecureBuffer`] zeroes its contents when dropped. [`WipeOnDrop`] binds the
//! wipe to a borrowed buffer's scope, so an orchestrator that was lent a
//! buffer still leaves it zeroed however it returns (success, `?` early
//! return, or unwinding).

use std::fmt;
use std::ops::{Deref, DerefMut};

use zeroize::Zeroize;

/// Heap buffer for PIN, PUK and management-key material
#[derive(Clone, Default)]
pub struct SecureBuffer {
    bytes: Vec<u8>,
}

impl SecureBuffer {
    /// Take ownership of already-allocated secret bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// A buffer of `len` zero bytes, to be filled in place
    pub fn zeroed(len: usize) -> Self {
        Self { bytes: vec![0u8; len] }
    }

    /// Copy the bytes of a text secret (no charset is enforced here)
    pub fn from_text(text: &str) -> Self {
        Self {
            bytes: text.as_bytes().to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Overwrite every byte with zero, keeping the length
    pub fn wipe(&mut self) {
        self.bytes.as_mut_slice().zeroize();
    }

    /// True when every byte is zero
    pub fn is_wiped(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }
}

impl Zeroize for SecureBuffer {
    fn zeroize(&mut self) {
        self.wipe();
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        // Vec::zeroize also clears spare capacity
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBuffer([REDACTED; {}])", self.bytes.len())
    }
}

impl From<Vec<u8>> for SecureBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Scope guard that zeroizes a borrowed secret when it goes out of scope
pub struct WipeOnDrop<'a, Z: Zeroize> {
    inner: &'a mut Z,
}

impl<'a, Z: Zeroize> WipeOnDrop<'a, Z> {
    pub fn new(inner: &'a mut Z) -> Self {
        Self { inner }
    }
}

impl<Z: Zeroize> Deref for WipeOnDrop<'_, Z> {
    type Target = Z;

    fn deref(&self) -> &Z {
        self.inner
    }
}

impl<Z: Zeroize> DerefMut for WipeOnDrop<'_, Z> {
    fn deref_mut(&mut self) -> &mut Z {
        self.inner
    }
}

impl<Z: Zeroize> Drop for WipeOnDrop<'_, Z> {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}
