//! The volume encryption key (VEK): the 32-byte AES-XTS key that actually
//! encrypts chunks (spec §4.5, GLOSSARY "KEK / VEK").

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const VEK_SIZE: usize = 32;

/// A 32-byte AES-XTS key, zeroized on drop. Never `Debug`/`Display` —
/// printing it would defeat the point.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Vek([u8; VEK_SIZE]);

impl Vek {
    /// Mints a fresh random VEK for a newly created encrypted stream.
    pub fn random() -> Self {
        let mut bytes = [0u8; VEK_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; VEK_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; VEK_SIZE] {
        &self.0
    }
}

impl Zeroize for Vek {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_veks_differ() {
        let a = Vek::random();
        let b = Vek::random();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
