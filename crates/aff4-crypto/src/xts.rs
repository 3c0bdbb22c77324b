//! Per-chunk AES-XTS (spec §4.5 "Encrypted stream"): each chunk is
//! encrypted independently, tweaked by its own absolute logical chunk
//! index rather than by a running sector counter the way disk-encryption
//! XTS usually works.
//!
//! Grounded on the dependency stack pulled in from
//! `agucova-oxidized-cryptolib` (RustCrypto `aes`/`xts-mode`), generalized
//! here to AFF4's one-chunk-one-tweak usage rather than that donor's
//! sector-stream usage.

use aes::Aes128;
use xts_mode::Xts128;

use crate::vek::Vek;

/// Builds the tweak for chunk `logical_chunk_index`: its absolute index as
/// a little-endian 64-bit integer, zero-extended to the 16-byte XTS tweak.
fn tweak(logical_chunk_index: u64) -> [u8; 16] {
    let mut t = [0u8; 16];
    t[..8].copy_from_slice(&logical_chunk_index.to_le_bytes());
    t
}

fn cipher(vek: &Vek) -> Xts128<Aes128> {
    use aes::cipher::KeyInit;
    let bytes = vek.as_bytes();
    let (k1, k2) = bytes.split_at(16);
    Xts128::new(
        Aes128::new_from_slice(k1).expect("16-byte key slice"),
        Aes128::new_from_slice(k2).expect("16-byte key slice"),
    )
}

/// Encrypts one chunk's plaintext in place under `vek`, tweaked by
/// `logical_chunk_index`. `plaintext.len()` must be a multiple of the AES
/// block size (16) — true for every chunk size this crate uses (512 for
/// encrypted streams).
pub fn encrypt_chunk(vek: &Vek, logical_chunk_index: u64, plaintext: &[u8]) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    cipher(vek).encrypt_sector(&mut buf, tweak(logical_chunk_index));
    buf
}

/// Decrypts one chunk's ciphertext under `vek`, tweaked by
/// `logical_chunk_index`.
pub fn decrypt_chunk(vek: &Vek, logical_chunk_index: u64, ciphertext: &[u8]) -> Vec<u8> {
    let mut buf = ciphertext.to_vec();
    cipher(vek).decrypt_sector(&mut buf, tweak(logical_chunk_index));
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let vek = Vek::random();
        let plaintext = vec![0x42u8; 512];
        let ciphertext = encrypt_chunk(&vek, 7, &plaintext);
        assert_ne!(ciphertext, plaintext);
        let recovered = decrypt_chunk(&vek, 7, &ciphertext);
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn tweak_changes_ciphertext_for_same_plaintext() {
        let vek = Vek::random();
        let plaintext = vec![0xABu8; 512];
        let c0 = encrypt_chunk(&vek, 0, &plaintext);
        let c1 = encrypt_chunk(&vek, 1, &plaintext);
        assert_ne!(c0, c1);
    }

    #[test]
    fn deterministic_for_fixed_vek_plaintext_and_index() {
        let vek = Vek::random();
        let plaintext = vec![0x11u8; 512];
        let a = encrypt_chunk(&vek, 42, &plaintext);
        let b = encrypt_chunk(&vek, 42, &plaintext);
        assert_eq!(a, b);
    }
}
