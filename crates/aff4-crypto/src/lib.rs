//! Key wrapping and per-chunk AES-XTS for AFF4 encrypted streams (spec
//! §4.5). Deliberately free of any `aff4-streams`/`aff4-resolver`
//! dependency so it can be exercised and audited in isolation.

pub mod keybag;
pub mod vek;
pub mod xts;

pub use keybag::{CertificateKeyBag, PasswordKeyBag, DEFAULT_PBKDF2_ITERATIONS};
pub use vek::{Vek, VEK_SIZE};
pub use xts::{decrypt_chunk, encrypt_chunk};
