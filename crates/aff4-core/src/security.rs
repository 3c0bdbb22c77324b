//! Checked-arithmetic helpers used throughout the bevy, map, and encrypted
//! stream offset/length computations.
//!
//! Generalized from the donor's `totalimage_core::security` module: the
//! FAT/partition-specific constants and path-sanitization helpers there are
//! not applicable to this crate, but the checked-multiply/cast helpers are.

use crate::{Error, Result};

/// Multiplies two `u64`s, failing with a decode error on overflow rather
/// than wrapping or panicking. Used for `chunk_id * chunk_size`-style
/// computations derived from archive-controlled data.
pub fn checked_mul_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_mul(b)
        .ok_or_else(|| Error::decode(format!("offset overflow: {a} * {b}")))
}

pub fn checked_add_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b)
        .ok_or_else(|| Error::decode(format!("offset overflow: {a} + {b}")))
}

/// Converts a `u64` length/offset into a `usize`, failing on platforms
/// where it would not fit rather than silently truncating.
pub fn u64_to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::decode(format!("value {value} does not fit in usize")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_mul_detects_overflow() {
        assert!(checked_mul_u64(u64::MAX, 2).is_err());
        assert_eq!(checked_mul_u64(3, 4).unwrap(), 12);
    }

    #[test]
    fn checked_add_detects_overflow() {
        assert!(checked_add_u64(u64::MAX, 1).is_err());
        assert_eq!(checked_add_u64(3, 4).unwrap(), 7);
    }

    #[test]
    fn u64_to_usize_converts_in_range_values() {
        assert_eq!(u64_to_usize(42).unwrap(), 42usize);
    }
}
