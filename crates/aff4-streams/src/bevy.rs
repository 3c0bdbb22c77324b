//! Bevy index encode/decode (spec §4.3 "Index format"): the parallel
//! `(offset, length)` table stored alongside each bevy's compressed chunk
//! data. Grounded on `totalimage-vaults`'s `load_bevy_index`, extended here
//! with the write side and the legacy-dialect disambiguation the distilled
//! spec calls for.

use aff4_core::{Error, Result};

/// One chunk's location within its bevy's data member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BevyEntry {
    pub offset: u64,
    pub length: u32,
}

/// Standard-dialect index: `(u64 offset, u32 length)` pairs, little-endian.
pub fn encode_index(entries: &[BevyEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 12);
    for entry in entries {
        out.extend_from_slice(&entry.offset.to_le_bytes());
        out.extend_from_slice(&entry.length.to_le_bytes());
    }
    out
}

/// Decodes an index, auto-detecting standard vs. legacy (pre-standard)
/// layout.
///
/// Standard layout is 12 bytes/entry: `(u64 offset, u32 length)`. Legacy
/// layout is 4 bytes/entry: `u32 offset` only, with each chunk's length
/// inferred from the gap to the next offset (or to `bevy_size` for the
/// last entry). We try standard first (an index whose length isn't a
/// multiple of 12 can't be standard); if that round-trips to
/// monotonically non-decreasing offsets we accept it. Otherwise we fall
/// back to the legacy layout, retrying with the first 4 bytes skipped as a
/// version/magic word if the raw legacy interpretation doesn't produce
/// monotonic offsets either.
pub fn decode_index(raw: &[u8], bevy_size: u64) -> Result<Vec<BevyEntry>> {
    if raw.len() % 12 == 0 && !raw.is_empty() {
        if let Some(entries) = try_decode_standard(raw) {
            if is_monotonic(&entries) {
                return Ok(entries);
            }
        }
    }

    if raw.len() % 4 == 0 {
        let entries = decode_legacy_offsets(raw, bevy_size, 0);
        if is_monotonic(&entries) {
            return Ok(entries);
        }
    }

    if raw.len() >= 4 && (raw.len() - 4) % 4 == 0 {
        let entries = decode_legacy_offsets(raw, bevy_size, 4);
        if is_monotonic(&entries) {
            return Ok(entries);
        }
    }

    Err(Error::decode("bevy index: neither standard nor legacy layout produced monotonic offsets"))
}

fn try_decode_standard(raw: &[u8]) -> Option<Vec<BevyEntry>> {
    let mut entries = Vec::with_capacity(raw.len() / 12);
    for chunk in raw.chunks_exact(12) {
        let offset = u64::from_le_bytes(chunk[0..8].try_into().ok()?);
        let length = u32::from_le_bytes(chunk[8..12].try_into().ok()?);
        entries.push(BevyEntry { offset, length });
    }
    Some(entries)
}

fn decode_legacy_offsets(raw: &[u8], bevy_size: u64, skip_bytes: usize) -> Vec<BevyEntry> {
    let offsets: Vec<u64> = raw[skip_bytes..]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()) as u64)
        .collect();
    let mut entries = Vec::with_capacity(offsets.len());
    for (i, &offset) in offsets.iter().enumerate() {
        let next = offsets.get(i + 1).copied().unwrap_or(bevy_size);
        let length = next.saturating_sub(offset) as u32;
        entries.push(BevyEntry { offset, length });
    }
    entries
}

fn is_monotonic(entries: &[BevyEntry]) -> bool {
    entries.windows(2).all(|pair| pair[1].offset >= pair[0].offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_round_trips() {
        let entries = vec![
            BevyEntry { offset: 0, length: 100 },
            BevyEntry { offset: 100, length: 50 },
            BevyEntry { offset: 150, length: 32768 },
        ];
        let raw = encode_index(&entries);
        let decoded = decode_index(&raw, 150 + 32768).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn legacy_offsets_only_layout_decodes() {
        let offsets: Vec<u32> = vec![0, 100, 150];
        let mut raw = Vec::new();
        for o in &offsets {
            raw.extend_from_slice(&o.to_le_bytes());
        }
        let decoded = decode_index(&raw, 200).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0], BevyEntry { offset: 0, length: 100 });
        assert_eq!(decoded[1], BevyEntry { offset: 100, length: 50 });
        assert_eq!(decoded[2], BevyEntry { offset: 150, length: 50 });
    }

    #[test]
    fn empty_index_decodes_to_empty() {
        assert!(decode_index(&[], 0).is_err() || decode_index(&[], 0).unwrap().is_empty());
    }
}
