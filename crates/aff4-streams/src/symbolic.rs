//! Symbolic streams (spec §4.2 dispatch step 1, GLOSSARY "symbolic"):
//! boundless, read-only streams that produce a fill pattern instead of
//! reading archive members. Used as map targets for "this span was never
//! written" (`aff4://Zero`) and "this span is known-missing" (
//! `aff4://UnknownData`), and for arbitrary constant-byte fills
//! (`aff4://SymbolicStreamXX`).

use std::io::{self, Read, Seek, SeekFrom};

use aff4_core::{lexicon, Aff4Stream, Result, Urn};

/// A single repeating fill byte, or a repeating multi-byte pattern.
#[derive(Debug, Clone, Copy)]
pub enum FillPattern {
    Byte(u8),
    Pattern(&'static [u8]),
}

impl FillPattern {
    fn fill(&self, buf: &mut [u8], start: u64) {
        match self {
            FillPattern::Byte(b) => buf.iter_mut().for_each(|slot| *slot = *b),
            FillPattern::Pattern(pat) => {
                for (i, slot) in buf.iter_mut().enumerate() {
                    let idx = (start as usize + i) % pat.len();
                    *slot = pat[idx];
                }
            }
        }
    }
}

pub struct SymbolicStream {
    urn: Urn,
    pattern: FillPattern,
    pos: u64,
}

impl SymbolicStream {
    pub fn new(urn: Urn, pattern: FillPattern) -> Self {
        Self { urn, pattern, pos: 0 }
    }

    /// Recognizes a well-known symbolic-stream URN and builds the matching
    /// fill stream, or returns `None` if `urn` names something else.
    pub fn for_urn(urn: &Urn) -> Option<Self> {
        if urn.as_str() == lexicon::SYMBOLIC_ZERO_URN {
            return Some(Self::new(urn.clone(), FillPattern::Byte(0)));
        }
        if urn.as_str() == lexicon::SYMBOLIC_UNKNOWN_URN {
            return Some(Self::new(urn.clone(), FillPattern::Pattern(lexicon::SYMBOLIC_UNKNOWN_FILL)));
        }
        let fill = lexicon::symbolic_stream_fill_byte(urn.as_str())?;
        Some(Self::new(urn.clone(), FillPattern::Byte(fill)))
    }
}

impl Read for SymbolicStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pattern.fill(buf, self.pos);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }
}

impl Seek for SymbolicStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::Current(d) => self.pos as i128 + d as i128,
            SeekFrom::End(_) => {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "symbolic stream has no end"))
            }
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "negative seek"));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

impl Aff4Stream for SymbolicStream {
    fn urn(&self) -> &Urn {
        &self.urn
    }

    fn size(&self) -> u64 {
        u64::MAX
    }

    fn writable(&self) -> bool {
        false
    }

    fn dirty(&self) -> bool {
        false
    }

    fn flush_stream(&mut self) -> Result<()> {
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_urn_fills_zero_bytes() {
        let mut s = SymbolicStream::for_urn(&Urn::new("aff4://Zero")).unwrap();
        let mut buf = [0xFFu8; 16];
        s.read(&mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn unknown_data_urn_fills_repeating_pattern() {
        let mut s = SymbolicStream::for_urn(&Urn::new("aff4://UnknownData")).unwrap();
        let mut buf = [0u8; 10];
        s.read(&mut buf).unwrap();
        assert_eq!(&buf, b"UNKNOWNUNK");
    }

    #[test]
    fn symbolic_stream_hex_suffix_fills_that_byte() {
        let mut s = SymbolicStream::for_urn(&Urn::new("aff4://SymbolicStreamFF")).unwrap();
        let mut buf = [0u8; 4];
        s.read(&mut buf).unwrap();
        assert_eq!(buf, [0xFF; 4]);
    }

    #[test]
    fn unrelated_urn_is_not_recognized() {
        assert!(SymbolicStream::for_urn(&Urn::new("aff4://not-symbolic")).is_none());
    }

    #[test]
    fn size_is_unbounded_and_seek_anywhere_succeeds() {
        let mut s = SymbolicStream::for_urn(&Urn::new("aff4://Zero")).unwrap();
        assert_eq!(aff4_core::Aff4Stream::size(&s), u64::MAX);
        assert_eq!(s.seek(SeekFrom::Start(1 << 40)).unwrap(), 1 << 40);
    }
}
