//! The AFF4 URN: a stable, byte-exact identifier for every object in a
//! container, plus the byte-range and hash URN sub-forms layered on top of
//! it (spec §3 "URN").

use std::fmt;

use uuid::Uuid;

/// An opaque AFF4 resource name.
///
/// Comparison and hashing are byte-exact on the serialized string form, per
/// spec §3: URNs are names, not paths to be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Urn(String);

impl Urn {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Mints a fresh `aff4://<uuid>` URN.
    pub fn random() -> Self {
        Self(format!("aff4://{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends a path fragment, joining with `/` unless the fragment already
    /// carries one. Mirrors pyaff4's `URN.Append`.
    pub fn append(&self, fragment: &str) -> Self {
        if self.0.ends_with('/') || fragment.starts_with('/') {
            Self(format!("{}{}", self.0, fragment))
        } else {
            Self(format!("{}/{}", self.0, fragment))
        }
    }

    /// Builds a byte-range reference URN: `<urn>[0x<offset>:0x<length>]`.
    pub fn byte_range(&self, offset: u64, length: u64) -> Self {
        Self(format!("{}[0x{:x}:0x{:x}]", self.0, offset, length))
    }

    /// Parses a trailing `[0x<offset>:0x<length>]` byte-range suffix, if
    /// present. Hex digits are case-insensitive per spec §6.
    pub fn parse_byte_range(&self) -> Option<(Urn, u64, u64)> {
        let s = &self.0;
        let open = s.rfind('[')?;
        if !s.ends_with(']') {
            return None;
        }
        let inner = &s[open + 1..s.len() - 1];
        let (off_str, len_str) = inner.split_once(':')?;
        let offset = u64::from_str_radix(off_str.trim_start_matches("0x").trim_start_matches("0X"), 16).ok()?;
        let length = u64::from_str_radix(len_str.trim_start_matches("0x").trim_start_matches("0X"), 16).ok()?;
        Some((Urn(s[..open].to_string()), offset, length))
    }

    /// Builds a content-hash URN: `aff4:sha512:<base64url-digest>`.
    pub fn hash_sha512(digest_b64url: &str) -> Self {
        Self(format!("aff4:sha512:{digest_b64url}"))
    }

    pub fn is_hash_urn(&self) -> bool {
        self.0.starts_with("aff4:sha512:") || self.0.starts_with("aff4:sha256:")
    }

    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once(':').map(|(scheme, _)| scheme)
    }

    pub fn from_file_name(path: &str) -> Self {
        if path.starts_with("file://") {
            Self(path.to_string())
        } else {
            Self(format!("file://{path}"))
        }
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Urn {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Urn {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_joins_with_slash() {
        let urn = Urn::new("aff4://abc");
        assert_eq!(urn.append("00000000").as_str(), "aff4://abc/00000000");
    }

    #[test]
    fn append_avoids_double_slash() {
        let urn = Urn::new("aff4://abc/");
        assert_eq!(urn.append("map").as_str(), "aff4://abc/map");
    }

    #[test]
    fn byte_range_round_trips() {
        let urn = Urn::new("aff4://abc");
        let ranged = urn.byte_range(0x1000, 0x20);
        let (base, offset, length) = ranged.parse_byte_range().unwrap();
        assert_eq!(base, urn);
        assert_eq!(offset, 0x1000);
        assert_eq!(length, 0x20);
    }

    #[test]
    fn parse_byte_range_rejects_plain_urn() {
        let urn = Urn::new("aff4://abc");
        assert!(urn.parse_byte_range().is_none());
    }

    #[test]
    fn hash_urn_detection() {
        let urn = Urn::hash_sha512("deadbeef");
        assert!(urn.is_hash_urn());
        assert_eq!(urn.as_str(), "aff4:sha512:deadbeef");
    }

    #[test]
    fn scheme_extraction() {
        assert_eq!(Urn::new("file:///tmp/x").scheme(), Some("file"));
        assert_eq!(Urn::new("aff4://abc").scheme(), Some("aff4"));
    }
}
