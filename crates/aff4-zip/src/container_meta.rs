//! Parsing/formatting for the two required non-RDF archive members: a
//! dialect-identifying `version.txt` and a `container.description` (the
//! volume URN as UTF-8). Spec §3 "Container", §6 "Required archive
//! members". Grounded on pyaff4 `container.py`'s `parseProperties` and
//! `Container.identifyURN`.

use std::collections::HashMap;

/// The three-part version stamp written into `version.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const V1_0: Version = Version { major: 1, minor: 0 };
    pub const V1_1: Version = Version { major: 1, minor: 1 };
    pub const V1_2: Version = Version { major: 1, minor: 2 };

    pub fn is_11_or_later(&self) -> bool {
        (self.major, self.minor) >= (1, 1)
    }

    pub fn format(&self, tool: &str) -> String {
        format!("major={}\nminor={}\ntool={}\n", self.major, self.minor, tool)
    }

    pub fn parse(text: &str) -> Option<Version> {
        let props = parse_properties(text);
        let major = props.get("major")?.parse().ok()?;
        let minor = props.get("minor")?.parse().ok()?;
        Some(Version { major, minor })
    }
}

/// Parses simple `key=value` lines, tolerating malformed lines by skipping
/// them (mirrors pyaff4's bare `except: pass`).
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        if let Some((key, value)) = line.split_once('=') {
            out.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_round_trips_through_text() {
        let text = Version::V1_1.format("aff4-rs");
        let parsed = Version::parse(&text).unwrap();
        assert_eq!(parsed, Version::V1_1);
    }

    #[test]
    fn parse_properties_skips_malformed_lines() {
        let props = parse_properties("major=1\ngarbage\nminor=1\n");
        assert_eq!(props.get("major").unwrap(), "1");
        assert_eq!(props.get("minor").unwrap(), "1");
    }

    #[test]
    fn is_11_or_later() {
        assert!(!Version::V1_0.is_11_or_later());
        assert!(Version::V1_1.is_11_or_later());
        assert!(Version::V1_2.is_11_or_later());
    }
}
