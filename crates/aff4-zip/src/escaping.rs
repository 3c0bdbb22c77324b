//! URN-path-fragment escaping and member-name↔URN escaping (spec §6).
//!
//! Two independent escaping layers exist: `path_to_arn_fragment` turns a
//! filesystem path into a URN path fragment (used when a logical file's
//! original path becomes part of its URN), and `member_name_for_urn` /
//! `urn_for_member_name` translate between a container-relative URN and
//! the literal name of the ZIP member that stores it, in either the v1.0
//! (percent-encoded) or v1.1 (literal Unicode) dialect.
//!
//! Grounded on pyaff4 `escaping.py`.

const FORBIDDEN: &[char] = &['<', '>', '\\', '^', '`', '{', '|', '}'];

fn is_printable_v10(c: char) -> bool {
    if !c.is_ascii() || c.is_ascii_control() {
        return false;
    }
    !matches!(c, '!' | '$' | '\\' | ':' | '*' | '%' | '?' | '"' | '<' | '>' | '|' | ']')
}

/// Converts a filesystem path into a URN path fragment.
///
/// Mirrors pyaff4 `arnPathFragment_from_path`: backslashes become `/`,
/// spaces and `%` are percent-encoded, control bytes and the `FORBIDDEN`
/// set are percent-encoded, a `\\host\share` UNC prefix collapses to
/// `host/share`, a leading `\\.` is preserved as `./`, and POSIX absolute
/// or Windows drive-letter-relative paths keep a leading `/`.
pub fn arn_path_fragment_from_path(path: &str) -> String {
    let mut chars: Vec<char> = path.chars().collect();
    if chars.is_empty() {
        return String::new();
    }

    if chars[0] == '.' {
        if chars.len() > 1 && chars[1] == '.' {
            chars.drain(0..2);
        } else {
            chars.remove(0);
        }
    }

    let mut prefix = String::new();
    if chars.len() >= 3 && chars[0] == '\\' && chars[1] == '\\' && chars[2] == '.' {
        prefix.push('.');
        chars.drain(0..3);
    }

    let mut escaped = prefix;
    for c in chars {
        match c {
            c if (c as u32) <= 0x1f => escaped.push_str(&format!("%{:02x}", c as u32)),
            '\\' => escaped.push('/'),
            ' ' => escaped.push_str("%20"),
            '%' => escaped.push_str("%25"),
            c if FORBIDDEN.contains(&c) => escaped.push_str(&format!("%{:02x}", c as u32)),
            c => escaped.push(c),
        }
    }

    let bytes: Vec<char> = escaped.chars().collect();
    if bytes.first() == Some(&'/') {
        if bytes.get(1) == Some(&'/') {
            // UNC path: drop the doubled leading slash.
            bytes[2..].iter().collect()
        } else {
            escaped
        }
    } else if bytes.first() == Some(&'.') {
        escaped
    } else {
        format!("/{escaped}")
    }
}

/// The AFF4 dialect in effect for member-name escaping, driven by the
/// container's `version.txt` (spec §3 "Dialect").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeDialect {
    /// v1.0 and earlier: percent-encode outside an ASCII allow-set.
    V10,
    /// v1.1 and later: literal Unicode path, spaces written literally.
    V11,
}

/// Builds the ZIP member name for a volume-relative URN fragment.
///
/// `relative` is the URN's path already made relative to the volume URN
/// (callers strip the common volume prefix before calling this).
pub fn member_name_for_urn(relative: &str, dialect: EscapeDialect) -> String {
    let relative = relative.strip_prefix('/').unwrap_or(relative);

    match dialect {
        EscapeDialect::V10 => {
            if let Some(rest) = relative.strip_prefix("aff4://") {
                return format!("aff4%3A%2F%2F{rest}");
            }
            let mut out = String::new();
            for c in relative.chars() {
                if is_printable_v10(c) {
                    out.push(c);
                } else {
                    out.push_str(&format!("%{:02x}", c as u32));
                }
            }
            out
        }
        EscapeDialect::V11 => relative.replace("%20", " "),
    }
}

/// Recovers the volume-relative URN fragment from a ZIP member name.
pub fn fragment_for_member_name(member: &str, dialect: EscapeDialect) -> String {
    match dialect {
        EscapeDialect::V10 => percent_decode(member),
        EscapeDialect::V11 => member.replace(' ', "%20"),
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(value) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arn_fragment_escapes_space_and_percent() {
        assert_eq!(arn_path_fragment_from_path("/a b%c"), "/a%20b%25c");
    }

    #[test]
    fn arn_fragment_converts_backslashes() {
        assert_eq!(arn_path_fragment_from_path("C:\\a\\b"), "/C:/a/b");
    }

    #[test]
    fn arn_fragment_collapses_unc_prefix() {
        assert_eq!(arn_path_fragment_from_path("\\\\host\\share"), "host/share");
    }

    #[test]
    fn arn_fragment_preserves_dot_device_prefix() {
        let out = arn_path_fragment_from_path("\\\\.\\PhysicalDrive0");
        assert!(out.starts_with("./"));
    }

    #[test]
    fn member_name_v11_is_literal() {
        let name = member_name_for_urn("a/b.txt", EscapeDialect::V11);
        assert_eq!(name, "a/b.txt");
    }

    #[test]
    fn member_name_v10_percent_encodes_aff4_scheme() {
        let name = member_name_for_urn("aff4://abc/00000000", EscapeDialect::V10);
        assert_eq!(name, "aff4%3A%2F%2Fabc/00000000");
    }

    #[test]
    fn member_name_v10_percent_encodes_forbidden_chars() {
        let name = member_name_for_urn("a<b>c", EscapeDialect::V10);
        assert_eq!(name, "a%3cb%3ec");
    }

    #[test]
    fn member_name_round_trips_v10() {
        let original = "hello world";
        let escaped = member_name_for_urn(original, EscapeDialect::V10);
        let recovered = fragment_for_member_name(&escaped, EscapeDialect::V10);
        assert_eq!(recovered, original);
    }
}
