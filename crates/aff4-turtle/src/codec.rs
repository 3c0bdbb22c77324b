//! Turtle encode/decode for this crate's own metadata graph.
//!
//! This is deliberately not a general RDF/Turtle implementation — spec §1
//! treats Turtle parsing/serialization as an external `graph_read`/
//! `graph_write` collaborator. What's here is the minimal subject/
//! predicate/object statement grammar this crate itself produces and
//! needs to read back: `@prefix` lines and `#` comments are tolerated but
//! not round-tripped, and `a` is recognized as `rdf:type` shorthand.
//! Grounded on the donor's `aff4::types::TurtleParser` (extended here
//! from subject/predicate/object triples to a proper quad-oriented
//! writer, and from prefix/statement line matching to literal-datatype
//! awareness) and pyaff4 `data_store.py`'s `DumpToTurtle`/`LoadFromTurtle`.

use aff4_core::{Error, Result, Urn, Value};
use chrono::{DateTime, Utc};

use crate::quad::Quad;

const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
const XSD_HEX_BINARY: &str = "http://www.w3.org/2001/XMLSchema#hexBinary";
const XSD_DATETIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Serializes a list of quads (all assumed to share one graph — the
/// resolver is responsible for filtering which graph gets dumped) into
/// Turtle text, grouping statements by subject for readability.
pub fn write_turtle(quads: &[Quad]) -> String {
    let mut out = String::new();
    let mut subjects: Vec<&Urn> = Vec::new();
    for q in quads {
        if !subjects.contains(&&q.subject) {
            subjects.push(&q.subject);
        }
    }

    for subject in subjects {
        out.push_str(&format!("<{subject}>\n"));
        let predicates: Vec<&Quad> = quads.iter().filter(|q| &q.subject == subject).collect();
        let mut seen_predicates: Vec<&str> = Vec::new();
        for q in &predicates {
            if !seen_predicates.contains(&q.predicate.as_str()) {
                seen_predicates.push(&q.predicate);
            }
        }

        let last = seen_predicates.len().saturating_sub(1);
        for (i, predicate) in seen_predicates.iter().enumerate() {
            let objects: Vec<&Value> = predicates
                .iter()
                .filter(|q| q.predicate == *predicate)
                .map(|q| &q.object)
                .collect();
            let predicate_token = if *predicate == RDF_TYPE {
                "a".to_string()
            } else {
                format!("<{predicate}>")
            };
            let object_tokens: Vec<String> = objects.iter().map(|o| encode_object(o)).collect();
            let terminator = if i == last { "." } else { ";" };
            out.push_str(&format!("    {predicate_token} {} {terminator}\n", object_tokens.join(", ")));
        }
        out.push('\n');
    }
    out
}

fn encode_object(value: &Value) -> String {
    match value {
        Value::Urn(u) => format!("<{u}>"),
        Value::String(s) => format!("\"{}\"", escape_string(s)),
        Value::Integer(i) => format!("\"{i}\"^^<{XSD_INTEGER}>"),
        Value::Bytes(b) => format!("\"{}\"^^<{XSD_HEX_BINARY}>", hex::encode(b)),
        Value::DateTime(dt) => format!("\"{}\"^^<{XSD_DATETIME}>", dt.to_rfc3339()),
        Value::Bool(b) => format!("\"{b}\"^^<{XSD_BOOLEAN}>"),
    }
}

fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn unescape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parses Turtle text back into quads. Permissive: unrecognized lines
/// (`@prefix`, blank lines, `#` comments) are skipped rather than
/// rejected.
pub fn read_turtle(text: &str) -> Result<Vec<Quad>> {
    let filtered: String = text
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !(trimmed.starts_with("@prefix") || trimmed.starts_with('#') || trimmed.is_empty())
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut quads = Vec::new();
    for statement in split_top_level(&filtered, '.') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        quads.extend(parse_statement(statement)?);
    }
    Ok(quads)
}

fn parse_statement(statement: &str) -> Result<Vec<Quad>> {
    let mut parts = split_top_level(statement, '\n').join(" ");
    parts = parts.split_whitespace().collect::<Vec<_>>().join(" ");

    let groups = split_top_level(&parts, ';');
    let mut groups = groups.into_iter();
    let first = groups
        .next()
        .ok_or_else(|| Error::decode("empty turtle statement".to_string()))?;

    let mut tokens = tokenize(first.trim());
    if tokens.len() < 2 {
        return Err(Error::decode(format!("malformed turtle statement: {statement}")));
    }
    let subject = parse_urn_token(&tokens.remove(0))?;
    let predicate_token = tokens.remove(0);

    let mut quads = Vec::new();
    let rest = tokens.join(" ");
    push_predicate_objects(&mut quads, &subject, &predicate_token, &rest)?;

    for group in groups {
        let mut g_tokens = tokenize(group.trim());
        if g_tokens.is_empty() {
            continue;
        }
        let predicate_token = g_tokens.remove(0);
        let rest = g_tokens.join(" ");
        push_predicate_objects(&mut quads, &subject, &predicate_token, &rest)?;
    }

    Ok(quads)
}

fn push_predicate_objects(quads: &mut Vec<Quad>, subject: &Urn, predicate_token: &str, rest: &str) -> Result<()> {
    let predicate = if predicate_token == "a" {
        RDF_TYPE.to_string()
    } else {
        parse_urn_token(predicate_token)?.as_str().to_string()
    };

    for object_part in split_top_level(rest, ',') {
        let object_part = object_part.trim();
        if object_part.is_empty() {
            continue;
        }
        let value = parse_object(object_part)?;
        quads.push(Quad::new(subject.clone(), predicate.clone(), value));
    }
    Ok(())
}

fn parse_object(token: &str) -> Result<Value> {
    if token.starts_with('<') && token.ends_with('>') {
        return Ok(Value::Urn(Urn::new(token[1..token.len() - 1].to_string())));
    }
    if let Some(quote_end) = find_closing_quote(token) {
        let literal = unescape_string(&token[1..quote_end]);
        let remainder = token[quote_end + 1..].trim();
        if let Some(datatype) = remainder.strip_prefix("^^<").and_then(|s| s.strip_suffix('>')) {
            return Ok(match datatype {
                XSD_INTEGER => Value::Integer(literal.parse().map_err(|_| Error::decode("bad integer literal"))?),
                XSD_HEX_BINARY => Value::Bytes(hex::decode(&literal).map_err(|_| Error::decode("bad hex literal"))?),
                XSD_DATETIME => Value::DateTime(
                    DateTime::parse_from_rfc3339(&literal)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|_| Error::decode("bad datetime literal"))?,
                ),
                XSD_BOOLEAN => Value::Bool(literal == "true"),
                other => return Err(Error::decode(format!("unsupported datatype: {other}"))),
            });
        }
        return Ok(Value::String(literal));
    }
    Err(Error::decode(format!("unparseable turtle object: {token}")))
}

fn find_closing_quote(token: &str) -> Option<usize> {
    if !token.starts_with('"') {
        return None;
    }
    let bytes = token.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == b'"' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn parse_urn_token(token: &str) -> Result<Urn> {
    if token.starts_with('<') && token.ends_with('>') {
        Ok(Urn::new(token[1..token.len() - 1].to_string()))
    } else {
        Err(Error::decode(format!("expected <urn>, found {token}")))
    }
}

/// Tokenizes a single predicate-object-list fragment into `[predicate,
/// object...]`-shaped whitespace-separated tokens, respecting `<...>` and
/// `"..."` regions so embedded spaces don't split a token.
fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_uri = false;
    let mut in_string = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        match c {
            '<' if !in_string => in_uri = true,
            '>' if in_uri => {
                in_uri = false;
                tokens.push(std::mem::take(&mut current));
            }
            '"' if !in_uri => {
                if in_string {
                    in_string = false;
                } else {
                    in_string = true;
                }
            }
            c if c.is_whitespace() && !in_uri && !in_string => {
                current.pop();
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => {}
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    // Recombine a `"literal"^^<datatype>` split across the whitespace
    // boundary check above (the `^^` has no space, so this is actually
    // already one token; nothing further to merge in practice).
    tokens
}

/// Splits `s` on `sep` only outside `<...>` and `"..."` regions.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_uri = false;
    let mut in_string = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && in_string {
            current.push(c);
            if let Some(next) = chars.next() {
                current.push(next);
            }
            continue;
        }
        match c {
            '<' if !in_string => in_uri = true,
            '>' if in_uri => in_uri = false,
            '"' if !in_uri => in_string = !in_string,
            _ => {}
        }
        if c == sep && !in_uri && !in_string {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_type_and_string_literal() {
        let quads = vec![
            Quad::new(Urn::new("aff4://x"), aff4_core::lexicon::AFF4_TYPE, Urn::new("http://aff4.org/Schema#Image")),
            Quad::new(Urn::new("aff4://x"), aff4_core::lexicon::AFF4_PATH_NAME, "/a.txt"),
        ];
        let text = write_turtle(&quads);
        let parsed = read_turtle(&text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.contains(&quads[0]));
        assert!(parsed.contains(&quads[1]));
    }

    #[test]
    fn round_trips_integer_literal() {
        let quads = vec![Quad::new(Urn::new("aff4://x"), aff4_core::lexicon::AFF4_STREAM_SIZE, 12345i64)];
        let text = write_turtle(&quads);
        let parsed = read_turtle(&text).unwrap();
        assert_eq!(parsed[0].object, Value::Integer(12345));
    }

    #[test]
    fn round_trips_multivalued_predicate() {
        let quads = vec![
            Quad::new(Urn::new("aff4://x"), "http://aff4.org/Schema#hash", Urn::new("aff4:sha512:aaa")),
            Quad::new(Urn::new("aff4://x"), "http://aff4.org/Schema#hash", Urn::new("aff4:sha512:bbb")),
        ];
        let text = write_turtle(&quads);
        let parsed = read_turtle(&text).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn skips_prefix_and_comment_lines() {
        let text = "@prefix aff4: <http://aff4.org/Schema#> .\n# a comment\n<aff4://x>\n    a <http://aff4.org/Schema#Image> .\n";
        let parsed = read_turtle(text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].predicate, RDF_TYPE);
    }

    #[test]
    fn string_with_escaped_quote_round_trips() {
        let quads = vec![Quad::new(Urn::new("aff4://x"), "http://aff4.org/Schema#originalFileName", "a \"quoted\" name")];
        let text = write_turtle(&quads);
        let parsed = read_turtle(&text).unwrap();
        assert_eq!(parsed[0].object, Value::String("a \"quoted\" name".to_string()));
    }
}
