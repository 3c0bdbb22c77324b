//! Typed quad-store values (spec §3 "Quad"): either a URN reference or one
//! of a small set of RDF-ish literal kinds.

use chrono::{DateTime, Utc};

use crate::Urn;

/// The object half of a `(graph, subject, predicate, object)` quad.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Urn(Urn),
    String(String),
    Integer(i64),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Bool(bool),
}

impl Value {
    pub fn as_urn(&self) -> Option<&Urn> {
        match self {
            Value::Urn(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<Urn> for Value {
    fn from(urn: Urn) -> Self {
        Value::Urn(urn)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}
