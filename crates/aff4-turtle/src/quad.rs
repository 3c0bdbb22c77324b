//! The quad shape this codec reads and writes. This mirrors
//! [`aff4_core::Value`] but names the predicate as a plain `String` IRI
//! rather than reusing `Urn`, since predicates are never resolved as
//! objects in their own right.

use aff4_core::{Urn, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Quad {
    pub subject: Urn,
    pub predicate: String,
    pub object: Value,
}

impl Quad {
    pub fn new(subject: Urn, predicate: impl Into<String>, object: impl Into<Value>) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}
