//! The quad store: `(graph, subject, predicate, object)` facts with a
//! distinguished transient graph that is never persisted (spec §3 "Quad",
//! §4.1). Grounded on pyaff4 `data_store.py`'s `MemoryDataStore`.

use std::collections::BTreeMap;

use aff4_core::{Urn, Value};
use aff4_turtle::{read_turtle, write_turtle, Quad};

/// Selects which half of the store an operation targets. `Any` unions
/// both halves for reads, matching the donor lexicon's `any` graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphId {
    /// Facts that survive a flush to `information.turtle`.
    Persistent,
    /// Facts that never get written out (e.g. per-open bookkeeping).
    Transient,
    /// Union of both, for reads only.
    Any,
}

type Key = (Urn, String);

/// An in-memory RDF-ish quad store backing one container's metadata.
#[derive(Debug, Default)]
pub struct QuadStore {
    persistent: BTreeMap<Key, Vec<Value>>,
    transient: BTreeMap<Key, Vec<Value>>,
}

impl QuadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map_mut(&mut self, graph: GraphId) -> &mut BTreeMap<Key, Vec<Value>> {
        match graph {
            GraphId::Transient => &mut self.transient,
            _ => &mut self.persistent,
        }
    }

    /// Appends `o` to the multi-valued relation at `(s, p)`, suppressing
    /// exact duplicates.
    pub fn add(&mut self, graph: GraphId, s: &Urn, p: &str, o: Value) {
        let key = (s.clone(), p.to_string());
        let entry = self.map_mut(graph).entry(key).or_default();
        if !entry.contains(&o) {
            entry.push(o);
        }
    }

    /// Replaces any prior value(s) at `(s, p)` with a single `o`.
    pub fn set(&mut self, graph: GraphId, s: &Urn, p: &str, o: Value) {
        self.map_mut(graph).insert((s.clone(), p.to_string()), vec![o]);
    }

    pub fn get(&self, graph: GraphId, s: &Urn, p: &str) -> Vec<Value> {
        let key = (s.clone(), p.to_string());
        match graph {
            GraphId::Persistent => self.persistent.get(&key).cloned().unwrap_or_default(),
            GraphId::Transient => self.transient.get(&key).cloned().unwrap_or_default(),
            GraphId::Any => {
                let mut out = self.persistent.get(&key).cloned().unwrap_or_default();
                if let Some(t) = self.transient.get(&key) {
                    for v in t {
                        if !out.contains(v) {
                            out.push(v.clone());
                        }
                    }
                }
                out
            }
        }
    }

    /// Returns the single value at `(s, p)`, or `None` if the relation is
    /// empty or multi-valued (fails silently, per spec §4.1).
    pub fn get_unique(&self, graph: GraphId, s: &Urn, p: &str) -> Option<Value> {
        let mut values = self.get(graph, s, p);
        if values.len() == 1 {
            values.pop()
        } else {
            None
        }
    }

    pub fn query_predicate_object(&self, graph: GraphId, p: &str, o: &Value) -> Vec<Urn> {
        let mut out = Vec::new();
        match graph {
            GraphId::Persistent => collect_subjects(&self.persistent, p, o, &mut out),
            GraphId::Transient => collect_subjects(&self.transient, p, o, &mut out),
            GraphId::Any => {
                collect_subjects(&self.persistent, p, o, &mut out);
                collect_subjects(&self.transient, p, o, &mut out);
            }
        }
        out
    }

    pub fn query_subject_predicate(&self, graph: GraphId, s: &Urn, p: &str) -> Vec<Value> {
        self.get(graph, s, p)
    }

    /// Serializes the persistent graph to Turtle, filtering implied facts
    /// that are always re-derived from archive shape on load (spec §4.1
    /// ADDED, pyaff4 `_should_ignore`).
    pub fn dump_turtle(&self) -> String {
        let mut quads = Vec::new();
        for ((s, p), values) in &self.persistent {
            for v in values {
                if let Value::Urn(object) = v {
                    if aff4_core::lexicon::is_implied_fact(p, object.as_str()) {
                        continue;
                    }
                }
                quads.push(Quad::new(s.clone(), p.clone(), v.clone()));
            }
        }
        write_turtle(&quads)
    }

    /// Loads a previously dumped (or foreign) Turtle graph into the
    /// persistent half of the store.
    pub fn load_turtle(&mut self, text: &str) -> aff4_core::Result<()> {
        for quad in read_turtle(text)? {
            self.add(GraphId::Persistent, &quad.subject, &quad.predicate, quad.object);
        }
        Ok(())
    }
}

fn collect_subjects(map: &BTreeMap<Key, Vec<Value>>, p: &str, o: &Value, out: &mut Vec<Urn>) {
    for ((s, pred), values) in map.iter() {
        if pred == p && values.contains(o) && !out.contains(s) {
            out.push(s.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_suppresses_duplicates() {
        let mut store = QuadStore::new();
        let s = Urn::new("aff4://a");
        store.add(GraphId::Persistent, &s, "p", Value::Integer(1));
        store.add(GraphId::Persistent, &s, "p", Value::Integer(1));
        assert_eq!(store.get(GraphId::Persistent, &s, "p").len(), 1);
    }

    #[test]
    fn set_replaces_prior_values() {
        let mut store = QuadStore::new();
        let s = Urn::new("aff4://a");
        store.add(GraphId::Persistent, &s, "p", Value::Integer(1));
        store.set(GraphId::Persistent, &s, "p", Value::Integer(2));
        assert_eq!(store.get(GraphId::Persistent, &s, "p"), vec![Value::Integer(2)]);
    }

    #[test]
    fn any_graph_unions_transient_and_persistent() {
        let mut store = QuadStore::new();
        let s = Urn::new("aff4://a");
        store.add(GraphId::Persistent, &s, "p", Value::Integer(1));
        store.add(GraphId::Transient, &s, "p", Value::Integer(2));
        let mut values = store.get(GraphId::Any, &s, "p");
        values.sort_by_key(|v| v.as_integer().unwrap());
        assert_eq!(values, vec![Value::Integer(1), Value::Integer(2)]);
    }

    #[test]
    fn get_unique_is_none_when_multivalued() {
        let mut store = QuadStore::new();
        let s = Urn::new("aff4://a");
        store.add(GraphId::Persistent, &s, "p", Value::Integer(1));
        store.add(GraphId::Persistent, &s, "p", Value::Integer(2));
        assert!(store.get_unique(GraphId::Persistent, &s, "p").is_none());
    }

    #[test]
    fn query_predicate_object_finds_subjects() {
        let mut store = QuadStore::new();
        let a = Urn::new("aff4://a");
        let b = Urn::new("aff4://b");
        store.add(GraphId::Persistent, &a, "p", Value::Integer(7));
        store.add(GraphId::Persistent, &b, "p", Value::Integer(7));
        let mut subjects = store.query_predicate_object(GraphId::Persistent, "p", &Value::Integer(7));
        subjects.sort();
        assert_eq!(subjects, vec![a, b]);
    }

    #[test]
    fn dump_and_load_turtle_round_trips() {
        let mut store = QuadStore::new();
        let s = Urn::new("aff4://a");
        store.add(GraphId::Persistent, &s, aff4_core::lexicon::AFF4_PATH_NAME, "foo.txt");
        let text = store.dump_turtle();

        let mut reloaded = QuadStore::new();
        reloaded.load_turtle(&text).unwrap();
        assert_eq!(
            reloaded.get_unique(GraphId::Persistent, &s, aff4_core::lexicon::AFF4_PATH_NAME),
            Some(Value::String("foo.txt".to_string()))
        );
    }

    #[test]
    fn dump_turtle_filters_implied_facts() {
        let mut store = QuadStore::new();
        let s = Urn::new("aff4://a");
        store.add(
            GraphId::Persistent,
            &s,
            aff4_core::lexicon::AFF4_TYPE,
            Urn::new(aff4_core::lexicon::AFF4_ZIP_SEGMENT_TYPE),
        );
        let text = store.dump_turtle();
        assert!(!text.contains(aff4_core::lexicon::AFF4_ZIP_SEGMENT_TYPE));
    }
}
