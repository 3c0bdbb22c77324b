//! The resolver: the quad store plus the object cache plus factory
//! dispatch, bundled the way a container actually uses them (spec §4.1,
//! §4.2). Grounded on pyaff4 `data_store.py`'s `MemoryDataStore`, which
//! plays exactly this combined role.

use std::cell::RefCell;
use std::rc::Rc;

use aff4_core::{Aff4Stream, Error, Result, Urn, Value};

use crate::cache::{ObjectCache, StreamFactory, StreamHandle};
use crate::graph::{GraphId, QuadStore};

/// Owns one container's metadata graph and live stream cache. `!Send` /
/// `!Sync` by construction (it holds `Rc<RefCell<_>>` throughout) — spec §5
/// ADDED states containers are single-thread-owned, not merely
/// internally-locked, so this is not wrapped in an `unsafe impl Send` the
/// way the donor's vault types were.
pub struct Resolver {
    store: QuadStore,
    cache: Rc<RefCell<ObjectCache>>,
    factory: Box<dyn StreamFactory>,
}

impl Resolver {
    pub fn new(factory: Box<dyn StreamFactory>, cache_capacity: usize) -> Self {
        Self {
            store: QuadStore::new(),
            cache: Rc::new(RefCell::new(ObjectCache::new(cache_capacity))),
            factory,
        }
    }

    pub fn store(&self) -> &QuadStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut QuadStore {
        &mut self.store
    }

    pub fn add(&mut self, graph: GraphId, s: &Urn, p: &str, o: impl Into<Value>) {
        self.store.add(graph, s, p, o.into());
    }

    pub fn set(&mut self, graph: GraphId, s: &Urn, p: &str, o: impl Into<Value>) {
        self.store.set(graph, s, p, o.into());
    }

    pub fn get(&self, graph: GraphId, s: &Urn, p: &str) -> Vec<Value> {
        self.store.get(graph, s, p)
    }

    pub fn get_unique(&self, graph: GraphId, s: &Urn, p: &str) -> Option<Value> {
        self.store.get_unique(graph, s, p)
    }

    pub fn query_predicate_object(&self, graph: GraphId, p: &str, o: &Value) -> Vec<Urn> {
        self.store.query_predicate_object(graph, p, o)
    }

    pub fn query_subject_predicate(&self, graph: GraphId, s: &Urn, p: &str) -> Vec<Value> {
        self.store.query_subject_predicate(graph, s, p)
    }

    /// Central dispatch: probes the cache, falling through to construction
    /// via the injected [`StreamFactory`] on a miss.
    ///
    /// Hash URNs and byte-range URNs bypass the cache entirely (spec §4.1:
    /// "Byte-range references and hash URNs are not cached — they are cheap
    /// and would evict heavier streams"). The handle returned for one still
    /// drops safely: `return_stream` is a no-op for a URN the cache's
    /// tables never held.
    pub fn factory_open(&mut self, urn: &Urn) -> Result<StreamHandle> {
        if urn.is_hash_urn() || urn.parse_byte_range().is_some() {
            let stream = self.factory.open(urn, &self.store)?;
            let slot = Rc::new(RefCell::new(stream));
            return Ok(StreamHandle { cache: self.cache.clone(), urn: urn.clone(), slot });
        }
        if let Some(slot) = self.cache.borrow_mut().get(urn) {
            return Ok(StreamHandle { cache: self.cache.clone(), urn: urn.clone(), slot });
        }
        let stream = self.factory.open(urn, &self.store)?;
        let slot = self.cache.borrow_mut().put(urn.clone(), stream);
        Ok(StreamHandle { cache: self.cache.clone(), urn: urn.clone(), slot })
    }

    /// Probes the cache only; does not fall through to construction.
    pub fn cache_get(&mut self, urn: &Urn) -> Option<StreamHandle> {
        let slot = self.cache.borrow_mut().get(urn)?;
        Some(StreamHandle { cache: self.cache.clone(), urn: urn.clone(), slot })
    }

    /// Inserts an already-constructed stream directly into the cache.
    pub fn cache_put(&mut self, urn: Urn, stream: Box<dyn Aff4Stream>) -> StreamHandle {
        let slot = self.cache.borrow_mut().put(urn.clone(), stream);
        StreamHandle { cache: self.cache.clone(), urn, slot }
    }

    pub fn cache_snapshot(&self) -> Vec<(Urn, usize)> {
        self.cache.borrow().snapshot()
    }

    /// Flushes every dirty cached object until none remain, then writes
    /// the persistent graph to the given sink as `information.turtle`
    /// text. Refuses to proceed while any caller still holds a
    /// [`StreamHandle`] (spec §5: "a programming error to leak a
    /// reference across close").
    pub fn close(&mut self) -> Result<String> {
        if self.cache.borrow().in_use_count() > 0 {
            return Err(Error::invalid_state("resolver close: streams still in use"));
        }
        self.cache.borrow_mut().flush_all()?;
        Ok(self.store.dump_turtle())
    }

    pub fn load_turtle(&mut self, text: &str) -> Result<()> {
        self.store.load_turtle(text)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};

    use super::*;

    struct NullStream {
        urn: Urn,
    }

    impl Read for NullStream {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }
    impl Seek for NullStream {
        fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
            Ok(0)
        }
    }
    impl Aff4Stream for NullStream {
        fn urn(&self) -> &Urn {
            &self.urn
        }
        fn size(&self) -> u64 {
            0
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

    struct NullFactory;
    impl StreamFactory for NullFactory {
        fn open(&self, urn: &Urn, _store: &QuadStore) -> Result<Box<dyn Aff4Stream>> {
            Ok(Box::new(NullStream { urn: urn.clone() }))
        }
    }

    #[test]
    fn factory_open_constructs_on_miss_and_caches_on_hit() {
        let mut resolver = Resolver::new(Box::new(NullFactory), 4);
        let urn = Urn::new("aff4://a");
        {
            let _handle = resolver.factory_open(&urn).unwrap();
            assert_eq!(resolver.cache_snapshot(), vec![(urn.clone(), 1)]);
        }
        assert_eq!(resolver.cache_snapshot(), vec![(urn, 0)]);
    }

    #[test]
    fn close_refuses_while_handle_is_live() {
        let mut resolver = Resolver::new(Box::new(NullFactory), 4);
        let urn = Urn::new("aff4://a");
        let handle = resolver.factory_open(&urn).unwrap();
        assert!(resolver.close().is_err());
        drop(handle);
        assert!(resolver.close().is_ok());
    }

    #[test]
    fn hash_urn_open_bypasses_the_cache() {
        let mut resolver = Resolver::new(Box::new(NullFactory), 4);
        let urn = Urn::hash_sha512("deadbeef");
        let handle = resolver.factory_open(&urn).unwrap();
        assert!(resolver.cache_snapshot().is_empty());
        drop(handle);
        assert!(resolver.cache_snapshot().is_empty());
    }

    #[test]
    fn byte_range_urn_open_bypasses_the_cache() {
        let mut resolver = Resolver::new(Box::new(NullFactory), 4);
        let urn = Urn::new("aff4://a").byte_range(0x10, 0x20);
        let _handle = resolver.factory_open(&urn).unwrap();
        assert!(resolver.cache_snapshot().is_empty());
    }

    #[test]
    fn set_and_get_round_trip_through_store() {
        let mut resolver = Resolver::new(Box::new(NullFactory), 4);
        let s = Urn::new("aff4://a");
        resolver.set(GraphId::Persistent, &s, aff4_core::lexicon::AFF4_PATH_NAME, "foo.txt");
        assert_eq!(
            resolver.get_unique(GraphId::Persistent, &s, aff4_core::lexicon::AFF4_PATH_NAME),
            Some(Value::String("foo.txt".to_string()))
        );
    }
}
