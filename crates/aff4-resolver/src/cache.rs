//! The object cache: an in-use table (refcount ≥ 1) and an LRU table
//! (refcount 0) over live stream objects, plus the RAII handle that makes
//! "the caller must call return" a compiler-enforced invariant (spec §4.1,
//! §5 ADDED). Grounded on pyaff4 `data_store.py`'s `AFF4ObjectCache`.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::rc::Rc;

use aff4_core::{Aff4Stream, Result, Urn};
use lru::LruCache;
use tracing::warn;

use crate::graph::QuadStore;

/// Constructs a stream object for a URN the cache doesn't already hold.
/// Implemented by the crate that owns the concrete stream types (map,
/// image, encrypted, segment, ...) and injected into the resolver so this
/// crate stays free of a dependency on them (spec §4.2 "factory dispatch").
pub trait StreamFactory {
    fn open(&self, urn: &Urn, store: &QuadStore) -> Result<Box<dyn Aff4Stream>>;
}

type Slot = Rc<RefCell<Box<dyn Aff4Stream>>>;

/// In-use and LRU tables over live stream objects.
pub struct ObjectCache {
    in_use: HashMap<Urn, (Slot, usize)>,
    lru: LruCache<Urn, Slot>,
}

impl ObjectCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to at least 1 above");
        Self {
            in_use: HashMap::new(),
            lru: LruCache::new(capacity),
        }
    }

    /// Probes the cache only; never constructs. Returns `None` on a miss.
    pub fn get(&mut self, urn: &Urn) -> Option<Slot> {
        if let Some((slot, count)) = self.in_use.get_mut(urn) {
            *count += 1;
            return Some(slot.clone());
        }
        if let Some(slot) = self.lru.pop(urn) {
            self.in_use.insert(urn.clone(), (slot.clone(), 1));
            return Some(slot);
        }
        None
    }

    /// Inserts a freshly constructed (or freshly opened) stream directly
    /// into the in-use table with an initial refcount of 1.
    pub fn put(&mut self, urn: Urn, stream: Box<dyn Aff4Stream>) -> Slot {
        let slot: Slot = Rc::new(RefCell::new(stream));
        self.in_use.insert(urn, (slot.clone(), 1));
        slot
    }

    /// Decrements the refcount for `urn`. On reaching zero, moves the
    /// entry to the LRU table, flushing and evicting the current LRU tail
    /// if that pushes the table over capacity.
    pub fn return_stream(&mut self, urn: &Urn) {
        let Some((slot, count)) = self.in_use.get_mut(urn) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        let (slot, _) = self.in_use.remove(urn).unwrap();
        if let Some((evicted_urn, evicted)) = self.lru.push(urn.clone(), slot) {
            if evicted_urn != *urn {
                if let Err(err) = evicted.borrow_mut().flush_stream() {
                    warn!(urn = %evicted_urn, %err, "failed to flush evicted cache entry");
                }
            }
        }
    }

    /// Number of references currently held out (non-zero refcount
    /// entries). Used to refuse a close while callers still hold handles.
    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    /// Flushes every dirty entry (in-use and LRU) repeatedly until a pass
    /// produces no further dirt, matching spec §4.1's iterative close.
    pub fn flush_all(&mut self) -> Result<()> {
        loop {
            let mut flushed_any = false;
            for (_, slot) in self.in_use.values() {
                if slot.borrow().dirty() {
                    slot.borrow_mut().flush_stream()?;
                    flushed_any = true;
                }
            }
            for (_, slot) in self.lru.iter() {
                if slot.borrow().dirty() {
                    slot.borrow_mut().flush_stream()?;
                    flushed_any = true;
                }
            }
            if !flushed_any {
                break;
            }
        }
        Ok(())
    }

    /// Debug accessor: `(urn, use_count)` for every entry, in-use entries
    /// first. Use-count is 0 for LRU entries.
    pub fn snapshot(&self) -> Vec<(Urn, usize)> {
        let mut out: Vec<(Urn, usize)> = self.in_use.iter().map(|(u, (_, c))| (u.clone(), *c)).collect();
        out.extend(self.lru.iter().map(|(u, _)| (u.clone(), 0)));
        out
    }
}

/// An RAII handle to a cached stream. Dropping it returns the reference to
/// the cache; the stream itself is reached through [`StreamHandle::borrow`]
/// / [`StreamHandle::borrow_mut`].
pub struct StreamHandle {
    pub(crate) cache: Rc<RefCell<ObjectCache>>,
    pub(crate) urn: Urn,
    pub(crate) slot: Slot,
}

impl StreamHandle {
    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn borrow(&self) -> Ref<'_, Box<dyn Aff4Stream>> {
        self.slot.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Box<dyn Aff4Stream>> {
        self.slot.borrow_mut()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cache.borrow_mut().return_stream(&self.urn);
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};

    use super::*;
    use aff4_core::Urn;

    struct DummyStream {
        urn: Urn,
        dirty: bool,
    }

    impl Read for DummyStream {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }
    impl Seek for DummyStream {
        fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
            Ok(0)
        }
    }
    impl Aff4Stream for DummyStream {
        fn urn(&self) -> &Urn {
            &self.urn
        }
        fn size(&self) -> u64 {
            0
        }
        fn writable(&self) -> bool {
            true
        }
        fn dirty(&self) -> bool {
            self.dirty
        }
        fn flush_stream(&mut self) -> Result<()> {
            self.dirty = false;
            Ok(())
        }
        fn abort(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn put_then_return_moves_entry_to_lru() {
        let mut cache = ObjectCache::new(4);
        let urn = Urn::new("aff4://a");
        cache.put(urn.clone(), Box::new(DummyStream { urn: urn.clone(), dirty: false }));
        assert_eq!(cache.in_use_count(), 1);
        cache.return_stream(&urn);
        assert_eq!(cache.in_use_count(), 0);
        assert_eq!(cache.snapshot(), vec![(urn, 0)]);
    }

    #[test]
    fn get_on_lru_entry_moves_it_back_to_in_use() {
        let mut cache = ObjectCache::new(4);
        let urn = Urn::new("aff4://a");
        cache.put(urn.clone(), Box::new(DummyStream { urn: urn.clone(), dirty: false }));
        cache.return_stream(&urn);
        assert!(cache.get(&urn).is_some());
        assert_eq!(cache.in_use_count(), 1);
    }

    #[test]
    fn eviction_flushes_dirty_tail() {
        let mut cache = ObjectCache::new(1);
        let a = Urn::new("aff4://a");
        let b = Urn::new("aff4://b");
        cache.put(a.clone(), Box::new(DummyStream { urn: a.clone(), dirty: true }));
        cache.return_stream(&a);
        cache.put(b.clone(), Box::new(DummyStream { urn: b.clone(), dirty: false }));
        cache.return_stream(&b);
        // `a` was evicted by `b` filling the single LRU slot; only `b` remains.
        assert_eq!(cache.snapshot(), vec![(b, 0)]);
    }
}
