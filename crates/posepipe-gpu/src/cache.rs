use std::collections::hash_map::Entry;
use std::collections::HashMap;

use posepipe_core::Result;

/// How a derived resource is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The input buffer reported a stable identity.
    Stable(u64),
    /// No identity is available. The resource lives in the transient slot
    /// until the next lookup.
    Transient,
}

impl CacheKey {
    pub fn from_identity(identity: Option<u64>) -> Self {
        identity.map_or(CacheKey::Transient, CacheKey::Stable)
    }
}

/// Cache of expensive per-input-buffer resources (imported images, bound
/// descriptor sets).
///
/// Entries keyed by a stable identity are kept until the cache is dropped;
/// the number of distinct camera buffers is bounded by the camera's swap
/// chain, so nothing is evicted. A resource built without an identity goes
/// into a single transient slot, which is emptied at the start of the next
/// lookup, before anything new is built.
pub struct DerivedCache<V> {
    label: &'static str,
    keyed: HashMap<u64, V>,
    transient: Option<V>,
    capacity_hint: usize,
    constructions: u64,
    hits: u64,
}

impl<V> DerivedCache<V> {
    /// `capacity_hint` is the expected number of distinct input buffers.
    pub fn new(label: &'static str, capacity_hint: usize) -> Self {
        Self {
            label,
            keyed: HashMap::with_capacity(capacity_hint),
            transient: None,
            capacity_hint,
            constructions: 0,
            hits: 0,
        }
    }

    /// Return the resource for `key`, building it with `create` on a miss.
    /// The resource is handed out mutably so per-frame contents can be
    /// refreshed in place.
    pub fn get_or_create<F>(&mut self, key: CacheKey, create: F) -> Result<&mut V>
    where
        F: FnOnce() -> Result<V>,
    {
        if self.transient.take().is_some() {
            tracing::trace!(cache = self.label, "destroyed transient entry");
        }

        match key {
            CacheKey::Stable(id) => {
                let cached = self.keyed.len();
                match self.keyed.entry(id) {
                    Entry::Occupied(entry) => {
                        self.hits += 1;
                        tracing::trace!(cache = self.label, id, "cache hit");
                        Ok(entry.into_mut())
                    }
                    Entry::Vacant(entry) => {
                        let value = create()?;
                        self.constructions += 1;
                        if cached + 1 > self.capacity_hint {
                            tracing::warn!(
                                cache = self.label,
                                entries = cached + 1,
                                capacity = self.capacity_hint,
                                "more distinct input buffers than configured"
                            );
                        }
                        tracing::debug!(cache = self.label, id, entries = cached + 1, "cached new entry");
                        Ok(entry.insert(value))
                    }
                }
            }
            CacheKey::Transient => {
                let value = create()?;
                self.constructions += 1;
                tracing::trace!(cache = self.label, "built transient entry");
                Ok(self.transient.insert(value))
            }
        }
    }

    /// Number of entries keyed by stable identity.
    pub fn keyed_len(&self) -> usize {
        self.keyed.len()
    }

    pub fn has_transient(&self) -> bool {
        self.transient.is_some()
    }

    /// How many times a resource has been built.
    pub fn constructions(&self) -> u64 {
        self.constructions
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }
}

impl<V> std::fmt::Debug for DerivedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedCache")
            .field("label", &self.label)
            .field("keyed", &self.keyed.len())
            .field("transient", &self.transient.is_some())
            .field("constructions", &self.constructions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use posepipe_core::PoseError;

    /// Resource that tracks how many instances are alive.
    struct Tracked {
        live: Rc<Cell<usize>>,
        source: u64,
    }

    impl Tracked {
        fn new(live: &Rc<Cell<usize>>, source: u64) -> Self {
            live.set(live.get() + 1);
            Self {
                live: Rc::clone(live),
                source,
            }
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    #[test]
    fn test_stable_keys_reused() {
        let live = Rc::new(Cell::new(0));
        let mut cache = DerivedCache::new("test", 4);

        for id in [1u64, 2, 1] {
            let entry = cache
                .get_or_create(CacheKey::Stable(id), || Ok(Tracked::new(&live, id)))
                .unwrap();
            assert_eq!(entry.source, id);
        }

        assert_eq!(cache.constructions(), 2);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.keyed_len(), 2);
        assert_eq!(live.get(), 2);
    }

    #[test]
    fn test_transient_rebuilt_every_call() {
        let live = Rc::new(Cell::new(0));
        let mut cache = DerivedCache::new("test", 4);

        for call in 0..5u64 {
            cache
                .get_or_create(CacheKey::Transient, || {
                    // The previous transient entry is gone before a new one is built.
                    assert_eq!(live.get(), 0);
                    Ok(Tracked::new(&live, call))
                })
                .unwrap();
            assert_eq!(live.get(), 1);
        }
        assert_eq!(cache.constructions(), 5);
        assert!(cache.has_transient());

        drop(cache);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn test_keyed_lookup_clears_transient() {
        let live = Rc::new(Cell::new(0));
        let mut cache = DerivedCache::new("test", 4);

        cache
            .get_or_create(CacheKey::Transient, || Ok(Tracked::new(&live, 0)))
            .unwrap();
        cache
            .get_or_create(CacheKey::Stable(9), || Ok(Tracked::new(&live, 9)))
            .unwrap();
        assert!(!cache.has_transient());
        assert_eq!(live.get(), 1);
    }

    #[test]
    fn test_failed_construction_not_cached() {
        let mut cache: DerivedCache<u32> = DerivedCache::new("test", 1);
        let err = cache.get_or_create(CacheKey::Stable(3), || {
            Err(PoseError::Graphics("import failed".into()))
        });
        assert!(err.is_err());
        assert_eq!(cache.keyed_len(), 0);

        let value = cache.get_or_create(CacheKey::Stable(3), || Ok(5)).unwrap();
        assert_eq!(*value, 5);
    }

    #[test]
    fn test_key_from_identity() {
        assert_eq!(CacheKey::from_identity(Some(4)), CacheKey::Stable(4));
        assert_eq!(CacheKey::from_identity(None), CacheKey::Transient);
    }
}
