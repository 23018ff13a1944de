// MIT License
//
// Copyright (c) 2026 the managed-map developers
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! A segmented concurrent map keyed by reference identity.

use std::{hash::BuildHasher, sync::Arc};

use crate::{
    common::{self, RawMap},
    equality::{Equality, IdentityEquality},
    reference::{Reclaimer, ReferenceBundle},
    DefaultHashBuilder,
};

/// A concurrent hash map that compares keys by handle identity rather than
/// by structure.
///
/// Two [`Arc`]s that point at the same allocation name the same entry; two
/// structurally equal keys in distinct allocations name distinct entries.
/// The key type needs neither [`Hash`] nor [`Eq`]: the allocation address
/// serves as both. This matches interning and metadata-cache workloads
/// where the handle itself is the identity of interest.
///
/// Identity hashes need less mixing than structural ones and identity
/// lookups are a single pointer comparison, so this map is commonly run
/// with a single segment for small hot caches; see [`with_num_segments`].
/// Everything else, including the per-slot reference strengths of its
/// [`ReferenceBundle`] and lazy expunging, behaves as in
/// [`ManagedHashMap`].
///
/// [`Hash`]: std::hash::Hash
/// [`ManagedHashMap`]: crate::ManagedHashMap
/// [`with_num_segments`]: #method.with_num_segments
pub struct ManagedIdentityHashMap<K, V, S = DefaultHashBuilder> {
    raw: RawMap<K, V>,
    build_hasher: S,
}

#[cfg(feature = "num-cpus")]
impl<K, V> ManagedIdentityHashMap<K, V, DefaultHashBuilder>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty map with a hard bundle and twice as many segments
    /// as the system has CPUs.
    pub fn new() -> Self {
        Self::with_num_segments_capacity_and_bundle(
            common::default_num_segments(),
            0,
            ReferenceBundle::hard(),
        )
    }

    /// Creates an empty map with the given bundle and twice as many
    /// segments as the system has CPUs.
    pub fn with_bundle(bundle: ReferenceBundle) -> Self {
        Self::with_num_segments_capacity_and_bundle(common::default_num_segments(), 0, bundle)
    }

    /// Creates an empty hard-bundle map with space for at least `capacity`
    /// elements before any segment resizes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_num_segments_capacity_and_bundle(
            common::default_num_segments(),
            capacity,
            ReferenceBundle::hard(),
        )
    }
}

impl<K, V> ManagedIdentityHashMap<K, V, DefaultHashBuilder>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty hard-bundle map with at least `num_segments`
    /// segments.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is 0.
    pub fn with_num_segments(num_segments: usize) -> Self {
        Self::with_num_segments_capacity_and_bundle(num_segments, 0, ReferenceBundle::hard())
    }

    /// Creates an empty map with at least `num_segments` segments and the
    /// given bundle.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is 0.
    pub fn with_num_segments_and_bundle(num_segments: usize, bundle: ReferenceBundle) -> Self {
        Self::with_num_segments_capacity_and_bundle(num_segments, 0, bundle)
    }

    /// Creates an empty map with at least `num_segments` segments, space
    /// for at least `capacity` elements, and the given bundle.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is 0.
    pub fn with_num_segments_capacity_and_bundle(
        num_segments: usize,
        capacity: usize,
        bundle: ReferenceBundle,
    ) -> Self {
        Self::with_num_segments_capacity_bundle_and_hasher(
            num_segments,
            capacity,
            bundle,
            DefaultHashBuilder::default(),
        )
    }
}

impl<K, V, S> ManagedIdentityHashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty map with at least `num_segments` segments, space
    /// for at least `capacity` elements, the given bundle, and
    /// `build_hasher` for mixing allocation addresses.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is 0.
    pub fn with_num_segments_capacity_bundle_and_hasher(
        num_segments: usize,
        capacity: usize,
        bundle: ReferenceBundle,
        build_hasher: S,
    ) -> Self {
        Self {
            raw: RawMap::with_num_segments_capacity_and_bundle(num_segments, capacity, bundle),
            build_hasher,
        }
    }

    /// The number of elements in the map.
    ///
    /// Approximate: stale entries that have not been expunged yet may be
    /// counted, and other threads may add or remove elements at any time.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the map contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of elements the map can hold before any segment resizes.
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// The number of segments in the map.
    pub fn num_segments(&self) -> usize {
        self.raw.num_segments()
    }

    /// The reference bundle this map was constructed with.
    pub fn bundle(&self) -> ReferenceBundle {
        self.raw.bundle()
    }

    /// A reference to the map's [`BuildHasher`].
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }

    /// The reclamation manager for this map.
    pub fn reclaimer(&self) -> &Arc<Reclaimer> {
        self.raw.reclaimer()
    }

    /// Polls the reclaimer and unlinks every entry whose referent has been
    /// reclaimed.
    pub fn expunge_stale(&self) {
        self.raw.expunge_stale();
    }

    /// Removes all entries from the map.
    pub fn clear(&self) {
        self.raw.clear();
    }

    /// A best-effort snapshot of the live values.
    pub fn values(&self) -> Vec<Arc<V>> {
        self.raw.values()
    }
}

impl<K, V, S> ManagedIdentityHashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher,
{
    /// Returns the value for the entry keyed by this exact handle, if it
    /// is live. Never blocks on a writer.
    pub fn get(&self, key: &Arc<K>) -> Option<Arc<V>> {
        let hash = IdentityEquality::hash(&self.build_hasher, key);

        self.raw
            .get(hash, |candidate| IdentityEquality::eq(candidate, key))
    }

    /// Returns `true` if the map contains a live entry for this exact
    /// handle.
    pub fn contains_key(&self, key: &Arc<K>) -> bool {
        self.get(key).is_some()
    }

    /// Inserts a key-value pair, returning the value previously keyed by
    /// this exact handle if its entry was live.
    pub fn put(&self, key: Arc<K>, value: Arc<V>) -> Option<Arc<V>> {
        let hash = IdentityEquality::hash(&self.build_hasher, &key);
        let lookup = Arc::clone(&key);

        self.raw.put(hash, key, value, move |candidate| {
            IdentityEquality::eq(candidate, &lookup)
        })
    }

    /// Returns the live value keyed by this exact handle, inserting
    /// `value` and returning it if there is none.
    pub fn put_if_absent(&self, key: Arc<K>, value: Arc<V>) -> Arc<V> {
        let hash = IdentityEquality::hash(&self.build_hasher, &key);
        let lookup = Arc::clone(&key);

        self.raw.put_if_absent(hash, key, value, move |candidate| {
            IdentityEquality::eq(candidate, &lookup)
        })
    }

    /// Removes the entry keyed by this exact handle, returning its value
    /// if it was live. Removing an absent key is a no-op.
    pub fn remove(&self, key: &Arc<K>) -> Option<Arc<V>> {
        let hash = IdentityEquality::hash(&self.build_hasher, key);

        self.raw
            .remove(hash, |candidate| IdentityEquality::eq(candidate, key))
    }
}

#[cfg(feature = "num-cpus")]
impl<K, V, S> Default for ManagedIdentityHashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: Default,
{
    fn default() -> Self {
        Self::with_num_segments_capacity_bundle_and_hasher(
            common::default_num_segments(),
            0,
            ReferenceBundle::hard(),
            S::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::reference::Strength;

    #[test]
    fn equal_keys_in_distinct_allocations_are_distinct_entries() {
        let map = ManagedIdentityHashMap::with_num_segments(4);

        let a = Arc::new("key".to_string());
        let b = Arc::new("key".to_string());

        assert_eq!(map.put(Arc::clone(&a), Arc::new(1)), None);
        assert_eq!(map.put(Arc::clone(&b), Arc::new(2)), None);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&a).as_deref(), Some(&1));
        assert_eq!(map.get(&b).as_deref(), Some(&2));
    }

    #[test]
    fn same_handle_replaces_in_place() {
        let map = ManagedIdentityHashMap::with_num_segments(4);

        let key = Arc::new(1);

        assert_eq!(map.put(Arc::clone(&key), Arc::new(10)), None);
        assert_eq!(
            map.put(Arc::clone(&key), Arc::new(20)).as_deref(),
            Some(&10)
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&key).as_deref(), Some(&20));
    }

    #[test]
    fn keys_need_neither_hash_nor_eq() {
        struct Opaque;

        let map = ManagedIdentityHashMap::with_num_segments(1);

        let key = Arc::new(Opaque);
        map.put(Arc::clone(&key), Arc::new(7));

        assert_eq!(map.get(&key).as_deref(), Some(&7));
        assert_eq!(map.remove(&key).as_deref(), Some(&7));
        assert!(map.is_empty());
    }

    #[test]
    fn single_segment_behaves_identically() {
        let map = ManagedIdentityHashMap::with_num_segments(1);

        assert_eq!(map.num_segments(), 1);

        let keys: Vec<_> = (0..256).map(Arc::new).collect();

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(map.put(Arc::clone(key), Arc::new(i)), None);
        }

        assert_eq!(map.len(), 256);

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(map.get(key).as_deref(), Some(&i));
        }
    }

    #[test]
    fn weak_keys_vanish_when_the_handle_is_dropped() {
        let map = ManagedIdentityHashMap::with_num_segments_and_bundle(
            4,
            ReferenceBundle::new(Strength::Weak, Strength::Hard),
        );

        let kept = Arc::new(1);
        let dropped = Arc::new(2);

        map.put(Arc::clone(&kept), Arc::new(10));
        map.put(Arc::clone(&dropped), Arc::new(20));
        drop(dropped);

        assert_eq!(map.get(&kept).as_deref(), Some(&10));

        map.expunge_stale();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn put_if_absent_keyed_by_handle() {
        let map = ManagedIdentityHashMap::with_num_segments(4);

        let key = Arc::new("key".to_string());

        assert_eq!(*map.put_if_absent(Arc::clone(&key), Arc::new(1)), 1);
        assert_eq!(*map.put_if_absent(Arc::clone(&key), Arc::new(2)), 1);

        // A structurally equal key in a fresh allocation is absent.
        let other = Arc::new("key".to_string());
        assert_eq!(*map.put_if_absent(Arc::clone(&other), Arc::new(3)), 3);

        assert_eq!(map.len(), 2);
    }
}
