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

//! A segmented concurrent map with structural key equality and configurable
//! per-slot reference strength.

use std::{
    borrow::Borrow,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

use crate::{
    common::{self, RawMap},
    equality::{Equality, ValueEquality},
    reference::{Reclaimer, ReferenceBundle},
    DefaultHashBuilder,
};

/// A concurrent hash map whose keys and values are held under the reference
/// strengths of a [`ReferenceBundle`] fixed at construction.
///
/// Keys are compared structurally. Entries whose key or value referent has
/// been reclaimed are logically absent and are expunged lazily: readers skip
/// them, writers unlink them in passing, and [`expunge_stale`] sweeps them
/// on demand. With the default hard bundle no entry is ever dropped except
/// by explicit removal and the map behaves like an ordinary concurrent map.
///
/// The map is striped into segments selected by the high bits of the key
/// hash; writers to different segments proceed fully in parallel, and
/// readers never take a lock. `len` is therefore approximate: it may
/// transiently count stale entries that have not been expunged yet, but it
/// never undercounts an insertion that has returned.
///
/// The default hashing algorithm is [aHash]. It can be replaced on a
/// per-map basis using the [`with_hasher`] and
/// [`with_num_segments_capacity_bundle_and_hasher`] constructors.
///
/// [aHash]: https://docs.rs/ahash
/// [`expunge_stale`]: #method.expunge_stale
/// [`with_hasher`]: #method.with_hasher
/// [`with_num_segments_capacity_bundle_and_hasher`]: #method.with_num_segments_capacity_bundle_and_hasher
pub struct ManagedHashMap<K, V, S = DefaultHashBuilder> {
    raw: RawMap<K, V>,
    build_hasher: S,
}

#[cfg(feature = "num-cpus")]
impl<K, V> ManagedHashMap<K, V, DefaultHashBuilder>
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

impl<K, V> ManagedHashMap<K, V, DefaultHashBuilder>
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

#[cfg(feature = "num-cpus")]
impl<K, V, S> ManagedHashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty hard-bundle map which will use `build_hasher` to
    /// hash keys.
    pub fn with_hasher(build_hasher: S) -> Self {
        Self::with_num_segments_capacity_bundle_and_hasher(
            common::default_num_segments(),
            0,
            ReferenceBundle::hard(),
            build_hasher,
        )
    }
}

impl<K, V, S> ManagedHashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty map with at least `num_segments` segments, space
    /// for at least `capacity` elements, the given bundle, and
    /// `build_hasher` for hashing keys.
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

    /// The reclamation manager for this map. Driving [`Reclaimer::scan`] or
    /// [`Reclaimer::pressure`] here is how reclamation cycles are forced.
    pub fn reclaimer(&self) -> &Arc<Reclaimer> {
        self.raw.reclaimer()
    }

    /// Polls the reclaimer and unlinks every entry whose referent has been
    /// reclaimed. `put` and `remove` drain the reclaimer's notification
    /// channel before they run, but only this method polls the probes.
    pub fn expunge_stale(&self) {
        self.raw.expunge_stale();
    }

    /// Removes all entries from the map.
    pub fn clear(&self) {
        self.raw.clear();
    }

    /// A best-effort snapshot of the live values. Concurrent writers may
    /// add or remove entries while the snapshot is taken.
    pub fn values(&self) -> Vec<Arc<V>> {
        self.raw.values()
    }
}

impl<K, V, S> ManagedHashMap<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher,
{
    /// Returns the value corresponding to `key`, if its entry is live.
    ///
    /// `Q` can be any borrowed form of `K`, but [`Hash`] and [`Eq`] on `Q`
    /// *must* match those of `K`. Never blocks on a writer.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = common::hash(&self.build_hasher, key);

        self.raw.get(hash, |candidate| (**candidate).borrow() == key)
    }

    /// Returns `true` if the map contains a live entry for `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Inserts a key-value pair, returning the value previously
    /// corresponding to `key` if its entry was live.
    pub fn put(&self, key: Arc<K>, value: Arc<V>) -> Option<Arc<V>> {
        let hash = ValueEquality::hash(&self.build_hasher, &key);
        let lookup = Arc::clone(&key);

        self.raw.put(hash, key, value, move |candidate| {
            ValueEquality::eq(candidate, &lookup)
        })
    }

    /// Returns the live value corresponding to `key`, inserting `value`
    /// and returning it if there is none.
    pub fn put_if_absent(&self, key: Arc<K>, value: Arc<V>) -> Arc<V> {
        let hash = ValueEquality::hash(&self.build_hasher, &key);
        let lookup = Arc::clone(&key);

        self.raw.put_if_absent(hash, key, value, move |candidate| {
            ValueEquality::eq(candidate, &lookup)
        })
    }

    /// Removes the entry for `key`, returning its value if it was live.
    /// Removing an absent key is a no-op.
    pub fn remove<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = common::hash(&self.build_hasher, key);

        self.raw
            .remove(hash, |candidate| (**candidate).borrow() == key)
    }
}

#[cfg(feature = "num-cpus")]
impl<K, V, S> Default for ManagedHashMap<K, V, S>
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

    use proptest::prelude::*;

    #[test]
    fn put_get_round_trip() {
        let map = ManagedHashMap::with_num_segments(4);

        assert_eq!(map.put(Arc::new("foo".to_string()), Arc::new(5)), None);
        assert_eq!(map.get("foo").as_deref(), Some(&5));
        assert_eq!(map.get("bar"), None);
        assert!(map.contains_key("foo"));
        assert!(!map.contains_key("bar"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn put_returns_previous_value() {
        let map = ManagedHashMap::with_num_segments(1);

        assert_eq!(map.put(Arc::new(1), Arc::new(10)), None);
        assert_eq!(map.put(Arc::new(1), Arc::new(20)).as_deref(), Some(&10));
        assert_eq!(map.get(&1).as_deref(), Some(&20));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let map = ManagedHashMap::with_num_segments(4);

        map.put(Arc::new(1), Arc::new(10));
        assert_eq!(map.remove(&1).as_deref(), Some(&10));
        assert_eq!(map.len(), 0);

        assert_eq!(map.remove(&1), None);
        assert_eq!(map.remove(&2), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn structurally_equal_keys_share_an_entry() {
        let map = ManagedHashMap::with_num_segments(4);

        let a = Arc::new("key".to_string());
        let b = Arc::new("key".to_string());

        assert_eq!(map.put(a, Arc::new(1)), None);
        assert_eq!(map.put(b, Arc::new(2)).as_deref(), Some(&1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("key").as_deref(), Some(&2));
    }

    #[test]
    fn growth_preserves_entries() {
        let map = ManagedHashMap::with_num_segments(2);

        for i in 0..512 {
            assert_eq!(map.put(Arc::new(i), Arc::new(i)), None);
        }

        assert_eq!(map.len(), 512);

        for i in 0..512 {
            assert_eq!(map.get(&i).as_deref(), Some(&i));
        }
    }

    #[test]
    fn put_if_absent_keeps_existing() {
        let map = ManagedHashMap::with_num_segments(4);

        assert_eq!(*map.put_if_absent(Arc::new(1), Arc::new(10)), 10);
        assert_eq!(*map.put_if_absent(Arc::new(1), Arc::new(20)), 10);
        assert_eq!(map.get(&1).as_deref(), Some(&10));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn weak_values_are_expunged() {
        let map = ManagedHashMap::with_num_segments_and_bundle(
            4,
            ReferenceBundle::new(Strength::Hard, Strength::Weak),
        );

        let kept = Arc::new(10);
        map.put(Arc::new(1), Arc::clone(&kept));

        let dropped = Arc::new(20);
        map.put(Arc::new(2), Arc::clone(&dropped));
        drop(dropped);

        // The referent is gone; the entry is logically absent at once.
        assert_eq!(map.get(&2), None);
        assert_eq!(map.get(&1).as_deref(), Some(&10));

        map.expunge_stale();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn weak_keys_are_expunged() {
        let map = ManagedHashMap::with_num_segments_and_bundle(
            4,
            ReferenceBundle::new(Strength::Weak, Strength::Hard),
        );

        let key = Arc::new(1);
        map.put(Arc::clone(&key), Arc::new(10));

        assert_eq!(map.get(&1).as_deref(), Some(&10));

        drop(key);
        assert_eq!(map.get(&1), None);

        map.expunge_stale();
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn soft_values_survive_until_pressure() {
        let map = ManagedHashMap::with_num_segments_and_bundle(4, ReferenceBundle::soft());

        let key = Arc::new(1);
        map.put(Arc::clone(&key), Arc::new(10));

        // No external strong reference to the value, but no pressure yet.
        assert_eq!(map.get(&1).as_deref(), Some(&10));

        map.reclaimer().pressure();
        map.expunge_stale();

        assert_eq!(map.get(&1), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn stale_entries_are_unlinked_by_writes() {
        let map = ManagedHashMap::with_num_segments_and_bundle(
            1,
            ReferenceBundle::new(Strength::Hard, Strength::Weak),
        );

        let dropped = Arc::new(10);
        map.put(Arc::new(1), Arc::clone(&dropped));
        drop(dropped);

        map.reclaimer().scan();

        // The write path drains the channel before inserting.
        let kept = Arc::new(20);
        map.put(Arc::new(2), Arc::clone(&kept));

        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&2).as_deref(), Some(&20));
    }

    #[test]
    fn replacing_a_value_keeps_one_entry_per_key() {
        let map = ManagedHashMap::with_num_segments_and_bundle(
            1,
            ReferenceBundle::new(Strength::Hard, Strength::Weak),
        );

        let first = Arc::new(10);
        map.put(Arc::new(1), Arc::clone(&first));

        let second = Arc::new(20);
        assert_eq!(
            map.put(Arc::new(1), Arc::clone(&second)).as_deref(),
            Some(&10)
        );

        drop(first);
        assert_eq!(map.get(&1).as_deref(), Some(&20));

        map.expunge_stale();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn clear_empties_the_map() {
        let map = ManagedHashMap::with_num_segments(4);

        for i in 0..64 {
            map.put(Arc::new(i), Arc::new(i));
        }

        map.clear();

        assert_eq!(map.len(), 0);
        assert!(map.is_empty());

        for i in 0..64 {
            assert_eq!(map.get(&i), None);
        }
    }

    #[test]
    fn values_snapshot() {
        let map = ManagedHashMap::with_num_segments(4);

        for i in 0..16 {
            map.put(Arc::new(i), Arc::new(i));
        }

        let mut values: Vec<i32> = map.values().iter().map(|v| **v).collect();
        values.sort_unstable();

        assert_eq!(values, (0..16).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn hard_bundle_matches_model(
            ops in proptest::collection::vec((0u8..3, 0u16..64, any::<u16>()), 0..256),
        ) {
            let map = ManagedHashMap::with_num_segments(4);
            let mut model = std::collections::HashMap::new();

            for (op, key, value) in ops {
                match op {
                    0 => {
                        let previous = map.put(Arc::new(key), Arc::new(value));
                        let expected = model.insert(key, value);
                        prop_assert_eq!(previous.as_deref(), expected.as_ref());
                    }
                    1 => {
                        let removed = map.remove(&key);
                        let expected = model.remove(&key);
                        prop_assert_eq!(removed.as_deref(), expected.as_ref());
                    }
                    _ => {
                        let found = map.get(&key);
                        prop_assert_eq!(found.as_deref(), model.get(&key));
                    }
                }
            }

            prop_assert_eq!(map.len(), model.len());
        }
    }
}
