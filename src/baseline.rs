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

//! Baseline maps with hard keys and a single configurable value strength.
//!
//! These are the reference points the managed maps are measured against:
//! the same segment core and lazy expunging, but the key slot is always
//! hard, so an entry can only go stale through its value. Constructing one
//! with [`Strength::Hard`] values yields a plain concurrent map with no
//! reclamation behavior at all.

use std::{
    borrow::Borrow,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

use crate::{
    common::{self, RawMap},
    equality::{Equality, IdentityEquality, ValueEquality},
    reference::{Reclaimer, ReferenceBundle, Strength},
    DefaultHashBuilder,
};

/// A concurrent hash map with structural key equality, hard keys, and one
/// value strength fixed at construction.
///
/// The structural-equality counterpart of [`IdentityHashMap`]. Compared to
/// [`ManagedHashMap`] the key slot is always hard, so keys are never
/// reclaimed out from under the map and only values can go stale.
///
/// [`ManagedHashMap`]: crate::ManagedHashMap
pub struct ReferenceHashMap<K, V, S = DefaultHashBuilder> {
    raw: RawMap<K, V>,
    build_hasher: S,
}

#[cfg(feature = "num-cpus")]
impl<K, V> ReferenceHashMap<K, V, DefaultHashBuilder>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty map holding its values at `strength`, with twice
    /// as many segments as the system has CPUs.
    pub fn with_strength(strength: Strength) -> Self {
        Self::with_num_segments_capacity_and_strength(common::default_num_segments(), 0, strength)
    }
}

impl<K, V> ReferenceHashMap<K, V, DefaultHashBuilder>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty map with at least `num_segments` segments, holding
    /// its values at `strength`.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is 0.
    pub fn with_num_segments_and_strength(num_segments: usize, strength: Strength) -> Self {
        Self::with_num_segments_capacity_and_strength(num_segments, 0, strength)
    }

    /// Creates an empty map with at least `num_segments` segments and
    /// space for at least `capacity` elements, holding its values at
    /// `strength`.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is 0.
    pub fn with_num_segments_capacity_and_strength(
        num_segments: usize,
        capacity: usize,
        strength: Strength,
    ) -> Self {
        Self::with_num_segments_capacity_strength_and_hasher(
            num_segments,
            capacity,
            strength,
            DefaultHashBuilder::default(),
        )
    }
}

impl<K, V, S> ReferenceHashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty map with at least `num_segments` segments, space
    /// for at least `capacity` elements, values held at `strength`, and
    /// `build_hasher` for hashing keys.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is 0.
    pub fn with_num_segments_capacity_strength_and_hasher(
        num_segments: usize,
        capacity: usize,
        strength: Strength,
        build_hasher: S,
    ) -> Self {
        Self {
            raw: RawMap::with_num_segments_capacity_and_bundle(
                num_segments,
                capacity,
                ReferenceBundle::new(Strength::Hard, strength),
            ),
            build_hasher,
        }
    }

    /// The number of elements in the map. Approximate under concurrency.
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

    /// The strength values are held at.
    pub fn value_strength(&self) -> Strength {
        self.raw.bundle().values()
    }

    /// A reference to the map's [`BuildHasher`].
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }

    /// The reclamation manager for this map.
    pub fn reclaimer(&self) -> &Arc<Reclaimer> {
        self.raw.reclaimer()
    }

    /// Polls the reclaimer and unlinks every entry whose value has been
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

impl<K, V, S> ReferenceHashMap<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher,
{
    /// Returns the value corresponding to `key`, if its entry is live.
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

/// A concurrent hash map keyed by reference identity, with hard keys and
/// one value strength fixed at construction.
///
/// The identity counterpart of [`ReferenceHashMap`], and the baseline for
/// [`ManagedIdentityHashMap`]. Keys are compared with [`Arc::ptr_eq`] and
/// held hard for the life of their entry.
///
/// [`ManagedIdentityHashMap`]: crate::ManagedIdentityHashMap
pub struct IdentityHashMap<K, V, S = DefaultHashBuilder> {
    raw: RawMap<K, V>,
    build_hasher: S,
}

#[cfg(feature = "num-cpus")]
impl<K, V> IdentityHashMap<K, V, DefaultHashBuilder>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty map holding its values at `strength`, with twice
    /// as many segments as the system has CPUs.
    pub fn with_strength(strength: Strength) -> Self {
        Self::with_num_segments_capacity_and_strength(common::default_num_segments(), 0, strength)
    }
}

impl<K, V> IdentityHashMap<K, V, DefaultHashBuilder>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty map with at least `num_segments` segments, holding
    /// its values at `strength`.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is 0.
    pub fn with_num_segments_and_strength(num_segments: usize, strength: Strength) -> Self {
        Self::with_num_segments_capacity_and_strength(num_segments, 0, strength)
    }

    /// Creates an empty map with at least `num_segments` segments and
    /// space for at least `capacity` elements, holding its values at
    /// `strength`.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is 0.
    pub fn with_num_segments_capacity_and_strength(
        num_segments: usize,
        capacity: usize,
        strength: Strength,
    ) -> Self {
        Self::with_num_segments_capacity_strength_and_hasher(
            num_segments,
            capacity,
            strength,
            DefaultHashBuilder::default(),
        )
    }
}

impl<K, V, S> IdentityHashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty map with at least `num_segments` segments, space
    /// for at least `capacity` elements, values held at `strength`, and
    /// `build_hasher` for mixing allocation addresses.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is 0.
    pub fn with_num_segments_capacity_strength_and_hasher(
        num_segments: usize,
        capacity: usize,
        strength: Strength,
        build_hasher: S,
    ) -> Self {
        Self {
            raw: RawMap::with_num_segments_capacity_and_bundle(
                num_segments,
                capacity,
                ReferenceBundle::new(Strength::Hard, strength),
            ),
            build_hasher,
        }
    }

    /// The number of elements in the map. Approximate under concurrency.
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

    /// The strength values are held at.
    pub fn value_strength(&self) -> Strength {
        self.raw.bundle().values()
    }

    /// A reference to the map's [`BuildHasher`].
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }

    /// The reclamation manager for this map.
    pub fn reclaimer(&self) -> &Arc<Reclaimer> {
        self.raw.reclaimer()
    }

    /// Polls the reclaimer and unlinks every entry whose value has been
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

impl<K, V, S> IdentityHashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher,
{
    /// Returns the value for the entry keyed by this exact handle, if it
    /// is live.
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
    /// if it was live.
    pub fn remove(&self, key: &Arc<K>) -> Option<Arc<V>> {
        let hash = IdentityEquality::hash(&self.build_hasher, key);

        self.raw
            .remove(hash, |candidate| IdentityEquality::eq(candidate, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_values_behave_like_a_plain_map() {
        let map = ReferenceHashMap::with_num_segments_and_strength(4, Strength::Hard);

        assert_eq!(map.put(Arc::new(1), Arc::new(10)), None);
        assert_eq!(map.put(Arc::new(1), Arc::new(20)).as_deref(), Some(&10));
        assert_eq!(map.get(&1).as_deref(), Some(&20));
        assert_eq!(map.remove(&1).as_deref(), Some(&20));
        assert!(map.is_empty());
    }

    #[test]
    fn weak_values_go_stale() {
        let map = ReferenceHashMap::with_num_segments_and_strength(4, Strength::Weak);

        let kept = Arc::new(10);
        map.put(Arc::new(1), Arc::clone(&kept));

        let dropped = Arc::new(20);
        map.put(Arc::new(2), Arc::clone(&dropped));
        drop(dropped);

        assert_eq!(map.get(&1).as_deref(), Some(&10));
        assert_eq!(map.get(&2), None);

        map.expunge_stale();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn soft_values_survive_until_pressure() {
        let map = ReferenceHashMap::with_num_segments_and_strength(4, Strength::Soft);

        map.put(Arc::new(1), Arc::new(10));

        assert_eq!(map.get(&1).as_deref(), Some(&10));

        map.reclaimer().pressure();
        map.expunge_stale();

        assert_eq!(map.get(&1), None);
        assert!(map.is_empty());
    }

    #[test]
    fn keys_are_never_reclaimed() {
        let map = ReferenceHashMap::with_num_segments_and_strength(4, Strength::Weak);

        let value = Arc::new(10);
        let key = Arc::new(1);
        map.put(Arc::clone(&key), Arc::clone(&value));
        drop(key);

        // Dropping the caller's key handle cannot stale the entry.
        map.expunge_stale();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&1).as_deref(), Some(&10));
    }

    #[test]
    fn identity_baseline_keys_by_handle() {
        let map = IdentityHashMap::with_num_segments_and_strength(4, Strength::Hard);

        let a = Arc::new("key".to_string());
        let b = Arc::new("key".to_string());

        assert_eq!(map.put(Arc::clone(&a), Arc::new(1)), None);
        assert_eq!(map.put(Arc::clone(&b), Arc::new(2)), None);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&a).as_deref(), Some(&1));
        assert_eq!(map.remove(&b).as_deref(), Some(&2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn identity_baseline_weak_values() {
        let map = IdentityHashMap::with_num_segments_and_strength(1, Strength::Weak);

        let key = Arc::new(1);
        let dropped = Arc::new(10);
        map.put(Arc::clone(&key), Arc::clone(&dropped));
        drop(dropped);

        assert_eq!(map.get(&key), None);

        map.expunge_stale();
        assert!(map.is_empty());
    }
}
