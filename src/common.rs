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

//! Plumbing shared by the four map variants: hashing, segment selection,
//! and the composed segment array with its reclamation channel.

pub(crate) mod segment;

use std::{
    hash::{BuildHasher, Hash, Hasher},
    sync::Arc,
};

use crossbeam_channel::Receiver;
use crossbeam_epoch as epoch;

use crate::reference::{Reclaimer, ReferenceBundle, StaleEvent};

use segment::Segment;

#[cfg(feature = "num-cpus")]
pub(crate) fn default_num_segments() -> usize {
    num_cpus::get() * 2
}

pub(crate) fn hash<Q: ?Sized + Hash, S: BuildHasher>(build_hasher: &S, key: &Q) -> u64 {
    let mut hasher = build_hasher.build_hasher();
    key.hash(&mut hasher);

    hasher.finish()
}

/// A fixed array of segments, one reference bundle, and one reclamation
/// channel. The public map types layer an equality strategy and their
/// lookup signatures over this.
pub(crate) struct RawMap<K, V> {
    segments: Box<[Segment<K, V>]>,
    segment_shift: u32,
    bundle: ReferenceBundle,
    reclaimer: Arc<Reclaimer>,
    stale_rx: Receiver<StaleEvent>,
}

impl<K, V> RawMap<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// # Panics
    ///
    /// Panics if `num_segments` is 0.
    pub(crate) fn with_num_segments_capacity_and_bundle(
        num_segments: usize,
        capacity: usize,
        bundle: ReferenceBundle,
    ) -> Self {
        assert!(num_segments > 0);

        let actual_num_segments = num_segments.next_power_of_two();
        let segment_shift = 64 - actual_num_segments.trailing_zeros();
        let per_segment = capacity.div_ceil(actual_num_segments);

        let segments = (0..actual_num_segments)
            .map(|_| Segment::with_capacity(per_segment))
            .collect();

        let (reclaimer, stale_rx) = Reclaimer::new();

        Self {
            segments,
            segment_shift,
            bundle,
            reclaimer,
            stale_rx,
        }
    }

    pub(crate) fn get<F>(&self, hash: u64, matches: F) -> Option<Arc<V>>
    where
        F: Fn(&Arc<K>) -> bool,
    {
        let guard = &epoch::pin();

        self.segment(hash).get(guard, hash, matches)
    }

    pub(crate) fn put<F>(&self, hash: u64, key: Arc<K>, value: Arc<V>, matches: F) -> Option<Arc<V>>
    where
        F: Fn(&Arc<K>) -> bool,
    {
        let guard = &epoch::pin();

        self.drain_stale(guard);

        self.segment(hash)
            .put(guard, hash, key, value, self.bundle, &self.reclaimer, matches)
    }

    pub(crate) fn put_if_absent<F>(&self, hash: u64, key: Arc<K>, value: Arc<V>, matches: F) -> Arc<V>
    where
        F: Fn(&Arc<K>) -> bool,
    {
        let guard = &epoch::pin();

        self.drain_stale(guard);

        self.segment(hash).put_if_absent(
            guard,
            hash,
            key,
            value,
            self.bundle,
            &self.reclaimer,
            matches,
        )
    }

    pub(crate) fn remove<F>(&self, hash: u64, matches: F) -> Option<Arc<V>>
    where
        F: Fn(&Arc<K>) -> bool,
    {
        let guard = &epoch::pin();

        self.drain_stale(guard);

        self.segment(hash).remove(guard, hash, matches)
    }

    /// Sum of live segment counts. Approximate: entries that are stale but
    /// not yet expunged may transiently overcount; a `put` that has
    /// returned is always counted.
    pub(crate) fn len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Number of elements the map can hold before any segment resizes.
    pub(crate) fn capacity(&self) -> usize {
        let guard = &epoch::pin();

        self.segments
            .iter()
            .map(|segment| segment.capacity(guard))
            .sum()
    }

    pub(crate) fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn bundle(&self) -> ReferenceBundle {
        self.bundle
    }

    pub(crate) fn reclaimer(&self) -> &Arc<Reclaimer> {
        &self.reclaimer
    }

    /// Polls the reclaimer, then drains the notification channel and
    /// expunges every bucket named by a stale event, then sweeps each
    /// segment once for anything cleared between poll and drain.
    pub(crate) fn expunge_stale(&self) {
        let guard = &epoch::pin();

        self.reclaimer.scan();
        self.drain_stale(guard);

        for segment in self.segments.iter() {
            segment.expunge_all(guard);
        }
    }

    pub(crate) fn clear(&self) {
        let guard = &epoch::pin();

        for segment in self.segments.iter() {
            segment.clear(guard);
        }
    }

    pub(crate) fn values(&self) -> Vec<Arc<V>> {
        let guard = &epoch::pin();
        let mut values = Vec::new();

        for segment in self.segments.iter() {
            segment.collect_values(guard, &mut values);
        }

        values
    }

    /// Drains the segment's view of the reclamation channel. Each event
    /// addresses one bucket; expunging re-checks liveness, so draining an
    /// event for an entry another thread already removed is a no-op.
    fn drain_stale(&self, guard: &epoch::Guard) {
        while let Ok(event) = self.stale_rx.try_recv() {
            self.segment(event.hash).expunge(guard, event.hash);
        }
    }

    fn segment(&self, hash: u64) -> &Segment<K, V> {
        // One segment means no selection arithmetic at all.
        let index = if self.segment_shift == 64 {
            0
        } else {
            (hash >> self.segment_shift) as usize
        };

        &self.segments[index]
    }
}
