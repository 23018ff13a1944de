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

//! Lock-striped concurrent hash maps whose keys and values are held at a
//! configurable reference strength.
//!
//! Each slot of an entry holds its referent hard (an owning [`Arc`]), soft
//! (droppable under memory pressure), or weak (droppable as soon as no
//! owner remains). An entry whose key or value referent is reclaimed
//! becomes *stale*: logically absent immediately, physically unlinked
//! lazily by later writes or an explicit [`expunge_stale`] sweep. Readers
//! never take a lock; writers to different segments never contend.
//!
//! Four map types share one segment core:
//!
//!  - [`ManagedHashMap`]: structural key equality, full
//!    [`ReferenceBundle`] configuration.
//!  - [`ManagedIdentityHashMap`]: keys compared by [`Arc::ptr_eq`], full
//!    bundle configuration, suited to single-segment hot caches.
//!  - [`ReferenceHashMap`] and [`IdentityHashMap`]: baselines with hard
//!    keys and one configurable value [`Strength`].
//!
//! Memory reclamation of unlinked nodes uses [crossbeam-epoch]; referent
//! reclamation is driven by each map's [`Reclaimer`], which polls
//! registered holders and reports cleared ones over a channel.
//!
//! [`Arc`]: std::sync::Arc
//! [`Arc::ptr_eq`]: std::sync::Arc::ptr_eq
//! [`expunge_stale`]: ManagedHashMap::expunge_stale
//! [crossbeam-epoch]: https://docs.rs/crossbeam-epoch

pub mod baseline;
pub mod equality;
pub mod identity;
pub mod managed;
pub mod reference;

pub(crate) mod common;

pub use baseline::{IdentityHashMap, ReferenceHashMap};
pub use equality::{Equality, IdentityEquality, ValueEquality};
pub use identity::ManagedIdentityHashMap;
pub use managed::ManagedHashMap;
pub use reference::{ManagedRef, Reclaimer, ReferenceBundle, Strength};

/// Default hashing algorithm: [aHash].
///
/// [aHash]: https://docs.rs/ahash
pub type DefaultHashBuilder = ahash::RandomState;

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    const NUM_THREADS: usize = 8;
    const KEYS_PER_THREAD: usize = 512;

    #[test]
    fn concurrent_disjoint_insertion() {
        let map = Arc::new(ManagedHashMap::with_num_segments(4));
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|t| {
                let map = Arc::clone(&map);
                let barrier = Arc::clone(&barrier);

                thread::spawn(move || {
                    barrier.wait();

                    for i in 0..KEYS_PER_THREAD {
                        let key = t * KEYS_PER_THREAD + i;
                        assert_eq!(map.put(Arc::new(key), Arc::new(key)), None);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), NUM_THREADS * KEYS_PER_THREAD);

        for key in 0..NUM_THREADS * KEYS_PER_THREAD {
            assert_eq!(map.get(&key).as_deref(), Some(&key));
        }
    }

    #[test]
    fn concurrent_puts_and_gets_over_shared_range() {
        // Seed 0..150, then race inserters of 100..200 against readers of
        // the whole range. A key that was ever inserted must always read
        // back as itself.
        let map = Arc::new(ManagedHashMap::with_num_segments(4));

        for i in 0..150 {
            map.put(Arc::new(i), Arc::new(i));
        }

        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();

        for _ in 0..2 {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);

            handles.push(thread::spawn(move || {
                barrier.wait();

                for i in 100..200 {
                    if let Some(previous) = map.put(Arc::new(i), Arc::new(i)) {
                        assert_eq!(*previous, i);
                    }
                }
            }));
        }

        for _ in 0..2 {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);

            handles.push(thread::spawn(move || {
                barrier.wait();

                for _ in 0..10 {
                    for i in 0..200 {
                        if let Some(value) = map.get(&i) {
                            assert_eq!(*value, i);
                        } else {
                            assert!(i >= 150);
                        }
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 200);
    }

    #[test]
    fn concurrent_removal_is_exclusive() {
        let map = Arc::new(ManagedHashMap::with_num_segments(4));

        for i in 0..KEYS_PER_THREAD {
            map.put(Arc::new(i), Arc::new(i));
        }

        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let map = Arc::clone(&map);
                let barrier = Arc::clone(&barrier);

                thread::spawn(move || {
                    barrier.wait();

                    let mut removed = 0;

                    for i in 0..KEYS_PER_THREAD {
                        if let Some(value) = map.remove(&i) {
                            assert_eq!(*value, i);
                            removed += 1;
                        }
                    }

                    removed
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(total, KEYS_PER_THREAD);
        assert!(map.is_empty());
    }

    #[test]
    fn replaced_values_stay_visible_to_readers() {
        // Both referents stay strongly held, so key 0 is continuously
        // mapped; a reader must never observe it as absent while the writer
        // swaps its value back and forth.
        let map = Arc::new(ManagedHashMap::with_num_segments_and_bundle(
            1,
            ReferenceBundle::new(Strength::Hard, Strength::Weak),
        ));

        let first = Arc::new(1);
        let second = Arc::new(2);
        map.put(Arc::new(0), Arc::clone(&first));

        let barrier = Arc::new(Barrier::new(2));

        let writer = {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            let first = Arc::clone(&first);
            let second = Arc::clone(&second);

            thread::spawn(move || {
                barrier.wait();

                for _ in 0..20_000 {
                    map.put(Arc::new(0), Arc::clone(&second));
                    map.put(Arc::new(0), Arc::clone(&first));
                }
            })
        };

        let reader = {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();

                for _ in 0..100_000 {
                    let value = map.get(&0);
                    assert!(matches!(value.as_deref(), Some(&1) | Some(&2)));
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn readers_never_observe_torn_entries() {
        // All writers hammer one segment while a reader loops. Every key is
        // always mapped to itself, so any other observation is a torn read.
        let map = Arc::new(ManagedHashMap::with_num_segments(1));
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let mut handles = Vec::new();

        for _ in 0..NUM_THREADS - 1 {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);

            handles.push(thread::spawn(move || {
                barrier.wait();

                for round in 0..32 {
                    for key in 0..64 {
                        map.put(Arc::new(key), Arc::new(key));

                        if (key + round) % 8 == 0 {
                            map.remove(&key);
                        }
                    }
                }
            }));
        }

        {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);

            handles.push(thread::spawn(move || {
                barrier.wait();

                for _ in 0..256 {
                    for key in 0..64 {
                        if let Some(value) = map.get(&key) {
                            assert_eq!(*value, key);
                        }
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn concurrent_identity_insertion() {
        let map = Arc::new(ManagedIdentityHashMap::with_num_segments(1));
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|t| {
                let map = Arc::clone(&map);
                let barrier = Arc::clone(&barrier);

                thread::spawn(move || {
                    barrier.wait();

                    let keys: Vec<_> = (0..KEYS_PER_THREAD).map(|i| Arc::new((t, i))).collect();

                    for (i, key) in keys.iter().enumerate() {
                        assert_eq!(map.put(Arc::clone(key), Arc::new(i)), None);
                    }

                    for (i, key) in keys.iter().enumerate() {
                        assert_eq!(map.get(key).as_deref(), Some(&i));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), NUM_THREADS * KEYS_PER_THREAD);
    }

    #[test]
    fn concurrent_expunge_and_reads() {
        let map = Arc::new(ManagedHashMap::with_num_segments_and_bundle(
            4,
            ReferenceBundle::new(Strength::Hard, Strength::Weak),
        ));

        // Half the values lose their last owner immediately.
        let keepers: Vec<_> = (0..KEYS_PER_THREAD)
            .filter(|i| i % 2 == 0)
            .map(|i| {
                let value = Arc::new(i);
                map.put(Arc::new(i), Arc::clone(&value));
                value
            })
            .collect();

        for i in (0..KEYS_PER_THREAD).filter(|i| i % 2 == 1) {
            map.put(Arc::new(i), Arc::new(i));
        }

        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();

        for _ in 0..2 {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);

            handles.push(thread::spawn(move || {
                barrier.wait();
                map.expunge_stale();
            }));
        }

        for _ in 0..2 {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);

            handles.push(thread::spawn(move || {
                barrier.wait();

                for i in (0..KEYS_PER_THREAD).filter(|i| i % 2 == 0) {
                    assert_eq!(map.get(&i).as_deref(), Some(&i));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        map.expunge_stale();
        assert_eq!(map.len(), keepers.len());
    }
}
