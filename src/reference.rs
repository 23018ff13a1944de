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

//! Reference strength policies, managed reference holders, and the
//! reclamation machinery that stands in for a garbage collector's reference
//! queue.
//!
//! Referents are shared handles (`Arc`). A holder created with
//! [`Strength::Hard`] owns its referent outright; [`Strength::Weak`] holders
//! only observe it and report cleared once every external `Arc` is gone;
//! [`Strength::Soft`] holders keep an internal strong retain that the
//! [`Reclaimer`] releases when memory pressure is reported, after which they
//! behave like weak holders.
//!
//! Clearing is detected by polling: every soft or weak holder registers a
//! liveness probe with its map's [`Reclaimer`]. A [`Reclaimer::scan`] walks
//! the probe registry and posts one stale event per cleared referent on a
//! many-producer/many-consumer channel; the owning map drains that channel
//! and expunges the affected buckets. Draining an event for an entry that is
//! already gone is a no-op, so racing drains are harmless.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Weak,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

/// How strongly an entry slot holds its referent against reclamation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Strength {
    /// Never reclaimed except by explicit removal.
    Hard,
    /// Reclaimed only once memory pressure has been reported via
    /// [`Reclaimer::pressure`] and no external strong reference remains.
    Soft,
    /// Reclaimed as soon as no external strong reference remains.
    Weak,
}

/// An immutable pair of key and value strengths, fixed at map construction.
///
/// The bundle is a pure factory: it carries no mutable state and is shared
/// freely across segments and threads.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReferenceBundle {
    keys: Strength,
    values: Strength,
}

impl ReferenceBundle {
    /// Creates a bundle with the given key and value strengths.
    pub const fn new(keys: Strength, values: Strength) -> Self {
        Self { keys, values }
    }

    /// Both slots hard: the map behaves like an ordinary concurrent map and
    /// never silently drops entries.
    pub const fn hard() -> Self {
        Self::new(Strength::Hard, Strength::Hard)
    }

    /// Both slots soft: entries survive until memory pressure is reported.
    pub const fn soft() -> Self {
        Self::new(Strength::Soft, Strength::Soft)
    }

    /// Both slots weak: entries vanish once their referents lose their last
    /// external strong reference.
    pub const fn weak() -> Self {
        Self::new(Strength::Weak, Strength::Weak)
    }

    /// The strength applied to key slots.
    pub const fn keys(&self) -> Strength {
        self.keys
    }

    /// The strength applied to value slots.
    pub const fn values(&self) -> Strength {
        self.values
    }
}

impl Default for ReferenceBundle {
    fn default() -> Self {
        Self::hard()
    }
}

/// A single key or value slot held under a [`Strength`] policy.
///
/// `get` returns the current referent or `None` once the holder has cleared;
/// it never blocks and touches no channel. Soft and weak holders may clear at
/// any point not caused by the container. Cloning a holder shares the same
/// probe registration, so a segment-local rehash does not re-register.
pub struct ManagedRef<T> {
    inner: RefInner<T>,
}

enum RefInner<T> {
    Hard(Arc<T>),
    Tracked(Arc<Tracked<T>>),
}

struct Tracked<T> {
    referent: Weak<T>,
    // Some(_) while a soft holder retains its referent; taken on pressure.
    retain: Mutex<Option<Arc<T>>>,
    strength: Strength,
    detached: AtomicBool,
}

impl<T: Send + Sync + 'static> ManagedRef<T> {
    /// Wraps `referent` under `strength`. Soft and weak holders register a
    /// liveness probe with `reclaimer`, keyed by the entry's precomputed
    /// `hash` so stale events can be routed back to the right bucket.
    pub(crate) fn new(
        referent: Arc<T>,
        strength: Strength,
        hash: u64,
        reclaimer: &Reclaimer,
    ) -> Self {
        let inner = match strength {
            Strength::Hard => RefInner::Hard(referent),
            Strength::Soft | Strength::Weak => {
                let retain = if strength == Strength::Soft {
                    Some(Arc::clone(&referent))
                } else {
                    None
                };

                let tracked = Arc::new(Tracked {
                    referent: Arc::downgrade(&referent),
                    retain: Mutex::new(retain),
                    strength,
                    detached: AtomicBool::new(false),
                });

                let weak = Arc::downgrade(&tracked);
                let probe: Weak<dyn Probe> = weak;
                reclaimer.register(hash, probe);

                RefInner::Tracked(tracked)
            }
        };

        Self { inner }
    }
}

impl<T> ManagedRef<T> {
    /// Returns the referent, or `None` if this holder has cleared.
    pub fn get(&self) -> Option<Arc<T>> {
        match &self.inner {
            RefInner::Hard(referent) => Some(Arc::clone(referent)),
            RefInner::Tracked(tracked) => {
                if tracked.detached.load(Ordering::Acquire) {
                    None
                } else {
                    tracked.referent.upgrade()
                }
            }
        }
    }

    /// Returns `true` once the referent is gone.
    pub fn is_cleared(&self) -> bool {
        match &self.inner {
            RefInner::Hard(_) => false,
            RefInner::Tracked(tracked) => {
                tracked.detached.load(Ordering::Acquire) || tracked.referent.strong_count() == 0
            }
        }
    }

    /// The strength this holder was created with. Soft holders keep
    /// reporting [`Strength::Soft`] after their retain has been released.
    pub fn strength(&self) -> Strength {
        match &self.inner {
            RefInner::Hard(_) => Strength::Hard,
            RefInner::Tracked(tracked) => tracked.strength,
        }
    }

    /// Explicitly invalidates the holder. Used on removal so the reclaimer
    /// prunes the probe registration instead of posting a stale event for an
    /// entry that is already unlinked.
    pub(crate) fn clear(&self) {
        if let RefInner::Tracked(tracked) = &self.inner {
            tracked.detached.store(true, Ordering::Release);
            tracked.retain.lock().take();
        }
    }
}

impl<T> Clone for ManagedRef<T> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            RefInner::Hard(referent) => RefInner::Hard(Arc::clone(referent)),
            RefInner::Tracked(tracked) => RefInner::Tracked(Arc::clone(tracked)),
        };

        Self { inner }
    }
}

/// A probe into one tracked referent, type-erased for the registry.
trait Probe: Send + Sync {
    /// The referent has been reclaimed and the holder was not explicitly
    /// cleared first.
    fn is_cleared(&self) -> bool;

    /// The holder was explicitly cleared by a removal.
    fn is_detached(&self) -> bool;

    /// Drops the soft retain, if any. A no-op for weak holders.
    fn release_retain(&self);
}

impl<T: Send + Sync> Probe for Tracked<T> {
    fn is_cleared(&self) -> bool {
        self.referent.strong_count() == 0
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    fn release_retain(&self) {
        self.retain.lock().take();
    }
}

/// A reclamation event: the precomputed hash of an entry whose key or value
/// holder has cleared. Carries enough to address the segment and bucket;
/// the expunge re-checks liveness before unlinking anything.
pub(crate) struct StaleEvent {
    pub(crate) hash: u64,
}

struct Registration {
    hash: u64,
    probe: Weak<dyn Probe>,
}

// Registry size at which `register` prunes dead and detached probes; the
// threshold then doubles from whatever survives, so pruning stays amortized
// O(1) per registration even when no one ever drives a scan.
const PRUNE_THRESHOLD: usize = 64;

/// The memory-manager collaborator: a registry of liveness probes plus the
/// sending half of the reclamation-notification channel.
///
/// Each map owns one `Reclaimer` and drains the receiving half of its
/// channel during writes and [`expunge_stale`]. `scan` and `pressure` may be
/// called from any thread at any time; both are idempotent. Registrations
/// whose holder is gone or was explicitly cleared are also pruned
/// amortized from `register` itself, so put/remove churn cannot grow the
/// registry without bound between scans.
///
/// [`expunge_stale`]: crate::ManagedHashMap::expunge_stale
pub struct Reclaimer {
    registry: Mutex<Vec<Registration>>,
    prune_at: AtomicUsize,
    stale_tx: Sender<StaleEvent>,
}

impl Reclaimer {
    pub(crate) fn new() -> (Arc<Self>, Receiver<StaleEvent>) {
        let (stale_tx, stale_rx) = crossbeam_channel::unbounded();

        let reclaimer = Arc::new(Self {
            registry: Mutex::new(Vec::new()),
            prune_at: AtomicUsize::new(PRUNE_THRESHOLD),
            stale_tx,
        });

        (reclaimer, stale_rx)
    }

    fn register(&self, hash: u64, probe: Weak<dyn Probe>) {
        let mut registry = self.registry.lock();
        registry.push(Registration { hash, probe });

        if registry.len() >= self.prune_at.load(Ordering::Relaxed) {
            // Cleared-but-live probes are kept: a later scan still has to
            // report them.
            registry.retain(|registration| match registration.probe.upgrade() {
                Some(tracked) => !tracked.is_detached(),
                None => false,
            });

            let next = (registry.len() * 2).max(PRUNE_THRESHOLD);
            self.prune_at.store(next, Ordering::Relaxed);
        }
    }

    /// Polls every registered probe. Cleared referents produce one stale
    /// event each; dead and explicitly cleared probes are pruned silently.
    ///
    /// Returns the number of stale events posted.
    pub fn scan(&self) -> usize {
        let mut posted = 0;
        let mut registry = self.registry.lock();

        registry.retain(|registration| {
            let tracked = match registration.probe.upgrade() {
                Some(tracked) => tracked,
                // The holder itself is gone; its entry was already unlinked.
                None => return false,
            };

            if tracked.is_detached() {
                return false;
            }

            if tracked.is_cleared() {
                let _ = self.stale_tx.send(StaleEvent {
                    hash: registration.hash,
                });
                posted += 1;

                return false;
            }

            true
        });

        posted
    }

    /// Reports memory pressure: releases every soft retain, then scans.
    ///
    /// Returns the number of stale events posted by the scan.
    pub fn pressure(&self) -> usize {
        {
            let registry = self.registry.lock();

            for registration in registry.iter() {
                if let Some(tracked) = registration.probe.upgrade() {
                    tracked.release_retain();
                }
            }
        }

        self.scan()
    }

    /// The number of live probe registrations; an observability aid for
    /// tests and diagnostics.
    pub fn registered(&self) -> usize {
        self.registry.lock().len()
    }
}
