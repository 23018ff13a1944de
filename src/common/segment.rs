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

//! One lock-protected stripe of the hash table.
//!
//! A segment is a bucket array of atomic chain heads, an exclusive write
//! lock, and a live-entry count. Readers never take the lock: they load the
//! table pointer with consume ordering, walk the chain, and retry if a
//! segment-local resize swapped the table out from under them, falling back
//! to a locked scan after a few failed attempts. Writers serialize on the
//! segment lock, publish new chain heads with release stores, and retire
//! unlinked entries and replaced value holders through the epoch collector
//! so in-flight readers never touch freed memory.
//!
//! Entries whose key or value holder has cleared are logically absent.
//! Readers skip them; writers unlink them whenever a scan walks past one
//! (expunge-on-write), and [`Segment::expunge`] unlinks them on demand when
//! a stale event is drained.

use std::sync::{
    atomic::{self, AtomicUsize, Ordering},
    Arc,
};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use parking_lot::Mutex;

use crate::reference::{ManagedRef, ReferenceBundle, Reclaimer};

const MIN_BUCKETS: usize = 4;

// Lock-free scans re-run when they race a resize; after this many attempts
// the scan falls back to running under the segment lock.
const MAX_SCAN_RETRIES: usize = 4;

pub(crate) struct Entry<K, V> {
    hash: u64,
    key: ManagedRef<K>,
    value: Atomic<ManagedRef<V>>,
    next: Atomic<Entry<K, V>>,
}

impl<K, V> Drop for Entry<K, V> {
    fn drop(&mut self) {
        // The entry owns its current value holder; replaced holders were
        // retired separately at swap time.
        unsafe {
            let value = self.value.load(Ordering::Relaxed, epoch::unprotected());

            if !value.is_null() {
                drop(value.into_owned());
            }
        }
    }
}

struct Table<K, V> {
    heads: Box<[Atomic<Entry<K, V>>]>,
    mask: usize,
}

impl<K, V> Table<K, V> {
    fn with_buckets(buckets: usize) -> Self {
        assert!(buckets.is_power_of_two());

        let heads = (0..buckets).map(|_| Atomic::null()).collect();

        Self {
            heads,
            mask: buckets - 1,
        }
    }

    fn buckets(&self) -> usize {
        self.heads.len()
    }

    fn head(&self, hash: u64) -> &Atomic<Entry<K, V>> {
        &self.heads[(hash as usize) & self.mask]
    }
}

pub(crate) struct Segment<K, V> {
    table: Atomic<Table<K, V>>,
    lock: Mutex<()>,
    len: AtomicUsize,
}

impl<K, V> Segment<K, V> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let buckets = (capacity * 2).next_power_of_two().max(MIN_BUCKETS);

        Self {
            table: Atomic::new(Table::with_buckets(buckets)),
            lock: Mutex::new(()),
            len: AtomicUsize::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn capacity(&self, guard: &Guard) -> usize {
        let table = unsafe { self.table.load_consume(guard).deref() };

        table.buckets() * 3 / 4
    }

    /// Lock-free lookup. May observe any consistent past or present state of
    /// the bucket chain, never a torn entry; a concurrent table swap only
    /// forces a retry.
    pub(crate) fn get<'g, F>(&self, guard: &'g Guard, hash: u64, matches: F) -> Option<Arc<V>>
    where
        F: Fn(&Arc<K>) -> bool,
    {
        for _ in 0..MAX_SCAN_RETRIES {
            let table_ptr = self.table.load_consume(guard);
            let table = unsafe { table_ptr.deref() };

            let found = Self::scan(guard, table, hash, &matches);

            if self.table.load(Ordering::Acquire, guard) == table_ptr {
                return found;
            }
        }

        let _write = self.lock.lock();
        let table = unsafe { self.table.load_consume(guard).deref() };

        Self::scan(guard, table, hash, &matches)
    }

    fn scan<'g, F>(
        guard: &'g Guard,
        table: &'g Table<K, V>,
        hash: u64,
        matches: &F,
    ) -> Option<Arc<V>>
    where
        F: Fn(&Arc<K>) -> bool,
    {
        let mut current = table.head(hash).load_consume(guard);

        while let Some(entry) = unsafe { current.as_ref() } {
            if entry.hash == hash {
                if let Some(key) = entry.key.get() {
                    if matches(&key) {
                        let value_ref = unsafe { entry.value.load_consume(guard).deref() };

                        if let Some(value) = value_ref.get() {
                            return Some(value);
                        }

                        // Key matched but the value holder cleared: the
                        // entry is stale; a fresh one would sit closer to
                        // the chain head, so keep walking.
                    }
                }
            }

            current = entry.next.load_consume(guard);
        }

        None
    }

    /// Inserts or replaces under the segment lock, returning the previous
    /// value of a live matching entry. Stale entries met on the way are
    /// unlinked.
    pub(crate) fn put<'g, F>(
        &self,
        guard: &'g Guard,
        hash: u64,
        key: Arc<K>,
        value: Arc<V>,
        bundle: ReferenceBundle,
        reclaimer: &Reclaimer,
        matches: F,
    ) -> Option<Arc<V>>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
        F: Fn(&Arc<K>) -> bool,
    {
        let _write = self.lock.lock();

        let table_ptr = self.table.load(Ordering::Acquire, guard);
        let table = unsafe { table_ptr.deref() };
        let head = table.head(hash);

        let mut previous = head;
        let mut current = previous.load(Ordering::Acquire, guard);

        while let Some(entry) = unsafe { current.as_ref() } {
            let next = entry.next.load(Ordering::Acquire, guard);

            let entry_key = match entry.key.get() {
                Some(entry_key) => entry_key,
                None => {
                    self.unlink(guard, previous, current, next);
                    current = next;
                    continue;
                }
            };

            let value_ref = unsafe { entry.value.load(Ordering::Acquire, guard).deref() };

            if value_ref.get().is_none() {
                self.unlink(guard, previous, current, next);
                current = next;
                continue;
            }

            if entry.hash == hash && matches(&entry_key) {
                let replacement = ManagedRef::new(value, bundle.values(), hash, reclaimer);
                let old_ptr = entry
                    .value
                    .swap(Owned::new(replacement), Ordering::AcqRel, guard);

                let old_ref = unsafe { old_ptr.deref() };
                let old_value = old_ref.get();

                // The old holder must not be cleared: a reader that loaded
                // it before the swap still has to see the old referent. Its
                // probe registration is pruned once the holder drops.
                unsafe { guard.defer_destroy(old_ptr) };

                return old_value;
            }

            previous = &entry.next;
            current = next;
        }

        let key_ref = ManagedRef::new(key, bundle.keys(), hash, reclaimer);
        let value_ref = ManagedRef::new(value, bundle.values(), hash, reclaimer);

        // The walk may have unlinked the old first entry; reload the head.
        let first = head.load(Ordering::Acquire, guard);

        let entry = Owned::new(Entry {
            hash,
            key: key_ref,
            value: Atomic::new(value_ref),
            next: Atomic::null(),
        });
        entry.next.store(first, Ordering::Relaxed);

        head.store(entry, Ordering::Release);
        self.len.fetch_add(1, Ordering::Relaxed);

        if self.len.load(Ordering::Relaxed) * 4 > table.buckets() * 3 {
            self.grow(guard, table_ptr);
        }

        None
    }

    /// Inserts only if no live entry matches, returning the value that is in
    /// the map afterwards.
    pub(crate) fn put_if_absent<'g, F>(
        &self,
        guard: &'g Guard,
        hash: u64,
        key: Arc<K>,
        value: Arc<V>,
        bundle: ReferenceBundle,
        reclaimer: &Reclaimer,
        matches: F,
    ) -> Arc<V>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
        F: Fn(&Arc<K>) -> bool,
    {
        let _write = self.lock.lock();

        let table_ptr = self.table.load(Ordering::Acquire, guard);
        let table = unsafe { table_ptr.deref() };
        let head = table.head(hash);

        let mut previous = head;
        let mut current = previous.load(Ordering::Acquire, guard);

        while let Some(entry) = unsafe { current.as_ref() } {
            let next = entry.next.load(Ordering::Acquire, guard);

            let entry_key = match entry.key.get() {
                Some(entry_key) => entry_key,
                None => {
                    self.unlink(guard, previous, current, next);
                    current = next;
                    continue;
                }
            };

            let value_ref = unsafe { entry.value.load(Ordering::Acquire, guard).deref() };

            match value_ref.get() {
                Some(existing) if entry.hash == hash && matches(&entry_key) => {
                    return existing;
                }
                Some(_) => {
                    previous = &entry.next;
                    current = next;
                }
                None => {
                    self.unlink(guard, previous, current, next);
                    current = next;
                }
            }
        }

        let inserted = Arc::clone(&value);
        let key_ref = ManagedRef::new(key, bundle.keys(), hash, reclaimer);
        let value_ref = ManagedRef::new(value, bundle.values(), hash, reclaimer);

        let first = head.load(Ordering::Acquire, guard);

        let entry = Owned::new(Entry {
            hash,
            key: key_ref,
            value: Atomic::new(value_ref),
            next: Atomic::null(),
        });
        entry.next.store(first, Ordering::Relaxed);

        head.store(entry, Ordering::Release);
        self.len.fetch_add(1, Ordering::Relaxed);

        if self.len.load(Ordering::Relaxed) * 4 > table.buckets() * 3 {
            self.grow(guard, table_ptr);
        }

        inserted
    }

    /// Unlinks a live matching entry under the segment lock, explicitly
    /// clearing both holders so their probe registrations are pruned rather
    /// than reported.
    pub(crate) fn remove<'g, F>(&self, guard: &'g Guard, hash: u64, matches: F) -> Option<Arc<V>>
    where
        F: Fn(&Arc<K>) -> bool,
    {
        let _write = self.lock.lock();

        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        let head = table.head(hash);

        let mut previous = head;
        let mut current = previous.load(Ordering::Acquire, guard);

        while let Some(entry) = unsafe { current.as_ref() } {
            let next = entry.next.load(Ordering::Acquire, guard);

            let entry_key = match entry.key.get() {
                Some(entry_key) => entry_key,
                None => {
                    self.unlink(guard, previous, current, next);
                    current = next;
                    continue;
                }
            };

            let value_ref = unsafe { entry.value.load(Ordering::Acquire, guard).deref() };

            match value_ref.get() {
                Some(old_value) if entry.hash == hash && matches(&entry_key) => {
                    self.unlink(guard, previous, current, next);

                    return Some(old_value);
                }
                Some(_) => {
                    previous = &entry.next;
                    current = next;
                }
                None => {
                    self.unlink(guard, previous, current, next);
                    current = next;
                }
            }
        }

        None
    }

    /// Unlinks every stale entry in the bucket chain for `hash`. Invoked
    /// when a stale event is drained; idempotent under races.
    pub(crate) fn expunge(&self, guard: &Guard, hash: u64) {
        let _write = self.lock.lock();

        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };

        self.expunge_chain(guard, table.head(hash));
    }

    /// Sweeps every bucket chain in this segment.
    pub(crate) fn expunge_all(&self, guard: &Guard) {
        let _write = self.lock.lock();

        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };

        for head in table.heads.iter() {
            self.expunge_chain(guard, head);
        }
    }

    fn expunge_chain<'g>(&self, guard: &'g Guard, head: &'g Atomic<Entry<K, V>>) {
        let mut previous = head;
        let mut current = previous.load(Ordering::Acquire, guard);

        while let Some(entry) = unsafe { current.as_ref() } {
            let next = entry.next.load(Ordering::Acquire, guard);

            let value_ref = unsafe { entry.value.load(Ordering::Acquire, guard).deref() };

            if entry.key.is_cleared() || value_ref.is_cleared() {
                self.unlink(guard, previous, current, next);
            } else {
                previous = &entry.next;
            }

            current = next;
        }
    }

    /// Drops every entry in this segment under the lock.
    pub(crate) fn clear(&self, guard: &Guard) {
        let _write = self.lock.lock();

        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };

        for head in table.heads.iter() {
            let mut current = head.swap(Shared::null(), Ordering::AcqRel, guard);

            while let Some(entry) = unsafe { current.as_ref() } {
                let next = entry.next.load(Ordering::Acquire, guard);

                entry.key.clear();
                unsafe { entry.value.load(Ordering::Acquire, guard).deref() }.clear();
                unsafe { guard.defer_destroy(current) };
                self.len.fetch_sub(1, Ordering::Relaxed);

                current = next;
            }
        }
    }

    /// Best-effort snapshot of the live values in this segment.
    pub(crate) fn collect_values(&self, guard: &Guard, values: &mut Vec<Arc<V>>) {
        let table = unsafe { self.table.load_consume(guard).deref() };

        for head in table.heads.iter() {
            let mut current = head.load_consume(guard);

            while let Some(entry) = unsafe { current.as_ref() } {
                if !entry.key.is_cleared() {
                    let value_ref = unsafe { entry.value.load_consume(guard).deref() };

                    if let Some(value) = value_ref.get() {
                        values.push(value);
                    }
                }

                current = entry.next.load_consume(guard);
            }
        }
    }

    fn unlink<'g>(
        &self,
        guard: &'g Guard,
        previous: &'g Atomic<Entry<K, V>>,
        current: Shared<'g, Entry<K, V>>,
        next: Shared<'g, Entry<K, V>>,
    ) {
        previous.store(next, Ordering::Release);

        let entry = unsafe { current.deref() };
        entry.key.clear();
        unsafe { entry.value.load(Ordering::Acquire, guard).deref() }.clear();

        unsafe { guard.defer_destroy(current) };
        self.len.fetch_sub(1, Ordering::Relaxed);
    }

    /// Segment-local resize: doubles the bucket array and relinks only this
    /// segment's live entries into fresh nodes, so readers still walking the
    /// old chains observe an intact snapshot. Must be called with the
    /// segment lock held.
    fn grow<'g>(&self, guard: &'g Guard, table_ptr: Shared<'g, Table<K, V>>) {
        let table = unsafe { table_ptr.deref() };
        let new_table = Table::with_buckets(table.buckets() * 2);

        for head in table.heads.iter() {
            let mut current = head.load(Ordering::Acquire, guard);

            while let Some(entry) = unsafe { current.as_ref() } {
                let next = entry.next.load(Ordering::Acquire, guard);

                let value_ref = unsafe { entry.value.load(Ordering::Acquire, guard).deref() };

                if entry.key.is_cleared() || value_ref.is_cleared() {
                    entry.key.clear();
                    value_ref.clear();
                    self.len.fetch_sub(1, Ordering::Relaxed);
                } else {
                    let slot = new_table.head(entry.hash);
                    let first = slot.load(Ordering::Relaxed, guard);

                    let moved = Owned::new(Entry {
                        hash: entry.hash,
                        key: entry.key.clone(),
                        value: Atomic::new(value_ref.clone()),
                        next: Atomic::null(),
                    });
                    moved.next.store(first, Ordering::Relaxed);

                    slot.store(moved, Ordering::Relaxed);
                }

                unsafe { guard.defer_destroy(current) };
                current = next;
            }
        }

        self.table.store(Owned::new(new_table), Ordering::Release);

        unsafe { guard.defer_destroy(table_ptr) };
    }
}

impl<K, V> Drop for Segment<K, V> {
    fn drop(&mut self) {
        atomic::fence(Ordering::Acquire);

        unsafe {
            let guard = epoch::unprotected();
            let table_ptr = self.table.load(Ordering::Relaxed, guard);

            if let Some(table) = table_ptr.as_ref() {
                for head in table.heads.iter() {
                    let mut current = head.load(Ordering::Relaxed, guard);

                    while let Some(entry) = current.as_ref() {
                        let next = entry.next.load(Ordering::Relaxed, guard);
                        drop(current.into_owned());
                        current = next;
                    }
                }

                drop(table_ptr.into_owned());
            }
        }
    }
}
