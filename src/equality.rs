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

//! Pluggable key comparison: structural equality or reference identity.
//!
//! A map binds one strategy at construction. [`ValueEquality`] delegates to
//! the key type's `Hash` and `Eq`; [`IdentityEquality`] hashes the `Arc`
//! allocation address and compares with [`Arc::ptr_eq`], so two structurally
//! equal but distinct keys occupy distinct entries.

use std::{
    hash::{BuildHasher, Hash},
    sync::Arc,
};

use crate::common;

/// Hashing and comparison over shared key handles.
pub trait Equality<K> {
    /// Hashes a key handle with the map's hasher.
    fn hash<S: BuildHasher>(build_hasher: &S, key: &Arc<K>) -> u64;

    /// Compares two key handles.
    fn eq(a: &Arc<K>, b: &Arc<K>) -> bool;
}

/// Structural equality: `hash` and `eq` of the key type itself.
pub enum ValueEquality {}

impl<K: Hash + Eq> Equality<K> for ValueEquality {
    fn hash<S: BuildHasher>(build_hasher: &S, key: &Arc<K>) -> u64 {
        common::hash(build_hasher, &**key)
    }

    fn eq(a: &Arc<K>, b: &Arc<K>) -> bool {
        **a == **b
    }
}

/// Reference identity: the allocation address is the hash and pointer
/// equality is the comparison. Places no bounds on the key type.
pub enum IdentityEquality {}

impl<K> Equality<K> for IdentityEquality {
    fn hash<S: BuildHasher>(build_hasher: &S, key: &Arc<K>) -> u64 {
        common::hash(build_hasher, &(Arc::as_ptr(key) as usize))
    }

    fn eq(a: &Arc<K>, b: &Arc<K>) -> bool {
        Arc::ptr_eq(a, b)
    }
}
