// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lock-wrapped versions of the pool types.
//!
//! The inner types are single-threaded on purpose; sharing is opt-in by
//! wrapping, not built in. Each operation takes the lock for exactly its
//! own duration.

use crate::{SegregatedStorage, UnorderedObjectPool, DEFAULT_CLUSTER_SIZE};
use core::ptr::NonNull;
use spin::Mutex;

/// [`UnorderedObjectPool`] behind a mutex.
pub struct ConcurrentObjectPool<T, const CLUSTER_SIZE: usize = 1024> {
    inner: Mutex<UnorderedObjectPool<T, CLUSTER_SIZE>>,
}

impl<T, const CLUSTER_SIZE: usize> ConcurrentObjectPool<T, CLUSTER_SIZE> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(UnorderedObjectPool::new()),
        }
    }

    pub fn with_capacity(reserved: usize) -> Self {
        Self {
            inner: Mutex::new(UnorderedObjectPool::with_capacity(reserved)),
        }
    }

    pub fn allocate(&self) -> NonNull<T> {
        self.inner.lock().allocate()
    }

    pub fn allocate_zeroed(&self) -> NonNull<T> {
        self.inner.lock().allocate_zeroed()
    }

    pub fn construct(&self, value: T) -> NonNull<T> {
        self.inner.lock().construct(value)
    }

    /// See [`UnorderedObjectPool::deallocate`].
    ///
    /// # Safety
    ///
    /// Same contract as the unlocked version; additionally, no other thread
    /// may still be using the value at `p`.
    pub unsafe fn deallocate(&self, p: NonNull<T>) {
        unsafe { self.inner.lock().deallocate(p) }
    }

    /// See [`UnorderedObjectPool::destroy`].
    ///
    /// # Safety
    ///
    /// Same contract as the unlocked version; additionally, no other thread
    /// may still be using the value at `p`.
    pub unsafe fn destroy(&self, p: NonNull<T>) {
        unsafe { self.inner.lock().destroy(p) }
    }

    pub fn reserve(&self, required: usize) {
        self.inner.lock().reserve(required)
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    pub fn num_clusters(&self) -> usize {
        self.inner.lock().num_clusters()
    }
}

impl<T> Default for ConcurrentObjectPool<T, DEFAULT_CLUSTER_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

/// [`SegregatedStorage`] behind a mutex.
pub struct ConcurrentSegregatedStorage {
    inner: Mutex<SegregatedStorage>,
}

impl ConcurrentSegregatedStorage {
    /// # Safety
    ///
    /// Same contract as [`SegregatedStorage::new`].
    pub unsafe fn new(
        base: NonNull<u8>,
        buf_size: usize,
        block_size: usize,
    ) -> Self {
        Self {
            inner: Mutex::new(unsafe {
                SegregatedStorage::new(base, buf_size, block_size)
            }),
        }
    }

    pub fn allocate(&self) -> Option<NonNull<u8>> {
        self.inner.lock().allocate()
    }

    /// # Safety
    ///
    /// Same contract as [`SegregatedStorage::deallocate`]; additionally, no
    /// other thread may still be using the block at `p`.
    pub unsafe fn deallocate(&self, p: NonNull<u8>) {
        unsafe { self.inner.lock().deallocate(p) }
    }

    pub fn reset(&self) {
        self.inner.lock().reset()
    }

    pub fn fill_rate(&self) -> f64 {
        self.inner.lock().fill_rate()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().is_full()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }
}
