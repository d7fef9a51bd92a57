// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded multi-producer multi-consumer channel with explicit close.
//!
//! The operation set is deliberately small: blocking and non-blocking
//! push/pop, plus `close`. Closing is the only cancellation mechanism in
//! this crate, and its semantics are asymmetric on purpose: once closed,
//! every push fails immediately, while pops keep draining whatever is
//! already queued and only then start failing. That way a consumer can be
//! shut down without dropping accepted work on the floor.
//!
//! Capacities are powers of two, rounded up if needed, and a capacity of 1
//! is promoted to 2.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Error returned by [`Channel::try_push`], giving the value back.
#[derive(Debug, PartialEq, Eq)]
pub enum TryPushError<T> {
    Full(T),
    Closed(T),
}

/// Error returned by [`Channel::push`] when the channel is closed; gives
/// the value back.
#[derive(Debug, PartialEq, Eq)]
pub struct PushError<T>(pub T);

/// Error returned by [`Channel::try_pop`].
#[derive(Debug, PartialEq, Eq)]
pub enum TryPopError {
    Empty,
    /// Closed *and* drained.
    Closed,
}

/// Error returned by [`Channel::pop`]: the channel is closed and drained.
#[derive(Debug, PartialEq, Eq)]
pub struct PopError;

#[derive(Debug)]
struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
}

#[derive(Debug)]
pub struct Channel<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> Channel<T> {
    /// Creates a channel holding up to `capacity` values, after promoting
    /// 1 to 2 and rounding up to a power of two.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must not be zero");
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Enqueues `value`, blocking while the channel is full.
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.closed {
                return Err(PushError(value));
            }
            if inner.queue.len() < self.capacity {
                inner.queue.push_back(value);
                self.not_empty.notify_one();
                return Ok(());
            }
            inner = self.not_full.wait(inner).unwrap();
        }
    }

    /// Enqueues `value` if there is room right now.
    pub fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(TryPushError::Closed(value));
        }
        if inner.queue.len() == self.capacity {
            return Err(TryPushError::Full(value));
        }
        inner.queue.push_back(value);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues a value, blocking while the channel is empty and open.
    pub fn pop(&self) -> Result<T, PopError> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(value) = inner.queue.pop_front() {
                self.not_full.notify_one();
                return Ok(value);
            }
            if inner.closed {
                return Err(PopError);
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Dequeues a value if one is queued right now.
    pub fn try_pop(&self) -> Result<T, TryPopError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.queue.pop_front() {
            Some(value) => {
                self.not_full.notify_one();
                Ok(value)
            }
            None if inner.closed => Err(TryPopError::Closed),
            None => Err(TryPopError::Empty),
        }
    }

    /// Closes the channel and wakes every blocked producer and consumer.
    /// Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
