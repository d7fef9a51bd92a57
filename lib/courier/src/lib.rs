// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Channel-based asynchronous message passing.
//!
//! The model: callers own their messages and hand out raw handles; a
//! [`MessageBroker`] owns a bounded [`Channel`] of handles and a consumer
//! thread that runs a user-supplied processor on each one, in channel
//! order. In front of the broker sits a *transmission policy* deciding how
//! a [`post`](framework::MessageFramework::post) reaches the broker:
//!
//! - [`Synchronous`](relay::Synchronous) forwards directly; the caller sees
//!   the broker's channel status (including `ChannelFull`) as the return
//!   code and deals with it.
//! - [`AsyncRelay`](relay::AsyncRelay) accepts posts on its own channel and
//!   has a relay thread feed the broker, holding back-pressured messages in
//!   a pending FIFO and reporting per-message progress
//!   (`Pending`/`Success`/`RelayError`) through a callback embedded in the
//!   message.
//!
//! A [`MessageFramework`](framework::MessageFramework) binds one policy to
//! one broker and enforces the teardown order (policy first, then broker).
//!
//! Since messages travel as raw pointers, the rules are the ones you would
//! expect from an in-process mailbox: a posted message must stay alive and
//! untouched until the broker's processor is done with it (for the async
//! policy: until its terminal callback has fired).

mod broker;
mod channel;
pub mod framework;
pub mod relay;
mod status;

pub use broker::{BrokerConfig, BrokerHandle, MessageBroker, MsgProc};
pub use channel::{
    Channel, PopError, PushError, TryPopError, TryPushError,
};
pub use framework::{
    AsyncMessageFramework, MessageFramework, SyncMessageFramework,
};
pub use relay::{
    AsyncRelay, ControlBlock, RelayCallback, RelayMessage, Synchronous,
    TransmissionPolicy,
};
pub use status::Status;

use core::ptr::NonNull;

/// A raw, copyable handle to a caller-owned message.
///
/// The framework never owns messages; it moves handles around and hands
/// them back in processors and callbacks. The caller keeps the message
/// alive and refrains from touching it while it is in flight.
#[derive(Debug, PartialEq, Eq)]
pub struct MessageHandle<M>(NonNull<M>);

impl<M> MessageHandle<M> {
    pub fn new(p: NonNull<M>) -> Self {
        Self(p)
    }

    pub fn as_ptr(self) -> *mut M {
        self.0.as_ptr()
    }

    /// # Safety
    ///
    /// The message must be alive and not concurrently written.
    pub unsafe fn as_ref<'a>(self) -> &'a M {
        unsafe { self.0.as_ref() }
    }

    /// # Safety
    ///
    /// The message must be alive and this must be the only access to it.
    pub unsafe fn as_mut<'a>(mut self) -> &'a mut M {
        unsafe { self.0.as_mut() }
    }
}

impl<M> Clone for MessageHandle<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for MessageHandle<M> {}

// Safety: a handle is just a pointer; what makes cross-thread use sound is
// the in-flight ownership rule documented on the type, which is exactly the
// rule Send on the payload expresses.
unsafe impl<M: Send> Send for MessageHandle<M> {}
