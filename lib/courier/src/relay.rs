// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transmission policies: how a `post` reaches the broker.
//!
//! [`Synchronous`] is the degenerate policy: `post` is a direct
//! `send_message`, and the caller deals with `ChannelFull` itself.
//!
//! [`AsyncRelay`] decouples posting from delivery. Posts go into the
//! relay's own channel; a relay thread drains that channel into a pending
//! FIFO and forwards the FIFO head to the broker. When the broker's
//! channel is full the head simply stays put and forwarding resumes after
//! a short pause, so back-pressure never reorders messages. Callers are
//! kept informed per message through a callback in the message's
//! [`ControlBlock`]:
//!
//! - `Pending` -- once, the first time the message has to wait (either
//!   because older messages are already pending, or on the first full-
//!   channel rejection);
//! - `Success` -- the message was handed to the broker;
//! - `RelayError` -- the broker rejected it for a reason other than being
//!   full; the relay gives up and shuts down.
//!
//! Messages posted to a relay must embed a control block and say so by
//! implementing [`RelayMessage`].

use crate::broker::BrokerHandle;
use crate::channel::{Channel, PopError, TryPopError};
use crate::{MessageHandle, Status};
use bitflags::bitflags;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Capacity of the relay's inbound channel.
const RELAY_CHANNEL_CAPACITY: usize = 32;
static_assertions::const_assert!(RELAY_CHANNEL_CAPACITY.is_power_of_two());

/// How long the relay pauses before retrying a head that is already marked
/// pending and still cannot be forwarded.
const FULL_RETRY_PAUSE: Duration = Duration::from_micros(50);

/// Per-message progress callback. Runs on the relay thread.
///
/// A `Success` callback can race the broker's processor (the message has
/// already been handed over), so it must limit itself to state that is
/// safe to share with the processor.
pub type RelayCallback<M> = fn(MessageHandle<M>, Status);

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    struct CtlFlags: u32 {
        const PENDING = 1 << 0;
    }
}

/// Relay state embedded in every message that travels through an
/// [`AsyncRelay`]. The relay owns its contents while the message is in
/// flight; the poster only configures the callback up front.
pub struct ControlBlock<M> {
    flags: CtlFlags,
    callback: Option<RelayCallback<M>>,
}

impl<M> ControlBlock<M> {
    pub fn new() -> Self {
        Self {
            flags: CtlFlags::empty(),
            callback: None,
        }
    }

    pub fn set_callback(&mut self, callback: RelayCallback<M>) {
        self.callback = Some(callback);
    }

    fn clear(&mut self) {
        self.flags = CtlFlags::empty();
    }

    fn is_pending(&self) -> bool {
        self.flags.contains(CtlFlags::PENDING)
    }

    fn set_pending(&mut self) {
        self.flags |= CtlFlags::PENDING;
    }
}

impl<M> Default for ControlBlock<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Messages relayed asynchronously must expose their control block.
pub trait RelayMessage: Sized {
    fn control(&mut self) -> &mut ControlBlock<Self>;
}

/// Pluggable transmission strategy in front of a broker.
pub trait TransmissionPolicy<M: Send + 'static> {
    /// Binds the policy to a broker and starts whatever machinery it
    /// needs.
    fn run(&mut self, broker: BrokerHandle<M>) -> Status;

    /// Stops the policy. Must be called (and complete) before the
    /// downstream broker closes. Idempotent.
    fn stop(&mut self) -> Status;

    fn post(&self, m: MessageHandle<M>) -> Status;
}

/// Direct pass-through policy.
pub struct Synchronous<M> {
    broker: Option<BrokerHandle<M>>,
}

impl<M> Synchronous<M> {
    pub fn new() -> Self {
        Self { broker: None }
    }
}

impl<M> Default for Synchronous<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Send + 'static> TransmissionPolicy<M> for Synchronous<M> {
    fn run(&mut self, broker: BrokerHandle<M>) -> Status {
        self.broker = Some(broker);
        Status::Success
    }

    fn stop(&mut self) -> Status {
        Status::Success
    }

    fn post(&self, m: MessageHandle<M>) -> Status {
        match &self.broker {
            Some(broker) => broker.send_message(m),
            None => Status::Undefined,
        }
    }
}

/// Relay policy: own channel, relay thread, pending FIFO.
pub struct AsyncRelay<M: RelayMessage + Send + 'static> {
    chan: Arc<Channel<MessageHandle<M>>>,
    relay: Option<JoinHandle<()>>,
}

impl<M: RelayMessage + Send + 'static> AsyncRelay<M> {
    pub fn new() -> Self {
        Self {
            chan: Arc::new(Channel::new(RELAY_CHANNEL_CAPACITY)),
            relay: None,
        }
    }
}

impl<M: RelayMessage + Send + 'static> Default for AsyncRelay<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RelayMessage + Send + 'static> TransmissionPolicy<M>
    for AsyncRelay<M>
{
    fn run(&mut self, broker: BrokerHandle<M>) -> Status {
        debug_assert!(self.relay.is_none());
        let chan = Arc::clone(&self.chan);
        let spawned = thread::Builder::new()
            .name(format!("{}-relay", broker.name()))
            .spawn(move || relay_loop(chan, broker));
        match spawned {
            Ok(handle) => {
                self.relay = Some(handle);
                Status::Success
            }
            Err(e) => {
                log::error!("failed to spawn relay thread: {e}");
                Status::ThreadCreationError
            }
        }
    }

    /// Closes the relay channel and joins the relay thread.
    ///
    /// Messages still sitting in the channel or the pending FIFO at this
    /// point are dropped without a callback; posters that need loss
    /// notification must quiesce before stopping.
    fn stop(&mut self) -> Status {
        self.chan.close();
        if let Some(relay) = self.relay.take() {
            if relay.join().is_err() {
                log::error!("relay thread panicked");
                return Status::UnhandledException;
            }
        }
        Status::Success
    }

    /// Blocking enqueue into the relay channel; blocks only while the
    /// relay itself (not the broker) is saturated.
    fn post(&self, m: MessageHandle<M>) -> Status {
        match self.chan.push(m) {
            Ok(()) => Status::Success,
            Err(_) => Status::ChannelClosed,
        }
    }
}

impl<M: RelayMessage + Send + 'static> Drop for AsyncRelay<M> {
    fn drop(&mut self) {
        if self.stop() != Status::Success {
            log::error!("failed to stop relay policy");
        }
    }
}

fn fire<M: RelayMessage>(m: MessageHandle<M>, status: Status) {
    // The relay is the sole accessor of in-flight messages.
    let callback = unsafe { m.as_mut() }.control().callback;
    if let Some(callback) = callback {
        callback(m, status);
    }
}

fn relay_loop<M: RelayMessage + Send>(
    chan: Arc<Channel<MessageHandle<M>>>,
    broker: BrokerHandle<M>,
) {
    let mut mchain: VecDeque<MessageHandle<M>> = VecDeque::new();

    let exit_state = 'outer: loop {
        // Closure ends the relay even though the channel would still hand
        // over queued messages: only work already popped gets finished,
        // the rest (queued or pending) is abandoned without callbacks.
        if chan.is_closed() {
            break Status::ChannelClosed;
        }

        // Block for input only while nothing is pending; otherwise just
        // grab what has arrived and get back to forwarding.
        let popped = if mchain.is_empty() {
            match chan.pop() {
                Ok(m) => Some(m),
                Err(PopError) => break Status::ChannelClosed,
            }
        } else {
            match chan.try_pop() {
                Ok(m) => Some(m),
                Err(TryPopError::Empty) => None,
                Err(TryPopError::Closed) => break Status::ChannelClosed,
            }
        };

        if let Some(m) = popped {
            unsafe { m.as_mut() }.control().clear();
            mchain.push_back(m);
            if mchain.len() > 1 {
                // Older messages are already waiting, so this one is
                // pending from the start.
                unsafe { m.as_mut() }.control().set_pending();
                fire(m, Status::Pending);
            }
        } else {
            debug_assert!(!mchain.is_empty());
        }

        while let Some(&head) = mchain.front() {
            // Read the callback while the relay still owns the message: a
            // successful send hands it to the consumer immediately, after
            // which the control block must not be touched.
            let callback = unsafe { head.as_mut() }.control().callback;
            match broker.send_message(head) {
                Status::Success => {
                    mchain.pop_front();
                    if let Some(callback) = callback {
                        callback(head, Status::Success);
                    }
                }
                Status::ChannelFull => {
                    // Leave the head where it is. Report Pending exactly
                    // once; after that, pause briefly so the retry loop
                    // does not spin against a saturated broker.
                    let ctl = unsafe { head.as_mut() }.control();
                    if ctl.is_pending() {
                        thread::sleep(FULL_RETRY_PAUSE);
                    } else {
                        ctl.set_pending();
                        fire(head, Status::Pending);
                    }
                    continue 'outer;
                }
                rc => {
                    log::error!(
                        "relay for broker <{}> failed to forward: {rc}",
                        broker.name()
                    );
                    fire(head, Status::RelayError);
                    break 'outer Status::RelayError;
                }
            }
        }
    };

    log::debug!(
        "relay for broker <{}> exited with code {exit_state}",
        broker.name()
    );
}
