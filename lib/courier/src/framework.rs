// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Assembly of one broker and one transmission policy.

use crate::broker::{BrokerConfig, MessageBroker};
use crate::relay::{AsyncRelay, Synchronous, TransmissionPolicy};
use crate::{MessageHandle, Status};

/// A broker plus the policy in front of it, with lifecycle management.
///
/// `run` brings both up (broker first, so the policy has something to bind
/// to); teardown happens in the opposite order, because the policy may
/// still hold a handle into the broker's channel.
pub struct MessageFramework<M: Send + 'static, P: TransmissionPolicy<M>> {
    broker: MessageBroker<M>,
    policy: P,
}

/// Framework with the direct pass-through policy.
pub type SyncMessageFramework<M> = MessageFramework<M, Synchronous<M>>;

/// Framework with the asynchronous relay policy; `M` must implement
/// [`RelayMessage`].
pub type AsyncMessageFramework<M> = MessageFramework<M, AsyncRelay<M>>;

impl<M, P> MessageFramework<M, P>
where
    M: Send + 'static,
    P: TransmissionPolicy<M> + Default,
{
    pub fn new() -> Self {
        Self {
            broker: MessageBroker::new(),
            policy: P::default(),
        }
    }
}

impl<M, P> Default for MessageFramework<M, P>
where
    M: Send + 'static,
    P: TransmissionPolicy<M> + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M, P> MessageFramework<M, P>
where
    M: Send + 'static,
    P: TransmissionPolicy<M>,
{
    /// Initializes the broker, then the policy. On any failure both are
    /// torn back down and the first error is returned.
    pub fn run(&mut self, cfg: BrokerConfig<M>) -> Status {
        let rc = self.broker.init(cfg);
        if rc != Status::Success {
            self.stop();
            return rc;
        }

        let handle = self
            .broker
            .handle()
            .expect("broker initialized but has no channel");
        let rc = self.policy.run(handle);
        if rc != Status::Success {
            self.stop();
            return rc;
        }
        Status::Success
    }

    /// Hands a message to the active policy.
    pub fn post(&self, m: MessageHandle<M>) -> Status {
        self.policy.post(m)
    }

    /// Stops the policy, then closes the broker. Idempotent.
    ///
    /// The order is load-bearing: the policy may be holding (and still
    /// feeding) the broker's channel, so it must wind down first.
    pub fn stop(&mut self) {
        if self.policy.stop() != Status::Success {
            log::error!("error while stopping the transmission policy");
        }
        if !self.broker.close() {
            log::error!("error while closing the message broker");
        }
    }

    pub fn broker(&self) -> &MessageBroker<M> {
        &self.broker
    }
}

impl<M, P> Drop for MessageFramework<M, P>
where
    M: Send + 'static,
    P: TransmissionPolicy<M>,
{
    fn drop(&mut self) {
        self.stop();
    }
}
