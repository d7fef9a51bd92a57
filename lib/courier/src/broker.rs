// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The message broker: one bounded channel, one consumer thread.

use crate::channel::{Channel, TryPushError};
use crate::{MessageHandle, Status};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Per-message work function run on the consumer thread.
pub type MsgProc<M> = Box<dyn FnMut(MessageHandle<M>) + Send>;

/// Broker configuration. The hooks run on the consumer thread: `inithook`
/// once before the first message, `exithook` once after the loop ends,
/// receiving the reason the loop ended (normally `ChannelClosed`).
pub struct BrokerConfig<M> {
    pub channel_size: usize,
    pub msgproc: MsgProc<M>,
    pub inithook: Option<Box<dyn FnOnce() + Send>>,
    pub exithook: Option<Box<dyn FnOnce(Status) + Send>>,
    pub name: String,
}

impl<M> BrokerConfig<M> {
    pub fn new(
        name: impl Into<String>,
        channel_size: usize,
        msgproc: MsgProc<M>,
    ) -> Self {
        Self {
            channel_size,
            msgproc,
            inithook: None,
            exithook: None,
            name: name.into(),
        }
    }
}

/// A cheap handle for feeding a running broker, independent of the broker
/// object's lifetime scope (the relay thread holds one of these).
pub struct BrokerHandle<M> {
    chan: Arc<Channel<MessageHandle<M>>>,
    name: Arc<str>,
}

impl<M> Clone for BrokerHandle<M> {
    fn clone(&self) -> Self {
        Self {
            chan: Arc::clone(&self.chan),
            name: Arc::clone(&self.name),
        }
    }
}

impl<M> BrokerHandle<M> {
    /// Non-blocking enqueue; the channel status comes back as the return
    /// code.
    pub fn send_message(&self, m: MessageHandle<M>) -> Status {
        match self.chan.try_push(m) {
            Ok(()) => Status::Success,
            Err(TryPushError::Full(_)) => Status::ChannelFull,
            Err(TryPushError::Closed(_)) => Status::ChannelClosed,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct MessageBroker<M: Send + 'static> {
    chan: Option<Arc<Channel<MessageHandle<M>>>>,
    consumer: Option<JoinHandle<()>>,
    name: Arc<str>,
}

impl<M: Send + 'static> MessageBroker<M> {
    pub fn new() -> Self {
        Self {
            chan: None,
            consumer: None,
            name: Arc::from("noname"),
        }
    }

    /// Creates the channel and spawns the consumer thread.
    pub fn init(&mut self, cfg: BrokerConfig<M>) -> Status {
        debug_assert!(!self.is_initialized());
        if cfg.channel_size == 0 {
            return Status::InvalidChannelSize;
        }

        self.name = Arc::from(cfg.name.as_str());
        let chan = Arc::new(Channel::new(cfg.channel_size));

        let thread_chan = Arc::clone(&chan);
        let thread_name = Arc::clone(&self.name);
        let spawned = thread::Builder::new().name(cfg.name).spawn(move || {
            consumer_loop(
                thread_chan,
                cfg.msgproc,
                cfg.inithook,
                cfg.exithook,
                thread_name,
            )
        });
        match spawned {
            Ok(handle) => {
                self.consumer = Some(handle);
                self.chan = Some(chan);
                Status::Success
            }
            Err(e) => {
                log::error!(
                    "failed to spawn consumer for broker <{}>: {e}",
                    self.name
                );
                Status::ThreadCreationError
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.chan.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a feed handle, once initialized.
    pub fn handle(&self) -> Option<BrokerHandle<M>> {
        self.chan.as_ref().map(|chan| BrokerHandle {
            chan: Arc::clone(chan),
            name: Arc::clone(&self.name),
        })
    }

    /// Non-blocking enqueue; the channel status comes back as the return
    /// code. `ChannelClosed` if the broker was never initialized.
    pub fn send_message(&self, m: MessageHandle<M>) -> Status {
        match &self.chan {
            Some(chan) => match chan.try_push(m) {
                Ok(()) => Status::Success,
                Err(TryPushError::Full(_)) => Status::ChannelFull,
                Err(TryPushError::Closed(_)) => Status::ChannelClosed,
            },
            None => Status::ChannelClosed,
        }
    }

    /// Closes the channel and joins the consumer. Returns `false` if the
    /// consumer died abnormally. Idempotent.
    pub fn close(&mut self) -> bool {
        let Some(chan) = self.chan.take() else {
            return true;
        };
        chan.close();
        let mut clean = true;
        if let Some(consumer) = self.consumer.take() {
            if consumer.join().is_err() {
                log::error!(
                    "consumer thread of broker <{}> panicked",
                    self.name
                );
                clean = false;
            }
        }
        log::debug!("message broker <{}> is closed", self.name);
        clean
    }
}

impl<M: Send + 'static> Default for MessageBroker<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Send + 'static> Drop for MessageBroker<M> {
    fn drop(&mut self) {
        if !self.close() {
            log::error!("failed to close message broker <{}>", self.name);
        }
    }
}

fn consumer_loop<M>(
    chan: Arc<Channel<MessageHandle<M>>>,
    mut msgproc: MsgProc<M>,
    inithook: Option<Box<dyn FnOnce() + Send>>,
    exithook: Option<Box<dyn FnOnce(Status) + Send>>,
    name: Arc<str>,
) {
    if let Some(hook) = inithook {
        hook();
    }

    let exit_state = loop {
        match chan.pop() {
            Ok(m) => {
                // A processor panic must not take down anything beyond
                // this consumer; report it through the exit hook instead.
                if catch_unwind(AssertUnwindSafe(|| msgproc(m))).is_err() {
                    log::error!(
                        "message processor of broker <{name}> panicked"
                    );
                    break Status::UnhandledException;
                }
            }
            Err(_) => break Status::ChannelClosed,
        }
    };

    if let Some(hook) = exithook {
        hook(exit_state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr::NonNull;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct TestMsg {
        seq: usize,
        log: Arc<Mutex<Vec<usize>>>,
    }

    fn handles(msgs: &mut [Box<TestMsg>]) -> Vec<MessageHandle<TestMsg>> {
        msgs.iter_mut()
            .map(|m| MessageHandle::new(NonNull::from(&mut **m)))
            .collect()
    }

    fn recording_proc() -> MsgProc<TestMsg> {
        Box::new(|h: MessageHandle<TestMsg>| {
            let m = unsafe { h.as_ref() };
            m.log.lock().unwrap().push(m.seq);
        })
    }

    #[test]
    fn messages_are_processed_in_post_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut msgs: Vec<_> = (0..8)
            .map(|seq| {
                Box::new(TestMsg {
                    seq,
                    log: Arc::clone(&log),
                })
            })
            .collect();

        let mut broker = MessageBroker::new();
        let rc = broker.init(BrokerConfig::new(
            "order-test",
            8,
            recording_proc(),
        ));
        assert_eq!(rc, Status::Success);

        for h in handles(&mut msgs) {
            assert_eq!(broker.send_message(h), Status::Success);
        }
        assert!(broker.close());

        assert_eq!(*log.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    /// Once `close` returns, the processor never runs again, and further
    /// sends are rejected.
    #[test]
    fn clean_shutdown_stops_processing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut msgs: Vec<_> = (0..4)
            .map(|seq| {
                Box::new(TestMsg {
                    seq,
                    log: Arc::clone(&log),
                })
            })
            .collect();
        let hs = handles(&mut msgs);

        let mut broker = MessageBroker::new();
        broker.init(BrokerConfig::new("shutdown", 4, recording_proc()));

        assert_eq!(broker.send_message(hs[0]), Status::Success);
        assert_eq!(broker.send_message(hs[1]), Status::Success);
        assert!(broker.close());
        let count = log.lock().unwrap().len();

        assert_eq!(broker.send_message(hs[2]), Status::ChannelClosed);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(log.lock().unwrap().len(), count);
    }

    #[test]
    fn send_reports_full_channel() {
        let mut broker = MessageBroker::new();
        // Processor blocks forever on the first message, so the channel
        // backs up.
        let gate = Arc::new(Channel::<()>::new(2));
        let gate2 = Arc::clone(&gate);
        broker.init(BrokerConfig::new(
            "full",
            2,
            Box::new(move |_h| {
                let _ = gate2.pop();
            }),
        ));

        let mut msgs: Vec<_> = (0..4)
            .map(|seq| {
                Box::new(TestMsg {
                    seq,
                    log: Arc::new(Mutex::new(Vec::new())),
                })
            })
            .collect();
        let hs = handles(&mut msgs);

        // One message may be in flight in the processor and two queued;
        // posting until we see Full must happen within four sends.
        let mut saw_full = false;
        for &h in &hs {
            if broker.send_message(h) == Status::ChannelFull {
                saw_full = true;
                break;
            }
        }
        assert!(saw_full);

        gate.close();
        assert!(broker.close());
    }

    #[test]
    fn hooks_run_on_consumer_thread() {
        let inited = Arc::new(AtomicBool::new(false));
        let exit_state = Arc::new(Mutex::new(None));

        let i2 = Arc::clone(&inited);
        let e2 = Arc::clone(&exit_state);
        let mut broker = MessageBroker::<TestMsg>::new();
        let mut cfg =
            BrokerConfig::new("hooks", 4, Box::new(|_h| {}) as MsgProc<_>);
        cfg.inithook = Some(Box::new(move || {
            i2.store(true, Ordering::SeqCst);
        }));
        cfg.exithook = Some(Box::new(move |s| {
            *e2.lock().unwrap() = Some(s);
        }));

        assert_eq!(broker.init(cfg), Status::Success);
        assert!(broker.close());

        assert!(inited.load(Ordering::SeqCst));
        assert_eq!(*exit_state.lock().unwrap(), Some(Status::ChannelClosed));
    }

    #[test]
    fn zero_channel_size_is_rejected() {
        let mut broker = MessageBroker::<TestMsg>::new();
        let rc = broker.init(BrokerConfig::new(
            "bad",
            0,
            Box::new(|_h| {}) as MsgProc<_>,
        ));
        assert_eq!(rc, Status::InvalidChannelSize);
        assert!(!broker.is_initialized());
    }

    /// A panicking processor ends the consumer but is contained: the exit
    /// hook sees `UnhandledException` and `close` still succeeds.
    #[test]
    fn processor_panic_is_contained() {
        let exit_state = Arc::new(Mutex::new(None));
        let e2 = Arc::clone(&exit_state);

        let mut broker = MessageBroker::new();
        let mut cfg = BrokerConfig::new(
            "panicky",
            4,
            Box::new(|_h| panic!("boom")) as MsgProc<TestMsg>,
        );
        cfg.exithook = Some(Box::new(move |s| {
            *e2.lock().unwrap() = Some(s);
        }));
        broker.init(cfg);

        let mut msg = Box::new(TestMsg {
            seq: 0,
            log: Arc::new(Mutex::new(Vec::new())),
        });
        broker.send_message(MessageHandle::new(NonNull::from(&mut *msg)));

        // Give the consumer a moment to hit the panic, then close.
        std::thread::sleep(Duration::from_millis(30));
        assert!(broker.close());
        assert_eq!(
            *exit_state.lock().unwrap(),
            Some(Status::UnhandledException)
        );
    }
}
