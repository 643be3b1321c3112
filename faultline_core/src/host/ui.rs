//! Cooperative UI thread.
//!
//! Work items are posted through a [`UiHandle`] and executed one at a time
//! by [`UiDispatcher::run`] on the thread that calls it. A panic escaping a
//! work item is raised on `UiThreadDispatch`:
//!
//! | Outcome | Dispatcher |
//! |---------|------------|
//! | `Handled` | continues with the next item |
//! | `Fatal` | stops, `run()` returns [`FatalFault`] |
//! | `Delegated` | resumes the panic to the caller of `run()` |

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use std::panic;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::panic::{observe, take_panic_site};
use crate::channel::OriginChannel;
use crate::coordinator::{Coordinator, UnhandledFault};
use crate::fault::{Payload, payload_from_panic};
use crate::policy::DispositionOutcome;

type Work = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Work(Work),
    Shutdown,
}

/// A UI fault whose disposition is `Fatal`.
#[derive(Debug, Error)]
#[error("fatal fault on {channel}: {payload}")]
pub struct FatalFault {
    /// Channel that observed the fault.
    pub channel: OriginChannel,
    /// Payload as delivered by the channel.
    pub payload: Payload,
}

/// Posts work to a [`UiDispatcher`]. Cheap to clone.
#[derive(Clone)]
pub struct UiHandle {
    sender: Sender<Message>,
}

impl UiHandle {
    /// Queue `work`. Returns `false` once the dispatcher is gone.
    pub fn post<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Message::Work(Box::new(work))).is_ok()
    }

    /// Ask the dispatcher to stop after the items queued before this call.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Message::Shutdown);
    }
}

/// Single-threaded work loop.
pub struct UiDispatcher {
    coordinator: Arc<Coordinator>,
    receiver: Receiver<Message>,
}

impl UiDispatcher {
    /// Dispatcher and the handle used to feed it.
    pub fn new(coordinator: Arc<Coordinator>) -> (Self, UiHandle) {
        let (sender, receiver) = unbounded();
        (
            Self {
                coordinator,
                receiver,
            },
            UiHandle { sender },
        )
    }

    /// Execute items until shutdown or until every handle is dropped.
    ///
    /// Returns the number of items executed.
    pub fn run(&self) -> Result<usize, FatalFault> {
        self.coordinator.prepare_thread();
        info!("ui dispatcher running");
        let mut executed = 0;
        while let Ok(Message::Work(work)) = self.receiver.recv() {
            self.execute(work)?;
            executed += 1;
        }
        info!(executed, "ui dispatcher stopped");
        Ok(executed)
    }

    /// Execute the items already queued, without blocking.
    pub fn run_pending(&self) -> Result<usize, FatalFault> {
        self.coordinator.prepare_thread();
        let mut executed = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(Message::Work(work)) => {
                    self.execute(work)?;
                    executed += 1;
                }
                Ok(Message::Shutdown) | Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return Ok(executed);
                }
            }
        }
    }

    fn execute(&self, work: Work) -> Result<(), FatalFault> {
        let Err(panic) = observe(work) else {
            return Ok(());
        };
        let site = take_panic_site();
        let mut fault = UnhandledFault::new(payload_from_panic(panic, site.location), site.stack);
        let outcome = self
            .coordinator
            .raise(OriginChannel::UiThreadDispatch, &mut fault);

        if fault.handled {
            debug!("ui fault handled; dispatcher continues");
            return Ok(());
        }
        match outcome {
            Some(DispositionOutcome::Fatal) => Err(FatalFault {
                channel: OriginChannel::UiThreadDispatch,
                payload: fault.payload,
            }),
            _ => panic::resume_unwind(Box::new(fault.payload)),
        }
    }
}
