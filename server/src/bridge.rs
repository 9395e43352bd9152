//! Cross-thread command bridge onto the authoritative loop
//!
//! Any thread may hold a [`CommandBridge`] and submit closures over the
//! server state. Exactly one owner holds the matching [`CommandQueue`] and runs
//! those closures, one at a time and in submission order, between I/O steps.
//! The queue is the only structure shared across threads; the state itself is
//! never locked.
//!
//! The queue is unbounded. Administrative traffic is low-frequency, so there
//! is no overflow policy.
//!
//! An operation must never call back into [`CommandBridge::submit_and_wait`]:
//! the loop cannot drain while it is busy running that very operation.

use crate::error::{Result, ServerError};
use log::{error, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::{mpsc, oneshot};

/// A unit of work queued for the authoritative loop
pub struct Operation<S>(Box<dyn FnOnce(&mut S) + Send + 'static>);

impl<S> Operation<S> {
    /// Runs the operation, containing any panic so the caller's loop survives
    pub fn run(self, state: &mut S) {
        let Operation(op) = self;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| op(state))) {
            error!("Queued operation panicked: {}", panic_message(payload.as_ref()));
        }
    }
}

/// Producer side, cheap to clone and safe to use from any thread
pub struct CommandBridge<S> {
    tx: mpsc::UnboundedSender<Operation<S>>,
}

impl<S> Clone for CommandBridge<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Consumer side, owned by the authoritative loop
pub struct CommandQueue<S> {
    rx: mpsc::UnboundedReceiver<Operation<S>>,
}

/// Creates a connected bridge/queue pair
pub fn channel<S>() -> (CommandBridge<S>, CommandQueue<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandBridge { tx }, CommandQueue { rx })
}

impl<S: 'static> CommandBridge<S> {
    /// Queues an operation without waiting for it to run
    ///
    /// Failures returned by the operation have nobody to report to, so they
    /// are logged.
    pub fn submit<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&mut S) -> Result<()> + Send + 'static,
    {
        self.enqueue(Operation(Box::new(move |state| {
            if let Err(e) = op(state) {
                warn!("Queued operation failed: {}", e);
            }
        })))
    }

    /// Queues an operation and waits until the loop has run it
    ///
    /// The result of the operation, including a panic turned into
    /// [`ServerError::Operation`], is handed back to the caller. Callers that
    /// need a deadline wrap this in `tokio::time::timeout`; giving up early
    /// does not stop the operation from running.
    pub async fn submit_and_wait<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let rx = self.enqueue_with_reply(op)?;
        rx.await.map_err(|_| ServerError::OperationAborted)?
    }

    /// Same as [`submit_and_wait`](Self::submit_and_wait) for threads outside
    /// the async runtime. Must not be called from inside it.
    pub fn blocking_submit_and_wait<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let rx = self.enqueue_with_reply(op)?;
        rx.blocking_recv()
            .map_err(|_| ServerError::OperationAborted)?
    }

    /// True once the queue side has been closed or dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn enqueue_with_reply<F, T>(&self, op: F) -> Result<oneshot::Receiver<Result<T>>>
    where
        F: FnOnce(&mut S) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(Operation(Box::new(move |state| {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| op(state))) {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("Queued operation panicked: {}", message);
                    Err(ServerError::Operation(message))
                }
            };
            // The waiter may have timed out; the operation has still run
            let _ = reply_tx.send(result);
        })))?;
        Ok(reply_rx)
    }

    fn enqueue(&self, op: Operation<S>) -> Result<()> {
        self.tx.send(op).map_err(|_| ServerError::NotRunning)
    }
}

impl<S> CommandQueue<S> {
    /// Waits for the next operation; `None` once every bridge is gone
    pub async fn recv(&mut self) -> Option<Operation<S>> {
        self.rx.recv().await
    }

    /// Runs everything queued at the moment of the call, in FIFO order
    ///
    /// Operations submitted while draining wait for the next drain, so one
    /// call always terminates.
    pub fn drain(&mut self, state: &mut S) -> usize {
        let pending = self.rx.len();
        let mut executed = 0;

        for _ in 0..pending {
            match self.rx.try_recv() {
                Ok(op) => {
                    op.run(state);
                    executed += 1;
                }
                Err(_) => break,
            }
        }

        executed
    }

    /// Refuses further submissions; already queued operations stay drainable
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "operation panicked".to_string()
    }
}
