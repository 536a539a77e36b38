//! Callback plumbing between a dispatched item and the calculator.
//!
//! [`Continuation`] is what the calculator holds while it works: the run and
//! item it belongs to plus a one-shot reply channel. [`Dispatch`] is the
//! scheduler's end of the same channel.
//!
//! The calculation counts as in flight for as long as the continuation is
//! alive. When the scheduler stops waiting (timeout, run torn down) the
//! continuation observes it through [`Continuation::closed`], and the
//! scheduler does not move on until the continuation has been released.

use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{ItemId, Payload, RunId};

type Reply = std::result::Result<Payload, String>;

/// Completion callback handed to [`Calculator::calculate`](super::Calculator::calculate).
///
/// Consumed by [`complete`](Self::complete) or [`fail`](Self::fail), so it
/// fires at most once. Dropping it without calling either is reported to the
/// scheduler as [`Error::CallbackDropped`].
#[derive(Debug)]
pub struct Continuation {
    run_id: RunId,
    item: ItemId,
    reply: oneshot::Sender<Reply>,
    /// Dropped together with the continuation; tells the scheduler the
    /// calculation is no longer running.
    _release: oneshot::Sender<()>,
}

impl Continuation {
    /// Create a continuation and the dispatch that waits on it.
    pub fn channel(run_id: RunId, item: ItemId) -> (Continuation, Dispatch) {
        let (reply, receiver) = oneshot::channel();
        let (release, released) = oneshot::channel();
        let continuation = Continuation {
            run_id,
            item: item.clone(),
            reply,
            _release: release,
        };
        let dispatch = Dispatch {
            run_id,
            item,
            receiver,
            released,
            started: Instant::now(),
        };
        (continuation, dispatch)
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn item(&self) -> &ItemId {
        &self.item
    }

    /// Resolves once the scheduler no longer wants the result.
    ///
    /// Calculators should stop work and drop the continuation when this
    /// fires; the next item is held back until they do.
    pub async fn closed(&mut self) {
        self.reply.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.reply.is_closed()
    }

    /// Report a finished calculation.
    pub fn complete(self, result: Payload) {
        // Receiver gone means the run already gave up on this item.
        let _ = self.reply.send(Ok(result));
    }

    /// Report a failed calculation.
    pub fn fail(self, message: impl Into<String>) {
        let _ = self.reply.send(Err(message.into()));
    }
}

/// One item in flight: dispatched, calculate accepted, callback pending.
#[derive(Debug)]
pub struct Dispatch {
    run_id: RunId,
    item: ItemId,
    receiver: oneshot::Receiver<Reply>,
    released: oneshot::Receiver<()>,
    started: Instant,
}

impl Dispatch {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn item(&self) -> &ItemId {
        &self.item
    }

    /// Wait for the callback, at most `timeout` if given.
    ///
    /// On timeout the continuation is closed and this keeps waiting until
    /// the calculator has released it, so the calculation is over by the
    /// time [`Error::CallbackTimeout`] is returned.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<Completion> {
        let Dispatch {
            run_id,
            item,
            mut receiver,
            released,
            started,
        } = self;

        let reply = match timeout {
            Some(after) => match tokio::time::timeout(after, &mut receiver).await {
                Ok(reply) => reply,
                Err(_) => {
                    receiver.close();
                    warn!(item = %item, ?after, "no callback in time, waiting for calculator to stop");
                    // Resolves with Err once every sender is gone.
                    let _ = released.await;
                    return Err(Error::CallbackTimeout { item, after });
                }
            },
            None => receiver.await,
        };

        match reply {
            Ok(Ok(result)) => Ok(Completion {
                run_id,
                item,
                result,
                duration_ms: started.elapsed().as_millis() as u64,
            }),
            Ok(Err(message)) => Err(Error::Calculate { item, message }),
            Err(_) => Err(Error::CallbackDropped { item }),
        }
    }
}

/// A calculation result delivered through the callback.
#[derive(Debug, Clone)]
pub struct Completion {
    pub run_id: RunId,
    pub item: ItemId,
    pub result: Payload,
    /// Time from dispatch to callback.
    pub duration_ms: u64,
}
