//! Cooperative cancellation for long-running loops.
//!
//! A [`Context`] wraps the daemon's shutdown watch channel and an optional
//! deadline. Every wait in the advertise and receive paths races its timer
//! against [`Context::done`], so shutdown is observed even mid-backoff.

use std::future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a [`Context`] is done.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Done {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone)]
pub struct Context {
    shutdown: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl Context {
    /// Create a context that is canceled once `true` is sent on the
    /// shutdown channel. A dropped sender never cancels.
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            shutdown,
            deadline: None,
        }
    }

    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(rx)
    }

    /// A fresh context and the sender that cancels it.
    pub fn with_cancel() -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self::new(rx), tx)
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Keeps the earlier of the existing and the new deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(d) if d < deadline => d,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check; `None` while the context is still live.
    pub fn err(&self) -> Option<Done> {
        if *self.shutdown.borrow() {
            return Some(Done::Canceled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(Done::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is canceled or its deadline passes.
    pub async fn done(&self) -> Done {
        if let Some(done) = self.err() {
            return done;
        }

        let mut shutdown = self.shutdown.clone();
        let canceled = async move {
            loop {
                if shutdown.changed().await.is_err() {
                    // Sender gone: nobody can cancel us anymore.
                    future::pending::<()>().await;
                }
                if *shutdown.borrow() {
                    return Done::Canceled;
                }
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                done = canceled => done,
                _ = tokio::time::sleep_until(deadline) => Done::DeadlineExceeded,
            },
            None => canceled.await,
        }
    }

    /// Sleep for `duration` unless the context finishes first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Done> {
        tokio::select! {
            done = self.done() => Err(done),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
