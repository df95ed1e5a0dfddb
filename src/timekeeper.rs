//! Cancellable delays, timeouts and reconnect backoff.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use log::trace;
use tokio::sync::watch;

use crate::error::CliError;

/// How a [`Delay`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayOutcome {
    Elapsed,
    Cancelled,
}

/// Cancels the delay it was taken from.
#[derive(Debug, Clone)]
pub struct DelayHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl DelayHandle {
    /// Wakes the delay with [`DelayOutcome::Cancelled`]. Cancelling twice or
    /// after the delay fired is a no-op.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn is_finished(&self) -> bool {
        self.cancel.is_closed()
    }
}

/// A sleep that can be cut short through its [`DelayHandle`].
pub struct Delay {
    fut: BoxFuture<'static, DelayOutcome>,
    handle: DelayHandle,
}

impl Delay {
    pub fn new(duration: Duration) -> Self {
        let (tx, mut rx) = watch::channel(false);
        let fut = Box::pin(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => DelayOutcome::Elapsed,
                Ok(_) = rx.wait_for(|cancelled| *cancelled) => DelayOutcome::Cancelled,
            }
        });
        Self {
            fut,
            handle: DelayHandle {
                cancel: Arc::new(tx),
            },
        }
    }

    pub fn handle(&self) -> DelayHandle {
        self.handle.clone()
    }
}

impl Future for Delay {
    type Output = DelayOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.fut.as_mut().poll(cx)
    }
}

/// Hands out delays and remembers the pending ones so an owner can cancel
/// all of them at shutdown.
#[derive(Debug, Clone, Default)]
pub struct Timekeeper {
    pending: Arc<Mutex<Vec<DelayHandle>>>,
}

impl Timekeeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleep(&self, duration: Duration) -> Delay {
        let delay = Delay::new(duration);
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|handle| !handle.is_finished());
            pending.push(delay.handle());
        }
        delay
    }

    /// Cancels every delay that has not fired yet.
    pub fn cancel_all(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            for handle in pending.drain(..) {
                handle.cancel();
            }
        }
    }

    /// Runs `fut` with a deadline, mapping expiry to [`CliError::Timeout`].
    pub async fn timeout<F, T>(&self, duration: Duration, during: &str, fut: F) -> Result<T, CliError>
    where
        F: Future<Output = Result<T, CliError>>,
    {
        match tokio::time::timeout(duration, fut).await {
            Ok(result) => result,
            Err(_) => {
                trace!("timed out after {:?} while {}", duration, during);
                Err(CliError::timeout(during, duration, String::new()))
            }
        }
    }
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
            attempts: 0,
        }
    }

    /// The delay to wait before the next attempt; doubles up to the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(next);
        self.attempts += 1;
        next
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }
}
