//! Cooperative cancellation

use async_channel::{Receiver, Sender};
use async_runtime_compat::runtime_utils;
use futures_lite::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

struct TokenInner {
    cancelled: AtomicBool,
    // Never carries a message; closing it wakes every waiter.
    tx: Sender<()>,
    rx: Receiver<()>,
}

/// Shared cancellation flag with an awaitable signal
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationToken {
    /// A token that is not cancelled
    pub fn new() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                tx,
                rx,
            }),
        }
    }

    /// Request cancellation. Returns `false` if it was already requested.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.tx.close();
        true
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.inner.rx.recv().await;
    }
}

/// How a bounded wait ended
#[derive(Debug)]
pub(crate) enum Wait<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// Wait for `future`, giving up after `timeout` or, if a token is given,
/// when it is cancelled.
pub(crate) async fn bounded_wait<F: Future>(
    future: F,
    timeout: Duration,
    token: Option<&CancellationToken>,
) -> Wait<F::Output> {
    let ready = async { Wait::Ready(future.await) };
    let timer = async {
        runtime_utils::sleep(timeout).await;
        Wait::TimedOut
    };
    match token {
        Some(token) => {
            let cancelled = async {
                token.cancelled().await;
                Wait::Cancelled
            };
            ready.or(cancelled).or(timer).await
        }
        None => ready.or(timer).await,
    }
}
