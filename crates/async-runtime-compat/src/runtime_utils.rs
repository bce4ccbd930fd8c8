//! Runtime-agnostic timing helpers
//!
//! Both helpers sit on `async-io` timers so they work under smol,
//! `futures::executor::block_on` or any other executor.

use futures_lite::FutureExt;
use std::future::Future;
use std::time::Duration;

/// Sleep for the specified duration
pub async fn sleep(duration: Duration) {
    async_io::Timer::after(duration).await;
}

/// Run `future` with a deadline.
///
/// Returns `None` if the deadline fires first; the future is dropped.
pub async fn timeout<F, T>(duration: Duration, future: F) -> Option<T>
where
    F: Future<Output = T>,
{
    let deadline = async {
        async_io::Timer::after(duration).await;
        None
    };
    async { Some(future.await) }.or(deadline).await
}
