//! Runtime-agnostic async utilities
//!
//! The management controller and the service container never pick an async
//! runtime themselves. Background work (service start/stop tasks, operations
//! executed asynchronously) goes through the [`Spawner`] trait, and bounded
//! waits use the `async-io` timer, which works under any executor.
//!
//! # Examples
//!
//! ```no_run
//! use async_runtime_compat::prelude::*;
//!
//! fn example<S: Spawner>(spawner: &S) {
//!     spawner.spawn(Box::pin(async {
//!         println!("Running in the background!");
//!     }));
//! }
//!
//! example(&ThreadSpawner);
//! ```

use std::future::Future;
use std::pin::Pin;

/// Boxed future accepted by [`Spawner::spawn`]
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A spawner that can run futures in the background
pub trait Spawner: Send + Sync {
    /// Spawn a future; it runs to completion without being awaited.
    fn spawn(&self, future: BoxedTask);
}

impl<S: Spawner + ?Sized> Spawner for std::sync::Arc<S> {
    fn spawn(&self, future: BoxedTask) {
        (**self).spawn(future)
    }
}

/// Spawner that drives each future on a dedicated OS thread.
///
/// Needs no runtime at all, which makes it the default for the service
/// container: a service whose `start` blocks cannot starve anything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

impl Spawner for ThreadSpawner {
    fn spawn(&self, future: BoxedTask) {
        let spawned = std::thread::Builder::new()
            .name("async-runtime-compat".into())
            .spawn(move || futures::executor::block_on(future));
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn worker thread, task dropped: {}", e);
        }
    }
}

#[cfg(feature = "smol")]
pub mod smol;

pub mod runtime_utils;

/// Prelude for common imports
pub mod prelude {
    pub use crate::runtime_utils::{sleep, timeout};
    pub use crate::{BoxedTask, Spawner, ThreadSpawner};

    #[cfg(feature = "smol")]
    pub use crate::smol::SmolSpawner;
}
