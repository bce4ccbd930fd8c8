//! Runtime-agnostic service container
//!
//! Services are installed by name with dependency edges. A service starts as
//! soon as every dependency is up, and stops (dependents first) when it is
//! removed or a dependency goes away. The container is *stable* when no
//! service is starting or stopping; [`ServiceContainer::await_stability`]
//! waits for that, and [`ServiceContainer::problems`] reports what kept
//! services from coming up.
//!
//! # Example
//!
//! ```no_run
//! use service_container::{NullService, ServiceContainer};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let container = ServiceContainer::new();
//! container
//!     .add_service("app.web", NullService)
//!     .add_dependency("app.db")
//!     .install()?;
//! container.add_service("app.db", NullService).install()?;
//!
//! container.await_stability(Duration::from_secs(5)).await?;
//! assert!(container.problems().is_empty());
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod error;
pub mod models;
pub mod service;

pub use container::{ServiceBuilder, ServiceContainer, ServiceTarget};
pub use error::{ContainerError, Result, StartError};
pub use models::*;
pub use service::{NullService, Service};

pub use async_runtime_compat::Spawner;
