//! The service trait

use crate::error::StartError;
use async_trait::async_trait;

/// A unit with a start/stop lifecycle managed by the container
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Bring the service up. An error leaves it in `StartFailed`.
    async fn start(&self) -> Result<(), StartError>;

    /// Bring the service down
    async fn stop(&self) {}
}

/// Service with no behaviour, useful as a marker or dependency anchor
#[derive(Debug, Clone, Copy, Default)]
pub struct NullService;

#[async_trait]
impl Service for NullService {
    async fn start(&self) -> Result<(), StartError> {
        Ok(())
    }
}
