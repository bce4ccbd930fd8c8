//! Model controller
//!
//! The controller owns the published model, the handler registry, the
//! process state and the service container, and runs operations against
//! them. Each operation gets its own [`OperationContext`]; the controller
//! only hands out the shared pieces:
//!
//! - the published model as an `Arc<Resource>`, replaced wholesale on commit
//! - the write lock serialising mutating operations
//! - the registry, process state and container

use crate::cancel::CancellationToken;
use crate::config::ControllerConfig;
use crate::context::OperationContext;
use crate::error::ControllerError;
use crate::global::register_global_operations;
use crate::message::OperationMessageHandler;
use crate::process_state::ControlledProcessState;
use crate::registry::ResourceRegistration;
use crate::transaction::TransactionControl;
use async_channel::Receiver;
use async_runtime_compat::Spawner;
use futures::lock::Mutex as AsyncMutex;
use management_model::{Operation, OperationResponse, Outcome, Resource, ResponseHeaders};
use serde_json::Value;
use service_container::ServiceContainer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

/// Per-call options for [`ModelController::execute_with`]
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    /// Receives handler reports; logs through `tracing` when unset
    pub message_handler: Option<Arc<dyn OperationMessageHandler>>,
    /// Votes on the prepared operation before commit
    pub transaction_control: Option<Arc<dyn TransactionControl>>,
    /// Opaque payloads handlers can read
    pub attachments: Vec<Vec<u8>>,
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("message_handler", &self.message_handler.is_some())
            .field("transaction_control", &self.transaction_control.is_some())
            .field("attachments", &self.attachments.len())
            .finish()
    }
}

struct Inner {
    model: RwLock<Arc<Resource>>,
    write_lock: Arc<AsyncMutex<()>>,
    registration: ResourceRegistration,
    process_state: Arc<ControlledProcessState>,
    container: ServiceContainer,
    config: ControllerConfig,
}

/// Entry point for executing management operations
#[derive(Clone)]
pub struct ModelController {
    inner: Arc<Inner>,
}

impl ModelController {
    /// Start building a controller
    pub fn builder() -> ModelControllerBuilder {
        ModelControllerBuilder::default()
    }

    /// Execute an operation
    pub async fn execute(&self, operation: Operation) -> OperationResponse {
        self.execute_with(operation, ExecuteOptions::default()).await
    }

    /// Execute an operation with caller-supplied options
    pub async fn execute_with(
        &self,
        operation: Operation,
        options: ExecuteOptions,
    ) -> OperationResponse {
        self.execute_cancellable(operation, options, CancellationToken::new())
            .await
    }

    /// Execute an operation given in wire form, answering in wire form.
    /// A request that does not parse yields a failed response.
    pub async fn execute_value(&self, request: &Value) -> Value {
        match Operation::from_value(request) {
            Ok(operation) => self.execute(operation).await.to_value(),
            Err(e) => {
                debug!("Rejected malformed operation: {}", e);
                OperationResponse::failed(e.to_string(), false).to_value()
            }
        }
    }

    /// Execute an operation on `spawner`, returning a handle that can cancel
    /// it and await its response
    pub fn execute_async(
        &self,
        operation: Operation,
        options: ExecuteOptions,
        spawner: &dyn Spawner,
    ) -> AsyncOperation {
        let token = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let (tx, rx) = async_channel::bounded(1);

        let controller = self.clone();
        let task_token = token.clone();
        let task_finished = finished.clone();
        spawner.spawn(Box::pin(async move {
            let response = controller
                .execute_cancellable(operation, options, task_token)
                .await;
            task_finished.store(true, Ordering::Release);
            let _ = tx.send(response).await;
        }));

        AsyncOperation {
            token,
            finished,
            rx,
        }
    }

    async fn execute_cancellable(
        &self,
        operation: Operation,
        options: ExecuteOptions,
        token: CancellationToken,
    ) -> OperationResponse {
        let span = info_span!(
            "operation",
            id = %Uuid::new_v4(),
            name = %operation.name(),
            address = %operation.address()
        );
        async move {
            info!("Executing operation");
            OperationContext::new(self.clone(), operation, options, token)
                .run()
                .await
        }
        .instrument(span)
        .await
    }

    /// Run the boot operations, then mark the process running.
    ///
    /// Every operation runs even if an earlier one failed; the failures are
    /// reported together.
    pub async fn boot(
        &self,
        operations: impl IntoIterator<Item = Operation>,
    ) -> Result<(), ControllerError> {
        self.inner.process_state.set_starting();
        let mut failed = Vec::new();
        for operation in operations {
            let label = format!("{} at {}", operation.name(), operation.address());
            let response = self.execute(operation).await;
            if !response.is_success() {
                error!(
                    "Boot operation {} failed: {}",
                    label,
                    response
                        .failure_description
                        .as_ref()
                        .map(|description| description.to_string())
                        .unwrap_or_default()
                );
                failed.push(label);
            }
        }
        self.inner.process_state.set_running();
        if failed.is_empty() {
            info!("Boot complete");
            Ok(())
        } else {
            Err(ControllerError::BootFailed(failed))
        }
    }

    /// The published model
    pub fn read_model(&self) -> Arc<Resource> {
        self.inner
            .model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn publish(&self, model: Resource) {
        *self
            .inner
            .model
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(model);
    }

    pub(crate) fn write_lock(&self) -> Arc<AsyncMutex<()>> {
        self.inner.write_lock.clone()
    }

    /// Handler registry
    pub fn registration(&self) -> &ResourceRegistration {
        &self.inner.registration
    }

    /// Process state
    pub fn process_state(&self) -> &Arc<ControlledProcessState> {
        &self.inner.process_state
    }

    /// Service container
    pub fn service_container(&self) -> &ServiceContainer {
        &self.inner.container
    }

    pub(crate) fn container(&self) -> &ServiceContainer {
        &self.inner.container
    }

    /// Configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }
}

/// Builder for [`ModelController`]
#[derive(Default)]
pub struct ModelControllerBuilder {
    registration: Option<ResourceRegistration>,
    container: Option<ServiceContainer>,
    process_state: Option<Arc<ControlledProcessState>>,
    config: ControllerConfig,
    root: Resource,
}

impl ModelControllerBuilder {
    /// Handler registry. Without one, a registry holding only the global
    /// operations is used.
    pub fn registration(mut self, registration: ResourceRegistration) -> Self {
        self.registration = Some(registration);
        self
    }

    /// Service container
    pub fn service_container(mut self, container: ServiceContainer) -> Self {
        self.container = Some(container);
        self
    }

    /// Shared process state. Without one, a fresh state honouring
    /// `config.reload_supported` is used.
    pub fn process_state(mut self, process_state: Arc<ControlledProcessState>) -> Self {
        self.process_state = Some(process_state);
        self
    }

    /// Configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Initial model
    pub fn root_resource(mut self, root: Resource) -> Self {
        self.root = root;
        self
    }

    /// Build the controller
    pub fn build(self) -> Result<ModelController, ControllerError> {
        let registration = match self.registration {
            Some(registration) => registration,
            None => {
                let mut registration = ResourceRegistration::new();
                register_global_operations(&mut registration)?;
                registration
            }
        };
        let process_state = self
            .process_state
            .unwrap_or_else(|| Arc::new(ControlledProcessState::new(self.config.reload_supported)));
        Ok(ModelController {
            inner: Arc::new(Inner {
                model: RwLock::new(Arc::new(self.root)),
                write_lock: Arc::new(AsyncMutex::new(())),
                registration,
                process_state,
                container: self.container.unwrap_or_else(ServiceContainer::new),
                config: self.config,
            }),
        })
    }
}

/// Handle to an operation started with [`ModelController::execute_async`]
pub struct AsyncOperation {
    token: CancellationToken,
    finished: Arc<AtomicBool>,
    rx: Receiver<OperationResponse>,
}

impl AsyncOperation {
    /// Request cancellation. Returns `false` if the operation already
    /// finished or cancellation was already requested.
    pub fn cancel(&self) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }
        self.token.cancel()
    }

    /// Wait for the response. A task that never reported one yields a
    /// cancelled response, as does every call after the first.
    pub async fn response(&self) -> OperationResponse {
        match self.rx.recv().await {
            Ok(response) => response,
            Err(_) => OperationResponse {
                outcome: Outcome::Cancelled,
                result: Value::Null,
                failure_description: Some(Value::String("Operation cancelled".into())),
                rolled_back: Some(true),
                response_headers: ResponseHeaders::default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use management_model::{PathAddress, keys};
    use serde_json::json;

    fn controller() -> ModelController {
        ModelController::builder()
            .root_resource(Resource::with_model(json!({"attr1": 1})))
            .build()
            .unwrap()
    }

    #[smol_potat::test]
    async fn test_execute_value_round_trip() {
        let controller = controller();
        let response = controller
            .execute_value(&json!({
                "operation": "read-attribute",
                "address": [],
                "name": "attr1"
            }))
            .await;
        assert_eq!(response[keys::OUTCOME], "success");
        assert_eq!(response[keys::RESULT], 1);
    }

    #[smol_potat::test]
    async fn test_execute_value_rejects_malformed_request() {
        let controller = controller();
        let response = controller.execute_value(&json!({"address": []})).await;
        assert_eq!(response[keys::OUTCOME], "failed");
    }

    #[smol_potat::test]
    async fn test_write_publishes_new_model() {
        let controller = controller();
        let before = controller.read_model();
        let response = controller
            .execute(
                Operation::new(keys::WRITE_ATTRIBUTE, PathAddress::root())
                    .param(keys::NAME, "attr1")
                    .param(keys::VALUE, 2),
            )
            .await;
        assert!(response.is_success(), "{:?}", response);
        assert_eq!(before.attribute("attr1"), Some(&json!(1)));
        assert_eq!(controller.read_model().attribute("attr1"), Some(&json!(2)));
    }

    #[smol_potat::test]
    async fn test_dropped_task_yields_cancelled() {
        struct DropSpawner;
        impl Spawner for DropSpawner {
            fn spawn(&self, _future: async_runtime_compat::BoxedTask) {}
        }

        let controller = controller();
        let handle = controller.execute_async(
            Operation::new(keys::READ_RESOURCE, PathAddress::root()),
            ExecuteOptions::default(),
            &DropSpawner,
        );
        assert!(handle.cancel());
        let response = handle.response().await;
        assert_eq!(response.outcome, Outcome::Cancelled);
    }

    #[smol_potat::test]
    async fn test_boot_reports_failures() {
        let controller = controller();
        let result = controller
            .boot(vec![
                Operation::new(keys::READ_RESOURCE, PathAddress::root()),
                Operation::new("no-such-op", PathAddress::root()),
            ])
            .await;
        assert!(matches!(result, Err(ControllerError::BootFailed(ref ops)) if ops.len() == 1));
        assert_eq!(
            controller.process_state().state(),
            crate::process_state::State::Running
        );
    }
}
