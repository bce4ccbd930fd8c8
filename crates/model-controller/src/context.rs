//! Operation context and stage machine
//!
//! One [`OperationContext`] drives one top-level operation. Work is kept in
//! an explicit queue per [`Stage`]; a stage runs until its queue is empty
//! (handlers may keep pushing steps) before the next one starts:
//!
//! ```text
//!   MODEL ──> RUNTIME ──> VERIFY ──> DONE
//!     │          │          │
//!     └── any failure that forces rollback stops processing ──┐
//!                                                             v
//!                          ResultAction::{Keep, Rollback} -> finish
//! ```
//!
//! Model changes go to a private working copy of the tree taken when the
//! controller write lock is acquired. Commit publishes the copy; rollback
//! drops it and runs the rollback handlers registered through
//! [`OperationContext::complete_step`] in reverse order.

use crate::cancel::{CancellationToken, Wait, bounded_wait};
use crate::controller::{ExecuteOptions, ModelController};
use crate::error::{OperationError, Result};
use crate::message::{LoggingMessageHandler, MessageSeverity, OperationMessageHandler};
use crate::process_state::{ControlledProcessState, Stamp, State};
use crate::registry::ResourceRegistration;
use crate::transaction::{OperationTransaction, TransactionControl};
use async_trait::async_trait;
use futures::lock::OwnedMutexGuard;
use futures_lite::FutureExt;
use management_model::{
    Operation, OperationResponse, Outcome, PathAddress, ProcessStateHeader, Resource,
    ResponseHeaders,
};
use serde_json::{Map, Value};
use service_container::{ServiceContainer, ServiceName, ServiceProblem, ServiceTarget};
use std::any::Any;
use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Failure description used when the verify stage gives up waiting
pub const STABILITY_TIMEOUT_MESSAGE: &str =
    "Operation timed out awaiting service container stability";

/// Execution stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Read and modify the model
    Model,
    /// Apply changes to running services
    Runtime,
    /// Check the results of runtime changes
    Verify,
    /// Nothing left to run
    Done,
}

impl Stage {
    fn next(self) -> Stage {
        match self {
            Stage::Model => Stage::Runtime,
            Stage::Runtime => Stage::Verify,
            Stage::Verify | Stage::Done => Stage::Done,
        }
    }
}

/// What happens to the operation's changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultAction {
    /// Commit
    Keep,
    /// Discard and run rollback handlers
    Rollback,
}

/// Executes one step of an operation
#[async_trait]
pub trait OperationStepHandler: Send + Sync {
    /// Run the step. Returning `Ok(())` without calling
    /// [`OperationContext::complete_step`] completes it with no rollback.
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()>;
}

/// Handle to one response node of the operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseId(usize);

impl ResponseId {
    const ROOT: ResponseId = ResponseId(0);
}

#[derive(Default)]
struct ResponseNode {
    result: Value,
    failure: Option<Value>,
    headers: ResponseHeaders,
    children: Vec<(String, ResponseId)>,
}

struct Step {
    // `None` means resolve from the registry when the step runs
    handler: Option<Arc<dyn OperationStepHandler>>,
    operation: Arc<Operation>,
    response: ResponseId,
}

struct ActiveStep {
    operation: Arc<Operation>,
    response: ResponseId,
    read_only: bool,
}

type RollbackFn = Box<dyn FnOnce(&mut RollbackContext<'_>) + Send>;

struct RollbackEntry {
    response: ResponseId,
    handler: RollbackFn,
}

struct RuntimeTracking {
    baseline: BTreeSet<ServiceProblem>,
    response: ResponseId,
}

/// State of one executing operation, handed to every step handler
pub struct OperationContext {
    controller: ModelController,
    queues: [VecDeque<Step>; 3],
    stage: Stage,
    active: ActiveStep,
    responses: Vec<ResponseNode>,
    rollbacks: Vec<RollbackEntry>,
    halted: bool,
    rollback_only: bool,
    cancelled: bool,
    interrupt_consumed: bool,
    working: Option<Resource>,
    lock: Option<OwnedMutexGuard<()>>,
    runtime: Option<RuntimeTracking>,
    blocking_timeout: Duration,
    rollback_on_runtime_failure: bool,
    initial_state: State,
    cancel: CancellationToken,
    message_handler: Arc<dyn OperationMessageHandler>,
    transaction_control: Option<Arc<dyn TransactionControl>>,
    attachments: Vec<Vec<u8>>,
}

impl OperationContext {
    pub(crate) fn new(
        controller: ModelController,
        operation: Operation,
        options: ExecuteOptions,
        cancel: CancellationToken,
    ) -> Self {
        let blocking_timeout = operation
            .headers()
            .blocking_timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| controller.config().blocking_timeout());
        let rollback_on_runtime_failure = operation.headers().rollback_on_runtime_failure;
        let initial_state = controller.process_state().state();
        let operation = Arc::new(operation);
        Self {
            controller,
            queues: Default::default(),
            stage: Stage::Model,
            active: ActiveStep {
                operation,
                response: ResponseId::ROOT,
                read_only: false,
            },
            responses: vec![ResponseNode::default()],
            rollbacks: Vec::new(),
            halted: false,
            rollback_only: false,
            cancelled: false,
            interrupt_consumed: false,
            working: None,
            lock: None,
            runtime: None,
            blocking_timeout,
            rollback_on_runtime_failure,
            initial_state,
            cancel,
            message_handler: options
                .message_handler
                .unwrap_or_else(|| Arc::new(LoggingMessageHandler)),
            transaction_control: options.transaction_control,
            attachments: options.attachments,
        }
    }

    /// Run the operation to completion and build its response
    pub(crate) async fn run(mut self) -> OperationResponse {
        let initial = Step {
            handler: None,
            operation: self.active.operation.clone(),
            response: ResponseId::ROOT,
        };
        self.queues[0].push_back(initial);
        self.process_stages().await;
        let action = self.decide_result_action();
        self.finish(action).await
    }

    // ----- stage machine -------------------------------------------------

    async fn process_stages(&mut self) {
        while self.stage != Stage::Done {
            let step = match self.queue(self.stage) {
                Some(queue) => queue.pop_front(),
                None => None,
            };
            let Some(step) = step else {
                if !self.advance_stage().await {
                    return;
                }
                continue;
            };
            if self.cancellation_pending() {
                self.mark_cancelled();
                return;
            }
            self.execute_step(step).await;
            if self.halted {
                return;
            }
        }
    }

    async fn advance_stage(&mut self) -> bool {
        let next = self.stage.next();
        debug!("Entering stage {:?}", next);
        self.stage = next;
        if next == Stage::Verify && self.runtime.is_some() {
            self.verify_services().await;
        }
        !self.halted
    }

    fn queue(&mut self, stage: Stage) -> Option<&mut VecDeque<Step>> {
        match stage {
            Stage::Model => Some(&mut self.queues[0]),
            Stage::Runtime => Some(&mut self.queues[1]),
            Stage::Verify => Some(&mut self.queues[2]),
            Stage::Done => None,
        }
    }

    async fn execute_step(&mut self, step: Step) {
        let (handler, read_only) = match step.handler.clone() {
            Some(handler) => (handler, false),
            None => match self
                .controller
                .registration()
                .operation_entry(step.operation.address(), step.operation.name())
            {
                Some(entry) => (entry.handler.clone(), entry.flags.read_only),
                None => {
                    let description = format!(
                        "No handler for operation '{}' at address {}",
                        step.operation.name(),
                        step.operation.address()
                    );
                    debug!("{}", description);
                    self.record_failure(step.response, Value::String(description));
                    self.apply_failure_policy(true);
                    return;
                }
            },
        };

        let operation = step.operation.clone();
        self.active = ActiveStep {
            operation: step.operation,
            response: step.response,
            read_only,
        };
        let failed_before = self.responses[step.response.0].failure.is_some();
        debug!(
            stage = ?self.stage,
            "Executing step '{}' at {}",
            operation.name(),
            operation.address()
        );

        let result = AssertUnwindSafe(handler.execute(self, &operation))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(OperationError::unexpected(panic_message(&*panic))));

        match result {
            Ok(()) => {
                // Handler reported a handled failure through the context
                if !failed_before && self.responses[step.response.0].failure.is_some() {
                    self.apply_failure_policy(true);
                }
            }
            // Cancellation was observed by the context itself
            Err(_) if self.cancelled => {}
            Err(error) => {
                if matches!(error, OperationError::Interrupted) {
                    self.interrupt_consumed = true;
                }
                if error.is_handled() {
                    debug!("Step '{}' failed: {}", operation.name(), error);
                } else {
                    warn!("Step '{}' failed unexpectedly: {}", operation.name(), error);
                }
                self.record_failure(step.response, error.failure_description());
                self.apply_failure_policy(error.is_handled());
            }
        }
    }

    fn record_failure(&mut self, response: ResponseId, description: Value) {
        let node = &mut self.responses[response.0];
        if node.failure.is_none() {
            node.failure = Some(description);
        }
    }

    /// Model-stage failures and unhandled failures always roll back; handled
    /// runtime failures honour `rollback-on-runtime-failure`.
    fn apply_failure_policy(&mut self, handled: bool) {
        if !handled || self.stage == Stage::Model || self.rollback_on_runtime_failure {
            self.halted = true;
            self.rollback_only = true;
        }
    }

    fn cancellation_pending(&self) -> bool {
        self.cancel.is_cancelled() && !self.interrupt_consumed
    }

    fn mark_cancelled(&mut self) {
        info!("Operation cancelled");
        self.cancelled = true;
        self.halted = true;
        self.rollback_only = true;
    }

    /// Token for waits the context may abort; `None` once a handler has
    /// already consumed the interrupt.
    fn wait_token(&self) -> Option<CancellationToken> {
        (!self.interrupt_consumed).then(|| self.cancel.clone())
    }

    async fn verify_services(&mut self) {
        let container = self.controller.container().clone();
        let timeout = self.blocking_timeout;
        let token = self.wait_token();
        match bounded_wait(container.await_stability(timeout), timeout, token.as_ref()).await {
            Wait::Ready(Ok(())) => {}
            Wait::Ready(Err(_)) | Wait::TimedOut => {
                self.stability_timed_out();
                return;
            }
            Wait::Cancelled => {
                self.mark_cancelled();
                return;
            }
        }

        let Some(tracking) = &self.runtime else {
            return;
        };
        let response = tracking.response;
        let new_problems: Vec<ServiceProblem> = container
            .problems()
            .difference(&tracking.baseline)
            .cloned()
            .collect();
        if !new_problems.is_empty() {
            warn!("Service verification found {} problem(s)", new_problems.len());
            self.record_failure(response, problems_description(&new_problems));
            self.apply_failure_policy(true);
        }
    }

    fn stability_timed_out(&mut self) {
        warn!(
            "{} after {:?}; process requires restart",
            STABILITY_TIMEOUT_MESSAGE, self.blocking_timeout
        );
        let response = self
            .runtime
            .as_ref()
            .map(|t| t.response)
            .unwrap_or(ResponseId::ROOT);
        self.record_failure(response, Value::String(STABILITY_TIMEOUT_MESSAGE.into()));
        self.halted = true;
        self.rollback_only = true;
        self.controller.process_state().set_restart_required();
    }

    fn decide_result_action(&mut self) -> ResultAction {
        if self.rollback_only {
            return ResultAction::Rollback;
        }
        let Some(control) = self.transaction_control.clone() else {
            return ResultAction::Keep;
        };
        let prepared = self.render(ResultAction::Keep);
        let mut transaction = OperationTransaction::new();
        let vote = std::panic::catch_unwind(AssertUnwindSafe(|| {
            control.operation_prepared(&mut transaction, &prepared)
        }));
        if let Err(panic) = vote {
            let message = panic_message(&*panic);
            warn!("Transaction control panicked: {}", message);
            self.record_failure(
                ResponseId::ROOT,
                Value::String(format!("Transaction control failed: {}", message)),
            );
            return ResultAction::Rollback;
        }
        if transaction.is_committed() {
            ResultAction::Keep
        } else {
            info!("Operation rolled back by transaction control");
            ResultAction::Rollback
        }
    }

    async fn finish(mut self, action: ResultAction) -> OperationResponse {
        match action {
            ResultAction::Keep => {
                if let Some(working) = self.working.take() {
                    self.controller.publish(working);
                    debug!("Committed model changes");
                }
            }
            ResultAction::Rollback => {
                if self.working.take().is_some() {
                    debug!("Discarded model changes");
                }
                self.run_rollback_handlers();
            }
        }

        if self.runtime.is_some() {
            // Bounded and not interruptible: the next writer must find a
            // settled container.
            let container = self.controller.container().clone();
            if let Err(e) = container.await_stability(self.blocking_timeout).await {
                warn!("{}; process requires restart", e);
                self.controller.process_state().set_restart_required();
            }
        }
        if self.lock.take().is_some() {
            debug!("Released controller write lock");
        }

        let response = self.render(action);
        info!("Operation finished with outcome {}", response.outcome);
        response
    }

    fn run_rollback_handlers(&mut self) {
        let entries = std::mem::take(&mut self.rollbacks);
        if entries.is_empty() {
            return;
        }
        debug!("Running {} rollback handler(s)", entries.len());
        let container = self.controller.container().clone();
        let process_state = self.controller.process_state().clone();
        for entry in entries.into_iter().rev() {
            let mut rollback = RollbackContext {
                container: &container,
                process_state: &process_state,
                headers: &mut self.responses[entry.response.0].headers,
                messages: self.message_handler.as_ref(),
            };
            let handler = entry.handler;
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(&mut rollback))).is_err() {
                warn!("Rollback handler panicked");
            }
        }
    }

    // ----- response rendering -------------------------------------------

    fn render(&self, action: ResultAction) -> OperationResponse {
        let mut response = self.render_node(ResponseId::ROOT, action);
        if response.outcome != Outcome::Success && response.failure_description.is_none() {
            let fallback = if self.cancelled {
                "Operation cancelled"
            } else {
                "Operation rolled back"
            };
            response.failure_description = Some(Value::String(fallback.into()));
        }
        let now = self.controller.process_state().state();
        if now != self.initial_state {
            response.response_headers.process_state = match now {
                State::ReloadRequired => Some(ProcessStateHeader::ReloadRequired),
                State::RestartRequired => Some(ProcessStateHeader::RestartRequired),
                _ => None,
            };
        }
        response
    }

    fn render_node(&self, id: ResponseId, action: ResultAction) -> OperationResponse {
        let node = &self.responses[id.0];
        let children: Vec<(String, OperationResponse)> = node
            .children
            .iter()
            .map(|(key, child)| (key.clone(), self.render_node(*child, action)))
            .collect();
        let result = if children.is_empty() {
            node.result.clone()
        } else {
            Value::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.to_value()))
                    .collect(),
            )
        };
        let failure = node.failure.clone().or_else(|| composite_failure(&children));
        let (outcome, rolled_back) = match action {
            ResultAction::Rollback if self.cancelled => (Outcome::Cancelled, Some(true)),
            ResultAction::Rollback => (Outcome::Failed, Some(true)),
            ResultAction::Keep if failure.is_some() => (Outcome::Failed, Some(false)),
            ResultAction::Keep => (Outcome::Success, None),
        };
        OperationResponse {
            outcome,
            result,
            failure_description: failure,
            rolled_back,
            response_headers: node.headers.clone(),
        }
    }

    // ----- handler API: steps and results -------------------------------

    fn push_step(&mut self, step: Step, stage: Stage, first: bool) -> Result<()> {
        let current = self.stage;
        let queue = match self.queue(stage) {
            Some(queue) if stage >= current => queue,
            _ => {
                return Err(OperationError::invalid_state(format!(
                    "Cannot add a step for stage {:?} while in stage {:?}",
                    stage, current
                )));
            }
        };
        if first {
            queue.push_front(step);
        } else {
            queue.push_back(step);
        }
        Ok(())
    }

    /// Queue `handler` for the current operation and response
    pub fn add_step(&mut self, handler: Arc<dyn OperationStepHandler>, stage: Stage) -> Result<()> {
        let step = Step {
            handler: Some(handler),
            operation: self.active.operation.clone(),
            response: self.active.response,
        };
        self.push_step(step, stage, false)
    }

    /// Like [`add_step`](Self::add_step) but runs before already queued steps
    pub fn add_step_first(
        &mut self,
        handler: Arc<dyn OperationStepHandler>,
        stage: Stage,
    ) -> Result<()> {
        let step = Step {
            handler: Some(handler),
            operation: self.active.operation.clone(),
            response: self.active.response,
        };
        self.push_step(step, stage, true)
    }

    /// Queue `handler` for another operation writing to `response`
    pub fn add_step_for(
        &mut self,
        response: ResponseId,
        operation: Operation,
        handler: Arc<dyn OperationStepHandler>,
        stage: Stage,
    ) -> Result<()> {
        let step = Step {
            handler: Some(handler),
            operation: Arc::new(operation),
            response,
        };
        self.push_step(step, stage, false)
    }

    /// Queue `operation`, resolving its handler from the registry when it runs
    pub fn add_operation_step(
        &mut self,
        response: ResponseId,
        operation: Operation,
        stage: Stage,
    ) -> Result<()> {
        let step = Step {
            handler: None,
            operation: Arc::new(operation),
            response,
        };
        self.push_step(step, stage, false)
    }

    /// Like [`add_operation_step`](Self::add_operation_step) but runs before
    /// already queued steps
    pub fn add_operation_step_first(
        &mut self,
        response: ResponseId,
        operation: Operation,
        stage: Stage,
    ) -> Result<()> {
        let step = Step {
            handler: None,
            operation: Arc::new(operation),
            response,
        };
        self.push_step(step, stage, true)
    }

    /// Create a nested response rendered under `key` in `parent`'s result
    pub fn create_child_response(&mut self, parent: ResponseId, key: impl Into<String>) -> ResponseId {
        let id = ResponseId(self.responses.len());
        self.responses.push(ResponseNode::default());
        self.responses[parent.0].children.push((key.into(), id));
        id
    }

    /// Response of the running step
    pub fn current_response(&self) -> ResponseId {
        self.active.response
    }

    /// Result node of the running step
    pub fn result(&mut self) -> &mut Value {
        &mut self.responses[self.active.response.0].result
    }

    /// Report a handled failure on the running step
    pub fn set_failure_description(&mut self, description: impl Into<Value>) {
        self.responses[self.active.response.0].failure = Some(description.into());
    }

    /// Whether the running step's response already carries a failure
    pub fn has_failure_description(&self) -> bool {
        self.responses[self.active.response.0].failure.is_some()
    }

    /// Register the step's rollback handler, run only if the operation
    /// ends with [`ResultAction::Rollback`].
    pub fn complete_step<F>(&mut self, rollback: F)
    where
        F: FnOnce(&mut RollbackContext<'_>) + Send + 'static,
    {
        self.rollbacks.push(RollbackEntry {
            response: self.active.response,
            handler: Box::new(rollback),
        });
    }

    /// Current stage
    pub fn current_stage(&self) -> Stage {
        self.stage
    }

    /// Address of the running step's operation
    pub fn current_address(&self) -> &PathAddress {
        self.active.operation.address()
    }

    /// Whether the operation will be rolled back
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Roll the operation back once it completes; processing continues
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Await `future` unless the operation is cancelled first, in which case
    /// it yields [`OperationError::Interrupted`].
    pub fn interruptible<F>(
        &self,
        future: F,
    ) -> impl Future<Output = Result<F::Output>> + Send + use<F>
    where
        F: Future + Send,
        F::Output: Send,
    {
        let token = self.cancel.clone();
        async move {
            let ready = async { Some(future.await) };
            let cancelled = async {
                token.cancelled().await;
                None
            };
            ready.or(cancelled).await.ok_or(OperationError::Interrupted)
        }
    }

    /// Send a message to the caller's message handler
    pub fn report(&self, severity: MessageSeverity, message: impl AsRef<str>) {
        self.message_handler.handle_report(severity, message.as_ref());
    }

    /// Number of attachments sent with the operation
    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// One attachment
    pub fn attachment(&self, index: usize) -> Option<&[u8]> {
        self.attachments.get(index).map(Vec::as_slice)
    }

    /// Handler registry
    pub fn registration(&self) -> &ResourceRegistration {
        self.controller.registration()
    }

    /// Process state
    pub fn process_state(&self) -> &ControlledProcessState {
        self.controller.process_state()
    }

    // ----- handler API: model --------------------------------------------

    fn absolute(&self, relative: &PathAddress) -> Result<PathAddress> {
        Ok(self.active.operation.address().join(relative)?)
    }

    fn ensure_model_stage(&self, what: &str) -> Result<()> {
        if self.stage != Stage::Model {
            return Err(OperationError::invalid_state(format!(
                "{} is only allowed in stage Model, not {:?}",
                what, self.stage
            )));
        }
        Ok(())
    }

    async fn acquire_write_lock(&mut self) -> Result<()> {
        if self.lock.is_some() {
            return Ok(());
        }
        if self.active.read_only {
            return Err(OperationError::invalid_state(format!(
                "Read-only operation '{}' cannot modify the model or services",
                self.active.operation.name()
            )));
        }
        let lock = self.controller.write_lock();
        let token = self.wait_token();
        debug!("Acquiring controller write lock");
        match bounded_wait(lock.lock_owned(), self.blocking_timeout, token.as_ref()).await {
            Wait::Ready(guard) => {
                self.lock = Some(guard);
                Ok(())
            }
            Wait::TimedOut => Err(OperationError::Timeout(format!(
                "Timed out after {:?} waiting for the controller write lock",
                self.blocking_timeout
            ))),
            Wait::Cancelled => {
                self.mark_cancelled();
                Err(OperationError::Interrupted)
            }
        }
    }

    fn working_model(&mut self) -> &mut Resource {
        self.working
            .get_or_insert_with(|| Resource::clone(&self.controller.read_model()))
    }

    /// Snapshot of a resource relative to the running step's address.
    /// Sees this operation's uncommitted changes.
    pub fn read_resource(&self, relative: &PathAddress, recursive: bool) -> Result<Resource> {
        let address = self.absolute(relative)?;
        let snapshot = match &self.working {
            Some(working) => working.snapshot(&address, recursive)?,
            None => self.controller.read_model().snapshot(&address, recursive)?,
        };
        Ok(snapshot)
    }

    /// Mutable resource relative to the running step's address. Takes the
    /// controller write lock on first use.
    pub async fn read_resource_for_update(&mut self, relative: &PathAddress) -> Result<&mut Resource> {
        self.ensure_model_stage("read_resource_for_update")?;
        self.acquire_write_lock().await?;
        let address = self.absolute(relative)?;
        Ok(self.working_model().navigate_mut(&address)?)
    }

    /// Create an empty resource relative to the running step's address
    pub async fn create_resource(&mut self, relative: &PathAddress) -> Result<&mut Resource> {
        self.ensure_model_stage("create_resource")?;
        self.acquire_write_lock().await?;
        let address = self.absolute(relative)?;
        Ok(self.working_model().create(&address, Resource::new())?)
    }

    /// Remove the resource relative to the running step's address
    pub async fn remove_resource(&mut self, relative: &PathAddress) -> Result<Resource> {
        self.ensure_model_stage("remove_resource")?;
        self.acquire_write_lock().await?;
        let address = self.absolute(relative)?;
        Ok(self.working_model().remove(&address)?)
    }

    // ----- handler API: runtime ------------------------------------------

    async fn ensure_runtime_access(&mut self) -> Result<()> {
        if !matches!(self.stage, Stage::Runtime | Stage::Verify) {
            return Err(OperationError::invalid_state(format!(
                "Service container access is only allowed in stages Runtime and Verify, not {:?}",
                self.stage
            )));
        }
        if self.runtime.is_some() {
            return Ok(());
        }
        self.acquire_write_lock().await?;
        let container = self.controller.container().clone();
        let token = self.wait_token();
        let timeout = self.blocking_timeout;
        match bounded_wait(container.await_stability(timeout), timeout, token.as_ref()).await {
            Wait::Ready(Ok(())) => {}
            Wait::Ready(Err(_)) | Wait::TimedOut => {
                return Err(OperationError::Timeout(STABILITY_TIMEOUT_MESSAGE.into()));
            }
            Wait::Cancelled => {
                self.mark_cancelled();
                return Err(OperationError::Interrupted);
            }
        }
        self.runtime = Some(RuntimeTracking {
            baseline: container.problems(),
            response: self.active.response,
        });
        Ok(())
    }

    /// Target for installing services; runtime and verify stages only
    pub async fn service_target(&mut self) -> Result<ServiceTarget> {
        self.ensure_runtime_access().await?;
        Ok(self.controller.container().service_target())
    }

    /// Remove a service; runtime and verify stages only
    pub async fn remove_service(&mut self, name: &ServiceName) -> Result<()> {
        self.ensure_runtime_access().await?;
        self.controller.container().remove(name)?;
        Ok(())
    }

    /// Read access to the service container
    pub fn service_registry(&self) -> &ServiceContainer {
        self.controller.container()
    }

    /// Mark the process reload-required instead of applying a change at
    /// runtime. Revert the returned stamp on rollback.
    pub fn reload_required(&mut self) -> Stamp {
        if !self.process_state().reload_supported() {
            return self.restart_required();
        }
        let stamp = self.process_state().set_reload_required();
        let headers = &mut self.responses[self.active.response.0].headers;
        headers.operation_requires_reload = true;
        headers.runtime_update_skipped = true;
        stamp
    }

    /// Mark the process restart-required instead of applying a change at
    /// runtime. Revert the returned stamp on rollback.
    pub fn restart_required(&mut self) -> Stamp {
        let stamp = self.process_state().set_restart_required();
        let headers = &mut self.responses[self.active.response.0].headers;
        headers.operation_requires_restart = true;
        headers.runtime_update_skipped = true;
        stamp
    }

    /// Record that the running step left the runtime untouched
    pub fn runtime_update_skipped(&mut self) {
        self.responses[self.active.response.0]
            .headers
            .runtime_update_skipped = true;
    }
}

/// What a rollback handler may do
pub struct RollbackContext<'a> {
    container: &'a ServiceContainer,
    process_state: &'a ControlledProcessState,
    headers: &'a mut ResponseHeaders,
    messages: &'a dyn OperationMessageHandler,
}

impl RollbackContext<'_> {
    /// Remove a service installed by the step; missing services are ignored
    pub fn remove_service(&self, name: &ServiceName) {
        match self.container.remove(name) {
            Ok(()) => debug!("Rollback removed service {}", name),
            Err(e) => debug!("Rollback found nothing to remove: {}", e),
        }
    }

    /// Target for reinstalling services the step removed
    pub fn service_target(&self) -> ServiceTarget {
        self.container.service_target()
    }

    /// The service container
    pub fn service_registry(&self) -> &ServiceContainer {
        self.container
    }

    /// Undo [`OperationContext::reload_required`]
    pub fn revert_reload_required(&mut self, stamp: Stamp) {
        self.process_state.revert_reload_required(stamp);
        if self.process_state.reload_supported() {
            self.headers.operation_requires_reload = false;
        } else {
            self.headers.operation_requires_restart = false;
        }
    }

    /// Undo [`OperationContext::restart_required`]
    pub fn revert_restart_required(&mut self, stamp: Stamp) {
        self.process_state.revert_restart_required(stamp);
        self.headers.operation_requires_restart = false;
    }

    /// Send a message to the caller's message handler
    pub fn report(&self, severity: MessageSeverity, message: impl AsRef<str>) {
        self.messages.handle_report(severity, message.as_ref());
    }
}

fn composite_failure(children: &[(String, OperationResponse)]) -> Option<Value> {
    let failed: Map<String, Value> = children
        .iter()
        .filter_map(|(key, child)| {
            child
                .failure_description
                .clone()
                .map(|fd| (format!("Operation {}", key), fd))
        })
        .collect();
    (!failed.is_empty()).then_some(Value::Object(failed))
}

fn problems_description(problems: &[ServiceProblem]) -> Value {
    let mut failed = Map::new();
    let mut waiting = Vec::new();
    for problem in problems {
        match problem {
            ServiceProblem::StartFailed { service, reason } => {
                failed.insert(service.to_string(), Value::String(reason.clone()));
            }
            ServiceProblem::MissingDependency {
                service,
                dependency,
            } => {
                waiting.push(Value::String(format!("{} is missing [{}]", service, dependency)));
            }
            ServiceProblem::UnavailableDependency {
                service,
                dependency,
            } => {
                waiting.push(Value::String(format!(
                    "{} depends on unavailable [{}]",
                    service, dependency
                )));
            }
        }
    }
    let mut description = Map::new();
    if !failed.is_empty() {
        description.insert("Services that failed to start".into(), Value::Object(failed));
    }
    if !waiting.is_empty() {
        description.insert(
            "Services with missing/unavailable dependencies".into(),
            Value::Array(waiting),
        );
    }
    Value::Object(description)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
