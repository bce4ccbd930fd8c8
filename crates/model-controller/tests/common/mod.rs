//! Shared fixtures for controller scenarios
#![allow(dead_code)]

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use management_model::{Operation, PathAddress, PathElement, Resource, keys};
use model_controller::{
    ControllerConfig, MessageSeverity, ModelController, OperationContext, OperationError, OperationFlags,
    OperationMessageHandler, OperationStepHandler, ResourceRegistration, Result, Stage,
    register_global_operations,
};
use model_controller::logging::init_logging;
use serde_json::{Value, json};
use service_container::{NullService, Service, ServiceName, StartError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

/// One-shot signal: `wait` blocks until `release` is called
#[derive(Clone)]
pub struct Gate {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self { tx, rx }
    }

    pub async fn wait(&self) {
        let _ = self.rx.recv().await;
    }

    pub fn release(&self) {
        self.tx.close();
    }
}

/// Everything a scenario needs
pub struct Fixture {
    pub controller: ModelController,
    /// Released by the test to unblock blocking handlers and services
    pub gate: Gate,
    /// Receives one message each time something starts blocking on the gate
    pub entered: Receiver<()>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        init_logging(config.log_level.as_deref());
        let gate = Gate::new();
        let (entered_tx, entered) = async_channel::unbounded();
        let registration = registration(&gate, &entered_tx);
        let root = Resource::with_model(json!({"attr1": 1, "attr2": 2}));
        let controller = ModelController::builder()
            .registration(registration)
            .root_resource(root)
            .config(config)
            .build()
            .expect("controller builds");
        controller.process_state().set_running();
        Self {
            controller,
            gate,
            entered,
        }
    }

    /// Attribute of the published root
    pub fn attribute(&self, name: &str) -> Value {
        self.controller
            .read_model()
            .attribute(name)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub async fn wait_entered(&self) {
        self.entered.recv().await.expect("handler entered");
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Root operation with `name`/`value` parameters
pub fn op(name: &str) -> Operation {
    Operation::new(name, PathAddress::root())
}

pub fn set(name: &str, attribute: &str, value: impl Into<Value>) -> Operation {
    op(name).param(keys::NAME, attribute).param(keys::VALUE, value)
}

pub fn service_op(name: &str, service: &str) -> Operation {
    op(name).param(keys::NAME, service)
}

fn registration(gate: &Gate, entered: &Sender<()>) -> ResourceRegistration {
    let mut root = ResourceRegistration::new();
    register_global_operations(&mut root).expect("global operations");
    let flags = OperationFlags::default();
    let register = |root: &mut ResourceRegistration, name: &str, handler: Arc<dyn OperationStepHandler>| {
        root.register_operation(name, handler, flags)
            .expect("unique operation");
    };

    register(&mut root, "good", Arc::new(Good));
    register(&mut root, "bad", Arc::new(Bad));
    register(&mut root, "evil", Arc::new(Evil));
    register(&mut root, "handle-failed", Arc::new(HandleFailed));
    register(&mut root, "panic", Arc::new(Panicking));
    register(&mut root, "runtime-bad", Arc::new(RuntimeFailure { handled: true }));
    register(&mut root, "runtime-evil", Arc::new(RuntimeFailure { handled: false }));
    register(&mut root, "good-service", Arc::new(ServiceOp(ServiceKind::Good)));
    register(&mut root, "bad-service", Arc::new(ServiceOp(ServiceKind::Failing)));
    register(&mut root, "missing-service", Arc::new(ServiceOp(ServiceKind::MissingDependency)));
    register(
        &mut root,
        "blocking-service",
        Arc::new(ServiceOp(ServiceKind::Blocking(gate.clone(), entered.clone()))),
    );
    register(&mut root, "remove-service", Arc::new(RemoveService));
    register(&mut root, "reload-required", Arc::new(RequireAction { restart: false }));
    register(&mut root, "restart-required", Arc::new(RequireAction { restart: true }));
    register(
        &mut root,
        "block-in-model",
        Arc::new(Interruptible {
            stage: Stage::Model,
            gate: gate.clone(),
            entered: entered.clone(),
        }),
    );
    register(
        &mut root,
        "block-in-runtime",
        Arc::new(Interruptible {
            stage: Stage::Runtime,
            gate: gate.clone(),
            entered: entered.clone(),
        }),
    );
    register(
        &mut root,
        "hold-lock",
        Arc::new(HoldLock {
            gate: gate.clone(),
            entered: entered.clone(),
        }),
    );
    register(&mut root, "report", Arc::new(Report));
    register(&mut root, "read-attachment", Arc::new(ReadAttachment));
    register(&mut root, "service-in-model", Arc::new(ServiceInModel));
    register(&mut root, "step-to-model", Arc::new(StepToModel));

    root.register_sub_model(PathElement::wildcard("child"))
        .register_operation("add", Arc::new(AddChild), flags)
        .expect("unique operation");
    root
}

async fn write(context: &mut OperationContext, operation: &Operation) -> Result<Value> {
    let name = operation.require_str(keys::NAME)?;
    let value = operation.require(keys::VALUE)?.clone();
    let resource = context.read_resource_for_update(&PathAddress::root()).await?;
    Ok(resource.set_attribute(name, value).unwrap_or(Value::Null))
}

/// Writes `name=value` and returns the previous value
pub struct Good;

#[async_trait]
impl OperationStepHandler for Good {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let previous = write(context, operation).await?;
        *context.result() = previous;
        Ok(())
    }
}

/// Writes, then fails with a handled failure
pub struct Bad;

#[async_trait]
impl OperationStepHandler for Bad {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        write(context, operation).await?;
        Err(OperationError::failed("this handler is bad"))
    }
}

/// Writes, then fails with an unhandled error
pub struct Evil;

#[async_trait]
impl OperationStepHandler for Evil {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        write(context, operation).await?;
        Err(OperationError::unexpected("this handler is evil"))
    }
}

/// Writes, then reports failure through the context
pub struct HandleFailed;

#[async_trait]
impl OperationStepHandler for HandleFailed {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        write(context, operation).await?;
        context.set_failure_description("handleFailed");
        Ok(())
    }
}

pub struct Panicking;

#[async_trait]
impl OperationStepHandler for Panicking {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        write(context, operation).await?;
        panic!("this handler panics");
    }
}

/// Writes in the model stage, fails in the runtime stage
pub struct RuntimeFailure {
    handled: bool,
}

#[async_trait]
impl OperationStepHandler for RuntimeFailure {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        write(context, operation).await?;
        let handler: Arc<dyn OperationStepHandler> = if self.handled {
            Arc::new(FailNow(true))
        } else {
            Arc::new(FailNow(false))
        };
        context.add_step(handler, Stage::Runtime)
    }
}

struct FailNow(bool);

#[async_trait]
impl OperationStepHandler for FailNow {
    async fn execute(&self, _context: &mut OperationContext, _operation: &Operation) -> Result<()> {
        if self.0 {
            Err(OperationError::failed("runtime failure"))
        } else {
            Err(OperationError::unexpected("runtime explosion"))
        }
    }
}

struct FailingService;

#[async_trait]
impl Service for FailingService {
    async fn start(&self) -> std::result::Result<(), StartError> {
        Err(StartError::new("this service is bad"))
    }
}

struct BlockingService {
    gate: Gate,
    entered: Sender<()>,
}

#[async_trait]
impl Service for BlockingService {
    async fn start(&self) -> std::result::Result<(), StartError> {
        let _ = self.entered.try_send(());
        self.gate.wait().await;
        Ok(())
    }
}

#[derive(Clone)]
pub enum ServiceKind {
    Good,
    Failing,
    MissingDependency,
    Blocking(Gate, Sender<()>),
}

/// Records the service name in the model, installs it at runtime and
/// removes it on rollback
pub struct ServiceOp(ServiceKind);

#[async_trait]
impl OperationStepHandler for ServiceOp {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let name = operation.require_str(keys::NAME)?.to_string();
        context
            .read_resource_for_update(&PathAddress::root())
            .await?
            .set_attribute("service", json!(name));
        context.add_step(Arc::new(InstallService(self.0.clone())), Stage::Runtime)
    }
}

struct InstallService(ServiceKind);

#[async_trait]
impl OperationStepHandler for InstallService {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let name = ServiceName::new(operation.require_str(keys::NAME)?);
        let target = context.service_target().await?;
        let builder = match &self.0 {
            ServiceKind::Good => target.add_service(name.clone(), NullService),
            ServiceKind::Failing => target.add_service(name.clone(), FailingService),
            ServiceKind::MissingDependency => target
                .add_service(name.clone(), NullService)
                .add_dependency("test.missing"),
            ServiceKind::Blocking(gate, entered) => target.add_service(
                name.clone(),
                BlockingService {
                    gate: gate.clone(),
                    entered: entered.clone(),
                },
            ),
        };
        builder.install()?;
        context.complete_step(move |rollback| rollback.remove_service(&name));
        Ok(())
    }
}

/// Removes a service at runtime, reinstalling it on rollback
pub struct RemoveService;

#[async_trait]
impl OperationStepHandler for RemoveService {
    async fn execute(&self, context: &mut OperationContext, _operation: &Operation) -> Result<()> {
        context.add_step(Arc::new(RemoveServiceRuntime), Stage::Runtime)
    }
}

struct RemoveServiceRuntime;

#[async_trait]
impl OperationStepHandler for RemoveServiceRuntime {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let name = ServiceName::new(operation.require_str(keys::NAME)?);
        context.remove_service(&name).await?;
        // Let the removal finish so the rollback can reinstall the name
        let container = context.service_registry().clone();
        container.await_stability(WAIT).await?;
        context.complete_step(move |rollback| {
            let _ = rollback.service_target().add_service(name, NullService).install();
        });
        Ok(())
    }
}

/// Writes, then flags the process instead of applying the change
pub struct RequireAction {
    restart: bool,
}

#[async_trait]
impl OperationStepHandler for RequireAction {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        write(context, operation).await?;
        context.add_step(Arc::new(FlagProcess(self.restart)), Stage::Runtime)
    }
}

struct FlagProcess(bool);

#[async_trait]
impl OperationStepHandler for FlagProcess {
    async fn execute(&self, context: &mut OperationContext, _operation: &Operation) -> Result<()> {
        if self.0 {
            let stamp = context.restart_required();
            context.complete_step(move |rollback| rollback.revert_restart_required(stamp));
        } else {
            let stamp = context.reload_required();
            context.complete_step(move |rollback| rollback.revert_reload_required(stamp));
        }
        Ok(())
    }
}

/// Writes, then blocks interruptibly in `stage` until the gate opens
pub struct Interruptible {
    stage: Stage,
    gate: Gate,
    entered: Sender<()>,
}

#[async_trait]
impl OperationStepHandler for Interruptible {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        if context.current_stage() == Stage::Model {
            write(context, operation).await?;
        }
        if context.current_stage() != self.stage {
            return context.add_step(
                Arc::new(Interruptible {
                    stage: self.stage,
                    gate: self.gate.clone(),
                    entered: self.entered.clone(),
                }),
                self.stage,
            );
        }
        let _ = self.entered.try_send(());
        let gate = self.gate.clone();
        context.interruptible(async move { gate.wait().await }).await?;
        Ok(())
    }
}

/// Takes the write lock, then blocks (not interruptibly) until the gate opens
pub struct HoldLock {
    gate: Gate,
    entered: Sender<()>,
}

#[async_trait]
impl OperationStepHandler for HoldLock {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        write(context, operation).await?;
        let _ = self.entered.try_send(());
        self.gate.wait().await;
        Ok(())
    }
}

pub struct Report;

#[async_trait]
impl OperationStepHandler for Report {
    async fn execute(&self, context: &mut OperationContext, _operation: &Operation) -> Result<()> {
        context.report(MessageSeverity::Warn, "reported from handler");
        Ok(())
    }
}

/// Returns the first attachment as text
pub struct ReadAttachment;

#[async_trait]
impl OperationStepHandler for ReadAttachment {
    async fn execute(&self, context: &mut OperationContext, _operation: &Operation) -> Result<()> {
        let text = context
            .attachment(0)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .ok_or_else(|| OperationError::failed("no attachment"))?;
        let count = context.attachment_count();
        *context.result() = json!({"text": text, "count": count});
        Ok(())
    }
}

/// Touches the service container from the model stage
pub struct ServiceInModel;

#[async_trait]
impl OperationStepHandler for ServiceInModel {
    async fn execute(&self, context: &mut OperationContext, _operation: &Operation) -> Result<()> {
        context.service_target().await?;
        Ok(())
    }
}

/// From the runtime stage, tries to queue a model step
pub struct StepToModel;

#[async_trait]
impl OperationStepHandler for StepToModel {
    async fn execute(&self, context: &mut OperationContext, _operation: &Operation) -> Result<()> {
        if context.current_stage() == Stage::Model {
            return context.add_step(Arc::new(StepToModel), Stage::Runtime);
        }
        context.add_step(Arc::new(Good), Stage::Model)
    }
}

/// Creates the child resource the operation is addressed to
pub struct AddChild;

#[async_trait]
impl OperationStepHandler for AddChild {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let value = operation.parameter(keys::VALUE).cloned();
        let resource = context.create_resource(&PathAddress::root()).await?;
        if let Some(value) = value {
            resource.set_attribute(keys::VALUE, value);
        }
        Ok(())
    }
}

/// Collects reported messages
#[derive(Default)]
pub struct CollectingMessages(pub Mutex<Vec<(MessageSeverity, String)>>);

impl OperationMessageHandler for CollectingMessages {
    fn handle_report(&self, severity: MessageSeverity, message: &str) {
        self.0
            .lock()
            .expect("messages lock")
            .push((severity, message.to_string()));
    }
}
