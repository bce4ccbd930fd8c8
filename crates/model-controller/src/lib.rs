//! Transactional management-model controller
//!
//! Operations are executed in three stages (model, runtime, verify) against
//! a private working copy of the management model. If every stage succeeds
//! the copy is published; otherwise it is dropped and the rollback handlers
//! each step registered undo runtime side effects in reverse order. Changes
//! that cannot be applied to the running process flag it reload- or
//! restart-required instead.
//!
//! # Example
//!
//! ```no_run
//! use management_model::{Operation, PathAddress, Resource, keys};
//! use model_controller::ModelController;
//! use serde_json::json;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let controller = ModelController::builder()
//!     .root_resource(Resource::with_model(json!({"attr1": 1})))
//!     .build()?;
//!
//! let write = Operation::new(keys::WRITE_ATTRIBUTE, PathAddress::root())
//!     .param(keys::NAME, "attr1")
//!     .param(keys::VALUE, 2);
//! let read = Operation::new(keys::READ_ATTRIBUTE, PathAddress::root())
//!     .param(keys::NAME, "attr1");
//!
//! let response = controller.execute(Operation::composite([write, read])).await;
//! assert!(response.is_success());
//! assert_eq!(response.step(2).unwrap().result, json!(2));
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod composite;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod global;
pub mod logging;
pub mod message;
pub mod process_state;
pub mod registry;
pub mod transaction;

pub use cancel::CancellationToken;
pub use composite::CompositeOperationHandler;
pub use config::{ConfigError, ControllerConfig};
pub use context::{
    OperationContext, OperationStepHandler, ResponseId, ResultAction, RollbackContext, Stage,
};
pub use controller::{AsyncOperation, ExecuteOptions, ModelController, ModelControllerBuilder};
pub use error::{ControllerError, OperationError, Result};
pub use global::register_global_operations;
pub use message::{LoggingMessageHandler, MessageSeverity, OperationMessageHandler};
pub use process_state::{ControlledProcessState, Stamp, State};
pub use registry::{OperationEntry, OperationFlags, ResourceRegistration};
pub use transaction::{
    CommitTransactionControl, OperationTransaction, RollbackTransactionControl, TransactionControl,
};
