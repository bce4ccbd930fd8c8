//! Well-known keys of the operation and response wire shapes

/// Operation name key
pub const OP: &str = "operation";
/// Operation address key
pub const OP_ADDR: &str = "address";
/// Operation headers key
pub const OPERATION_HEADERS: &str = "operation-headers";
/// Header controlling rollback of handled runtime failures
pub const ROLLBACK_ON_RUNTIME_FAILURE: &str = "rollback-on-runtime-failure";
/// Header overriding the blocking timeout, in seconds
pub const BLOCKING_TIMEOUT: &str = "blocking-timeout";

/// Response outcome key
pub const OUTCOME: &str = "outcome";
/// Response result key
pub const RESULT: &str = "result";
/// Response failure description key
pub const FAILURE_DESCRIPTION: &str = "failure-description";
/// Response rollback marker key
pub const ROLLED_BACK: &str = "rolled-back";
/// Response headers key
pub const RESPONSE_HEADERS: &str = "response-headers";
/// Header set when a step left the process needing a reload
pub const OPERATION_REQUIRES_RELOAD: &str = "operation-requires-reload";
/// Header set when a step left the process needing a restart
pub const OPERATION_REQUIRES_RESTART: &str = "operation-requires-restart";
/// Header set when a step did not apply its change at runtime
pub const RUNTIME_UPDATE_SKIPPED: &str = "runtime-update-skipped";
/// Top-level header naming a changed process state
pub const PROCESS_STATE: &str = "process-state";

/// Composite operation name
pub const COMPOSITE: &str = "composite";
/// Composite steps parameter
pub const STEPS: &str = "steps";

/// `name` parameter of attribute operations
pub const NAME: &str = "name";
/// `value` parameter of attribute operations
pub const VALUE: &str = "value";
/// `recursive` parameter of read operations
pub const RECURSIVE: &str = "recursive";
/// `child-type` parameter of child read operations
pub const CHILD_TYPE: &str = "child-type";

/// Global read-resource operation
pub const READ_RESOURCE: &str = "read-resource";
/// Global read-attribute operation
pub const READ_ATTRIBUTE: &str = "read-attribute";
/// Global write-attribute operation
pub const WRITE_ATTRIBUTE: &str = "write-attribute";
/// Global undefine-attribute operation
pub const UNDEFINE_ATTRIBUTE: &str = "undefine-attribute";
/// Global read-children-names operation
pub const READ_CHILDREN_NAMES: &str = "read-children-names";
/// Global read-children-types operation
pub const READ_CHILDREN_TYPES: &str = "read-children-types";
/// Global read-children-resources operation
pub const READ_CHILDREN_RESOURCES: &str = "read-children-resources";
/// Global read-operation-names operation
pub const READ_OPERATION_NAMES: &str = "read-operation-names";
