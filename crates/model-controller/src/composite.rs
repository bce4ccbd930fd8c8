//! The `composite` operation

use crate::context::{OperationContext, OperationStepHandler, Stage};
use crate::error::{OperationError, Result};
use async_trait::async_trait;
use management_model::{Operation, keys};
use serde_json::Value;
use tracing::debug;

/// Runs the operations in its `steps` parameter as one unit.
///
/// Each step gets a child response `step-N` (1-based) and is queued at the
/// front of the model stage, so the steps run next, in order, before
/// anything queued earlier. Nested composites work the same way.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeOperationHandler;

#[async_trait]
impl OperationStepHandler for CompositeOperationHandler {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let steps = match operation.require(keys::STEPS)? {
            Value::Array(steps) => steps.clone(),
            other => {
                return Err(OperationError::failed(format!(
                    "Parameter '{}' must be a list of operations, got {}",
                    keys::STEPS,
                    other
                )));
            }
        };

        let mut parsed = Vec::with_capacity(steps.len());
        for step in &steps {
            parsed.push(Operation::from_value(step)?);
        }
        debug!("Composite with {} step(s)", parsed.len());

        let parent = context.current_response();
        let responses: Vec<_> = (1..=parsed.len())
            .map(|i| context.create_child_response(parent, format!("step-{}", i)))
            .collect();

        // Pushing to the front in reverse keeps the steps in order
        for (step, response) in parsed.into_iter().zip(responses).rev() {
            context.add_operation_step_first(response, step, Stage::Model)?;
        }
        Ok(())
    }
}
