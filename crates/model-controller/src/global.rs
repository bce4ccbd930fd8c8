//! Global read and write operations available on every resource

use crate::composite::CompositeOperationHandler;
use crate::context::{OperationContext, OperationStepHandler};
use crate::error::{ControllerError, Result};
use crate::registry::{OperationFlags, ResourceRegistration};
use async_trait::async_trait;
use management_model::{Operation, PathAddress, keys};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Register the global operations at the root of `registration`, inherited
/// by every descendant, plus `composite` at the root.
pub fn register_global_operations(
    registration: &mut ResourceRegistration,
) -> std::result::Result<(), ControllerError> {
    let read = OperationFlags::read_only().inherited();
    let write = OperationFlags::default().inherited();
    registration
        .register_operation(keys::READ_RESOURCE, Arc::new(ReadResourceHandler), read)?
        .register_operation(keys::READ_ATTRIBUTE, Arc::new(ReadAttributeHandler), read)?
        .register_operation(keys::WRITE_ATTRIBUTE, Arc::new(WriteAttributeHandler), write)?
        .register_operation(keys::UNDEFINE_ATTRIBUTE, Arc::new(UndefineAttributeHandler), write)?
        .register_operation(keys::READ_CHILDREN_NAMES, Arc::new(ReadChildrenNamesHandler), read)?
        .register_operation(keys::READ_CHILDREN_TYPES, Arc::new(ReadChildrenTypesHandler), read)?
        .register_operation(
            keys::READ_CHILDREN_RESOURCES,
            Arc::new(ReadChildrenResourcesHandler),
            read,
        )?
        .register_operation(keys::READ_OPERATION_NAMES, Arc::new(ReadOperationNamesHandler), read)?
        .register_operation(
            keys::COMPOSITE,
            Arc::new(CompositeOperationHandler),
            OperationFlags::default(),
        )?;
    Ok(())
}

/// `read-resource(recursive)`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadResourceHandler;

#[async_trait]
impl OperationStepHandler for ReadResourceHandler {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let recursive = operation.bool_or(keys::RECURSIVE, false)?;
        let resource = context.read_resource(&PathAddress::root(), recursive)?;
        *context.result() = resource.to_model_node(recursive);
        Ok(())
    }
}

/// `read-attribute(name)`; an absent attribute reads as undefined
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadAttributeHandler;

#[async_trait]
impl OperationStepHandler for ReadAttributeHandler {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let name = operation.require_str(keys::NAME)?;
        let resource = context.read_resource(&PathAddress::root(), false)?;
        *context.result() = resource.attribute(name).cloned().unwrap_or(Value::Null);
        Ok(())
    }
}

/// `write-attribute(name, value)`; the result is the previous value
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteAttributeHandler;

#[async_trait]
impl OperationStepHandler for WriteAttributeHandler {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let name = operation.require_str(keys::NAME)?;
        let value = operation.parameter(keys::VALUE).cloned().unwrap_or(Value::Null);
        let resource = context.read_resource_for_update(&PathAddress::root()).await?;
        let previous = if value.is_null() {
            resource.undefine_attribute(name)
        } else {
            resource.set_attribute(name, value)
        };
        *context.result() = previous.unwrap_or(Value::Null);
        Ok(())
    }
}

/// `undefine-attribute(name)`
#[derive(Debug, Clone, Copy, Default)]
pub struct UndefineAttributeHandler;

#[async_trait]
impl OperationStepHandler for UndefineAttributeHandler {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let name = operation.require_str(keys::NAME)?;
        context
            .read_resource_for_update(&PathAddress::root())
            .await?
            .undefine_attribute(name);
        Ok(())
    }
}

/// `read-children-names(child-type)`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadChildrenNamesHandler;

#[async_trait]
impl OperationStepHandler for ReadChildrenNamesHandler {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let child_type = operation.require_str(keys::CHILD_TYPE)?;
        let resource = context.read_resource(&PathAddress::root(), false)?;
        let names = resource
            .child_names(child_type)
            .into_iter()
            .map(Value::String)
            .collect();
        *context.result() = Value::Array(names);
        Ok(())
    }
}

/// `read-children-types`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadChildrenTypesHandler;

#[async_trait]
impl OperationStepHandler for ReadChildrenTypesHandler {
    async fn execute(&self, context: &mut OperationContext, _operation: &Operation) -> Result<()> {
        let resource = context.read_resource(&PathAddress::root(), false)?;
        let types = resource.child_types().into_iter().map(Value::String).collect();
        *context.result() = Value::Array(types);
        Ok(())
    }
}

/// `read-children-resources(child-type, recursive)`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadChildrenResourcesHandler;

#[async_trait]
impl OperationStepHandler for ReadChildrenResourcesHandler {
    async fn execute(&self, context: &mut OperationContext, operation: &Operation) -> Result<()> {
        let child_type = operation.require_str(keys::CHILD_TYPE)?;
        let recursive = operation.bool_or(keys::RECURSIVE, false)?;
        let resource = context.read_resource(&PathAddress::root(), true)?;
        let children: Map<String, Value> = resource
            .children(child_type)
            .map(|(name, child)| (name.clone(), child.to_model_node(recursive)))
            .collect();
        *context.result() = Value::Object(children);
        Ok(())
    }
}

/// `read-operation-names`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOperationNamesHandler;

#[async_trait]
impl OperationStepHandler for ReadOperationNamesHandler {
    async fn execute(&self, context: &mut OperationContext, _operation: &Operation) -> Result<()> {
        let address = context.current_address().clone();
        let names = context
            .registration()
            .operation_names(&address)
            .into_iter()
            .map(Value::String)
            .collect();
        *context.result() = Value::Array(names);
        Ok(())
    }
}
