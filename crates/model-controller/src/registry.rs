//! Operation handler registration
//!
//! A [`ResourceRegistration`] tree mirrors the shape of the model with
//! address *patterns*: each child is keyed by a [`PathElement`] whose value
//! is either a concrete name or `*`. Looking up `(operation, address)` walks
//! the tree preferring exact matches over wildcards, and falls back to
//! operations an ancestor registered as inherited.

use crate::context::OperationStepHandler;
use crate::error::ControllerError;
use indexmap::IndexMap;
use management_model::{PathAddress, PathElement};
use std::sync::Arc;

/// Registration flags of an operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationFlags {
    /// Never modifies the model or services, so never takes the write lock
    pub read_only: bool,
    /// Also available on every descendant registration
    pub inherited: bool,
}

impl OperationFlags {
    /// A read-only operation
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            inherited: false,
        }
    }

    /// Mark as inherited
    pub fn inherited(mut self) -> Self {
        self.inherited = true;
        self
    }
}

/// A registered handler with its flags
#[derive(Clone)]
pub struct OperationEntry {
    /// The handler
    pub handler: Arc<dyn OperationStepHandler>,
    /// Its flags
    pub flags: OperationFlags,
}

impl std::fmt::Debug for OperationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationEntry")
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Operations available at one address pattern, plus child patterns
#[derive(Debug, Default)]
pub struct ResourceRegistration {
    address: PathAddress,
    operations: IndexMap<String, OperationEntry>,
    children: IndexMap<PathElement, ResourceRegistration>,
}

impl ResourceRegistration {
    /// An empty root registration
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for operation `name` at this level
    pub fn register_operation(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn OperationStepHandler>,
        flags: OperationFlags,
    ) -> Result<&mut Self, ControllerError> {
        let name = name.into();
        if self.operations.contains_key(&name) {
            return Err(ControllerError::DuplicateOperation {
                name,
                address: self.address.clone(),
            });
        }
        self.operations
            .insert(name, OperationEntry { handler, flags });
        Ok(self)
    }

    /// Child registration for `element`, created if missing
    pub fn register_sub_model(&mut self, element: PathElement) -> &mut ResourceRegistration {
        let address = self
            .address
            .append(element.clone())
            .unwrap_or_else(|_| self.address.clone());
        self.children
            .entry(element)
            .or_insert_with(|| ResourceRegistration {
                address,
                ..Default::default()
            })
    }

    /// Address pattern of this registration
    pub fn address(&self) -> &PathAddress {
        &self.address
    }

    /// Registration reached by following `pattern` exactly
    pub fn sub_model(&self, pattern: &PathAddress) -> Option<&ResourceRegistration> {
        let mut current = self;
        for element in pattern {
            current = current.children.get(element)?;
        }
        Some(current)
    }

    /// Mutable registration reached by following `pattern` exactly
    pub fn sub_model_mut(&mut self, pattern: &PathAddress) -> Option<&mut ResourceRegistration> {
        let mut current = self;
        for element in pattern {
            current = current.children.get_mut(element)?;
        }
        Some(current)
    }

    fn child_for(&self, element: &PathElement) -> Option<&ResourceRegistration> {
        self.children
            .get(element)
            .or_else(|| self.children.get(&PathElement::wildcard(element.key())))
    }

    /// Resolve the handler for `name` at a concrete `address`
    pub fn operation_entry(&self, address: &PathAddress, name: &str) -> Option<&OperationEntry> {
        let mut current = self;
        let mut inherited = current.operations.get(name).filter(|e| e.flags.inherited);
        for element in address {
            current = current.child_for(element)?;
            if let Some(entry) = current.operations.get(name).filter(|e| e.flags.inherited) {
                inherited = Some(entry);
            }
        }
        current.operations.get(name).or(inherited)
    }

    /// Names of every operation available at `address`, sorted
    pub fn operation_names(&self, address: &PathAddress) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut current = self;
        let mut collect = |registration: &ResourceRegistration, only_inherited: bool| {
            for (name, entry) in &registration.operations {
                if (!only_inherited || entry.flags.inherited) && !names.contains(name) {
                    names.push(name.clone());
                }
            }
        };
        let mut path = Vec::new();
        for element in address {
            path.push(current);
            match current.child_for(element) {
                Some(child) => current = child,
                None => return Vec::new(),
            }
        }
        for ancestor in path {
            collect(ancestor, true);
        }
        collect(current, false);
        names.sort();
        names
    }
}
