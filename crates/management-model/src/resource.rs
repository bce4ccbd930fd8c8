//! The resource tree
//!
//! A [`Resource`] owns an attribute map (its model) and children grouped by
//! type then name, both kept in insertion order. The controller publishes the
//! tree as an immutable `Arc<Resource>` and mutates a private clone while an
//! operation runs, so a rollback is simply dropping the clone.

use crate::address::{PathAddress, PathElement};
use crate::error::{ModelError, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// A node of the management tree
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    model: Value,
    children: IndexMap<String, IndexMap<String, Resource>>,
}

impl Default for Resource {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource {
    /// A resource with an empty model and no children
    pub fn new() -> Self {
        Self {
            model: Value::Object(Map::new()),
            children: IndexMap::new(),
        }
    }

    /// A resource with the given model
    pub fn with_model(model: Value) -> Self {
        Self {
            model,
            children: IndexMap::new(),
        }
    }

    /// The attribute map
    pub fn model(&self) -> &Value {
        &self.model
    }

    /// Mutable attribute map
    pub fn model_mut(&mut self) -> &mut Value {
        &mut self.model
    }

    /// Read one attribute
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.model.get(name)
    }

    /// Set one attribute, returning the previous value
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes_mut().insert(name.into(), value)
    }

    /// Remove one attribute, returning the previous value
    pub fn undefine_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes_mut().shift_remove(name)
    }

    fn attributes_mut(&mut self) -> &mut Map<String, Value> {
        if !self.model.is_object() {
            self.model = Value::Object(Map::new());
        }
        match &mut self.model {
            Value::Object(map) => map,
            _ => unreachable!("model was just made an object"),
        }
    }

    /// Direct child by element
    pub fn child(&self, element: &PathElement) -> Option<&Resource> {
        self.children
            .get(element.key())
            .and_then(|named| named.get(element.value()))
    }

    /// Mutable direct child by element
    pub fn child_mut(&mut self, element: &PathElement) -> Option<&mut Resource> {
        self.children
            .get_mut(element.key())
            .and_then(|named| named.get_mut(element.value()))
    }

    /// Whether a direct child exists
    pub fn has_child(&self, element: &PathElement) -> bool {
        self.child(element).is_some()
    }

    /// Child types in insertion order
    pub fn child_types(&self) -> Vec<String> {
        self.children.keys().cloned().collect()
    }

    /// Names of children of one type
    pub fn child_names(&self, child_type: &str) -> Vec<String> {
        self.children
            .get(child_type)
            .map(|named| named.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Children of one type
    pub fn children(&self, child_type: &str) -> impl Iterator<Item = (&String, &Resource)> {
        self.children.get(child_type).into_iter().flat_map(|m| m.iter())
    }

    /// Declare a child type so it is listed even while it has no children
    pub fn register_child_type(&mut self, child_type: impl Into<String>) {
        self.children.entry(child_type.into()).or_default();
    }

    /// Resolve a descendant
    pub fn navigate(&self, address: &PathAddress) -> Result<&Resource> {
        let mut current = self;
        for element in address {
            current = current
                .child(element)
                .ok_or_else(|| ModelError::ResourceNotFound(address.clone()))?;
        }
        Ok(current)
    }

    /// Resolve a descendant mutably
    pub fn navigate_mut(&mut self, address: &PathAddress) -> Result<&mut Resource> {
        let mut current = self;
        for element in address {
            current = current
                .child_mut(element)
                .ok_or_else(|| ModelError::ResourceNotFound(address.clone()))?;
        }
        Ok(current)
    }

    /// Link `resource` at `address`.
    ///
    /// Fails if something is already there or the parent does not exist.
    pub fn create(&mut self, address: &PathAddress, resource: Resource) -> Result<&mut Resource> {
        let (parent, element) = match (address.parent(), address.last()) {
            (Some(parent), Some(element)) => (parent, element.clone()),
            _ => {
                return Err(ModelError::InvalidAddress(
                    "the root resource cannot be created".into(),
                ));
            }
        };
        if element.is_wildcard() {
            return Err(ModelError::InvalidAddress(format!(
                "cannot create a resource at wildcard address {}",
                address
            )));
        }
        let parent = self
            .navigate_mut(&parent)
            .map_err(|_| ModelError::ResourceNotFound(parent.clone()))?;
        if parent.has_child(&element) {
            return Err(ModelError::DuplicateResource(address.clone()));
        }
        let named = parent.children.entry(element.key().to_string()).or_default();
        Ok(named.entry(element.value().to_string()).or_insert(resource))
    }

    /// Detach and return the subtree at `address`
    pub fn remove(&mut self, address: &PathAddress) -> Result<Resource> {
        let (parent, element) = match (address.parent(), address.last()) {
            (Some(parent), Some(element)) => (parent, element),
            _ => {
                return Err(ModelError::InvalidAddress(
                    "the root resource cannot be removed".into(),
                ));
            }
        };
        let parent = self
            .navigate_mut(&parent)
            .map_err(|_| ModelError::ResourceNotFound(address.clone()))?;
        parent
            .children
            .get_mut(element.key())
            .and_then(|named| named.shift_remove(element.value()))
            .ok_or_else(|| ModelError::ResourceNotFound(address.clone()))
    }

    /// Owned snapshot of the subtree at `address`.
    ///
    /// A non-recursive snapshot keeps the child names but not their content.
    pub fn snapshot(&self, address: &PathAddress, recursive: bool) -> Result<Resource> {
        let resource = self.navigate(address)?;
        Ok(if recursive {
            resource.clone()
        } else {
            resource.shallow_copy()
        })
    }

    /// Copy of the model plus empty placeholders for direct children
    pub fn shallow_copy(&self) -> Resource {
        let children = self
            .children
            .iter()
            .map(|(child_type, named)| {
                let names = named
                    .keys()
                    .map(|name| (name.clone(), Resource::new()))
                    .collect();
                (child_type.clone(), names)
            })
            .collect();
        Resource {
            model: self.model.clone(),
            children,
        }
    }

    /// Render in read-resource form: attributes plus
    /// `child-type => { name => child-or-null }`.
    pub fn to_model_node(&self, recursive: bool) -> Value {
        let mut node = match &self.model {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other.clone());
                map
            }
        };
        for (child_type, named) in &self.children {
            let rendered = named
                .iter()
                .map(|(name, child)| {
                    let value = if recursive {
                        child.to_model_node(true)
                    } else {
                        Value::Null
                    };
                    (name.clone(), value)
                })
                .collect::<Map<_, _>>();
            let value = if rendered.is_empty() {
                Value::Null
            } else {
                Value::Object(rendered)
            };
            node.insert(child_type.clone(), value);
        }
        Value::Object(node)
    }
}
