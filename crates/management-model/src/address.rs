//! Path elements and addresses identifying resources in the tree

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Value matching any child name of a given type
pub const WILDCARD: &str = "*";

/// One `(type, name)` step of an address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathElement {
    key: String,
    value: String,
}

impl PathElement {
    /// Create a concrete element
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create an element matching every child of type `key`
    pub fn wildcard(key: impl Into<String>) -> Self {
        Self::new(key, WILDCARD)
    }

    /// Child type
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Child name, or `*`
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether this element is a wildcard
    pub fn is_wildcard(&self) -> bool {
        self.value == WILDCARD
    }

    /// Whether `self`, used as a pattern, matches `other`
    pub fn matches(&self, other: &PathElement) -> bool {
        self.key == other.key && (self.is_wildcard() || self.value == other.value)
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Ordered list of path elements from the root; empty means the root
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct PathAddress(Vec<PathElement>);

impl PathAddress {
    /// The root address
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build an address, rejecting consecutive elements of the same type
    /// unless one of them is a wildcard.
    pub fn new(elements: Vec<PathElement>) -> Result<Self> {
        for pair in elements.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.key == b.key && !a.is_wildcard() && !b.is_wildcard() {
                return Err(ModelError::DuplicateElement(a.key.clone()));
            }
        }
        if let Some(bad) = elements
            .iter()
            .find(|e| e.key.is_empty() || e.value.is_empty())
        {
            return Err(ModelError::InvalidAddress(format!(
                "empty type or name in element '{}'",
                bad
            )));
        }
        Ok(Self(elements))
    }

    /// Shorthand for a single-element address
    pub fn of(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self(vec![PathElement::new(key, value)])
    }

    /// Address with `element` appended
    pub fn append(&self, element: PathElement) -> Result<Self> {
        let mut elements = self.0.clone();
        elements.push(element);
        Self::new(elements)
    }

    /// Address of `relative` resolved against `self`
    pub fn join(&self, relative: &PathAddress) -> Result<Self> {
        let mut elements = self.0.clone();
        elements.extend(relative.0.iter().cloned());
        Self::new(elements)
    }

    /// Parent address; `None` for the root
    pub fn parent(&self) -> Option<PathAddress> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Last element; `None` for the root
    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    /// Elements from the root down
    pub fn elements(&self) -> &[PathElement] {
        &self.0
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the root address
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the wire form: a list of single-entry objects, `null` for the
    /// root, or the `/type=name` string syntax.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::root()),
            Value::String(s) => s.parse(),
            Value::Array(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    let entry = item
                        .as_object()
                        .filter(|o| o.len() == 1)
                        .and_then(|o| o.iter().next())
                        .ok_or_else(|| {
                            ModelError::InvalidAddress(format!(
                                "expected a single-entry object, got {}",
                                item
                            ))
                        })?;
                    let name = match entry.1 {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    elements.push(PathElement::new(entry.0.clone(), name));
                }
                Self::new(elements)
            }
            other => Err(ModelError::InvalidAddress(format!(
                "unsupported address form {}",
                other
            ))),
        }
    }

    /// Wire form of the address
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|e| {
                    let mut entry = Map::new();
                    entry.insert(e.key.clone(), Value::String(e.value.clone()));
                    Value::Object(entry)
                })
                .collect(),
        )
    }
}

impl fmt::Display for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for element in &self.0 {
            write!(f, "/{}", element)?;
        }
        Ok(())
    }
}

impl FromStr for PathAddress {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let mut elements = Vec::new();
        for segment in s.split('/').filter(|seg| !seg.is_empty()) {
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                ModelError::InvalidAddress(format!("segment '{}' is not type=name", segment))
            })?;
            elements.push(PathElement::new(key, value));
        }
        Self::new(elements)
    }
}

impl TryFrom<Value> for PathAddress {
    type Error = ModelError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(&value)
    }
}

impl From<PathAddress> for Value {
    fn from(address: PathAddress) -> Self {
        address.to_value()
    }
}

impl<'a> IntoIterator for &'a PathAddress {
    type Item = &'a PathElement;
    type IntoIter = std::slice::Iter<'a, PathElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
