//! Management model primitives
//!
//! This crate holds the data the management controller operates on:
//!
//! - [`PathElement`] / [`PathAddress`] to address resources
//! - [`Resource`], a tree of attribute maps with typed, named children
//! - [`Operation`], the immutable request shape handlers read from
//! - [`OperationResponse`], the response shape returned to callers
//!
//! Attribute values are plain `serde_json::Value`s, with `preserve_order`
//! enabled so rendered models keep insertion order.
//!
//! # Example
//!
//! ```
//! use management_model::{Operation, PathAddress, Resource};
//! use serde_json::json;
//!
//! let mut root = Resource::with_model(json!({"attr1": 1}));
//! let address: PathAddress = "/child=one".parse().unwrap();
//! root.create(&address, Resource::new()).unwrap();
//!
//! let op = Operation::new("read-resource", address).param("recursive", true);
//! assert_eq!(op.to_value()["operation"], "read-resource");
//! ```

pub mod address;
pub mod error;
pub mod keys;
pub mod operation;
pub mod resource;
pub mod response;

pub use address::{PathAddress, PathElement, WILDCARD};
pub use error::{ModelError, Result};
pub use operation::{Operation, OperationHeaders};
pub use resource::Resource;
pub use response::{Outcome, OperationResponse, ProcessStateHeader, ResponseHeaders};

/// Attribute value type
pub type ModelNode = serde_json::Value;
