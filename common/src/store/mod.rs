//! Backend seam for the action processor.
//!
//! The processor speaks in structured requests; each [`Store`] renders them
//! for its backend. [`dynamo::DynamoStore`] talks to DynamoDB,
//! [`memory::MemoryStore`] keeps tables in process.

use std::future::Future;

use serde_json::Value;
use thiserror::Error;

use crate::expression::Condition;
use crate::models::{Item, TableKeys};

pub mod dynamo;
pub mod memory;

pub use dynamo::DynamoStore;
pub use memory::MemoryStore;

/// Failures reported by a backend, already classified for error mapping.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("The conditional request failed")]
    ConditionalCheckFailed,

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("{code}: {message}")]
    Service { code: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetItem {
    pub table_name: String,
    pub key: Item,
}

/// Equality query on a table or index, optionally filtered on non-key attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table_name: String,
    pub index_name: Option<String>,
    /// Partition key first, then an optional sort key.
    pub key: Vec<(String, Value)>,
    pub filter: Vec<(String, Value)>,
    pub limit: Option<u32>,
    pub exclusive_start_key: Option<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PutItem {
    pub table_name: String,
    pub item: Item,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateItem {
    pub table_name: String,
    pub key: Item,
    pub set: Vec<(String, Value)>,
    pub remove: Vec<String>,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteItem {
    pub table_name: String,
    pub key: Item,
    pub condition: Condition,
}

/// The six backend primitives the processor needs.
pub trait Store: Send + Sync {
    /// Key schema of a table and its secondary indices.
    fn describe_table(&self, table_name: &str) -> impl Future<Output = Result<TableKeys, StoreError>> + Send;

    fn get_item(&self, request: GetItem) -> impl Future<Output = Result<Option<Item>, StoreError>> + Send;

    fn query(&self, request: Query) -> impl Future<Output = Result<Page, StoreError>> + Send;

    fn put_item(&self, request: PutItem) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the item as it is after the update.
    fn update_item(&self, request: UpdateItem) -> impl Future<Output = Result<Item, StoreError>> + Send;

    /// Returns the item as it was before deletion.
    fn delete_item(&self, request: DeleteItem) -> impl Future<Output = Result<Option<Item>, StoreError>> + Send;
}
