//! Shared library for the DynamoDB CRUD Lambda.
//!
//! Provides the path router, the input validator and the DynamoDB action
//! processor, plus the configuration, auth and HTTP glue used by the
//! `crud` entrypoint.

pub mod auth;
pub mod config;
pub mod error;
pub mod expression;
pub mod http;
pub mod models;
pub mod pathspec;
pub mod processor;
pub mod router;
pub mod schema_cache;
pub mod service;
pub mod store;
pub mod validation;

pub use auth::{caller_from_request, extract_user_from_context, AuthenticatedUser};
pub use config::Config;
pub use error::{ApiError, ApiErrors, Error, ErrorCode, Result, RouteError};
pub use models::{ActionDefinition, ActionRoutes, Input, Item, Payload, TableKeys};
pub use processor::Processor;
pub use router::{RouteMatch, Router, RouterOptions};
pub use schema_cache::SchemaCache;
pub use service::{Reply, Service};
pub use store::{DynamoStore, MemoryStore, Store, StoreError};
