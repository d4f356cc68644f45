//! End-to-end request pipeline: route, merge inputs, process, render.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ApiErrors, RouteError};
use crate::models::{ActionDefinition, ActionRoutes, Input};
use crate::processor::Processor;
use crate::router::{Router, RouterOptions};
use crate::schema_cache::SchemaCache;
use crate::store::Store;
use crate::Result;

/// Status and JSON body for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
    /// Methods for the `Allow` header of a 405 reply.
    pub allow: Option<Vec<String>>,
}

impl Reply {
    fn errors(errors: ApiErrors) -> Self {
        Self {
            status: errors.status_code(),
            body: serde_json::to_value(&errors).unwrap_or(Value::Null),
            allow: None,
        }
    }
}

pub struct Service<S> {
    router: Router<ActionDefinition>,
    processor: Processor<S>,
    owner_field: Option<String>,
}

impl<S: Store> Service<S> {
    pub fn new(routes: ActionRoutes, options: RouterOptions, processor: Processor<S>) -> Result<Self> {
        Ok(Self {
            router: Router::new(routes, options)?,
            processor,
            owner_field: None,
        })
    }

    /// Build the router and processor described by `config` over `store`.
    pub fn from_config(config: &Config, store: Arc<S>) -> Result<Self> {
        let mut processor = Processor::new(store, Arc::new(SchemaCache::new()));
        if let Some(field) = &config.owner_field {
            processor = processor.with_owner_field(field.clone());
        }
        let mut service = Self::new(config.routes.clone(), config.router.clone(), processor)?;
        service.owner_field = config.owner_field.clone();
        Ok(service)
    }

    /// Inject the caller id under `owner_field` when data lacks it.
    pub fn with_owner_field(mut self, owner_field: impl Into<String>) -> Self {
        let owner_field = owner_field.into();
        self.processor = self.processor.with_owner_field(owner_field.clone());
        self.owner_field = Some(owner_field);
        self
    }

    pub fn router(&self) -> &Router<ActionDefinition> {
        &self.router
    }

    /// Handle one request. `owner` is only used when an owner field is configured.
    pub async fn handle(&self, method: &str, path: &str, input: Input, owner: Option<&str>) -> Reply {
        let matched = match self.router.route(method, path) {
            Ok(matched) => matched,
            Err(err) => {
                warn!(method, path, error = %err, "routing failed");
                let allow = match &err {
                    RouteError::MethodNotAllowed { allowed } => Some(allowed.clone()),
                    _ => None,
                };
                return Reply {
                    allow,
                    ..Reply::errors(err.into())
                };
            }
        };
        info!(method, path, template = matched.template, "routed request");

        let scoped;
        let processor = match (owner, &self.owner_field) {
            (Some(owner), Some(_)) => {
                scoped = self.processor.with_owner(owner);
                &scoped
            }
            _ => &self.processor,
        };

        match processor
            .process(&matched.method, matched.action, &matched.path_vars, input)
            .await
        {
            Ok(payload) => Reply {
                status: if matched.method == "POST" { 201 } else { 200 },
                body: serde_json::to_value(&payload).unwrap_or(Value::Null),
                allow: None,
            },
            Err(errors) => Reply::errors(errors),
        }
    }
}
