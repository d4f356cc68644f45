//! DynamoDB action processor.
//!
//! Executes one routed action per call:
//! `validate -> (auth?) -> resolve key schema -> GET | POST | PATCH | DELETE`.
//! Every failure is returned as an [`ApiErrors`] list; nothing is thrown past
//! [`Processor::process`]. The only state shared between calls is the
//! [`SchemaCache`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, ApiErrors, ErrorCode};
use crate::expression::Condition;
use crate::models::{ActionDefinition, AuthDefinition, Input, Item, KeyPair, Payload, TableKeys};
use crate::router::PathVars;
use crate::schema_cache::SchemaCache;
use crate::store::{DeleteItem, GetItem, PutItem, Query, Store, StoreError, UpdateItem};
use crate::validation::{self, format_timestamp, CleanInput};

/// Source of "now" for `create_time` / `update_time`.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Default key under which the caller identity is injected.
pub const DEFAULT_OWNER_FIELD: &str = "owner";

const CREATE_TIME: &str = "create_time";
const UPDATE_TIME: &str = "update_time";

type Outcome<T> = std::result::Result<T, ApiErrors>;

pub struct Processor<S> {
    store: Arc<S>,
    schema_cache: Arc<SchemaCache>,
    clock: Clock,
    owner_field: String,
    owner: Option<Value>,
}

impl<S> Clone for Processor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            schema_cache: Arc::clone(&self.schema_cache),
            clock: Arc::clone(&self.clock),
            owner_field: self.owner_field.clone(),
            owner: self.owner.clone(),
        }
    }
}

impl<S> std::fmt::Debug for Processor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("owner_field", &self.owner_field)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Validated pagination inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub last_evaluated_key: Option<Item>,
}

impl Pagination {
    /// Read `limit` and `last_evaluated_key` from the merged input. A string
    /// `last_evaluated_key` must hold a JSON-encoded mapping.
    pub fn from_input(input: &Input) -> Outcome<Self> {
        let limit = match input.get("limit") {
            None | Some(Value::Null) => None,
            Some(value) => {
                let parsed = match value {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse::<u64>().ok(),
                    _ => None,
                };
                match parsed.filter(|n| *n > 0) {
                    Some(n) => Some(n.min(u32::MAX as u64) as u32),
                    None => return Err(bad_request("'limit' must be a positive integer").into()),
                }
            }
        };

        let last_evaluated_key = match input.get("last_evaluated_key") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::Object(map)) => Some(map.clone()),
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Some(map),
                _ => {
                    return Err(bad_request("'last_evaluated_key' must be a JSON-encoded mapping").into())
                }
            },
            Some(_) => return Err(bad_request("'last_evaluated_key' must be a mapping").into()),
        };

        Ok(Self {
            limit,
            last_evaluated_key,
        })
    }
}

impl<S: Store> Processor<S> {
    pub fn new(store: Arc<S>, schema_cache: Arc<SchemaCache>) -> Self {
        Self {
            store,
            schema_cache,
            clock: Arc::new(Utc::now),
            owner_field: DEFAULT_OWNER_FIELD.to_string(),
            owner: None,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_owner_field(mut self, owner_field: impl Into<String>) -> Self {
        self.owner_field = owner_field.into();
        self
    }

    /// Request-scoped copy that injects `owner` into the data when absent.
    pub fn with_owner(&self, owner: impl Into<Value>) -> Self {
        let mut scoped = self.clone();
        scoped.owner = Some(owner.into());
        scoped
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    /// Run `action` for `method` with the given path variables and query/body data.
    pub async fn process(
        &self,
        method: &str,
        action: &ActionDefinition,
        path_vars: &PathVars,
        data: Input,
    ) -> Outcome<Payload> {
        let method = method.to_ascii_uppercase();
        let input = self.merge(path_vars, data);

        let clean = validation::validate(&action.fields, &input).map_err(|errors| {
            warn!(table = %action.table_name, errors = ?errors, "validation failed");
            ApiErrors::from(bad_request("Validation failed").with_details(Value::from(errors)))
        })?;

        if let Some(auth) = &action.auth {
            self.authorize(auth, &input).await?;
        }

        let keys = self
            .resolve_keys(&action.table_name, action.key_schema.as_ref())
            .await?;

        let outcome = match method.as_str() {
            "GET" => {
                let pagination = Pagination::from_input(&input)?;
                self.get(action, &keys, &clean, pagination).await
            }
            "POST" => self.post(action, &keys.table, clean).await,
            "PATCH" => self.patch(action, &keys.table, clean).await,
            "DELETE" => self.delete(action, &keys.table, &clean).await,
            other => Err(bad_request(format!("Method {} is not supported", other)).into()),
        };

        match &outcome {
            Ok(_) => info!(method = %method, table = %action.table_name, "action succeeded"),
            Err(errors) => info!(
                method = %method,
                table = %action.table_name,
                code = ?errors.code(),
                "action failed"
            ),
        }
        outcome
    }

    /// Owner goes into the data only when absent; path variables always win.
    fn merge(&self, path_vars: &PathVars, mut data: Input) -> Input {
        if let Some(owner) = &self.owner {
            if !data.contains_key(&self.owner_field) {
                data.insert(self.owner_field.clone(), owner.clone());
            }
        }
        for (name, value) in path_vars {
            data.insert(name.clone(), Value::String(value.clone()));
        }
        data
    }

    async fn authorize(&self, auth: &AuthDefinition, input: &Input) -> Outcome<()> {
        let clean = validation::validate(&auth.fields, input).map_err(|errors| {
            warn!(table = %auth.table_name, "auth validation failed");
            ApiErrors::from(
                ApiError::new(ErrorCode::AuthFailed, "Authorization failed").with_details(Value::from(errors)),
            )
        })?;

        let keys = self
            .resolve_keys(&auth.table_name, auth.key_schema.as_ref())
            .await?;
        let queried = match &auth.index_name {
            Some(index) => index_keys(&keys, &auth.table_name, index)?,
            None => &keys.table,
        };

        let Some(pk_value) = clean.get(&queried.pk).filter(|v| !v.is_null()) else {
            return Err(ApiError::new(
                ErrorCode::AuthFailed,
                format!("Authorization requires '{}'", queried.pk),
            )
            .into());
        };

        let mut key = vec![(queried.pk.clone(), pk_value.clone())];
        if let Some(sk) = &queried.sk {
            if let Some(value) = clean.get(sk).filter(|v| !v.is_null()) {
                key.push((sk.clone(), value.clone()));
            }
        }
        let filter = auth
            .fields
            .fields
            .iter()
            .filter(|f| !queried.is_key_attribute(&f.name))
            .filter_map(|f| {
                clean
                    .get(&f.name)
                    .filter(|v| !v.is_null())
                    .map(|v| (f.name.clone(), v.clone()))
            })
            .collect();

        let page = self
            .store
            .query(Query {
                table_name: auth.table_name.clone(),
                index_name: auth.index_name.clone(),
                key,
                filter,
                limit: Some(1),
                exclusive_start_key: None,
            })
            .await
            .map_err(|e| map_store_error(e, ErrorCode::AuthFailed))?;

        if page.items.is_empty() {
            debug!(table = %auth.table_name, "auth lookup returned no rows");
            return Err(ApiError::new(ErrorCode::AuthFailed, "Authorization failed").into());
        }
        Ok(())
    }

    /// Explicit key schema, else cached, else described once and cached.
    async fn resolve_keys(&self, table_name: &str, explicit: Option<&TableKeys>) -> Outcome<TableKeys> {
        if let Some(keys) = explicit {
            return Ok(keys.clone());
        }
        if let Some(keys) = self.schema_cache.get(table_name).await {
            return Ok(keys);
        }
        let keys = self
            .store
            .describe_table(table_name)
            .await
            .map_err(|e| map_store_error(e, ErrorCode::DdbError))?;
        debug!(table = table_name, "caching described key schema");
        self.schema_cache.insert(table_name, keys.clone()).await;
        Ok(keys)
    }

    async fn get(
        &self,
        action: &ActionDefinition,
        keys: &TableKeys,
        clean: &CleanInput,
        pagination: Pagination,
    ) -> Outcome<Payload> {
        let table = &keys.table;

        if has_key(clean, table) {
            let item = self
                .store
                .get_item(GetItem {
                    table_name: action.table_name.clone(),
                    key: key_item(clean, table),
                })
                .await
                .map_err(|e| map_store_error(e, ErrorCode::NotFound))?;
            return match item {
                Some(item) => Ok(Payload::Item { item }),
                None => Err(not_found().into()),
            };
        }

        if let Some(index) = &action.index_name {
            let index_pair = index_keys(keys, &action.table_name, index)?;
            if !clean.has_value(&index_pair.pk) {
                return Err(bad_request(format!(
                    "Missing partition key '{}' for index {}",
                    index_pair.pk, index
                ))
                .into());
            }
            return self
                .query(action, Some(index.clone()), index_pair, clean, pagination)
                .await;
        }

        if clean.has_value(&table.pk) && table.sk.is_some() {
            return self.query(action, None, table, clean, pagination).await;
        }

        Err(bad_request("Insufficient key information").into())
    }

    async fn query(
        &self,
        action: &ActionDefinition,
        index_name: Option<String>,
        pair: &KeyPair,
        clean: &CleanInput,
        pagination: Pagination,
    ) -> Outcome<Payload> {
        let mut key = Vec::with_capacity(2);
        for attribute in pair.attributes() {
            if let Some(value) = clean.get(&attribute).filter(|v| !v.is_null()) {
                key.push((attribute, value.clone()));
            }
        }

        let page = self
            .store
            .query(Query {
                table_name: action.table_name.clone(),
                index_name,
                key,
                filter: Vec::new(),
                limit: pagination.limit,
                exclusive_start_key: pagination.last_evaluated_key,
            })
            .await
            .map_err(|e| map_store_error(e, ErrorCode::DdbError))?;

        Ok(Payload::Items {
            count: page.items.len(),
            items: page.items,
            last_evaluated_key: page.last_evaluated_key,
        })
    }

    async fn post(&self, action: &ActionDefinition, table: &KeyPair, clean: CleanInput) -> Outcome<Payload> {
        require_key(&clean, table)?;

        let now = Value::String(format_timestamp((self.clock)()));
        let mut item: Item = clean
            .into_map()
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .collect();
        item.entry(CREATE_TIME).or_insert_with(|| now.clone());
        item.entry(UPDATE_TIME).or_insert(now);

        self.store
            .put_item(PutItem {
                table_name: action.table_name.clone(),
                item: item.clone(),
                condition: Condition::NotExists(table.attributes()),
            })
            .await
            .map_err(|e| map_store_error(e, ErrorCode::AlreadyExists))?;

        Ok(Payload::Item { item })
    }

    async fn patch(&self, action: &ActionDefinition, table: &KeyPair, clean: CleanInput) -> Outcome<Payload> {
        require_key(&clean, table)?;
        let key = key_item(&clean, table);

        let mut set = Vec::new();
        let mut remove = Vec::new();
        for (name, value) in clean.into_map() {
            if table.is_key_attribute(&name) || name == UPDATE_TIME {
                continue;
            }
            if value.is_null() {
                remove.push(name);
            } else {
                set.push((name, value));
            }
        }
        if set.is_empty() && remove.is_empty() {
            return Err(ApiError::new(ErrorCode::NoFields, "No fields to update").into());
        }
        set.push((
            UPDATE_TIME.to_string(),
            Value::String(format_timestamp((self.clock)())),
        ));

        let item = self
            .store
            .update_item(UpdateItem {
                table_name: action.table_name.clone(),
                key,
                set,
                remove,
                condition: Condition::Exists(table.attributes()),
            })
            .await
            .map_err(|e| map_store_error(e, ErrorCode::NotFound))?;

        Ok(Payload::Item { item })
    }

    async fn delete(&self, action: &ActionDefinition, table: &KeyPair, clean: &CleanInput) -> Outcome<Payload> {
        require_key(clean, table)?;
        let key = key_item(clean, table);

        self.store
            .delete_item(DeleteItem {
                table_name: action.table_name.clone(),
                key: key.clone(),
                condition: Condition::Exists(table.attributes()),
            })
            .await
            .map_err(|e| map_store_error(e, ErrorCode::NotFound))?;

        Ok(Payload::Deleted { deleted: key })
    }
}

fn index_keys<'k>(keys: &'k TableKeys, table_name: &str, index: &str) -> Outcome<&'k KeyPair> {
    keys.indices.get(index).ok_or_else(|| {
        error!(table = table_name, index, "index missing from key schema");
        ApiErrors::from(ApiError::new(
            ErrorCode::InternalError,
            format!("Index {} is not defined for {}", index, table_name),
        ))
    })
}

fn has_key(clean: &CleanInput, pair: &KeyPair) -> bool {
    pair.attributes().iter().all(|a| clean.has_value(a))
}

fn key_item(clean: &CleanInput, pair: &KeyPair) -> Item {
    pair.attributes()
        .into_iter()
        .filter_map(|a| clean.get(&a).cloned().map(|v| (a, v)))
        .collect()
}

fn require_key(clean: &CleanInput, pair: &KeyPair) -> Outcome<()> {
    let missing: Vec<String> = pair
        .attributes()
        .into_iter()
        .filter(|a| !clean.has_value(a))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(bad_request(format!("Missing key attribute(s): {}", missing.join(", ")))
        .with_details(Value::from(missing))
        .into())
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::BadRequest, message)
}

fn not_found() -> ApiError {
    ApiError::new(ErrorCode::NotFound, "Item not found")
}

/// Map a backend failure; `on_conditional` names what a failed condition means for this operation.
fn map_store_error(err: StoreError, on_conditional: ErrorCode) -> ApiErrors {
    let api_error = match err {
        StoreError::ConditionalCheckFailed => match on_conditional {
            ErrorCode::AlreadyExists => ApiError::new(ErrorCode::AlreadyExists, "Item already exists"),
            ErrorCode::NotFound => not_found(),
            code => ApiError::new(code, "The conditional request failed"),
        },
        StoreError::Throttled(_) => ApiError::new(ErrorCode::Throttled, "Request was throttled, retry later"),
        StoreError::Validation(message) => bad_request(message),
        StoreError::AccessDenied(_) => ApiError::new(ErrorCode::Forbidden, "Access denied"),
        StoreError::Service { code, message } => ApiError::new(ErrorCode::DdbError, "DynamoDB request failed")
            .with_details(serde_json::json!({"code": code, "message": message})),
        StoreError::Internal(message) => {
            error!(error = %message, "internal error while processing action");
            ApiError::new(ErrorCode::InternalError, "Internal error")
        }
    };
    api_error.into()
}
