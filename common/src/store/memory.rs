//! In-process [`Store`] used by tests and local runs.
//!
//! Mirrors the DynamoDB behaviour the processor relies on: key schema checks,
//! existence conditions, equality queries on tables and indices, `Limit`
//! applied before filtering, and `ExclusiveStartKey` pagination.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

use super::{DeleteItem, GetItem, Page, PutItem, Query, Store, StoreError, UpdateItem};
use crate::expression::Condition;
use crate::models::{Item, KeyPair, TableKeys};

#[derive(Debug)]
struct MemoryTable {
    keys: TableKeys,
    /// Canonical key string -> item.
    items: HashMap<String, Item>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table at construction time.
    pub fn with_table(mut self, table_name: &str, keys: TableKeys) -> Self {
        self.tables.get_mut().insert(
            table_name.to_string(),
            MemoryTable {
                keys,
                items: HashMap::new(),
            },
        );
        self
    }

    pub async fn create_table(&self, table_name: &str, keys: TableKeys) {
        self.tables.write().await.insert(
            table_name.to_string(),
            MemoryTable {
                keys,
                items: HashMap::new(),
            },
        );
    }

    /// Number of items stored in a table (0 for unknown tables).
    pub async fn len(&self, table_name: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table_name)
            .map_or(0, |t| t.items.len())
    }

    pub async fn is_empty(&self, table_name: &str) -> bool {
        self.len(table_name).await == 0
    }
}

fn table_not_found(table_name: &str) -> StoreError {
    StoreError::Service {
        code: "ResourceNotFoundException".to_string(),
        message: format!("Requested resource not found: Table: {} not found", table_name),
    }
}

/// Canonical storage key for an item, validated against the table key schema.
fn storage_key(keys: &KeyPair, item: &Item, exact: bool) -> Result<String, StoreError> {
    let mut key = Item::new();
    for attribute in keys.attributes() {
        match item.get(&attribute) {
            Some(value) if !value.is_null() => {
                key.insert(attribute, value.clone());
            }
            _ => {
                return Err(StoreError::Validation(format!(
                    "The provided key element does not match the schema: missing {}",
                    attribute
                )))
            }
        }
    }
    if exact && item.len() != key.len() {
        return Err(StoreError::Validation(
            "The provided key element does not match the schema".to_string(),
        ));
    }
    serde_json::to_string(&key).map_err(|e| StoreError::Internal(e.to_string()))
}

fn check_condition(condition: &Condition, current: Option<&Item>) -> Result<(), StoreError> {
    let holds = match condition {
        Condition::Exists(attributes) => {
            current.is_some_and(|item| attributes.iter().all(|a| item.contains_key(a)))
        }
        Condition::NotExists(attributes) => {
            current.map_or(true, |item| attributes.iter().all(|a| !item.contains_key(a)))
        }
    };
    if holds {
        Ok(())
    } else {
        Err(StoreError::ConditionalCheckFailed)
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Attributes that order query results: the queried key's sort key, then the table key.
fn ordering_attributes(table: &KeyPair, queried: &KeyPair) -> Vec<String> {
    let mut attributes: Vec<String> = queried.sk.iter().cloned().collect();
    for attribute in table.attributes() {
        if !attributes.contains(&attribute) {
            attributes.push(attribute);
        }
    }
    attributes
}

fn compare_items(attributes: &[String], a: &Item, b: &Item) -> Ordering {
    attributes
        .iter()
        .map(|attr| compare_values(a.get(attr), b.get(attr)))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

impl Store for MemoryStore {
    async fn describe_table(&self, table_name: &str) -> Result<TableKeys, StoreError> {
        self.tables
            .read()
            .await
            .get(table_name)
            .map(|t| t.keys.clone())
            .ok_or_else(|| table_not_found(table_name))
    }

    async fn get_item(&self, request: GetItem) -> Result<Option<Item>, StoreError> {
        let tables = self.tables.read().await;
        let table = tables
            .get(&request.table_name)
            .ok_or_else(|| table_not_found(&request.table_name))?;
        let key = storage_key(&table.keys.table, &request.key, true)?;
        Ok(table.items.get(&key).cloned())
    }

    async fn query(&self, request: Query) -> Result<Page, StoreError> {
        let tables = self.tables.read().await;
        let table = tables
            .get(&request.table_name)
            .ok_or_else(|| table_not_found(&request.table_name))?;

        let queried = match &request.index_name {
            Some(index) => table.keys.indices.get(index).ok_or_else(|| {
                StoreError::Validation(format!(
                    "The table does not have the specified index: {}",
                    index
                ))
            })?,
            None => &table.keys.table,
        };
        match request.key.first() {
            Some((attribute, _)) if *attribute == queried.pk => {}
            _ => {
                return Err(StoreError::Validation(
                    "Query condition missed key schema element".to_string(),
                ))
            }
        }

        let ordering = ordering_attributes(&table.keys.table, queried);
        let mut matching: Vec<&Item> = table
            .items
            .values()
            .filter(|item| {
                request
                    .key
                    .iter()
                    .all(|(attribute, value)| item.get(attribute) == Some(value))
            })
            .collect();
        matching.sort_by(|a, b| compare_items(&ordering, a, b));

        if let Some(start) = &request.exclusive_start_key {
            matching.retain(|item| compare_items(&ordering, item, start) == Ordering::Greater);
        }

        let limit = request.limit.map_or(matching.len(), |l| l as usize);
        let has_more = matching.len() > limit;
        let evaluated = &matching[..limit.min(matching.len())];

        let last_evaluated_key = match evaluated.last() {
            Some(last) if has_more => {
                let mut key = Item::new();
                for attribute in &ordering {
                    if let Some(value) = last.get(attribute) {
                        key.insert(attribute.clone(), value.clone());
                    }
                }
                key.insert(queried.pk.clone(), last.get(&queried.pk).cloned().unwrap_or(Value::Null));
                Some(key)
            }
            _ => None,
        };

        let items = evaluated
            .iter()
            .filter(|item| {
                request
                    .filter
                    .iter()
                    .all(|(attribute, value)| item.get(attribute) == Some(value))
            })
            .map(|item| (*item).clone())
            .collect();

        Ok(Page {
            items,
            last_evaluated_key,
        })
    }

    async fn put_item(&self, request: PutItem) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(&request.table_name)
            .ok_or_else(|| table_not_found(&request.table_name))?;
        let key = storage_key(&table.keys.table, &request.item, false)?;
        check_condition(&request.condition, table.items.get(&key))?;
        table.items.insert(key, request.item);
        Ok(())
    }

    async fn update_item(&self, request: UpdateItem) -> Result<Item, StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(&request.table_name)
            .ok_or_else(|| table_not_found(&request.table_name))?;
        let key = storage_key(&table.keys.table, &request.key, true)?;

        let touched = request
            .set
            .iter()
            .map(|(attribute, _)| attribute)
            .chain(request.remove.iter());
        for attribute in touched {
            if table.keys.table.is_key_attribute(attribute) {
                return Err(StoreError::Validation(format!(
                    "Cannot update attribute {}. This attribute is part of the key",
                    attribute
                )));
            }
        }

        check_condition(&request.condition, table.items.get(&key))?;

        let item = table
            .items
            .entry(key)
            .or_insert_with(|| request.key.clone());
        for (attribute, value) in request.set {
            item.insert(attribute, value);
        }
        for attribute in &request.remove {
            item.remove(attribute);
        }
        Ok(item.clone())
    }

    async fn delete_item(&self, request: DeleteItem) -> Result<Option<Item>, StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(&request.table_name)
            .ok_or_else(|| table_not_found(&request.table_name))?;
        let key = storage_key(&table.keys.table, &request.key, true)?;
        check_condition(&request.condition, table.items.get(&key))?;
        Ok(table.items.remove(&key))
    }
}
