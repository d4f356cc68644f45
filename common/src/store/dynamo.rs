//! DynamoDB-backed [`Store`].

use std::collections::HashMap;
use std::fmt::Debug;

use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{AttributeValue, KeySchemaElement, KeyType, ReturnValue, TableDescription};
use aws_sdk_dynamodb::Client;
use serde_json::Value;
use tracing::{debug, error};

use super::{DeleteItem, GetItem, Page, PutItem, Query, Store, StoreError, UpdateItem};
use crate::expression::{ExpressionBuilder, Placeholders};
use crate::models::{Item, KeyPair, TableKeys};

type AttributeMap = HashMap<String, AttributeValue>;

#[derive(Debug, Clone)]
pub struct DynamoStore {
    client: Client,
}

impl DynamoStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS config chain in `region`, optionally against a custom endpoint.
    pub async fn from_env(region: &str, endpoint: Option<&str>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        let mut builder = aws_sdk_dynamodb::config::Builder::from(&config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Self::new(Client::from_conf(builder.build()))
    }
}

impl Store for DynamoStore {
    async fn describe_table(&self, table_name: &str) -> Result<TableKeys, StoreError> {
        let output = self
            .client
            .describe_table()
            .table_name(table_name)
            .send()
            .await
            .map_err(|e| map_sdk_error("DescribeTable", e))?;

        let table = output
            .table()
            .ok_or_else(|| StoreError::Internal(format!("No description returned for {}", table_name)))?;
        let keys = table_keys(table)
            .ok_or_else(|| StoreError::Internal(format!("Table {} has no partition key", table_name)))?;

        debug!(table = table_name, pk = %keys.table.pk, indices = keys.indices.len(), "described table");
        Ok(keys)
    }

    async fn get_item(&self, request: GetItem) -> Result<Option<Item>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&request.table_name)
            .set_key(Some(to_attributes(&request.key)?))
            .send()
            .await
            .map_err(|e| map_sdk_error("GetItem", e))?;

        output.item.map(from_attributes).transpose()
    }

    async fn query(&self, request: Query) -> Result<Page, StoreError> {
        let mut builder = ExpressionBuilder::new();
        let key_condition = builder.equalities(&request.key);
        let filter = (!request.filter.is_empty()).then(|| builder.equalities(&request.filter));
        let (names, values) = placeholder_maps(builder.finish())?;

        let exclusive_start_key = request
            .exclusive_start_key
            .as_ref()
            .map(to_attributes)
            .transpose()?;

        let output = self
            .client
            .query()
            .table_name(&request.table_name)
            .set_index_name(request.index_name.clone())
            .key_condition_expression(key_condition)
            .set_filter_expression(filter)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .set_limit(request.limit.map(|l| l.min(i32::MAX as u32) as i32))
            .set_exclusive_start_key(exclusive_start_key)
            .send()
            .await
            .map_err(|e| map_sdk_error("Query", e))?;

        let items = output
            .items
            .unwrap_or_default()
            .into_iter()
            .map(from_attributes)
            .collect::<Result<Vec<_>, _>>()?;
        let last_evaluated_key = output
            .last_evaluated_key
            .filter(|key| !key.is_empty())
            .map(from_attributes)
            .transpose()?;

        Ok(Page {
            items,
            last_evaluated_key,
        })
    }

    async fn put_item(&self, request: PutItem) -> Result<(), StoreError> {
        let mut builder = ExpressionBuilder::new();
        let condition = builder.condition(&request.condition);
        let (names, values) = placeholder_maps(builder.finish())?;

        self.client
            .put_item()
            .table_name(&request.table_name)
            .set_item(Some(to_attributes(&request.item)?))
            .condition_expression(condition)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .send()
            .await
            .map_err(|e| map_sdk_error("PutItem", e))?;
        Ok(())
    }

    async fn update_item(&self, request: UpdateItem) -> Result<Item, StoreError> {
        let mut builder = ExpressionBuilder::new();
        let update = builder.update(&request.set, &request.remove);
        let condition = builder.condition(&request.condition);
        let (names, values) = placeholder_maps(builder.finish())?;

        let output = self
            .client
            .update_item()
            .table_name(&request.table_name)
            .set_key(Some(to_attributes(&request.key)?))
            .update_expression(update)
            .condition_expression(condition)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| map_sdk_error("UpdateItem", e))?;

        output
            .attributes
            .map(from_attributes)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    async fn delete_item(&self, request: DeleteItem) -> Result<Option<Item>, StoreError> {
        let mut builder = ExpressionBuilder::new();
        let condition = builder.condition(&request.condition);
        let (names, values) = placeholder_maps(builder.finish())?;

        let output = self
            .client
            .delete_item()
            .table_name(&request.table_name)
            .set_key(Some(to_attributes(&request.key)?))
            .condition_expression(condition)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| map_sdk_error("DeleteItem", e))?;

        output.attributes.map(from_attributes).transpose()
    }
}

/// Table and secondary index keys from a DescribeTable result.
fn table_keys(table: &TableDescription) -> Option<TableKeys> {
    let mut indices = HashMap::new();
    for index in table.global_secondary_indexes() {
        if let (Some(name), Some(pair)) = (index.index_name(), key_pair(index.key_schema())) {
            indices.insert(name.to_string(), pair);
        }
    }
    for index in table.local_secondary_indexes() {
        if let (Some(name), Some(pair)) = (index.index_name(), key_pair(index.key_schema())) {
            indices.insert(name.to_string(), pair);
        }
    }
    Some(TableKeys {
        table: key_pair(table.key_schema())?,
        indices,
    })
}

fn key_pair(elements: &[KeySchemaElement]) -> Option<KeyPair> {
    let attribute = |key_type: KeyType| {
        elements
            .iter()
            .find(|e| *e.key_type() == key_type)
            .map(|e| e.attribute_name().to_string())
    };
    Some(KeyPair {
        pk: attribute(KeyType::Hash)?,
        sk: attribute(KeyType::Range),
    })
}

fn to_attributes(item: &Item) -> Result<AttributeMap, StoreError> {
    serde_dynamo::to_item(item).map_err(|e| StoreError::Internal(format!("Failed to encode item: {}", e)))
}

fn from_attributes(attributes: AttributeMap) -> Result<Item, StoreError> {
    serde_dynamo::from_item(attributes)
        .map_err(|e| StoreError::Internal(format!("Failed to decode item: {}", e)))
}

/// DynamoDB rejects empty placeholder maps, so empty maps become `None`.
#[allow(clippy::type_complexity)]
fn placeholder_maps(
    placeholders: Placeholders,
) -> Result<(Option<HashMap<String, String>>, Option<AttributeMap>), StoreError> {
    let names = (!placeholders.names.is_empty()).then_some(placeholders.names);
    let values = if placeholders.values.is_empty() {
        None
    } else {
        let mut encoded = AttributeMap::with_capacity(placeholders.values.len());
        for (token, value) in placeholders.values {
            let attribute: AttributeValue = serde_dynamo::to_attribute_value::<Value, AttributeValue>(value)
                .map_err(|e| StoreError::Internal(format!("Failed to encode value: {}", e)))?;
            encoded.insert(token, attribute);
        }
        Some(encoded)
    };
    Ok((names, values))
}

fn map_sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    match &err {
        SdkError::ServiceError(service_err) => {
            let e = service_err.err();
            let mapped = classify(e.code(), e.message().unwrap_or_default());
            if mapped != StoreError::ConditionalCheckFailed {
                error!(operation, code = ?e.code(), "DynamoDB request failed: {}", DisplayErrorContext(&err));
            }
            mapped
        }
        _ => {
            error!(operation, "DynamoDB request failed: {}", DisplayErrorContext(&err));
            StoreError::Internal(format!("{} failed to complete", operation))
        }
    }
}

/// Classify a DynamoDB service error by its error code.
pub fn classify(code: Option<&str>, message: &str) -> StoreError {
    match code {
        Some("ConditionalCheckFailedException") => StoreError::ConditionalCheckFailed,
        Some("ProvisionedThroughputExceededException" | "ThrottlingException" | "RequestLimitExceeded") => {
            StoreError::Throttled(message.to_string())
        }
        Some("ValidationException") => StoreError::Validation(message.to_string()),
        Some("AccessDeniedException" | "UnrecognizedClientException") => StoreError::AccessDenied(message.to_string()),
        Some(code) => StoreError::Service {
            code: code.to_string(),
            message: message.to_string(),
        },
        None => StoreError::Internal(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::types::{GlobalSecondaryIndexDescription, LocalSecondaryIndexDescription};
    use serde_json::json;

    #[test]
    fn test_classify_service_errors() {
        assert_eq!(
            classify(Some("ConditionalCheckFailedException"), "The conditional request failed"),
            StoreError::ConditionalCheckFailed
        );
        assert!(matches!(
            classify(Some("ProvisionedThroughputExceededException"), "slow down"),
            StoreError::Throttled(_)
        ));
        assert!(matches!(
            classify(Some("ValidationException"), "bad key"),
            StoreError::Validation(_)
        ));
        assert!(matches!(
            classify(Some("AccessDeniedException"), "no"),
            StoreError::AccessDenied(_)
        ));
        assert_eq!(
            classify(Some("ResourceNotFoundException"), "Requested resource not found"),
            StoreError::Service {
                code: "ResourceNotFoundException".to_string(),
                message: "Requested resource not found".to_string(),
            }
        );
    }

    #[test]
    fn test_key_pair_from_key_schema() {
        let elements = vec![
            KeySchemaElement::builder()
                .attribute_name("version")
                .key_type(KeyType::Range)
                .build()
                .unwrap(),
            KeySchemaElement::builder()
                .attribute_name("id")
                .key_type(KeyType::Hash)
                .build()
                .unwrap(),
        ];
        assert_eq!(key_pair(&elements), Some(KeyPair::new("id", Some("version"))));
        assert_eq!(key_pair(&[]), None);
    }

    fn key(name: &str, key_type: KeyType) -> KeySchemaElement {
        KeySchemaElement::builder()
            .attribute_name(name)
            .key_type(key_type)
            .build()
            .unwrap()
    }

    #[test]
    fn test_table_keys_include_secondary_indices() {
        let table = TableDescription::builder()
            .key_schema(key("id", KeyType::Hash))
            .key_schema(key("version", KeyType::Range))
            .global_secondary_indexes(
                GlobalSecondaryIndexDescription::builder()
                    .index_name("by_color")
                    .key_schema(key("color", KeyType::Hash))
                    .build(),
            )
            .local_secondary_indexes(
                LocalSecondaryIndexDescription::builder()
                    .index_name("by_created")
                    .key_schema(key("id", KeyType::Hash))
                    .key_schema(key("create_time", KeyType::Range))
                    .build(),
            )
            .build();

        let keys = table_keys(&table).unwrap();
        assert_eq!(keys.table, KeyPair::new("id", Some("version")));
        assert_eq!(keys.indices.len(), 2);
        assert_eq!(keys.indices["by_color"], KeyPair::new("color", None));
        assert_eq!(keys.indices["by_created"], KeyPair::new("id", Some("create_time")));

        assert!(table_keys(&TableDescription::builder().build()).is_none());
    }

    #[test]
    fn test_item_attribute_round_trip() {
        let item: Item = serde_json::from_value(json!({"id": "x", "count": 3, "tags": ["a"], "meta": {"ok": true}})).unwrap();
        let attributes = to_attributes(&item).unwrap();
        assert_eq!(attributes["id"], AttributeValue::S("x".to_string()));
        assert_eq!(attributes["count"], AttributeValue::N("3".to_string()));
        assert_eq!(from_attributes(attributes).unwrap(), item);
    }

    #[tokio::test]
    async fn test_client_uses_configured_region_and_endpoint() {
        let store = DynamoStore::from_env("eu-west-1", Some("http://localhost:8000")).await;
        assert_eq!(
            store.client.config().region(),
            Some(&aws_config::Region::new("eu-west-1"))
        );
    }

    #[test]
    fn test_empty_placeholders_become_none() {
        let (names, values) = placeholder_maps(Placeholders::default()).unwrap();
        assert!(names.is_none());
        assert!(values.is_none());
    }
}
