//! Shared data models: action definitions, key schemas and response payloads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::router::RouteSchema;
use crate::validation::FieldSchema;

/// A stored item or key, as plain JSON attributes.
pub type Item = serde_json::Map<String, serde_json::Value>;

/// Merged request input before validation.
pub type Input = serde_json::Map<String, serde_json::Value>;

/// Route schema whose actions are DynamoDB action definitions.
pub type ActionRoutes = RouteSchema<ActionDefinition>;

/// Backend family an action runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    #[default]
    #[serde(rename = "dynamodb", alias = "ddb", alias = "DynamoDB")]
    DynamoDb,
}

/// Partition key and optional sort key attribute names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub pk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sk: Option<String>,
}

impl KeyPair {
    pub fn new(pk: impl Into<String>, sk: Option<&str>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.map(String::from),
        }
    }

    /// Key attribute names in `[pk, sk?]` order.
    pub fn attributes(&self) -> Vec<String> {
        std::iter::once(self.pk.clone()).chain(self.sk.clone()).collect()
    }

    pub fn is_key_attribute(&self, name: &str) -> bool {
        self.pk == name || self.sk.as_deref() == Some(name)
    }
}

/// Keys of a table and of each of its secondary indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableKeys {
    pub table: KeyPair,
    #[serde(default)]
    pub indices: HashMap<String, KeyPair>,
}

/// What a route performs against DynamoDB.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionDefinition {
    #[serde(default)]
    pub source: Source,
    pub table_name: String,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub key_schema: Option<TableKeys>,
    #[serde(default)]
    pub fields: FieldSchema,
    #[serde(default)]
    pub auth: Option<AuthDefinition>,
}

/// Lookup against a second table that must return a row before the action runs.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthDefinition {
    pub table_name: String,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub key_schema: Option<TableKeys>,
    #[serde(default)]
    pub fields: FieldSchema,
}

/// Success side of a processed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// `{"item": {...}}`
    Item { item: Item },
    /// `{"items": [...], "count": N, "last_evaluated_key": {...} | null}`
    Items {
        items: Vec<Item>,
        count: usize,
        last_evaluated_key: Option<Item>,
    },
    /// `{"deleted": {...key}}`
    Deleted { deleted: Item },
}

impl Payload {
    pub fn item(&self) -> Option<&Item> {
        match self {
            Payload::Item { item } => Some(item),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_action_definition() {
        let action: ActionDefinition = serde_json::from_value(json!({
            "source": "dynamodb",
            "table_name": "widgets",
            "index_name": "by_owner",
            "key_schema": {
                "table": {"pk": "id", "sk": "version"},
                "indices": {"by_owner": {"pk": "owner"}}
            },
            "fields": [["id", "string", true], ["version", "string", true]],
            "auth": {
                "table_name": "members",
                "fields": [{"name": "owner", "type": "string", "required": true}]
            }
        }))
        .unwrap();

        assert_eq!(action.source, Source::DynamoDb);
        let keys = action.key_schema.unwrap();
        assert_eq!(keys.table, KeyPair::new("id", Some("version")));
        assert_eq!(keys.indices["by_owner"], KeyPair::new("owner", None));
        assert_eq!(action.fields.fields.len(), 2);
        assert_eq!(action.auth.unwrap().fields.fields[0].name, "owner");
    }

    #[test]
    fn test_payload_shapes() {
        let list = Payload::Items {
            items: vec![],
            count: 0,
            last_evaluated_key: None,
        };
        assert_eq!(
            serde_json::to_value(&list).unwrap(),
            json!({"items": [], "count": 0, "last_evaluated_key": null})
        );

        let mut key = Item::new();
        key.insert("id".to_string(), json!("x"));
        assert_eq!(
            serde_json::to_value(Payload::Deleted { deleted: key }).unwrap(),
            json!({"deleted": {"id": "x"}})
        );
    }
}
