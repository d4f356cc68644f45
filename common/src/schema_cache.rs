//! Cache of described table key schemas.
//!
//! DescribeTable is deterministic per table, so concurrent misses may both
//! describe and insert; the later write replaces an identical value.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::models::TableKeys;

#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: RwLock<HashMap<String, TableKeys>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated cache, mainly for tests and for key schemas known at deploy time.
    pub fn with_tables(tables: impl IntoIterator<Item = (String, TableKeys)>) -> Self {
        Self {
            tables: RwLock::new(tables.into_iter().collect()),
        }
    }

    pub async fn get(&self, table_name: &str) -> Option<TableKeys> {
        self.tables.read().await.get(table_name).cloned()
    }

    pub async fn insert(&self, table_name: &str, keys: TableKeys) {
        self.tables.write().await.insert(table_name.to_string(), keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KeyPair;

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = SchemaCache::new();
        assert!(cache.get("widgets").await.is_none());

        let keys = TableKeys {
            table: KeyPair::new("id", Some("version")),
            indices: HashMap::new(),
        };
        cache.insert("widgets", keys.clone()).await;
        assert_eq!(cache.get("widgets").await, Some(keys));
        assert!(cache.get("gadgets").await.is_none());
    }
}
