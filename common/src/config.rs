//! Configuration management for the CRUD Lambda.

use std::env;

use crate::models::ActionRoutes;
use crate::router::RouterOptions;
use crate::{Error, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Route schema: template -> method -> action definition
    pub routes: ActionRoutes,
    pub router: RouterOptions,
    /// Key under which the caller id is injected, if any
    pub owner_field: Option<String>,
    /// DynamoDB endpoint override (e.g. DynamoDB Local)
    pub dynamodb_endpoint: Option<String>,
    /// AWS region
    pub aws_region: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let routes = match (lookup("ROUTES_JSON"), lookup("ROUTES_FILE")) {
            (Some(inline), _) => parse_routes(&inline, "ROUTES_JSON")?,
            (None, Some(path)) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("Failed to read {}: {}", path, e)))?;
                parse_routes(&raw, &path)?
            }
            (None, None) => {
                return Err(Error::Config("ROUTES_FILE or ROUTES_JSON must be set".to_string()))
            }
        };

        let router = RouterOptions {
            path_prefix: lookup("PATH_PREFIX").filter(|p| !p.trim().is_empty()),
            strict_prefix: flag(&lookup, "STRICT_PREFIX", false)?,
            head_fallback_to_get: flag(&lookup, "HEAD_FALLBACK_TO_GET", true)?,
        };

        Ok(Self {
            routes,
            router,
            owner_field: lookup("OWNER_FIELD").filter(|f| !f.trim().is_empty()),
            dynamodb_endpoint: lookup("DYNAMODB_ENDPOINT").filter(|e| !e.trim().is_empty()),
            aws_region: lookup("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        })
    }
}

fn parse_routes(raw: &str, source: &str) -> Result<ActionRoutes> {
    serde_json::from_str(raw).map_err(|e| Error::Config(format!("Invalid route schema in {}: {}", source, e)))
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> Result<bool> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(Error::Config(format!("{} must be a boolean, got {:?}", name, other))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const ROUTES: &str = r#"{
        "/widgets/{id}": {
            "GET": {"table_name": "widgets", "fields": [["id", "string", true]]}
        }
    }"#;

    #[test]
    fn test_inline_routes_and_defaults() {
        let config = Config::from_lookup(lookup(&[("ROUTES_JSON", ROUTES)])).unwrap();
        assert_eq!(config.routes["/widgets/{id}"]["GET"].table_name, "widgets");
        assert!(config.router.head_fallback_to_get);
        assert!(!config.router.strict_prefix);
        assert_eq!(config.router.path_prefix, None);
        assert_eq!(config.owner_field, None);
        assert_eq!(config.aws_region, "us-east-1");
    }

    #[test]
    fn test_router_flags() {
        let config = Config::from_lookup(lookup(&[
            ("ROUTES_JSON", ROUTES),
            ("PATH_PREFIX", "/api"),
            ("STRICT_PREFIX", "true"),
            ("HEAD_FALLBACK_TO_GET", "0"),
            ("OWNER_FIELD", "owner"),
        ]))
        .unwrap();
        assert_eq!(config.router.path_prefix.as_deref(), Some("/api"));
        assert!(config.router.strict_prefix);
        assert!(!config.router.head_fallback_to_get);
        assert_eq!(config.owner_field.as_deref(), Some("owner"));

        let err = Config::from_lookup(lookup(&[("ROUTES_JSON", ROUTES), ("STRICT_PREFIX", "maybe")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_routes_are_required() {
        assert!(matches!(Config::from_lookup(lookup(&[])), Err(Error::Config(_))));
        assert!(matches!(
            Config::from_lookup(lookup(&[("ROUTES_JSON", "[1, 2]")])),
            Err(Error::Config(_))
        ));
    }
}
