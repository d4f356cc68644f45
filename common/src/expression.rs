//! DynamoDB expression builder.
//!
//! Attribute names and values never appear inline in expression text: each
//! one is bound to a generated `#nN` / `:vN` token. Token generation lives
//! only here.

use std::collections::HashMap;

use serde_json::Value;

/// Existence predicate attached to a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Every listed attribute must exist.
    Exists(Vec<String>),
    /// None of the listed attributes may exist.
    NotExists(Vec<String>),
}

/// Accumulates name/value placeholders while expressions are rendered.
#[derive(Debug, Default)]
pub struct ExpressionBuilder {
    names: HashMap<String, String>,
    tokens_by_name: HashMap<String, String>,
    values: HashMap<String, Value>,
}

/// Placeholder maps to send alongside the rendered expressions.
#[derive(Debug, Default, PartialEq)]
pub struct Placeholders {
    pub names: HashMap<String, String>,
    pub values: HashMap<String, Value>,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for an attribute name; the same name always gets the same token.
    pub fn name(&mut self, attribute: &str) -> String {
        if let Some(token) = self.tokens_by_name.get(attribute) {
            return token.clone();
        }
        let token = format!("#n{}", self.names.len());
        self.names.insert(token.clone(), attribute.to_string());
        self.tokens_by_name.insert(attribute.to_string(), token.clone());
        token
    }

    /// Token for a value; every call binds a fresh token.
    pub fn value(&mut self, value: Value) -> String {
        let token = format!(":v{}", self.values.len());
        self.values.insert(token.clone(), value);
        token
    }

    /// `attribute_exists(#n0) AND attribute_exists(#n1)` and the negated form.
    pub fn condition(&mut self, condition: &Condition) -> String {
        let (function, attributes) = match condition {
            Condition::Exists(attributes) => ("attribute_exists", attributes),
            Condition::NotExists(attributes) => ("attribute_not_exists", attributes),
        };
        attributes
            .iter()
            .map(|attribute| format!("{}({})", function, self.name(attribute)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// `#n0 = :v0 AND #n1 = :v1`, used for key conditions and filters alike.
    pub fn equalities(&mut self, pairs: &[(String, Value)]) -> String {
        pairs
            .iter()
            .map(|(attribute, value)| {
                let name = self.name(attribute);
                let value = self.value(value.clone());
                format!("{} = {}", name, value)
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// `SET #n0 = :v0, #n1 = :v1 REMOVE #n2`. Empty when there is nothing to change.
    pub fn update(&mut self, set: &[(String, Value)], remove: &[String]) -> String {
        let mut clauses = Vec::new();
        if !set.is_empty() {
            let assignments = set
                .iter()
                .map(|(attribute, value)| {
                    let name = self.name(attribute);
                    let value = self.value(value.clone());
                    format!("{} = {}", name, value)
                })
                .collect::<Vec<_>>();
            clauses.push(format!("SET {}", assignments.join(", ")));
        }
        if !remove.is_empty() {
            let names = remove.iter().map(|a| self.name(a)).collect::<Vec<_>>();
            clauses.push(format!("REMOVE {}", names.join(", ")));
        }
        clauses.join(" ")
    }

    pub fn finish(self) -> Placeholders {
        Placeholders {
            names: self.names,
            values: self.values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_expressions() {
        let mut builder = ExpressionBuilder::new();
        let expr = builder.condition(&Condition::NotExists(vec!["id".to_string(), "version".to_string()]));
        assert_eq!(expr, "attribute_not_exists(#n0) AND attribute_not_exists(#n1)");

        let placeholders = builder.finish();
        assert_eq!(placeholders.names["#n0"], "id");
        assert_eq!(placeholders.names["#n1"], "version");
        assert!(placeholders.values.is_empty());
    }

    #[test]
    fn test_names_are_reused_across_expressions() {
        let mut builder = ExpressionBuilder::new();
        let update = builder.update(&[("name".to_string(), json!("n"))], &["color".to_string()]);
        let condition = builder.condition(&Condition::Exists(vec!["name".to_string()]));
        assert_eq!(update, "SET #n0 = :v0 REMOVE #n1");
        assert_eq!(condition, "attribute_exists(#n0)");

        let placeholders = builder.finish();
        assert_eq!(placeholders.names.len(), 2);
        assert_eq!(placeholders.values[":v0"], json!("n"));
    }

    #[test]
    fn test_reserved_words_never_inline() {
        let mut builder = ExpressionBuilder::new();
        let expr = builder.equalities(&[
            ("status".to_string(), json!("open")),
            ("size".to_string(), json!(3)),
        ]);
        assert_eq!(expr, "#n0 = :v0 AND #n1 = :v1");
        assert!(!expr.contains("status"));
    }

    #[test]
    fn test_empty_update() {
        let mut builder = ExpressionBuilder::new();
        assert_eq!(builder.update(&[], &[]), "");
    }
}
