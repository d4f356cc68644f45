//! Input validation.
//!
//! A [`FieldSchema`] declares which keys an action accepts and how each one is
//! type-checked and coerced. [`validate`] turns a merged request [`Input`] into a
//! [`CleanInput`] holding only declared keys, or a list of human-readable errors.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::{ValidateEmail, ValidateUrl};

use crate::models::Input;

/// Semantic type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[serde(alias = "str")]
    String,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "dict", alias = "map", alias = "object")]
    Mapping,
    #[serde(alias = "array")]
    List,
    #[serde(alias = "datetime")]
    Timestamp,
    Date,
    Time,
    Email,
    Hostname,
    Url,
    #[serde(alias = "alnum")]
    Alphanumeric,
    #[serde(alias = "uuid")]
    Identifier,
    #[serde(alias = "docid")]
    DocumentId,
}

/// Required flag, or a whitelist of allowed values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Required {
    Flag(bool),
    OneOf(Vec<Value>),
}

impl Default for Required {
    fn default() -> Self {
        Required::Flag(false)
    }
}

/// One field declaration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "FieldSpecRepr")]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: Required,
    /// Minimum length for strings, minimum value for integers.
    pub min: Option<i64>,
    /// Maximum length for strings, maximum value for integers.
    pub max: Option<i64>,
    /// Nested schema for mappings, or for each mapping element of a list.
    pub children: Option<FieldSchema>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: Required::Flag(false),
            min: None,
            max: None,
            children: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = Required::Flag(true);
        self
    }

    pub fn one_of(mut self, allowed: Vec<Value>) -> Self {
        self.required = Required::OneOf(allowed);
        self
    }

    pub fn bounds(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn children(mut self, children: FieldSchema) -> Self {
        self.children = Some(children);
        self
    }

    pub fn is_required(&self) -> bool {
        matches!(self.required, Required::Flag(true))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldSpecRepr {
    Record {
        name: String,
        #[serde(rename = "type")]
        field_type: FieldType,
        #[serde(default)]
        required: Required,
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
        #[serde(default)]
        children: Option<FieldSchema>,
    },
    Tuple(Vec<Value>),
}

impl TryFrom<FieldSpecRepr> for FieldSpec {
    type Error = String;

    fn try_from(repr: FieldSpecRepr) -> Result<Self, Self::Error> {
        match repr {
            FieldSpecRepr::Record {
                name,
                field_type,
                required,
                min,
                max,
                children,
            } => Ok(Self {
                name,
                field_type,
                required,
                min,
                max,
                children,
            }),
            FieldSpecRepr::Tuple(parts) => {
                let mut parts = parts.into_iter();
                let name = match parts.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err("field declaration must start with a name".to_string()),
                };
                let field_type: FieldType = parts
                    .next()
                    .ok_or_else(|| format!("field {:?} has no type", name))
                    .and_then(|t| {
                        serde_json::from_value(t).map_err(|e| format!("field {:?}: {}", name, e))
                    })?;
                let required = match parts.next() {
                    None | Some(Value::Null) => Required::default(),
                    Some(Value::Bool(flag)) => Required::Flag(flag),
                    Some(Value::Array(allowed)) => Required::OneOf(allowed),
                    Some(other) => {
                        return Err(format!("field {:?}: invalid required value {}", name, other))
                    }
                };
                let mut bound = |label: &str| match parts.next() {
                    None | Some(Value::Null) => Ok(None),
                    Some(Value::Number(n)) => n
                        .as_i64()
                        .map(Some)
                        .ok_or_else(|| format!("field {:?}: {} must be an integer", name, label)),
                    Some(other) => Err(format!("field {:?}: invalid {} {}", name, label, other)),
                };
                let min = bound("min")?;
                let max = bound("max")?;
                Ok(Self {
                    name,
                    field_type,
                    required,
                    min,
                    max,
                    children: None,
                })
            }
        }
    }
}

/// A group in `required_or`: one key, or several keys that must all be present.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum KeyGroup {
    Key(String),
    All(Vec<String>),
}

impl std::fmt::Display for KeyGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyGroup::Key(key) => f.write_str(key),
            KeyGroup::All(keys) => f.write_str(&keys.join(" + ")),
        }
    }
}

/// Ordered field declarations plus cross-field rules.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "FieldSchemaRepr")]
pub struct FieldSchema {
    pub fields: Vec<FieldSpec>,
    /// At least one group must be truthy in the clean mapping.
    pub required_or: Vec<KeyGroup>,
}

impl FieldSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            required_or: Vec::new(),
        }
    }

    pub fn with_required_or(mut self, groups: Vec<KeyGroup>) -> Self {
        self.required_or = groups;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldSchemaRepr {
    List(Vec<FieldSpec>),
    Record {
        fields: Vec<FieldSpec>,
        #[serde(default)]
        required_or: Vec<KeyGroup>,
    },
}

impl From<FieldSchemaRepr> for FieldSchema {
    fn from(repr: FieldSchemaRepr) -> Self {
        match repr {
            FieldSchemaRepr::List(fields) => FieldSchema::new(fields),
            FieldSchemaRepr::Record {
                fields,
                required_or,
            } => FieldSchema {
                fields,
                required_or,
            },
        }
    }
}

/// Validated input: only declared keys, values coerced to their declared type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanInput(Map<String, Value>);

impl CleanInput {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Present and not null.
    pub fn has_value(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(v) if !v.is_null())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Validate `input` against `schema`.
pub fn validate(schema: &FieldSchema, input: &Input) -> Result<CleanInput, Vec<String>> {
    let mut errors = Vec::new();
    let clean = validate_fields(schema, input, "", &mut errors);
    if errors.is_empty() {
        Ok(CleanInput(clean))
    } else {
        Err(errors)
    }
}

fn validate_fields(
    schema: &FieldSchema,
    input: &Map<String, Value>,
    prefix: &str,
    errors: &mut Vec<String>,
) -> Map<String, Value> {
    let mut clean = Map::new();

    for field in &schema.fields {
        let label = format!("{}{}", prefix, field.name);
        let Some(value) = input.get(&field.name) else {
            if field.is_required() {
                errors.push(format!("Field '{}' is required", label));
            }
            continue;
        };

        if value.is_null() {
            if field.is_required() {
                errors.push(format!("Field '{}' cannot be null", label));
            } else {
                clean.insert(field.name.clone(), Value::Null);
            }
            continue;
        }

        if let Required::OneOf(allowed) = &field.required {
            if !allowed.contains(value) {
                let allowed = allowed.iter().map(|v| v.to_string()).collect::<Vec<_>>();
                errors.push(format!(
                    "Field '{}' must be one of: {}",
                    label,
                    allowed.join(", ")
                ));
                continue;
            }
        }

        match coerce(field, &label, value, errors) {
            Ok(Some(coerced)) => {
                clean.insert(field.name.clone(), coerced);
            }
            Ok(None) => {}
            Err(message) => errors.push(message),
        }
    }

    if !schema.required_or.is_empty()
        && !schema.required_or.iter().any(|group| group_is_truthy(group, &clean))
    {
        let groups = schema
            .required_or
            .iter()
            .map(|g| format!("{}{}", prefix, g))
            .collect::<Vec<_>>();
        errors.push(format!("At least one of {} is required", groups.join(", ")));
    }

    clean
}

/// `Ok(None)` means nested errors were already recorded.
fn coerce(
    field: &FieldSpec,
    label: &str,
    value: &Value,
    errors: &mut Vec<String>,
) -> Result<Option<Value>, String> {
    let coerced = match field.field_type {
        FieldType::String => Value::String(check_length(field, label, expect_str(label, value, "a string")?)?),
        FieldType::Integer => Value::from(coerce_integer(field, label, value)?),
        FieldType::Boolean => Value::Bool(coerce_boolean(label, value)?),
        FieldType::Mapping => {
            let Value::Object(map) = value else {
                return Err(format!("Field '{}' must be a mapping", label));
            };
            match &field.children {
                Some(children) => {
                    let before = errors.len();
                    let nested = validate_fields(children, map, &format!("{}.", label), errors);
                    if errors.len() > before {
                        return Ok(None);
                    }
                    Value::Object(nested)
                }
                None => value.clone(),
            }
        }
        FieldType::List => {
            let Value::Array(items) = value else {
                return Err(format!("Field '{}' must be a list", label));
            };
            match &field.children {
                Some(children) => {
                    let before = errors.len();
                    let mut clean_items = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        let item_label = format!("{}[{}]", label, i);
                        match item {
                            Value::Object(map) => clean_items.push(Value::Object(validate_fields(
                                children,
                                map,
                                &format!("{}.", item_label),
                                errors,
                            ))),
                            _ => errors.push(format!("Field '{}' must be a mapping", item_label)),
                        }
                    }
                    if errors.len() > before {
                        return Ok(None);
                    }
                    Value::Array(clean_items)
                }
                None => value.clone(),
            }
        }
        FieldType::Timestamp => {
            let raw = expect_str(label, value, "a timestamp")?;
            let parsed = parse_timestamp(raw)
                .ok_or_else(|| format!("Field '{}' is not a recognised timestamp", label))?;
            Value::String(format_timestamp(parsed))
        }
        FieldType::Date => {
            let raw = expect_str(label, value, "a date")?;
            let parsed =
                parse_date(raw).ok_or_else(|| format!("Field '{}' is not a recognised date", label))?;
            Value::String(parsed.format("%Y-%m-%d").to_string())
        }
        FieldType::Time => {
            let raw = expect_str(label, value, "a time")?;
            let parsed =
                parse_time(raw).ok_or_else(|| format!("Field '{}' is not a recognised time", label))?;
            Value::String(parsed.format("%H:%M:%S").to_string())
        }
        FieldType::Email => {
            let raw = expect_str(label, value, "an email address")?;
            if !raw.validate_email() {
                return Err(format!("Field '{}' must be a valid email address", label));
            }
            Value::String(check_length(field, label, raw)?)
        }
        FieldType::Hostname => {
            let raw = expect_str(label, value, "a hostname")?;
            if !is_hostname(raw) {
                return Err(format!("Field '{}' must be a valid hostname", label));
            }
            Value::String(check_length(field, label, raw)?)
        }
        FieldType::Url => {
            let raw = expect_str(label, value, "a URL")?;
            if !is_http_url(raw) {
                return Err(format!("Field '{}' must be a valid http(s) URL", label));
            }
            Value::String(check_length(field, label, raw)?)
        }
        FieldType::Alphanumeric => {
            let raw = expect_str(label, value, "an alphanumeric string")?;
            if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(format!(
                    "Field '{}' may only contain letters, digits and underscores",
                    label
                ));
            }
            Value::String(check_length(field, label, raw)?)
        }
        FieldType::Identifier => {
            let raw = expect_str(label, value, "an identifier")?;
            if !is_canonical_uuid(raw) {
                return Err(format!("Field '{}' must be a lowercase UUID", label));
            }
            Value::String(raw.clone())
        }
        FieldType::DocumentId => {
            let raw = expect_str(label, value, "a document id")?;
            if raw.len() != 22 || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(format!(
                    "Field '{}' must be a 22 character alphanumeric document id",
                    label
                ));
            }
            Value::String(raw.clone())
        }
    };
    Ok(Some(coerced))
}

fn expect_str<'v>(label: &str, value: &'v Value, what: &str) -> Result<&'v String, String> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(format!("Field '{}' must be {}", label, what)),
    }
}

fn check_length(field: &FieldSpec, label: &str, value: &str) -> Result<String, String> {
    let len = value.chars().count() as i64;
    if let Some(min) = field.min {
        if len < min {
            return Err(format!(
                "Field '{}' must be at least {} characters long",
                label, min
            ));
        }
    }
    if let Some(max) = field.max {
        if len > max {
            return Err(format!(
                "Field '{}' must be at most {} characters long",
                label, max
            ));
        }
    }
    Ok(value.to_string())
}

fn coerce_integer(field: &FieldSpec, label: &str, value: &Value) -> Result<i64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    let n = parsed.ok_or_else(|| format!("Field '{}' must be an integer", label))?;
    if let Some(min) = field.min {
        if n < min {
            return Err(format!("Field '{}' must be at least {}", label, min));
        }
    }
    if let Some(max) = field.max {
        if n > max {
            return Err(format!("Field '{}' must be at most {}", label, max));
        }
    }
    Ok(n)
}

fn coerce_boolean(label: &str, value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => Ok(true),
            "false" | "no" | "off" => Ok(false),
            _ => Err(format!("Field '{}' must be a boolean", label)),
        },
        _ => Err(format!("Field '{}' must be a boolean", label)),
    }
}

fn group_is_truthy(group: &KeyGroup, clean: &Map<String, Value>) -> bool {
    let truthy = |key: &str| clean.get(key).is_some_and(is_truthy);
    match group {
        KeyGroup::Key(key) => truthy(key),
        KeyGroup::All(keys) => !keys.is_empty() && keys.iter().all(|k| truthy(k)),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Canonical timestamp form: UTC, microsecond precision, trailing `Z`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y"];
const TIME_FORMATS: [&str; 4] = ["%H:%M:%S%.f", "%H:%M", "%I:%M:%S%.f %p", "%I:%M %p"];

/// Every `date{T| }time` combination, built once.
fn datetime_formats() -> &'static [String] {
    static FORMATS: OnceLock<Vec<String>> = OnceLock::new();
    FORMATS.get_or_init(|| {
        let mut formats = Vec::new();
        for date in DATE_FORMATS {
            for sep in ["T", " "] {
                for time in TIME_FORMATS {
                    formats.push(format!("{}{}{}", date, sep, time));
                }
            }
        }
        formats
    })
}

/// Parse a timestamp from one of the accepted layouts. Inputs without an offset are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    let (naive_part, zulu) = match raw.strip_suffix('Z').or_else(|| raw.strip_suffix('z')) {
        Some(rest) => (rest, true),
        None => (raw, false),
    };

    for format in datetime_formats() {
        if let Ok(naive) = NaiveDateTime::parse_from_str(naive_part, format) {
            return Some(naive.and_utc());
        }
        if zulu {
            continue;
        }
        for offset in ["%:z", "%z", " %:z", " %z"] {
            if let Ok(ts) = DateTime::parse_from_str(raw, &format!("{}{}", format, offset)) {
                return Some(ts.with_timezone(&Utc));
            }
        }
    }
    None
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(raw, format).ok())
}

/// RFC 1123 hostname: dot-separated labels of 1-63 letters, digits or hyphens.
pub fn is_hostname(raw: &str) -> bool {
    let host = raw.strip_suffix('.').unwrap_or(raw);
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

fn is_http_url(raw: &String) -> bool {
    let lower = raw.to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")) && raw.validate_url()
}

/// 8-4-4-4-12 lowercase hex.
pub fn is_canonical_uuid(raw: &str) -> bool {
    Uuid::try_parse(raw)
        .map(|id| id.hyphenated().to_string() == raw)
        .unwrap_or(false)
}
