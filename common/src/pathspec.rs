//! Route template compilation.
//!
//! Templates are slash-separated. A segment is either a literal, a `{name}`
//! variable binding exactly one request segment, or a terminal `{name*}`
//! greedy variable binding the rest of the path.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::RouteError;

/// One non-greedy template segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Variable(String),
}

/// Shape of a compiled route. Greedy routes are matched by a separate code path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteShape {
    /// Request must have exactly these segments.
    Exact(Vec<Segment>),
    /// Request must start with `prefix`; the remainder binds to `name`.
    Greedy { prefix: Vec<Segment>, name: String },
}

/// A pre-parsed route template with its ranking fields.
#[derive(Debug, Clone)]
pub struct CompiledRoute<A> {
    pub template: String,
    pub shape: RouteShape,
    /// Upper-cased method -> action.
    pub methods: HashMap<String, A>,
    pub literal_count: usize,
    pub segment_count: usize,
}

impl<A> CompiledRoute<A> {
    /// Compile one template and its method map.
    pub fn compile(template: &str, methods: BTreeMap<String, A>) -> Result<Self, RouteError> {
        let shape = parse_template(template)?;
        let (fixed, greedy) = match &shape {
            RouteShape::Exact(segments) => (segments, false),
            RouteShape::Greedy { prefix, .. } => (prefix, true),
        };
        let literal_count = fixed
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        let segment_count = fixed.len() + usize::from(greedy);

        let mut by_method = HashMap::with_capacity(methods.len());
        for (method, action) in methods {
            let method = method.to_ascii_uppercase();
            if by_method.contains_key(&method) {
                return Err(RouteError::invalid(
                    template,
                    format!("method {} is declared more than once", method),
                ));
            }
            by_method.insert(method, action);
        }

        Ok(Self {
            template: normalize_path(template),
            shape,
            methods: by_method,
            literal_count,
            segment_count,
        })
    }

    pub fn is_greedy(&self) -> bool {
        matches!(self.shape, RouteShape::Greedy { .. })
    }

    /// Sorted list of methods this route accepts.
    pub fn allowed_methods(&self) -> Vec<String> {
        let mut allowed: Vec<String> = self.methods.keys().cloned().collect();
        allowed.sort();
        allowed
    }
}

/// Add a leading slash, collapse duplicate slashes and strip a trailing slash.
pub fn normalize_path(path: &str) -> String {
    let joined = path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{}", joined)
}

/// Split a normalized request path into raw (still percent-encoded) segments.
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Percent-decode a request segment once. Invalid UTF-8 is replaced rather than rejected.
pub fn decode_segment(segment: &str) -> String {
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes())).into_owned(),
    }
}

fn parse_template(template: &str) -> Result<RouteShape, RouteError> {
    let raw_segments = split_segments(template);
    let mut segments = Vec::with_capacity(raw_segments.len());
    let mut seen = HashSet::new();
    let last = raw_segments.len().saturating_sub(1);

    for (i, raw) in raw_segments.iter().enumerate() {
        match parse_variable(template, raw)? {
            Some((name, greedy)) => {
                if !seen.insert(name.clone()) {
                    return Err(RouteError::invalid(
                        template,
                        format!("variable {{{}}} appears more than once", name),
                    ));
                }
                if greedy {
                    if i != last {
                        return Err(RouteError::invalid(
                            template,
                            format!("greedy variable {{{}*}} must be the final segment", name),
                        ));
                    }
                    return Ok(RouteShape::Greedy {
                        prefix: segments,
                        name,
                    });
                }
                segments.push(Segment::Variable(name));
            }
            None => {
                let literal: Cow<str> = urlencoding::decode(raw).map_err(|_| {
                    RouteError::invalid(template, format!("segment {:?} is not valid UTF-8", raw))
                })?;
                segments.push(Segment::Literal(literal.into_owned()));
            }
        }
    }

    Ok(RouteShape::Exact(segments))
}

/// Returns `Some((name, greedy))` for `{name}` / `{name*}`, `None` for a literal.
fn parse_variable(template: &str, raw: &str) -> Result<Option<(String, bool)>, RouteError> {
    let has_brace = raw.contains('{') || raw.contains('}');
    if !has_brace {
        return Ok(None);
    }

    let inner = raw
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .filter(|s| !s.contains('{') && !s.contains('}'))
        .ok_or_else(|| {
            RouteError::invalid(template, format!("malformed variable segment {:?}", raw))
        })?;

    let (name, greedy) = match inner.strip_suffix('*') {
        Some(name) => (name, true),
        None => (inner, false),
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(RouteError::invalid(
            template,
            format!("invalid variable name in {:?}", raw),
        ));
    }

    Ok(Some((name.to_string(), greedy)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(template: &str) -> Result<CompiledRoute<u8>, RouteError> {
        CompiledRoute::compile(template, BTreeMap::from([("get".to_string(), 1u8)]))
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("widgets//42/"), "/widgets/42");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_compile_literals_and_variables() {
        let route = compile("/widgets/{id}/parts").unwrap();
        assert_eq!(
            route.shape,
            RouteShape::Exact(vec![
                Segment::Literal("widgets".to_string()),
                Segment::Variable("id".to_string()),
                Segment::Literal("parts".to_string()),
            ])
        );
        assert_eq!(route.literal_count, 2);
        assert_eq!(route.segment_count, 3);
        assert!(route.methods.contains_key("GET"));
    }

    #[test]
    fn test_compile_root() {
        let route = compile("/").unwrap();
        assert_eq!(route.shape, RouteShape::Exact(vec![]));
        assert_eq!(route.segment_count, 0);
    }

    #[test]
    fn test_literal_segments_are_percent_decoded() {
        let route = compile("/my%20files").unwrap();
        assert_eq!(
            route.shape,
            RouteShape::Exact(vec![Segment::Literal("my files".to_string())])
        );
    }

    #[test]
    fn test_compile_greedy() {
        let route = compile("/files/{path*}").unwrap();
        assert!(route.is_greedy());
        assert_eq!(
            route.shape,
            RouteShape::Greedy {
                prefix: vec![Segment::Literal("files".to_string())],
                name: "path".to_string(),
            }
        );
        assert_eq!(route.segment_count, 2);
    }

    #[test]
    fn test_greedy_must_be_last() {
        let err = compile("/files/{path*}/meta").unwrap_err();
        assert!(matches!(err, RouteError::InvalidRoute { .. }));
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        assert!(compile("/a/{id}/b/{id}").is_err());
    }

    #[test]
    fn test_malformed_variable_rejected() {
        assert!(compile("/a/x{id}").is_err());
        assert!(compile("/a/{}").is_err());
        assert!(compile("/a/{id").is_err());
    }
}
