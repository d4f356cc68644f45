//! HTTP path router.
//!
//! Routes are compiled once at construction and never mutated afterwards, so a
//! `Router` can be shared behind an `Arc` and queried concurrently.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::error::RouteError;
use crate::pathspec::{decode_segment, normalize_path, split_segments, CompiledRoute, RouteShape, Segment};

/// Route schema: template -> method -> action.
pub type RouteSchema<A> = BTreeMap<String, BTreeMap<String, A>>;

/// Path variables bound by a match.
pub type PathVars = BTreeMap<String, String>;

/// Router behaviour switches.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Prefix stripped from request paths before matching, e.g. an API stage.
    pub path_prefix: Option<String>,
    /// Reject requests that do not carry `path_prefix`.
    pub strict_prefix: bool,
    /// Serve `HEAD` with the `GET` action when no `HEAD` action exists.
    pub head_fallback_to_get: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            path_prefix: None,
            strict_prefix: false,
            head_fallback_to_get: true,
        }
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch<'a, A> {
    pub action: &'a A,
    /// Method key the action was found under (`GET` for a `HEAD` fallback).
    pub method: String,
    pub path_vars: PathVars,
    pub template: &'a str,
}

#[derive(Debug)]
pub struct Router<A> {
    routes: Vec<CompiledRoute<A>>,
    options: RouterOptions,
}

impl<A> Router<A> {
    /// Compile every template in `schema`; fails on the first invalid template.
    pub fn new(schema: RouteSchema<A>, options: RouterOptions) -> Result<Self, RouteError> {
        let mut routes = schema
            .into_iter()
            .map(|(template, methods)| CompiledRoute::compile(&template, methods))
            .collect::<Result<Vec<_>, _>>()?;

        {
            let mut seen = HashSet::with_capacity(routes.len());
            for route in &routes {
                if !seen.insert(route.template.as_str()) {
                    return Err(RouteError::invalid(
                        &route.template,
                        "template is declared more than once after normalization",
                    ));
                }
            }
        }

        // Most specific first; ties are broken by template so lookups are deterministic.
        routes.sort_by(|a, b| {
            (Reverse(a.literal_count), Reverse(a.segment_count), a.is_greedy(), &a.template).cmp(&(
                Reverse(b.literal_count),
                Reverse(b.segment_count),
                b.is_greedy(),
                &b.template,
            ))
        });

        let options = RouterOptions {
            path_prefix: options
                .path_prefix
                .map(|p| normalize_path(&p))
                .filter(|p| p != "/"),
            ..options
        };

        Ok(Self { routes, options })
    }

    pub fn routes(&self) -> &[CompiledRoute<A>] {
        &self.routes
    }

    /// Resolve `(method, path)` to an action and its path variables.
    pub fn route(&self, method: &str, path: &str) -> Result<RouteMatch<'_, A>, RouteError> {
        let normalized = normalize_path(path);
        let stripped = self.strip_prefix(&normalized)?;
        let segments: Vec<String> = split_segments(stripped)
            .into_iter()
            .map(decode_segment)
            .collect();

        let mut best: Option<((usize, usize, Reverse<usize>, bool), &CompiledRoute<A>, PathVars)> = None;
        for route in &self.routes {
            let Some((vars, greedy_span)) = match_route(route, &segments) else {
                continue;
            };
            let rank = (
                route.literal_count,
                route.segment_count,
                Reverse(greedy_span.unwrap_or(0)),
                greedy_span.is_none(),
            );
            // Routes are pre-sorted, so only a strictly better rank replaces the candidate.
            if best.as_ref().map_or(true, |(current, _, _)| rank > *current) {
                best = Some((rank, route, vars));
            }
        }

        let Some((_, route, path_vars)) = best else {
            debug!(path = %normalized, "no route matched");
            return Err(RouteError::RouteNotFound { path: normalized });
        };

        let method = method.to_ascii_uppercase();
        let (method, action) = match route.methods.get(&method) {
            Some(action) => (method, action),
            None if method == "HEAD" && self.options.head_fallback_to_get => {
                match route.methods.get("GET") {
                    Some(action) => ("GET".to_string(), action),
                    None => return Err(method_not_allowed(route)),
                }
            }
            None => return Err(method_not_allowed(route)),
        };

        Ok(RouteMatch {
            action,
            method,
            path_vars,
            template: &route.template,
        })
    }

    fn strip_prefix<'p>(&self, path: &'p str) -> Result<&'p str, RouteError> {
        let Some(prefix) = self.options.path_prefix.as_deref() else {
            return Ok(path);
        };
        match path.strip_prefix(prefix) {
            Some("") => Ok("/"),
            Some(rest) if rest.starts_with('/') => Ok(rest),
            _ if self.options.strict_prefix => Err(RouteError::RouteNotFound {
                path: path.to_string(),
            }),
            _ => Ok(path),
        }
    }
}

fn method_not_allowed<A>(route: &CompiledRoute<A>) -> RouteError {
    RouteError::MethodNotAllowed {
        allowed: route.allowed_methods(),
    }
}

/// Returns bound variables and, for greedy routes, how many segments the greedy variable took.
fn match_route<A>(route: &CompiledRoute<A>, segments: &[String]) -> Option<(PathVars, Option<usize>)> {
    match &route.shape {
        RouteShape::Exact(template) => {
            if template.len() != segments.len() {
                return None;
            }
            match_fixed(template, segments).map(|vars| (vars, None))
        }
        RouteShape::Greedy { prefix, name } => {
            if segments.len() < prefix.len() {
                return None;
            }
            let (head, rest) = segments.split_at(prefix.len());
            let mut vars = match_fixed(prefix, head)?;
            vars.insert(name.clone(), rest.join("/"));
            Some((vars, Some(rest.len())))
        }
    }
}

fn match_fixed(template: &[Segment], segments: &[String]) -> Option<PathVars> {
    let mut vars = PathVars::new();
    for (expected, actual) in template.iter().zip(segments) {
        match expected {
            Segment::Literal(literal) if literal == actual => {}
            Segment::Literal(_) => return None,
            Segment::Variable(name) => {
                if actual.is_empty() {
                    return None;
                }
                vars.insert(name.clone(), actual.clone());
            }
        }
    }
    Some(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(entries: &[(&str, &[(&str, &'static str)])]) -> RouteSchema<&'static str> {
        entries
            .iter()
            .map(|(template, methods)| {
                (
                    template.to_string(),
                    methods.iter().map(|(m, a)| (m.to_string(), *a)).collect(),
                )
            })
            .collect()
    }

    fn router(entries: &[(&str, &[(&str, &'static str)])]) -> Router<&'static str> {
        Router::new(schema(entries), RouterOptions::default()).unwrap()
    }

    #[test]
    fn test_binds_single_variable() {
        let router = router(&[("/widgets/{id}", &[("GET", "A1")])]);
        let matched = router.route("get", "/widgets/42").unwrap();
        assert_eq!(*matched.action, "A1");
        assert_eq!(matched.method, "GET");
        assert_eq!(matched.path_vars, PathVars::from([("id".to_string(), "42".to_string())]));
    }

    #[test]
    fn test_method_not_allowed_lists_methods() {
        let router = router(&[("/widgets", &[("POST", "A2")])]);
        let err = router.route("DELETE", "/widgets").unwrap_err();
        assert_eq!(
            err,
            RouteError::MethodNotAllowed {
                allowed: vec!["POST".to_string()]
            }
        );
    }

    #[test]
    fn test_greedy_binds_remainder() {
        let router = router(&[("/files/{path*}", &[("GET", "A3")])]);
        let matched = router.route("GET", "/files/a/b/c").unwrap();
        assert_eq!(matched.path_vars["path"], "a/b/c");

        let empty = router.route("GET", "/files").unwrap();
        assert_eq!(empty.path_vars["path"], "");
    }

    #[test]
    fn test_literal_route_beats_variables() {
        let router = router(&[("/{x}/{y}", &[("GET", "vars")]), ("/a/b", &[("GET", "literal")])]);
        assert_eq!(*router.route("GET", "/a/b").unwrap().action, "literal");
        assert_eq!(*router.route("GET", "/a/c").unwrap().action, "vars");
    }

    #[test]
    fn test_exact_route_beats_greedy() {
        let router = router(&[
            ("/files/{path*}", &[("GET", "greedy")]),
            ("/files/{name}", &[("GET", "exact")]),
        ]);
        assert_eq!(*router.route("GET", "/files/x").unwrap().action, "exact");
        assert_eq!(*router.route("GET", "/files/x/y").unwrap().action, "greedy");
    }

    #[test]
    fn test_longer_fixed_prefix_wins() {
        let router = router(&[
            ("/files/{path*}", &[("GET", "short_prefix")]),
            ("/files/{dir}/{path*}", &[("GET", "long_prefix")]),
        ]);
        assert_eq!(*router.route("GET", "/files/a/b/c").unwrap().action, "long_prefix");
    }

    #[test]
    fn test_templates_equal_after_normalization_are_rejected() {
        let err = Router::new(
            schema(&[("/a", &[("GET", "one")]), ("/a/", &[("POST", "two")])]),
            RouterOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RouteError::InvalidRoute { ref template, .. } if template == "/a"));
    }

    #[test]
    fn test_methods_equal_after_upper_casing_are_rejected() {
        let err = Router::new(
            schema(&[("/x", &[("get", "lower"), ("GET", "upper")])]),
            RouterOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RouteError::InvalidRoute { .. }));
    }

    #[test]
    fn test_route_not_found() {
        let router = router(&[("/widgets/{id}", &[("GET", "A1")])]);
        assert!(matches!(
            router.route("GET", "/widgets/42/extra"),
            Err(RouteError::RouteNotFound { .. })
        ));
    }

    #[test]
    fn test_root_route() {
        let router = router(&[("/", &[("GET", "root")])]);
        assert_eq!(*router.route("GET", "/").unwrap().action, "root");
        assert_eq!(*router.route("GET", "").unwrap().action, "root");
    }

    #[test]
    fn test_head_falls_back_to_get() {
        let router = router(&[("/widgets", &[("GET", "list")])]);
        let matched = router.route("HEAD", "/widgets").unwrap();
        assert_eq!(*matched.action, "list");
        assert_eq!(matched.method, "GET");

        let strict = Router::new(
            schema(&[("/widgets", &[("GET", "list")])]),
            RouterOptions {
                head_fallback_to_get: false,
                ..RouterOptions::default()
            },
        )
        .unwrap();
        assert!(matches!(
            strict.route("HEAD", "/widgets"),
            Err(RouteError::MethodNotAllowed { .. })
        ));
    }

    #[test]
    fn test_prefix_is_stripped() {
        let entries: &[(&str, &[(&str, &'static str)])] = &[("/widgets/{id}", &[("GET", "A1")])];
        let plain = router(entries);
        let prefixed = Router::new(
            schema(entries),
            RouterOptions {
                path_prefix: Some("/api/".to_string()),
                ..RouterOptions::default()
            },
        )
        .unwrap();

        let a = plain.route("GET", "/widgets/7").unwrap();
        let b = prefixed.route("GET", "/api/widgets/7").unwrap();
        assert_eq!(a.action, b.action);
        assert_eq!(a.path_vars, b.path_vars);

        // Non-strict mode falls through to the raw path.
        assert!(prefixed.route("GET", "/widgets/7").is_ok());
        // A prefix only matches on a segment boundary.
        assert!(prefixed.route("GET", "/apiwidgets/7").is_err());
    }

    #[test]
    fn test_strict_prefix_rejects_unprefixed_paths() {
        let router = Router::new(
            schema(&[("/widgets/{id}", &[("GET", "A1")])]),
            RouterOptions {
                path_prefix: Some("/api".to_string()),
                strict_prefix: true,
                ..RouterOptions::default()
            },
        )
        .unwrap();
        assert!(router.route("GET", "/api/widgets/1").is_ok());
        assert!(matches!(
            router.route("GET", "/widgets/1"),
            Err(RouteError::RouteNotFound { .. })
        ));
    }

    #[test]
    fn test_request_segments_are_decoded_once() {
        let router = router(&[("/files/{name}", &[("GET", "file")])]);
        let matched = router.route("GET", "/files/a%2Fb%2520c").unwrap();
        assert_eq!(matched.path_vars["name"], "a/b%20c");
    }

    #[test]
    fn test_routing_is_idempotent() {
        let router = router(&[("/widgets/{id}", &[("GET", "A1")]), ("/files/{p*}", &[("GET", "A3")])]);
        for path in ["/widgets/1", "/files/x/y", "/files"] {
            let first = router.route("GET", path).unwrap();
            let second = router.route("GET", path).unwrap();
            assert_eq!(first, second);
        }
    }
}
