//! Error types for the router and DynamoDB action processor.

use serde::Serialize;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or wiring the request pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Route compilation or lookup error
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Caller identity could not be established
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Route(e) => e.status_code(),
            Error::Auth(_) => 401,
            _ => 500,
        }
    }
}

/// Errors produced by the path-spec compiler and the router.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// A route template is structurally invalid.
    #[error("Invalid route {template:?}: {reason}")]
    InvalidRoute { template: String, reason: String },

    /// No template matches the request path.
    #[error("No route matches {path}")]
    RouteNotFound { path: String },

    /// A template matched but does not accept the request method.
    #[error("Method not allowed, expected one of: {}", .allowed.join(", "))]
    MethodNotAllowed { allowed: Vec<String> },
}

impl RouteError {
    pub fn invalid(template: &str, reason: impl Into<String>) -> Self {
        RouteError::InvalidRoute {
            template: template.to_string(),
            reason: reason.into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            RouteError::InvalidRoute { .. } => 500,
            RouteError::RouteNotFound { .. } => 404,
            RouteError::MethodNotAllowed { .. } => 405,
        }
    }
}

/// Stable error codes returned to callers in the `errors` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    AlreadyExists,
    NoFields,
    AuthFailed,
    Forbidden,
    Throttled,
    DdbError,
    InternalError,
    MethodNotAllowed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::NoFields => "no_fields",
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::Throttled => "throttled",
            ErrorCode::DdbError => "ddb_error",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::MethodNotAllowed => "method_not_allowed",
        }
    }

    /// Get HTTP status code for this error code.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::BadRequest | ErrorCode::NoFields => 400,
            ErrorCode::AuthFailed => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::MethodNotAllowed => 405,
            ErrorCode::AlreadyExists => 409,
            ErrorCode::Throttled => 429,
            ErrorCode::DdbError => 502,
            ErrorCode::InternalError => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the `errors` list returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// The failure side of a processed request: `{"errors": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiErrors {
    pub errors: Vec<ApiError>,
}

impl ApiErrors {
    /// Status of the first error; every error path in the processor emits exactly one.
    pub fn status_code(&self) -> u16 {
        self.errors
            .first()
            .map(|e| e.code.status_code())
            .unwrap_or(500)
    }

    /// Code of the first error, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        self.errors.first().map(|e| e.code)
    }
}

impl From<ApiError> for ApiErrors {
    fn from(error: ApiError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl From<RouteError> for ApiErrors {
    fn from(error: RouteError) -> Self {
        let api_error = match &error {
            RouteError::RouteNotFound { .. } => ApiError::new(ErrorCode::NotFound, error.to_string()),
            RouteError::MethodNotAllowed { allowed } => {
                ApiError::new(ErrorCode::MethodNotAllowed, error.to_string())
                    .with_details(serde_json::json!(allowed))
            }
            RouteError::InvalidRoute { .. } => {
                ApiError::new(ErrorCode::InternalError, "Route table is misconfigured")
            }
        };
        api_error.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_shape() {
        let errors: ApiErrors = ApiError::new(ErrorCode::AlreadyExists, "Item already exists").into();
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"errors": [{"code": "already_exists", "message": "Item already exists"}]})
        );
        assert_eq!(errors.status_code(), 409);
    }

    #[test]
    fn test_method_not_allowed_carries_allowed_methods() {
        let errors: ApiErrors = RouteError::MethodNotAllowed {
            allowed: vec!["POST".to_string()],
        }
        .into();
        assert_eq!(errors.status_code(), 405);
        assert_eq!(errors.errors[0].details, Some(serde_json::json!(["POST"])));
    }
}
