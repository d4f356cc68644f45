//! Caller identity from Cognito authorizer claims.
//!
//! The identity is only used to fill the configured owner field; the
//! per-action `auth` lookup in the processor decides access.

use lambda_http::{Request, RequestExt};

use crate::{Error, Result};

/// Decoded caller information.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    /// Cognito subject (UUID)
    pub user_id: String,
    pub email: Option<String>,
}

/// Extract the caller from the authorizer claims of an API Gateway request.
pub fn extract_user_from_context(claims: &serde_json::Value) -> Result<AuthenticatedUser> {
    let sub = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Auth("Missing sub claim".to_string()))?;

    let email = claims
        .get("email")
        .or_else(|| claims.get("cognito:username"))
        .and_then(|v| v.as_str())
        .map(String::from);

    Ok(AuthenticatedUser {
        user_id: sub.to_string(),
        email,
    })
}

/// Caller verified by the API Gateway Cognito authorizer, if one is attached.
///
/// Headers such as `Authorization` are never decoded here: without an
/// authorizer nothing has verified them.
pub fn caller_from_request(event: &Request) -> Option<AuthenticatedUser> {
    let claims = event
        .request_context_ref()
        .and_then(|ctx| ctx.authorizer())
        .and_then(|authorizer| authorizer.fields.get("claims"))?;
    extract_user_from_context(claims).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(authorizer: serde_json::Value, headers: serde_json::Value) -> Request {
        let event = json!({
            "resource": "/widgets",
            "path": "/widgets",
            "httpMethod": "GET",
            "headers": headers,
            "multiValueHeaders": {},
            "queryStringParameters": null,
            "multiValueQueryStringParameters": null,
            "pathParameters": null,
            "stageVariables": null,
            "requestContext": {
                "accountId": "123456789012",
                "resourceId": "abc123",
                "stage": "api",
                "requestId": "req-1",
                "identity": {"sourceIp": "127.0.0.1"},
                "resourcePath": "/widgets",
                "httpMethod": "GET",
                "apiId": "api-1",
                "authorizer": authorizer
            },
            "body": null,
            "isBase64Encoded": false
        });
        lambda_http::request::from_str(&event.to_string()).unwrap()
    }

    #[test]
    fn test_extract_user_from_claims() {
        let user = extract_user_from_context(&json!({"sub": "user-123", "cognito:username": "jo"})).unwrap();
        assert_eq!(user.user_id, "user-123");
        assert_eq!(user.email.as_deref(), Some("jo"));

        let err = extract_user_from_context(&json!({"email": "a@example.com"})).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn test_caller_comes_from_authorizer_claims() {
        let request = event(json!({"claims": {"sub": "user-1", "email": "a@example.com"}}), json!({}));
        assert_eq!(
            caller_from_request(&request),
            Some(AuthenticatedUser {
                user_id: "user-1".to_string(),
                email: Some("a@example.com".to_string()),
            })
        );
    }

    #[test]
    fn test_bearer_token_without_authorizer_is_ignored() {
        // Unsigned token whose payload claims {"sub": "intruder"}.
        let token = "eyJhbGciOiJub25lIn0.eyJzdWIiOiJpbnRydWRlciJ9.";
        let request = event(json!({}), json!({"Authorization": format!("Bearer {}", token)}));
        assert_eq!(caller_from_request(&request), None);
    }
}
