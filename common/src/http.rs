//! HTTP helpers for the CRUD Lambda.

use lambda_http::{Body, Response};
use serde::Serialize;
use serde_json::Value;

use crate::error::{ApiError, ApiErrors, ErrorCode};
use crate::models::Input;
use crate::service::Reply;

/// Create a JSON response with the given status code and data.
pub fn json_response<T: Serialize>(status: u16, data: &T) -> Result<Response<Body>, lambda_http::Error> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(data)?))?)
}

/// Create an error response from an error list.
pub fn error_response(errors: &ApiErrors) -> Result<Response<Body>, lambda_http::Error> {
    json_response(errors.status_code(), errors)
}

/// Render a service reply, adding `Allow` for 405 replies.
pub fn reply_response(reply: &Reply) -> Result<Response<Body>, lambda_http::Error> {
    let mut response = json_response(reply.status, &reply.body)?;
    if let Some(allowed) = &reply.allow {
        response
            .headers_mut()
            .insert("allow", allowed.join(", ").parse()?);
    }
    Ok(response)
}

/// Merge query parameters and a JSON body into one input mapping; body keys win.
pub fn merge_input<I, K, V>(query: I, body: &[u8]) -> Result<Input, ApiErrors>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut input: Input = query
        .into_iter()
        .map(|(k, v)| (k.into(), Value::String(v.into())))
        .collect();

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(input);
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => input.extend(fields),
        Ok(_) => {
            return Err(ApiError::new(ErrorCode::BadRequest, "Request body must be a JSON object").into())
        }
        Err(e) => {
            return Err(ApiError::new(ErrorCode::BadRequest, format!("Invalid request body: {}", e)).into())
        }
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_overrides_query() {
        let input = merge_input([("id", "q"), ("limit", "2")], br#"{"id": "b", "n": 1}"#).unwrap();
        assert_eq!(Value::Object(input), json!({"id": "b", "limit": "2", "n": 1}));
    }

    #[test]
    fn test_empty_body_is_allowed() {
        let input = merge_input(Vec::<(String, String)>::new(), b"  ").unwrap();
        assert!(input.is_empty());
    }

    #[test]
    fn test_non_object_body_is_rejected() {
        for body in [&b"[1]"[..], b"{oops"] {
            let err = merge_input(Vec::<(String, String)>::new(), body).unwrap_err();
            assert_eq!(err.code(), Some(ErrorCode::BadRequest));
        }
    }

    #[test]
    fn test_allow_header_on_method_not_allowed() {
        let reply = Reply {
            status: 405,
            body: json!({"errors": []}),
            allow: Some(vec!["GET".to_string(), "POST".to_string()]),
        };
        let response = reply_response(&reply).unwrap();
        assert_eq!(response.status(), 405);
        assert_eq!(response.headers()["allow"], "GET, POST");
        assert_eq!(response.headers()["content-type"], "application/json");
    }
}
