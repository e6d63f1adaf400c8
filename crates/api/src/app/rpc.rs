//! RPC transport: input extraction and the success envelope.
//!
//! Queries are `GET /api/trpc/<router>.<procedure>?input=<url-encoded JSON>`,
//! mutations are `POST` with the JSON input as body. Success is
//! `{"result":{"data": …}}`.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Query, Request},
    http::Method,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::app::errors::{RpcError, RpcResult};

pub const RPC_PREFIX: &str = "/api/trpc";

/// Successful procedure output.
pub struct Rpc<T>(pub T);

pub type RpcResponse<T> = RpcResult<Rpc<T>>;

impl<T: Serialize> IntoResponse for Rpc<T> {
    fn into_response(self) -> Response {
        Json(json!({ "result": { "data": self.0 } })).into_response()
    }
}

/// Shorthand for `Ok(Rpc(value))`.
pub fn ok<T>(value: T) -> RpcResponse<T> {
    Ok(Rpc(value))
}

#[derive(Debug, Deserialize)]
struct InputQuery {
    input: Option<String>,
}

/// Procedure input decoded from `?input=` (GET) or the body (POST).
#[derive(Debug)]
pub struct RpcInput<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for RpcInput<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = RpcError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let raw = if req.method() == Method::GET {
            let Query(query) = Query::<InputQuery>::try_from_uri(req.uri())
                .map_err(|e| RpcError::bad_request(format!("invalid query string: {e}")))?;
            query.input.map(String::into_bytes).unwrap_or_default()
        } else {
            Bytes::from_request(req, state)
                .await
                .map_err(|e| RpcError::bad_request(format!("unreadable body: {e}")))?
                .to_vec()
        };
        decode_input(&raw).map(RpcInput)
    }
}

/// Empty input is `null`; a `{"json": …}` wrapper is unwrapped.
pub fn decode_input<T: DeserializeOwned>(raw: &[u8]) -> RpcResult<T> {
    let value: Value = if raw.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(raw).map_err(|e| RpcError::bad_request(format!("input is not valid JSON: {e}")))?
    };
    let value = match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("json") => {
            map.remove("json").unwrap_or(Value::Null)
        }
        other => other,
    };

    match serde_json::from_value::<T>(value.clone()) {
        Ok(input) => Ok(input),
        // Procedures whose fields are all optional accept a missing input.
        Err(e) if value.is_null() => {
            serde_json::from_value(json!({})).map_err(|_| RpcError::bad_request(format!("invalid input: {e}")))
        }
        Err(e) => Err(RpcError::bad_request(format!("invalid input: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::ErrorCode;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct ById {
        profile_id: i64,
    }

    #[derive(Debug, Deserialize, PartialEq, Default)]
    #[serde(rename_all = "camelCase")]
    struct Filter {
        unread_only: Option<bool>,
    }

    #[test]
    fn decodes_plain_and_wrapped_input() {
        assert_eq!(decode_input::<ById>(br#"{"profileId":7}"#), Ok(ById { profile_id: 7 }));
        assert_eq!(
            decode_input::<ById>(br#"{"json":{"profileId":7}}"#),
            Ok(ById { profile_id: 7 })
        );
    }

    #[test]
    fn missing_input_is_allowed_for_optional_fields() {
        assert_eq!(decode_input::<Filter>(b""), Ok(Filter::default()));
        assert_eq!(decode_input::<Filter>(b"null"), Ok(Filter::default()));
        assert_eq!(decode_input::<ById>(b"").map_err(|e| e.code), Err(ErrorCode::BadRequest));
    }

    #[test]
    fn malformed_input_is_a_bad_request() {
        let err = decode_input::<ById>(b"{not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::BadRequest);
        let err = decode_input::<ById>(br#"{"profileId":"seven"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadRequest);
    }
}
