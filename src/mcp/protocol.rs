//! JSON-RPC 2.0 framing for MCP messages.

use rust_mcp_schema::{RequestId, RpcError};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_INITIALIZE: &str = "initialize";

/// One decoded inbound message.
#[derive(Debug)]
pub enum Incoming {
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
    },
    /// A reply to a server-initiated request. This server sends none, so
    /// replies are accepted and dropped.
    Response,
}

/// A request body: a single message or a batch.
#[derive(Debug)]
pub enum Payload {
    Single(Value),
    Batch(Vec<Value>),
}

pub fn parse_payload(text: &str) -> Result<Payload, RpcError> {
    let value: Value = serde_json::from_str(text).map_err(|err| {
        RpcError::parse_error().with_message(format!("Parse error: {err}").as_str())
    })?;
    Ok(match value {
        Value::Array(items) => Payload::Batch(items),
        other => Payload::Single(other),
    })
}

pub fn classify(value: Value) -> Result<Incoming, RpcError> {
    let Value::Object(mut object) = value else {
        return Err(invalid_request("message must be a JSON object"));
    };

    let Some(method) = object.get("method") else {
        if object.contains_key("result") || object.contains_key("error") {
            return Ok(Incoming::Response);
        }
        return Err(invalid_request("missing method"));
    };
    let method = method
        .as_str()
        .ok_or_else(|| invalid_request("method must be a string"))?
        .to_string();

    match object.remove("id") {
        None | Some(Value::Null) => Ok(Incoming::Notification { method }),
        Some(id) => {
            let id = serde_json::from_value::<RequestId>(id)
                .map_err(|_| invalid_request("id must be a string or an integer"))?;
            Ok(Incoming::Request {
                id,
                method,
                params: object.remove("params"),
            })
        }
    }
}

/// True when the payload carries an `initialize` request.
pub fn is_initialize_payload(text: &str) -> bool {
    let is_initialize = |value: &Value| {
        value.get("method").and_then(Value::as_str) == Some(METHOD_INITIALIZE)
            && value.get("id").is_some_and(|id| !id.is_null())
    };
    match parse_payload(text) {
        Ok(Payload::Single(value)) => is_initialize(&value),
        Ok(Payload::Batch(items)) => items.iter().any(is_initialize),
        Err(_) => false,
    }
}

pub fn success(id: &RequestId, result: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result})
}

pub fn failure(id: Option<&RequestId>, error: &RpcError) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "error": error})
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "method": method, "params": params})
}

/// Error body used by the HTTP host for rejections outside any request.
pub fn transport_error(code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "error": {"code": code, "message": message},
        "id": null
    })
}

pub fn invalid_request(detail: &str) -> RpcError {
    RpcError::invalid_request().with_message(format!("Invalid Request: {detail}").as_str())
}

pub fn invalid_params(detail: &str) -> RpcError {
    RpcError::invalid_params().with_message(format!("Invalid params: {detail}").as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_distinguishes_requests_and_notifications() {
        match classify(json!({"jsonrpc": "2.0", "id": 7, "method": "ping"})).unwrap() {
            Incoming::Request { id, method, params } => {
                assert_eq!(id, RequestId::Integer(7));
                assert_eq!(method, "ping");
                assert!(params.is_none());
            }
            other => panic!("expected request, got {other:?}"),
        }

        assert!(matches!(
            classify(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).unwrap(),
            Incoming::Notification { .. }
        ));
        assert!(matches!(
            classify(json!({"jsonrpc": "2.0", "id": "a", "result": {}})).unwrap(),
            Incoming::Response
        ));
    }

    #[test]
    fn classify_rejects_malformed_messages() {
        assert!(classify(json!(5)).is_err());
        assert!(classify(json!({"jsonrpc": "2.0", "id": 1})).is_err());
        assert!(classify(json!({"jsonrpc": "2.0", "id": 1, "method": 3})).is_err());
        assert!(classify(json!({"jsonrpc": "2.0", "id": [1], "method": "ping"})).is_err());
    }

    #[test]
    fn parse_payload_reports_parse_errors() {
        let err = parse_payload("{nope").unwrap_err();
        assert_eq!(err.code, RpcError::parse_error().code);
        assert!(matches!(parse_payload("[]").unwrap(), Payload::Batch(items) if items.is_empty()));
    }

    #[test]
    fn detects_initialize_in_single_and_batch_payloads() {
        let init = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
        assert!(is_initialize_payload(init));
        assert!(is_initialize_payload(&format!("[{init}]")));
        assert!(!is_initialize_payload(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#
        ));
        assert!(!is_initialize_payload(
            r#"{"jsonrpc":"2.0","method":"initialize"}"#
        ));
        assert!(!is_initialize_payload("garbage"));
    }

    #[test]
    fn failure_without_id_serializes_null_id() {
        let value = failure(None, &invalid_request("x"));
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], json!(RpcError::invalid_request().code));
    }
}
