//! JSON-RPC 2.0 envelope and error-code taxonomy.
//!
//! A request carries an `id`; a notification omits it and never produces a
//! response, even on error. A line may also be a batch (JSON array) of
//! either. [`Incoming::classify`] turns a parsed `serde_json::Value` into
//! one of these three shapes before dispatch.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 envelope
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request or notification (notifications omit `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Request id. Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Method name.
    pub method: String,
    /// Method parameters (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    /// A request with no `id` is a notification: it is processed but never
    /// answered, success or failure.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Id the originating request carried, or `null` when it could not be
    /// extracted (e.g. a parse error).
    pub id: serde_json::Value,
    /// Successful result (mutually exclusive with `error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error result (mutually exclusive with `result`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self { jsonrpc: "2.0".into(), id, result: Some(result), error: None }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(RpcError { code, message: message.into(), data: None }),
        }
    }
}

// ---------------------------------------------------------------------------
// Incoming message classification
// ---------------------------------------------------------------------------

/// One parsed line of input, classified per the wire contract.
pub enum Incoming {
    /// A single request or notification.
    Single(Request),
    /// A batch (JSON array) of requests/notifications.
    Batch(Vec<Request>),
}

/// Why a line could not be turned into an [`Incoming`].
pub enum ParseFailure {
    /// The line was not valid JSON at all.
    NotJson,
    /// The line parsed as JSON but failed structural validation
    /// (`jsonrpc != "2.0"`, missing/empty `method`, etc.). Carries the
    /// extracted id, if any, so the error response can echo it.
    InvalidRequest { id: serde_json::Value },
}

impl Incoming {
    /// Parse and classify one line of input.
    pub fn parse(line: &[u8]) -> Result<Self, ParseFailure> {
        let value: serde_json::Value = serde_json::from_slice(line).map_err(|_| ParseFailure::NotJson)?;
        match value {
            serde_json::Value::Array(items) => {
                let mut requests = Vec::with_capacity(items.len());
                for item in items {
                    requests.push(Self::validate_one(item)?);
                }
                Ok(Incoming::Batch(requests))
            }
            other => Ok(Incoming::Single(Self::validate_one(other)?)),
        }
    }

    fn validate_one(value: serde_json::Value) -> Result<Request, ParseFailure> {
        let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);
        let is_valid_envelope = value.get("jsonrpc").and_then(|v| v.as_str()) == Some("2.0")
            && value.get("method").and_then(|v| v.as_str()).is_some_and(|m| !m.is_empty());
        if !is_valid_envelope {
            return Err(ParseFailure::InvalidRequest {
                id: if value.get("id").is_some() { id } else { serde_json::Value::Null },
            });
        }
        serde_json::from_value(value).map_err(|_| ParseFailure::InvalidRequest { id })
    }
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// JSON-RPC error codes: the standard reserved range plus the daemon's own.
pub mod error_codes {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// A named service exists but is not currently available.
    pub const SERVICE_UNAVAILABLE: i32 = -32000;
    /// A handler raised an engine-level error while processing the request.
    pub const HANDLER_ERROR: i32 = -32001;
}

/// Map a [`godagent_core::GodagentError`] to a `(code, message)` pair for
/// the JSON-RPC error object.
pub fn rpc_error_for(err: &godagent_core::GodagentError) -> (i32, String) {
    use godagent_core::GodagentError as E;
    let code = match err {
        E::NamespaceValidation { .. }
        | E::VectorDimensionMismatch { .. }
        | E::VectorNotFinite { .. }
        | E::VectorNotNormalized { .. }
        | E::MalformedRequest(_) => error_codes::INVALID_PARAMS,
        E::NotFound { .. } => error_codes::METHOD_NOT_FOUND,
        // Invariant violations (orphan node, cycle, duplicate service,
        // referenced-node deletion) are reported as internal errors, not
        // caller-fixable param mistakes.
        E::OrphanNode
        | E::CycleDetected
        | E::DuplicateService { .. }
        | E::NodeReferenced { .. } => error_codes::INTERNAL_ERROR,
        _ => error_codes::HANDLER_ERROR,
    };
    (code, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_with_id() {
        let line = br#"{"jsonrpc":"2.0","id":1,"method":"health.ping"}"#;
        match Incoming::parse(line) {
            Ok(Incoming::Single(req)) => {
                assert!(!req.is_notification());
                assert_eq!(req.method, "health.ping");
            }
            _ => panic!("expected single request"),
        }
    }

    #[test]
    fn test_parse_notification_has_no_id() {
        let line = br#"{"jsonrpc":"2.0","method":"health.ping"}"#;
        match Incoming::parse(line) {
            Ok(Incoming::Single(req)) => assert!(req.is_notification()),
            _ => panic!("expected single request"),
        }
    }

    #[test]
    fn test_parse_batch() {
        let line = br#"[{"jsonrpc":"2.0","id":1,"method":"health.ping"},{"jsonrpc":"2.0","method":"health.ping"}]"#;
        match Incoming::parse(line) {
            Ok(Incoming::Batch(reqs)) => assert_eq!(reqs.len(), 2),
            _ => panic!("expected batch"),
        }
    }

    #[test]
    fn test_parse_not_json_fails() {
        assert!(matches!(Incoming::parse(b"not json"), Err(ParseFailure::NotJson)));
    }

    #[test]
    fn test_parse_missing_method_is_invalid_request() {
        let line = br#"{"jsonrpc":"2.0","id":5}"#;
        match Incoming::parse(line) {
            Err(ParseFailure::InvalidRequest { id }) => assert_eq!(id, serde_json::json!(5)),
            _ => panic!("expected invalid request"),
        }
    }
}
