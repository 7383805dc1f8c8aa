//! Response envelope shared by the HTTPS API and the shadow engine
//!
//! Every completed request, whatever the transport, collapses to
//! `{code, message, body}`. Code 200 together with the backend's fixed
//! success marker denotes success; everything else carries the error
//! code/message of whoever failed the request (broker, backend, or this
//! client synthesizing a local failure).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backend success code
pub const CODE_SUCCESS: i64 = 200;
/// Local transport failure (publish failed, disconnected mid-flight)
pub const CODE_TRANSPORT: i64 = 402;
/// Locally synthesized timeout
pub const CODE_TIMEOUT: i64 = 500;
/// Fixed marker the backend sends on success, trailing space included
pub const SUCCESS_MESSAGE: &str = "success !";

/// Uniform result of a request/response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(alias = "reCode")]
    pub code: i64,
    #[serde(alias = "reMsg")]
    pub message: String,
    #[serde(default, alias = "reData")]
    pub body: Option<Value>,
}

impl ResponseEnvelope {
    /// Success envelope wrapping a reported-state body
    pub fn success(body: Option<Value>) -> Self {
        Self {
            code: CODE_SUCCESS,
            message: SUCCESS_MESSAGE.to_string(),
            body,
        }
    }

    /// Error envelope carrying the broker's/backend's own code and message
    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            body: None,
        }
    }

    /// Envelope synthesized when the bounded wait elapsed
    pub fn timeout(operation: impl std::fmt::Display) -> Self {
        Self::error(CODE_TIMEOUT, format!("timeout waiting for {operation}"))
    }

    /// Envelope applied to every pending request on a connection break
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::error(CODE_TRANSPORT, message)
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS && self.message == SUCCESS_MESSAGE
    }

    /// Parse a raw HTTPS reply body into an envelope.
    ///
    /// The backend spreads `reCode`/`reMsg`/`reData` across the top level of
    /// the reply object; absent fields degrade to an invalid-structure error
    /// rather than a parse failure.
    pub fn from_wire(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => return Self::error(CODE_TIMEOUT, format!("unparseable response: {e}")),
        };

        let code = value
            .get("reCode")
            .and_then(Value::as_i64)
            .unwrap_or(CODE_TIMEOUT);
        let message = value
            .get("reMsg")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("invalid message structure: {raw}"));
        let body = value.get("reData").cloned();

        Self {
            code,
            message,
            body,
        }
    }

    /// Build the envelope for an accepted shadow reply: the reported state
    /// wrapped with the success marker.
    pub fn from_accepted_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(payload)?;
        let reported = value
            .get("state")
            .and_then(|state| state.get("reported"))
            .cloned();
        Ok(Self::success(reported))
    }

    /// Build the envelope for a rejected shadow reply from the broker's
    /// error document.
    pub fn from_rejected_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(payload)?;
        let code = value
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(CODE_TIMEOUT);
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("rejected without message")
            .to_string();
        Ok(Self::error(code, message))
    }
}

/// Extract the client correlation token from a shadow reply payload
pub fn client_token(payload: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    value
        .get("clientToken")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_detection() {
        assert!(ResponseEnvelope::success(None).is_success());
        assert!(!ResponseEnvelope::error(200, "not the marker").is_success());
        assert!(!ResponseEnvelope::error(500, SUCCESS_MESSAGE).is_success());
    }

    #[test]
    fn test_from_accepted_payload_wraps_reported_state() {
        let payload = json!({
            "clientToken": "tok-1",
            "state": {"reported": {"devs": {"ABC123": {"online": "1"}}}}
        });
        let envelope =
            ResponseEnvelope::from_accepted_payload(payload.to_string().as_bytes()).unwrap();

        assert!(envelope.is_success());
        assert_eq!(
            envelope.body.unwrap()["devs"]["ABC123"]["online"],
            json!("1")
        );
    }

    #[test]
    fn test_from_rejected_payload_carries_broker_error() {
        let payload = json!({
            "clientToken": "tok-1",
            "code": 404,
            "message": "No shadow exists with name: 2nd_mainpage"
        });
        let envelope =
            ResponseEnvelope::from_rejected_payload(payload.to_string().as_bytes()).unwrap();

        assert_eq!(envelope.code, 404);
        assert!(envelope.message.contains("No shadow exists"));
        assert!(envelope.body.is_none());
    }

    #[test]
    fn test_timeout_envelope_names_operation() {
        let envelope = ResponseEnvelope::timeout("SBS50ABC123/2nd_mainpage get");
        assert_eq!(envelope.code, CODE_TIMEOUT);
        assert!(envelope.message.contains("SBS50ABC123/2nd_mainpage get"));
    }

    #[test]
    fn test_from_wire_http_reply() {
        let envelope = ResponseEnvelope::from_wire(
            r#"{"reCode": 200, "reMsg": "success !", "reData": [{"houseId": "h1"}]}"#,
        );
        assert!(envelope.is_success());
        assert!(envelope.body.unwrap().is_array());

        let envelope = ResponseEnvelope::from_wire(r#"{"reCode": 401, "reMsg": "bad token"}"#);
        assert_eq!(envelope.code, 401);
        assert_eq!(envelope.message, "bad token");
    }

    #[test]
    fn test_from_wire_malformed() {
        let envelope = ResponseEnvelope::from_wire("not json at all");
        assert_eq!(envelope.code, CODE_TIMEOUT);
        assert!(!envelope.is_success());

        let envelope = ResponseEnvelope::from_wire("{}");
        assert_eq!(envelope.code, CODE_TIMEOUT);
        assert!(envelope.message.contains("invalid message structure"));
    }

    #[test]
    fn test_client_token_extraction() {
        let payload = json!({"clientToken": "ab-12", "state": {}});
        assert_eq!(
            client_token(payload.to_string().as_bytes()).as_deref(),
            Some("ab-12")
        );
        assert_eq!(client_token(b"{}"), None);
        assert_eq!(client_token(b"garbage"), None);
    }
}
