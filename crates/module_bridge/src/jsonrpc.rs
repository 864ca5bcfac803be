use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::message::{CallOutcome, DispatchError};

/// JSON‑RPC 2.0 envelope used on the host <-> module transport.
///
/// Every unit on the wire is a [`Frame`]: the payload is a plain JSON‑RPC
/// request or response, and `channel` names the method channel it belongs to.
/// Over byte streams each frame is one line of JSON.
///
/// ```ignore
/// use module_bridge::jsonrpc::{Frame, Id, Message, Request};
/// use serde_json::json;
///
/// let req = Request::call(Id::Number(1), "showDialog", Some(json!({"message": "hi"})));
/// let frame = Frame::new("com.example.flutter_module/channel", Message::Request(req));
/// let line = serde_json::to_string(&frame).unwrap();
/// ```
pub const JSONRPC_VERSION: &str = "2.0";

/// Handler reported an application error; `data` carries `{code, details}`.
pub const APPLICATION_ERROR: i64 = -32000;
/// The receiving endpoint has no handler for the method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// The frame could not be parsed.
pub const PARSE_ERROR: i64 = -32700;

/// `id` MAY be a string, number or null. We support all forms, but this
/// crate only ever issues numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
    Null,
}

/// JSON‑RPC 2.0 Request object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Request {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Omitted for *notifications*.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_owned()
}

/// JSON‑RPC 2.0 Error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Error {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON‑RPC 2.0 Response object.
/// Exactly one of `result` or `error` is present; a null result is omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Response {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
    pub id: Id,
}

/// Lets the reader `serde_json::from_str::<Message>()` without inspecting the type first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// One unit on the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Frame {
    pub channel: String,
    pub payload: Message,
}

impl Frame {
    pub fn new(channel: impl Into<String>, payload: Message) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    pub fn request(channel: impl Into<String>, req: Request) -> Self {
        Self::new(channel, Message::Request(req))
    }

    pub fn response(channel: impl Into<String>, rsp: Response) -> Self {
        Self::new(channel, Message::Response(rsp))
    }
}

// -----------------------------------------------------------------------------
// Helper constructors
// -----------------------------------------------------------------------------
impl Request {
    /// Create a *notification* (no response expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
            id: None,
        }
    }

    /// Create a *call* expecting a response.
    pub fn call(id: Id, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }
}

impl Response {
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn fail(id: Id, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: None,
            error: Some(Error {
                code,
                message: message.into(),
                data,
            }),
            id,
        }
    }

    /// Encode a call outcome for the wire.
    pub fn from_outcome(id: Id, outcome: CallOutcome) -> Self {
        match outcome {
            CallOutcome::Success(value) => Self::success(id, value),
            CallOutcome::NotImplemented => {
                Self::fail(id, METHOD_NOT_FOUND, "Method not implemented", None)
            }
            CallOutcome::Error(err) => Self::fail(
                id,
                APPLICATION_ERROR,
                err.message,
                Some(json!({ "code": err.code, "details": err.details })),
            ),
        }
    }

    /// Decode a wire response back into the outcome the remote handler produced.
    pub fn into_outcome(self) -> CallOutcome {
        let Some(err) = self.error else {
            return CallOutcome::Success(self.result.unwrap_or(Value::Null));
        };

        match err.code {
            METHOD_NOT_FOUND => CallOutcome::NotImplemented,
            APPLICATION_ERROR => {
                let mut data = err.data.unwrap_or(Value::Null);
                let code = data
                    .get("code")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| APPLICATION_ERROR.to_string());
                let details = data
                    .get_mut("details")
                    .map(Value::take)
                    .filter(|d| !d.is_null());
                CallOutcome::Error(DispatchError::new(code, err.message, details))
            }
            other => CallOutcome::Error(DispatchError::new(
                other.to_string(),
                err.message,
                err.data,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_and_response_lines_parse_as_the_right_variant() {
        let req = Request::call(Id::Number(7), "showDialog", Some(json!({"message": "hi"})));
        let line = serde_json::to_string(&Frame::request("ch", req.clone())).unwrap();
        let frame: Frame = serde_json::from_str(&line).unwrap();
        assert_eq!(frame.channel, "ch");
        assert_eq!(frame.payload, Message::Request(req));

        let line = r#"{"channel":"ch","payload":{"jsonrpc":"2.0","result":"ok","id":7}}"#;
        let frame: Frame = serde_json::from_str(line).unwrap();
        match frame.payload {
            Message::Response(rsp) => {
                assert_eq!(rsp.id, Id::Number(7));
                assert_eq!(rsp.result, Some(json!("ok")));
            }
            other => panic!("expected a response, got {other:?}"),
        }
    }

    #[test]
    fn notifications_omit_the_id() {
        let s = serde_json::to_string(&Request::notification("showMessage", None)).unwrap();
        assert!(!s.contains("\"id\""));
        assert!(!s.contains("\"params\""));
    }

    #[test]
    fn dispatch_error_keeps_string_code_and_details() {
        let outcome = CallOutcome::Error(DispatchError::new(
            "INVALID_ARGUMENT",
            "Message argument is required",
            Some(json!({"field": "message"})),
        ));
        let rsp = Response::from_outcome(Id::Number(1), outcome.clone());
        let err = rsp.error.as_ref().unwrap();
        assert_eq!(err.code, APPLICATION_ERROR);
        assert_eq!(err.data.as_ref().unwrap()["code"], "INVALID_ARGUMENT");

        let wire = serde_json::to_string(&rsp).unwrap();
        let back: Response = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.into_outcome(), outcome);
    }

    #[test]
    fn not_implemented_uses_method_not_found() {
        let rsp = Response::from_outcome(Id::Number(2), CallOutcome::NotImplemented);
        assert_eq!(rsp.error.as_ref().unwrap().code, METHOD_NOT_FOUND);
        assert_eq!(rsp.into_outcome(), CallOutcome::NotImplemented);
    }

    #[test]
    fn null_result_is_success_null() {
        let rsp = Response::from_outcome(Id::Number(3), CallOutcome::Success(Value::Null));
        let wire = serde_json::to_string(&rsp).unwrap();
        let back: Response = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.into_outcome(), CallOutcome::Success(Value::Null));
    }

    #[test]
    fn foreign_error_codes_become_dispatch_errors() {
        let rsp = Response::fail(Id::Number(4), PARSE_ERROR, "Parse error", Some(json!("eof")));
        match rsp.into_outcome() {
            CallOutcome::Error(err) => {
                assert_eq!(err.code, "-32700");
                assert_eq!(err.details, Some(json!("eof")));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
