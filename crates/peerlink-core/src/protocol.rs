//! Wire format shared by both directions of a peer connection.
//!
//! Each message is one UTF-8 JSON-RPC 2.0 object terminated by a newline:
//!
//! ```text
//! {"jsonrpc":"2.0","method":"add","params":[2,3],"id":7}\n
//! ```
//!
//! Inbound text is classified as a request, a response, or a notification,
//! tried in that order.

use crate::config::PeerConfig;
use crate::error::{ErrorCode, PeerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const JSONRPC_VERSION: &str = "2.0";

/// Identifier of a request as carried on the wire.
pub type RequestId = i32;

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Error object carrying the canonical message for `code`.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code.code(), code.message())
    }
}

/// An inbound call that expects a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub params: Option<Value>,
    /// Raw identifier; parsed with [`parse_id`] by the engine.
    pub id: Value,
}

/// An inbound call without identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// Result or error half of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Result(Value),
    Error(RpcErrorObject),
}

/// An inbound reply to one of our requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub body: ResponseBody,
    pub id: Value,
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

/// Why a piece of text is not a JSON-RPC 2.0 message.
#[derive(Debug, Error)]
pub enum ParseFailure {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing or unsupported jsonrpc version")]
    Version,

    #[error("object is neither a request, a response nor a notification")]
    Unclassifiable,
}

impl Message {
    /// Classify `text`: request first, then response, then notification.
    pub fn parse(text: &str) -> std::result::Result<Message, ParseFailure> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(ParseFailure::NotAnObject);
        };

        if map.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(ParseFailure::Version);
        }

        if let Some(request) = Self::as_request(&map) {
            return Ok(Message::Request(request));
        }
        if let Some(response) = Self::as_response(&map) {
            return Ok(Message::Response(response));
        }
        if let Some(notification) = Self::as_notification(&map) {
            return Ok(Message::Notification(notification));
        }
        Err(ParseFailure::Unclassifiable)
    }

    fn as_request(map: &Map<String, Value>) -> Option<Request> {
        let method = map.get("method")?.as_str()?;
        let id = map.get("id")?;
        Some(Request {
            method: method.to_string(),
            params: map.get("params").cloned(),
            id: id.clone(),
        })
    }

    fn as_response(map: &Map<String, Value>) -> Option<Response> {
        if map.contains_key("method") {
            return None;
        }
        let id = map.get("id")?.clone();

        // A non-null error wins over a result member.
        if let Some(error) = map.get("error").filter(|e| !e.is_null()) {
            let error: RpcErrorObject = serde_json::from_value(error.clone()).ok()?;
            return Some(Response {
                body: ResponseBody::Error(error),
                id,
            });
        }

        let result = map.get("result")?;
        Some(Response {
            body: ResponseBody::Result(result.clone()),
            id,
        })
    }

    fn as_notification(map: &Map<String, Value>) -> Option<Notification> {
        if map.contains_key("id") {
            return None;
        }
        let method = map.get("method")?.as_str()?;
        Some(Notification {
            method: method.to_string(),
            params: map.get("params").cloned(),
        })
    }
}

/// Parse a wire identifier into a [`RequestId`].
///
/// Accepts a JSON integer or a decimal string, as long as it fits the 32-bit
/// signed range. Anything else (null, fractions, padded or non-numeric strings)
/// is rejected.
pub fn parse_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|v| RequestId::try_from(v).ok()),
        Value::String(s) => s.parse::<RequestId>().ok(),
        _ => None,
    }
}

/// Outbound request.
#[derive(Debug, Serialize)]
pub struct OutboundRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a [Value],
    pub id: RequestId,
}

impl<'a> OutboundRequest<'a> {
    pub fn new(method: &'a str, params: &'a [Value], id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
            id,
        }
    }
}

/// Outbound notification.
#[derive(Debug, Serialize)]
pub struct OutboundNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a [Value],
}

impl<'a> OutboundNotification<'a> {
    pub fn new(method: &'a str, params: &'a [Value]) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Outbound response. `id` serializes as `null` when absent.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    pub id: Option<RequestId>,
}

impl OutboundResponse {
    /// Create a success response. A `null` result is still emitted.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    /// Create an error response.
    pub fn error(id: Option<RequestId>, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// Read one newline-terminated frame.
///
/// Returns `None` on EOF. A trailing `\r` is stripped. Bytes left over without
/// a terminator when the stream closes are discarded.
pub async fn read_message<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<Vec<u8>>> {
    let limit = max_size.saturating_add(1) as u64;
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(limit)
        .read_until(PeerConfig::END_OF_MESSAGE, &mut buf)
        .await?;

    if read == 0 {
        return Ok(None);
    }

    if buf.last() != Some(&PeerConfig::END_OF_MESSAGE) {
        if buf.len() > max_size {
            return Err(PeerError::MessageTooLarge {
                size: buf.len(),
                max: max_size,
            });
        }
        return Ok(None);
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Some(buf))
}

/// Write one newline-terminated frame and flush.
pub async fn write_message<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, body: &str) -> Result<()> {
    writer.write_all(body.as_bytes()).await?;
    writer.write_all(&[PeerConfig::END_OF_MESSAGE]).await?;
    writer.flush().await?;
    Ok(())
}
