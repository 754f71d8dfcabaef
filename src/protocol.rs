// src/protocol.rs
// Wire format for the Spark chat WebSocket: one request out, N frames back

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, SparkError};
use crate::types::{ChatMessage, ChatParameters, Domain};

/// `header.status` value marking the last frame of a stream
pub const STATUS_FINAL: i64 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub header: RequestHeader,
    pub parameter: RequestParameter,
    pub payload: RequestPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestHeader {
    pub app_id: String,
    pub uid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestParameter {
    pub chat: ChatSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSettings {
    pub domain: String,
    pub chat_id: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_k: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestPayload {
    pub message: RequestMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestMessage {
    pub text: Vec<ChatMessage>,
}

/// Build the request body. `messages` must already be normalized.
pub fn build_request(
    app_id: &str,
    uid: &str,
    domain: &Domain,
    params: &ChatParameters,
    messages: Vec<ChatMessage>,
) -> ChatRequest {
    let params = params.clamped_for(domain);
    let chat_id = params
        .chat_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    ChatRequest {
        header: RequestHeader {
            app_id: app_id.to_string(),
            uid: uid.to_string(),
        },
        parameter: RequestParameter {
            chat: ChatSettings {
                domain: domain.as_str().to_string(),
                chat_id,
                temperature: params.temperature,
                max_tokens: params.max_tokens,
                top_k: params.top_k,
            },
        },
        payload: RequestPayload {
            message: RequestMessage { text: messages },
        },
    }
}

/// Token accounting reported on the final frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub question_tokens: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Chunk {
        text: String,
        is_final: bool,
        seq: Option<i64>,
        sid: Option<String>,
        usage: Option<Usage>,
    },
    Error {
        code: i64,
        message: String,
        sid: Option<String>,
    },
}

impl ServerEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, ServerEvent::Chunk { is_final: true, .. })
    }
}

/// Decode one text frame. Fields are checked by hand rather than trusting
/// a fixed schema, since the server is not under our control.
pub fn decode_frame(raw: &str) -> Result<ServerEvent> {
    let json: Value = serde_json::from_str(raw)
        .map_err(|e| SparkError::MalformedFrame(format!("invalid JSON: {}", e)))?;

    let header = json
        .get("header")
        .filter(|h| h.is_object())
        .ok_or_else(|| malformed("missing header"))?;

    let code = header
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed("header.code is not an integer"))?;

    let sid = header
        .get("sid")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    if code != 0 {
        let message = header
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        return Ok(ServerEvent::Error { code, message, sid });
    }

    let status = header
        .get("status")
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed("header.status is not an integer"))?;

    let choices = json
        .get("payload")
        .and_then(|p| p.get("choices"))
        .filter(|c| c.is_object())
        .ok_or_else(|| malformed("missing payload.choices"))?;

    let seq = choices.get("seq").and_then(Value::as_i64);

    let mut text = String::new();
    match choices.get("text") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                let content = item
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("choices.text entry has no string content"))?;
                text.push_str(content);
            }
        }
        Some(_) => return Err(malformed("choices.text is not an array")),
    }

    Ok(ServerEvent::Chunk {
        text,
        is_final: status == STATUS_FINAL,
        seq,
        sid,
        usage: decode_usage(&json),
    })
}

// The service nests usage under payload; accept a top-level block too.
fn decode_usage(json: &Value) -> Option<Usage> {
    let block = json
        .get("payload")
        .and_then(|p| p.get("usage"))
        .or_else(|| json.get("usage"))?;

    serde_json::from_value(block.get("text")?.clone()).ok()
}

fn malformed(what: &str) -> SparkError {
    SparkError::MalformedFrame(what.to_string())
}
