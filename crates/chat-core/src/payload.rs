//! Decoding of the loosely-typed JSON pushed by the server.
//!
//! The server treats every field as optional and uses truthiness for flags,
//! so decoding goes through `serde_json::Value` and normalizes into
//! [`InboundPayload`].

use serde_json::{Map, Value};

use crate::{
    error::{ChatError, ChatErrorCategory},
    types::{ChatBody, ChatRecord},
};

/// Structured inbound payload. Absent fields are `None`/empty/`false`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundPayload {
    /// Server ping stamp acknowledging our last ping.
    pub ping: Option<String>,
    pub chat: Vec<ChatRecord>,
    /// Full presence list; `Some(vec![])` means everybody left.
    pub presence: Option<Vec<String>>,
    pub ladder_updated: bool,
    pub players: Option<String>,
    pub match_history: Option<String>,
    /// Server asks the client to pull history instead of pushing it.
    pub get_chat_history: bool,
    /// Server asks for an immediate ping; carries its stamp.
    pub ping_back: Option<String>,
}

impl InboundPayload {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Decode one push message or action response body.
pub fn parse_inbound(raw: &str) -> Result<InboundPayload, ChatError> {
    let value: Value = serde_json::from_str(raw).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "payload_decode_error",
            err.to_string(),
        )
    })?;
    let Value::Object(fields) = value else {
        return Err(ChatError::new(
            ChatErrorCategory::Serialization,
            "payload_not_object",
            "inbound payload must be a JSON object",
        ));
    };

    Ok(InboundPayload {
        ping: stamp(fields.get("ping")),
        chat: chat_records(fields.get("chat")),
        presence: presence(fields.get("presence")),
        ladder_updated: truthy(fields.get("ladder_updated")),
        players: html(fields.get("players")),
        match_history: html(fields.get("match_history")),
        get_chat_history: truthy(fields.get("get_chat_history")),
        ping_back: stamp(fields.get("ping_back")),
    })
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn stamp(value: Option<&Value>) -> Option<String> {
    if !truthy(value) {
        return None;
    }
    match value? {
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn html(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

fn presence(value: Option<&Value>) -> Option<Vec<String>> {
    let Some(Value::Array(items)) = value else {
        return None;
    };
    Some(items.iter().filter_map(text_of).collect())
}

fn chat_records(value: Option<&Value>) -> Vec<ChatRecord> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(fields) => chat_record(fields),
            _ => None,
        })
        .collect()
}

fn chat_record(fields: &Map<String, Value>) -> Option<ChatRecord> {
    let timestamp = seconds(fields.get("t")?)?;
    let name = text_of(fields.get("n")?)?;
    let body = if let Some(system) = fields.get("s").filter(|v| truthy(Some(*v))) {
        text_of(system).map(ChatBody::System)
    } else if let Some(message) = fields.get("m").filter(|v| truthy(Some(*v))) {
        text_of(message).map(ChatBody::Message)
    } else {
        None
    };
    Some(ChatRecord {
        timestamp,
        name,
        body,
    })
}

fn seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|n| n.trunc() as i64)),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| text.trim().parse::<f64>().ok().map(|n| n.trunc() as i64)),
        _ => None,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
