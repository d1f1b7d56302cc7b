use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::utils::error::WriteError;

/// A message as it travels between flow nodes.
///
/// Any field besides `topic`, `payload` and `messageId` is carried in
/// `extra` and survives the write round trip untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FlowMessage {
    pub fn with_payload(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::default()
        }
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Missing or `null` payloads cannot be written.
    pub fn has_invalid_payload(&self) -> bool {
        matches!(self.payload, None | Some(Value::Null))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// How an inbound payload presents itself before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PayloadShape<'a> {
    Scalar(&'a Value),
    Structured(&'a Map<String, Value>),
    EncodedText(&'a str),
}

impl<'a> PayloadShape<'a> {
    pub fn classify(payload: &'a Value) -> Self {
        match payload {
            Value::Object(map) => PayloadShape::Structured(map),
            Value::String(text) => PayloadShape::EncodedText(text),
            other => PayloadShape::Scalar(other),
        }
    }
}

/// Canonical value handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WriteValue {
    Bool(bool),
    Number(Number),
    Text(String),
    List(Vec<Value>),
    Other(Value),
}

impl WriteValue {
    /// Picks `payload.value` when the payload is structured and has one,
    /// otherwise the whole payload.
    pub fn from_payload(payload: &Value) -> Self {
        match PayloadShape::classify(payload) {
            PayloadShape::Structured(map) => match map.get("value") {
                Some(value) => WriteValue::from(value.clone()),
                None => WriteValue::Other(payload.clone()),
            },
            _ => WriteValue::from(payload.clone()),
        }
    }

    pub fn to_json(&self) -> Value {
        Value::from(self.clone())
    }
}

impl From<Value> for WriteValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(flag) => WriteValue::Bool(flag),
            Value::Number(number) => WriteValue::Number(number),
            Value::String(text) => WriteValue::Text(text),
            Value::Array(items) => WriteValue::List(items),
            other => WriteValue::Other(other),
        }
    }
}

impl From<WriteValue> for Value {
    fn from(value: WriteValue) -> Self {
        match value {
            WriteValue::Bool(flag) => Value::Bool(flag),
            WriteValue::Number(number) => Value::Number(number),
            WriteValue::Text(text) => Value::String(text),
            WriteValue::List(items) => Value::Array(items),
            WriteValue::Other(other) => other,
        }
    }
}

/// Coerces text sent by callers that cannot produce native booleans or
/// arrays (HTML forms, query strings).
///
/// `"true"`/`"false"` become booleans, comma-delimited text becomes a list
/// whose elements are parsed as JSON, anything else is kept as text.
pub fn normalize_text(text: &str) -> Result<Value, WriteError> {
    match text {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }

    if !text.contains(',') {
        return Ok(Value::String(text.to_string()));
    }

    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);

    inner
        .split(',')
        .map(|element| {
            let element = element.trim();
            serde_json::from_str::<Value>(element).map_err(|e| {
                WriteError::Normalization(format!("cannot parse list element '{}': {}", element, e))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

/// Applies [`normalize_text`] to a text `payload.value`. Bare payloads, text
/// included, pass through as they are. Returns a normalized copy; the input
/// message is left untouched.
pub fn normalize_http_payload(message: &FlowMessage) -> Result<FlowMessage, WriteError> {
    let payload = message
        .payload
        .as_ref()
        .ok_or_else(|| WriteError::InvalidPayload("message has no payload".to_string()))?;

    let normalized = match PayloadShape::classify(payload) {
        PayloadShape::Structured(map) => match map.get("value") {
            Some(Value::String(text)) => {
                let mut map = map.clone();
                map.insert("value".to_string(), normalize_text(text)?);
                Value::Object(map)
            }
            _ => payload.clone(),
        },
        PayloadShape::EncodedText(_) | PayloadShape::Scalar(_) => payload.clone(),
    };

    Ok(FlowMessage {
        payload: Some(normalized),
        ..message.clone()
    })
}
