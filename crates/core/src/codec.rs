//! JSON codec for the session protocol.
//!
//! Inbound payloads must be JSON objects; absent optional fields take their
//! documented defaults, but a present field of the wrong type is rejected.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::domain::{ControlMessage, LogEvent, StartMessage, StateEvent};
use crate::error::{CoreError, Result};

pub fn decode_start(payload: &[u8]) -> Result<StartMessage> {
    decode_object("start", payload)
}

pub fn decode_control(payload: &[u8]) -> Result<ControlMessage> {
    decode_object("control", payload)
}

pub fn encode_state(event: &StateEvent) -> Result<Vec<u8>> {
    encode("state", event)
}

pub fn encode_log(event: &LogEvent) -> Result<Vec<u8>> {
    encode("log", event)
}

fn decode_object<T: DeserializeOwned>(kind: &'static str, payload: &[u8]) -> Result<T> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| CoreError::malformed(kind, e.to_string()))?;

    if !value.is_object() {
        return Err(CoreError::malformed(
            kind,
            format!("expected a JSON object, got {}", json_type(&value)),
        ));
    }

    serde_json::from_value(value).map_err(|e| CoreError::malformed(kind, e.to_string()))
}

fn encode<T: Serialize>(kind: &'static str, record: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| CoreError::Encode {
        kind,
        reason: e.to_string(),
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
