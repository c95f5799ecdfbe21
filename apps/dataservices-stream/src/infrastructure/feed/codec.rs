//! Stream Codec Module
//!
//! Decodes Data Services text frames into [`InboundMessage`] values and
//! encodes [`ControlFrame`]s.
//!
//! Frames are JSON objects, or arrays of objects, tagged by an `ev` member.
//! News streams may omit the tag, in which case objects are read as news.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::messages::ControlFrame;
use crate::domain::market_data::{InboundMessage, ProtocolDecodeError};
use crate::domain::streaming::StreamKind;
use crate::domain::subscription::Symbol;

/// Event tag member name.
const EVENT_TAG: &str = "ev";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Object without an event tag on a stream that requires one.
    #[error("missing event tag")]
    MissingTag,

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

impl CodecError {
    /// Attach the offending frame for delivery to the handler.
    #[must_use]
    pub fn into_protocol_error(self, raw: &str) -> ProtocolDecodeError {
        ProtocolDecodeError {
            reason: self.to_string(),
            raw: raw.to_string(),
        }
    }
}

/// JSON codec for Data Services streams.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec {
    untagged_is_news: bool,
}

impl JsonCodec {
    /// Create a codec that requires an event tag on every object.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            untagged_is_news: false,
        }
    }

    /// Create a codec suited to a stream kind.
    #[must_use]
    pub const fn for_kind(kind: StreamKind) -> Self {
        Self {
            untagged_is_news: kind.is_news(),
        }
    }

    /// Decode a text frame.
    ///
    /// An array frame decodes to one message per element; an empty array
    /// decodes to nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, is neither an object nor an
    /// array of objects, or a known tag lacks required fields.
    pub fn decode(&self, text: &str) -> Result<Vec<InboundMessage>, CodecError> {
        match serde_json::from_str::<Value>(text.trim())? {
            Value::Array(items) => items.into_iter().map(|v| self.decode_value(v)).collect(),
            value @ Value::Object(_) => Ok(vec![self.decode_value(value)?]),
            other => Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got {}",
                kind_of(&other)
            ))),
        }
    }

    fn decode_value(&self, value: Value) -> Result<InboundMessage, CodecError> {
        let Value::Object(mut object) = value else {
            return Err(CodecError::InvalidFormat(
                "array element is not an object".to_string(),
            ));
        };

        let event = match object.remove(EVENT_TAG) {
            Some(Value::String(tag)) => tag,
            Some(other) => {
                return Err(CodecError::InvalidFormat(format!(
                    "event tag is {}, not a string",
                    kind_of(&other)
                )));
            }
            None if self.untagged_is_news => "news".to_string(),
            None => return Err(CodecError::MissingTag),
        };

        let message = match event.as_str() {
            "trade" => InboundMessage::Trade(payload(object)?),
            "book" => InboundMessage::Book(payload(object)?),
            "candle" | "candles" => InboundMessage::Candle(payload(object)?),
            "instrument_status" | "status" => InboundMessage::InstrumentStatus(payload(object)?),
            "news" => InboundMessage::News(payload(object)?),
            "available_to_subscribe" => {
                InboundMessage::AvailableToSubscribe(symbol_list(&mut object)?)
            }
            "subscribed_to" => InboundMessage::SubscribedTo(symbol_list(&mut object)?),
            "get_last_event" => match object.remove("message") {
                None | Some(Value::Null) => InboundMessage::LastEvent(None),
                Some(event) => InboundMessage::LastEvent(Some(event)),
            },
            "message" => {
                InboundMessage::Notice(object.remove("message").unwrap_or(Value::Object(object)))
            }
            "error" => InboundMessage::ServerError(match object.remove("message") {
                Some(Value::String(text)) => text,
                Some(other) => other.to_string(),
                None => Value::Object(object).to_string(),
            }),
            _ => {
                object.insert(EVENT_TAG.to_string(), Value::String(event.clone()));
                InboundMessage::Other {
                    event,
                    payload: Value::Object(object),
                }
            }
        };

        Ok(message)
    }

    /// Encode a control frame to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, frame: &ControlFrame) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }
}

fn payload<T: DeserializeOwned>(object: Map<String, Value>) -> Result<T, CodecError> {
    Ok(serde_json::from_value(Value::Object(object))?)
}

fn symbol_list(object: &mut Map<String, Value>) -> Result<Vec<Symbol>, CodecError> {
    let list = object
        .remove("message")
        .ok_or_else(|| CodecError::InvalidFormat("reply without message".to_string()))?;
    Ok(serde_json::from_value(list)?)
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
