//! Topic scheme and payload codec of the authority bridge
//!
//! All topics live below a configurable prefix:
//!
//! ```text
//! out  {prefix}/axis/{index}/set      value
//! in   {prefix}/axis/{index}/value    value[;hint]
//! in   {prefix}/axis/{index}/bounds   [min];[max]
//! in   {prefix}/joystick/buttons      mask
//! in   {prefix}/input/pointer         dx;dy;down;released
//! in   {prefix}/input/key             name;1|0
//! ```

use thiserror::Error;

use crate::axis::{PushRequest, Vector2};
use crate::engine::EngineEvent;

#[derive(Debug, Error, PartialEq)]
pub enum BridgeError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Malformed payload on '{topic}': {detail}")]
    MalformedPayload { topic: String, detail: String },

    #[error("Invalid MQTT settings: {0}")]
    InvalidSettings(String),

    #[error("MQTT client error: {0}")]
    Client(String),

    #[error("Engine channel closed")]
    EngineClosed,
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Value {
        index: usize,
        value: f64,
        hint: Option<f64>,
    },
    Bounds {
        index: usize,
        min: Option<f64>,
        max: Option<f64>,
    },
    JoystickButtons(u64),
    Pointer {
        movement: Vector2,
        down: u32,
        released: u32,
    },
    Key {
        name: String,
        pressed: bool,
    },
}

impl InboundMessage {
    pub fn into_event(self) -> EngineEvent {
        match self {
            InboundMessage::Value { index, value, hint } => EngineEvent::Echo { index, value, hint },
            InboundMessage::Bounds { index, min, max } => EngineEvent::Bounds { index, min, max },
            InboundMessage::JoystickButtons(mask) => EngineEvent::JoystickButtons(mask),
            InboundMessage::Pointer {
                movement,
                down,
                released,
            } => EngineEvent::Pointer {
                movement,
                down,
                released,
            },
            InboundMessage::Key { name, pressed } => EngineEvent::Key { name, pressed },
        }
    }
}

/// Topic names under one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn subscriptions(&self) -> Vec<String> {
        ["axis/+/value", "axis/+/bounds", "joystick/buttons", "input/pointer", "input/key"]
            .iter()
            .map(|suffix| format!("{}/{}", self.prefix, suffix))
            .collect()
    }

    pub fn set_topic(&self, index: usize) -> String {
        format!("{}/axis/{}/set", self.prefix, index)
    }

    /// Topic and payload for a push request
    pub fn encode_push(&self, push: &PushRequest) -> (String, String) {
        (self.set_topic(push.index), format!("{}", push.value))
    }

    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<InboundMessage, BridgeError> {
        let malformed = |detail: &str| BridgeError::MalformedPayload {
            topic: topic.to_string(),
            detail: detail.to_string(),
        };

        let suffix = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| BridgeError::UnknownTopic(topic.to_string()))?;
        let text = std::str::from_utf8(payload)
            .map_err(|_| malformed("payload is not UTF-8"))?
            .trim();
        let parts: Vec<&str> = suffix.split('/').collect();

        match parts.as_slice() {
            ["axis", index, kind] => {
                let index: usize = index
                    .parse()
                    .map_err(|_| BridgeError::UnknownTopic(topic.to_string()))?;
                match *kind {
                    "value" => {
                        let (value, hint) = match text.split_once(';') {
                            Some((value, hint)) => (value, optional_number(hint).map_err(|e| malformed(&e))?),
                            None => (text, None),
                        };
                        let value = number(value).map_err(|e| malformed(&e))?;
                        Ok(InboundMessage::Value { index, value, hint })
                    }
                    "bounds" => {
                        let (min, max) = text
                            .split_once(';')
                            .ok_or_else(|| malformed("expected 'min;max'"))?;
                        Ok(InboundMessage::Bounds {
                            index,
                            min: optional_number(min).map_err(|e| malformed(&e))?,
                            max: optional_number(max).map_err(|e| malformed(&e))?,
                        })
                    }
                    _ => Err(BridgeError::UnknownTopic(topic.to_string())),
                }
            }
            ["joystick", "buttons"] => text
                .parse()
                .map(InboundMessage::JoystickButtons)
                .map_err(|_| malformed("expected a decimal button mask")),
            ["input", "pointer"] => {
                let fields: Vec<&str> = text.split(';').map(str::trim).collect();
                let [dx, dy, down, released] = fields.as_slice() else {
                    return Err(malformed("expected 'dx;dy;down;released'"));
                };
                Ok(InboundMessage::Pointer {
                    movement: Vector2::new(
                        number(dx).map_err(|e| malformed(&e))?,
                        number(dy).map_err(|e| malformed(&e))?,
                    ),
                    down: down.parse().map_err(|_| malformed("bad down mask"))?,
                    released: released.parse().map_err(|_| malformed("bad released mask"))?,
                })
            }
            ["input", "key"] => {
                let (name, state) = text
                    .rsplit_once(';')
                    .ok_or_else(|| malformed("expected 'name;1' or 'name;0'"))?;
                let pressed = match state.trim() {
                    "1" | "true" => true,
                    "0" | "false" => false,
                    _ => return Err(malformed("key state must be 1 or 0")),
                };
                let name = name.trim();
                if name.is_empty() {
                    return Err(malformed("empty key name"));
                }
                Ok(InboundMessage::Key {
                    name: name.to_string(),
                    pressed,
                })
            }
            _ => Err(BridgeError::UnknownTopic(topic.to_string())),
        }
    }
}

fn number(text: &str) -> Result<f64, String> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| format!("'{}' is not a number", text.trim()))
}

fn optional_number(text: &str) -> Result<Option<f64>, String> {
    if text.trim().is_empty() {
        Ok(None)
    } else {
        number(text).map(Some)
    }
}
