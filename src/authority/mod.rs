//! External authority bridge
//!
//! The authority owns the true axis values. This crate talks to it over MQTT:
//! push requests go out as `set` messages, value reports, bounds, joystick buttons
//! and forwarded pointer/keyboard input come back in and are turned into
//! [`EngineEvent`](crate::engine::EngineEvent)s.

pub mod message;
pub mod mqtt_bridge;

use serde::{Deserialize, Serialize};

pub use message::{BridgeError, InboundMessage, Topics};
pub use mqtt_bridge::{BridgeStatus, ConnectionState, MqttBridge, MqttBridgeHandle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// Linear reconnect backoff step
    pub reconnect_step_ms: u64,
    /// Capacity of the client request queue
    pub request_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 1883,
            client_id: "axislink".to_string(),
            prefix: "axislink".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 5,
            reconnect_step_ms: 500,
            request_capacity: 100,
        }
    }
}

impl MqttSettings {
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::InvalidSettings("host must not be empty".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(BridgeError::InvalidSettings(
                "client_id must not be empty".to_string(),
            ));
        }
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() || prefix.contains(['+', '#']) {
            return Err(BridgeError::InvalidSettings(format!(
                "prefix '{}' is not a valid topic prefix",
                self.prefix
            )));
        }
        if self.request_capacity == 0 {
            return Err(BridgeError::InvalidSettings(
                "request_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
