//! Engine runner
//!
//! A single task owns the [`AxisRegistry`](crate::axis::AxisRegistry). Input, controller
//! tables, authority reports and the fixed-rate timer are all funnelled into it and
//! handled one after another, so the per-axis state never needs locking.

pub mod axis_engine;
pub mod engine_handle;
pub mod error;

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::axis::{Axis, ShaperSettings, Vector2};
use crate::controller::device_table::StickSide;

pub use axis_engine::{run_until_shutdown, AxisEngine, ControllerFeeds, EngineState};
pub use engine_handle::AxisEngineHandle;
pub use error::EngineError;

/// Everything that can reach the engine task besides the timer
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Relative gesture movement without a pointer button change
    Movement(Vector2),
    /// Pointer movement together with the current button state
    Pointer {
        movement: Vector2,
        down: u32,
        released: u32,
    },
    Key {
        name: String,
        pressed: bool,
    },
    /// Value report from the external authority
    Echo {
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
    AuthorityConnected(bool),
    SetEnabled {
        index: usize,
        enabled: bool,
    },
    SetAvailable {
        index: usize,
        available: bool,
    },
    Reconfigure(Vec<Axis>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Timer rate for release detection, decay and view publishing
    pub tick_hz: f64,
    pub shaper: ShaperSettings,
    /// Stick whose deflection acts as gesture movement, `None` to disable
    pub movement_stick: Option<StickSide>,
    /// Movement units per tick at full stick deflection
    pub stick_gain: f64,
    /// Gamepad stick deadzone as a fraction
    pub controller_deadzone: f32,
    pub idle_color: (u8, u8, u8),
    pub active_color: (u8, u8, u8),
    /// Capacity of the push request and event queues
    pub queue_capacity: usize,
}

/// Accepted timer rates
pub const TICK_HZ_RANGE: RangeInclusive<f64> = 1.0..=1000.0;

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_hz: 36.0,
            shaper: ShaperSettings::default(),
            movement_stick: Some(StickSide::Left),
            stick_gain: 8.0,
            controller_deadzone: 0.05,
            idle_color: (70, 70, 70),
            active_color: (255, 160, 0),
            queue_capacity: 256,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !TICK_HZ_RANGE.contains(&self.tick_hz) {
            return Err(EngineError::InvalidSettings(format!(
                "tick_hz must be in [{}, {}], got {}",
                TICK_HZ_RANGE.start(),
                TICK_HZ_RANGE.end(),
                self.tick_hz
            )));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::InvalidSettings(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.controller_deadzone) {
            return Err(EngineError::InvalidSettings(format!(
                "controller_deadzone must be in [0, 1), got {}",
                self.controller_deadzone
            )));
        }
        Ok(())
    }
}
