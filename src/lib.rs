//! axislink keeps bounded numeric axes in step with an external authority.
//!
//! Input gestures from pointer, keyboard, gamepad or joystick buttons accumulate into
//! pending changes per axis. Those are committed to the authority over MQTT and the
//! authority's reports are merged back without feedback loops.
//!
//! - [`axis`] - per-axis core: triggers, shaping, reconciliation, decay, registry
//! - [`controller`] - gilrs gamepad collection
//! - [`engine`] - the task that owns all axes
//! - [`authority`] - MQTT bridge to the external authority
//! - [`config`] - TOML configuration

pub mod authority;
pub mod axis;
pub mod config;
pub mod controller;
pub mod engine;
