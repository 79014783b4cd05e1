//! # Configuration
//!
//! The whole setup lives in one TOML file with an `[engine]` table, an `[mqtt]` table
//! and one `[[axis]]` entry per axis. The file is only ever read.
//!
//! Semantic problems never abort loading. They are collected as human readable strings;
//! an axis that cannot be built is skipped, an invalid optional field falls back to its
//! default.

pub mod loader;

use serde::{Deserialize, Serialize};

use crate::authority::MqttSettings;
use crate::axis::{
    Axis, AxisBehavior, AxisRange, ButtonFilter, ControllerTrigger, Detents, Direction, Directions,
    TriggerSet, UnitKind,
};
use crate::controller::device_table::{ButtonType, ControllerId, StickAxis};
use crate::engine::EngineSettings;

pub use loader::{default_config_path, load_config, parse_config, ConfigError, LoadedConfig};

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSettings,
    pub mqtt: MqttSettings,
    #[serde(rename = "axis")]
    pub axes: Vec<AxisConfig>,
}

/// Controller buttons either as a raw mask or as a list of names
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ButtonSelection {
    Mask(u32),
    Names(Vec<String>),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct TriggerConfig {
    /// Pointer buttons that must be held
    pub pointer: Option<u32>,
    /// Pointer buttons that must be released in the same step
    pub pointer_release: Option<u32>,
    pub key: Option<String>,
    /// Controller identity as `vvvv:pppp`
    pub controller: Option<String>,
    pub controller_buttons: Option<ButtonSelection>,
    pub joystick_button: Option<u8>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AxisConfig {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub unit: UnitKind,
    pub resolution: u32,
    pub direction: String,
    pub secondary: Option<String>,
    pub detent_direction: Option<String>,
    pub sensitivity: f64,
    pub wait_for_release: bool,
    pub trim_source: Option<String>,
    pub decrease_over_time_seconds: f64,
    pub allowed_external_change_per_second: Option<f64>,
    pub zero_point: f64,
    /// Negative and positive detent in percent of the half-range, 100 disables
    pub detents: (f64, f64),
    pub enabled: bool,
    pub trigger: TriggerConfig,
}

impl Default for AxisConfig {
    fn default() -> Self {
        let behavior = AxisBehavior::default();
        Self {
            name: String::new(),
            min: 0.0,
            max: 1.0,
            unit: UnitKind::default(),
            resolution: behavior.resolution,
            direction: Direction::Push.to_string(),
            secondary: None,
            detent_direction: None,
            sensitivity: behavior.sensitivity,
            wait_for_release: behavior.wait_for_release,
            trim_source: None,
            decrease_over_time_seconds: behavior.decrease_over_time_seconds,
            allowed_external_change_per_second: None,
            zero_point: behavior.zero_point,
            detents: (100.0, 100.0),
            enabled: true,
            trigger: TriggerConfig::default(),
        }
    }
}

/// Builds the registry content from configuration, collecting every problem found
pub fn build_axes(configs: &[AxisConfig]) -> (Vec<Axis>, Vec<String>) {
    let mut axes: Vec<Axis> = Vec::with_capacity(configs.len());
    let mut errors = Vec::new();

    for (position, config) in configs.iter().enumerate() {
        let label = if config.name.trim().is_empty() {
            format!("axis #{}", position + 1)
        } else {
            format!("axis '{}'", config.name.trim())
        };

        match build_axis(config, &label, &mut errors) {
            Some(axis) => {
                if axes.iter().any(|other| other.name() == axis.name()) {
                    errors.push(format!("{}: duplicate name", label));
                }
                axes.push(axis);
            }
            None => errors.push(format!("{}: skipped", label)),
        }
    }

    (axes, errors)
}

fn build_axis(config: &AxisConfig, label: &str, errors: &mut Vec<String>) -> Option<Axis> {
    let name = config.name.trim();
    if name.is_empty() {
        errors.push(format!("{}: missing name", label));
        return None;
    }

    let range = match AxisRange::new(config.min, config.max) {
        Ok(range) => range,
        Err(e) => {
            errors.push(format!("{}: {}", label, e));
            return None;
        }
    };

    let defaults = AxisBehavior::default();
    let mut behavior = AxisBehavior {
        wait_for_release: config.wait_for_release,
        ..AxisBehavior::default()
    };

    if config.resolution == 0 {
        errors.push(format!(
            "{}: resolution must be at least 1, using {}",
            label, defaults.resolution
        ));
    } else {
        behavior.resolution = config.resolution;
    }

    if config.sensitivity.is_finite() && config.sensitivity >= 0.0 {
        behavior.sensitivity = config.sensitivity;
    } else {
        errors.push(format!(
            "{}: invalid sensitivity {}, using {}",
            label, config.sensitivity, defaults.sensitivity
        ));
    }

    if config.decrease_over_time_seconds.is_finite() && config.decrease_over_time_seconds >= 0.0 {
        behavior.decrease_over_time_seconds = config.decrease_over_time_seconds;
    } else {
        errors.push(format!(
            "{}: invalid decrease_over_time_seconds {}, decay disabled",
            label, config.decrease_over_time_seconds
        ));
    }

    match config.allowed_external_change_per_second {
        Some(rate) if !(rate.is_finite() && rate >= 0.0) => errors.push(format!(
            "{}: invalid allowed_external_change_per_second {}, external changes unlimited",
            label, rate
        )),
        rate => behavior.allowed_external_change_per_second = rate,
    }

    if config.zero_point.is_finite() {
        let zero = range.clamp(config.zero_point);
        if zero != config.zero_point {
            errors.push(format!(
                "{}: zero point {} outside range, using {}",
                label, config.zero_point, zero
            ));
        }
        behavior.zero_point = zero;
    } else {
        errors.push(format!("{}: invalid zero point", label));
        behavior.zero_point = range.clamp(0.0);
    }

    let (negative, positive) = config.detents;
    let valid_percent = |pct: f64| pct.is_finite() && pct > 0.0 && pct <= 100.0;
    if valid_percent(negative) && valid_percent(positive) {
        behavior.detents = Detents::from_percent(negative, positive);
    } else {
        errors.push(format!(
            "{}: detents ({}, {}) must be in (0, 100], detents disabled",
            label, negative, positive
        ));
    }

    if let Some(source) = &config.trim_source {
        match StickAxis::parse(source) {
            Some(stick) => behavior.trim_source = Some(stick),
            None => errors.push(format!("{}: unknown trim source '{}'", label, source)),
        }
    }

    let directions = build_directions(config, label, errors);
    let triggers = build_triggers(&config.trigger, label, errors);
    if triggers.is_empty() {
        errors.push(format!("{}: no trigger configured, axis stays inert", label));
    }

    let mut axis = Axis::new(name, range, config.unit, behavior, directions, triggers);
    axis.is_enabled = config.enabled;
    Some(axis)
}

fn build_directions(config: &AxisConfig, label: &str, errors: &mut Vec<String>) -> Directions {
    let mut parse = |field: &str, text: &str| {
        let direction = Direction::parse(text);
        if direction.is_none() {
            errors.push(format!("{}: unknown {} '{}'", label, field, text));
        }
        direction
    };

    let primary = parse("direction", &config.direction).unwrap_or(Direction::Push);
    let secondary = config
        .secondary
        .as_deref()
        .and_then(|text| parse("secondary direction", text));
    let detent = config
        .detent_direction
        .as_deref()
        .and_then(|text| parse("detent direction", text));

    let directions = Directions::new(primary, secondary, detent);
    if let Some(secondary) = secondary {
        if directions.secondary().is_none() {
            errors.push(format!(
                "{}: secondary direction {} is not orthogonal to {}, ignored",
                label, secondary, primary
            ));
        }
    }
    directions
}

fn build_triggers(config: &TriggerConfig, label: &str, errors: &mut Vec<String>) -> TriggerSet {
    let mut triggers = TriggerSet::default();

    if let Some(mask) = config.pointer {
        triggers.pointer = ButtonFilter::from_mask(mask);
        if !triggers.pointer.is_set() {
            errors.push(format!("{}: pointer mask 0 never matches, ignored", label));
        }
    }
    triggers.pointer_release = config.pointer_release.filter(|mask| *mask != 0);

    triggers.key = config
        .key
        .as_deref()
        .map(|key| key.trim().to_ascii_lowercase())
        .filter(|key| !key.is_empty());

    if let Some(text) = &config.controller {
        match ControllerId::parse(text) {
            Some(controller) => {
                let buttons = match &config.controller_buttons {
                    Some(ButtonSelection::Mask(mask)) => ButtonFilter::from_mask(*mask),
                    Some(ButtonSelection::Names(names)) => {
                        let mut mask = 0;
                        for name in names {
                            match ButtonType::parse(name) {
                                Some(button) => mask |= button.bit(),
                                None => errors.push(format!(
                                    "{}: unknown controller button '{}'",
                                    label, name
                                )),
                            }
                        }
                        ButtonFilter::from_mask(mask)
                    }
                    None => ButtonFilter::Unset,
                };
                if buttons.is_set() {
                    triggers.controller = Some(ControllerTrigger {
                        controller,
                        buttons,
                    });
                } else {
                    errors.push(format!(
                        "{}: controller {} has no buttons, ignored",
                        label, controller
                    ));
                }
            }
            None => errors.push(format!(
                "{}: controller '{}' is not a vendor:product id",
                label, text
            )),
        }
    }

    if let Some(bit) = config.joystick_button {
        if bit < 64 {
            triggers.joystick_button = Some(bit);
        } else {
            errors.push(format!("{}: joystick button {} out of range", label, bit));
        }
    }

    triggers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle() -> AxisConfig {
        AxisConfig {
            name: "throttle".to_string(),
            min: 0.0,
            max: 100.0,
            trigger: TriggerConfig {
                pointer: Some(1),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_axis_builds_without_errors() {
        let (axes, errors) = build_axes(&[throttle()]);
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(axes.len(), 1);
        assert_eq!(axes[0].triggers().pointer, ButtonFilter::Mask(1));
        assert!((axes[0].increment() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_range_skips_axis() {
        let mut config = throttle();
        config.min = 10.0;
        config.max = 5.0;
        let (axes, errors) = build_axes(&[config, throttle()]);
        assert_eq!(axes.len(), 1);
        assert_eq!(errors.len(), 2);
        assert!(errors[1].contains("skipped"));
    }

    #[test]
    fn test_invalid_optional_fields_fall_back() {
        let mut config = throttle();
        config.direction = "sideways".to_string();
        config.secondary = Some("pull".to_string());
        config.resolution = 0;
        config.detents = (0.0, 50.0);
        config.trigger.pointer = Some(0);
        config.trigger.key = Some("Space".to_string());
        let (axes, errors) = build_axes(&[config]);
        assert_eq!(axes.len(), 1);
        let axis = &axes[0];
        assert_eq!(axis.directions().primary, Direction::Push);
        assert_eq!(axis.directions().secondary(), None);
        assert_eq!(axis.behavior().resolution, 1000);
        assert!(axis.behavior().detents.is_disabled());
        assert_eq!(axis.triggers().pointer, ButtonFilter::Unset);
        assert_eq!(axis.triggers().key.as_deref(), Some("space"));
        // direction, secondary, resolution, detents, pointer mask
        assert_eq!(errors.len(), 5, "{:?}", errors);
    }

    #[test]
    fn test_controller_trigger_from_names() {
        let mut config = throttle();
        config.trigger = TriggerConfig {
            controller: Some("054c:09cc".to_string()),
            controller_buttons: Some(ButtonSelection::Names(vec!["a".to_string(), "lb".to_string()])),
            ..Default::default()
        };
        let (axes, errors) = build_axes(&[config]);
        assert!(errors.is_empty(), "{:?}", errors);
        let trigger = axes[0].triggers().controller.clone().unwrap();
        assert_eq!(trigger.controller, ControllerId::new(0x054c, 0x09cc));
        assert_eq!(
            trigger.buttons,
            ButtonFilter::Mask(ButtonType::A.bit() | ButtonType::LeftBumper.bit())
        );
    }

    #[test]
    fn test_inert_axis_is_reported() {
        let mut config = throttle();
        config.trigger = TriggerConfig::default();
        let (axes, errors) = build_axes(&[config]);
        assert_eq!(axes.len(), 1);
        assert!(errors[0].contains("inert"));
    }
}
