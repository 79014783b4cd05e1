//! Trigger evaluation
//!
//! Decides per tick whether an axis accepts movement input. An axis is active when
//! any of its configured filters matches the current device snapshot. Missing or
//! unplugged controllers are reported as warning strings, never as errors.

use std::collections::HashSet;

use super::Axis;
use crate::controller::device_table::{ControllerId, DeviceTable};

/// Button bitmask filter. `Unset` never matches, so an axis without a configured
/// filter stays inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonFilter {
    #[default]
    Unset,
    Mask(u32),
}

impl ButtonFilter {
    /// An empty mask would match everything, it is treated as unset
    pub fn from_mask(mask: u32) -> Self {
        if mask == 0 {
            ButtonFilter::Unset
        } else {
            ButtonFilter::Mask(mask)
        }
    }

    pub fn is_set(self) -> bool {
        matches!(self, ButtonFilter::Mask(_))
    }

    /// True if all buttons of the filter are contained in `pressed`
    pub fn matches(self, pressed: u32) -> bool {
        match self {
            ButtonFilter::Unset => false,
            ButtonFilter::Mask(mask) => pressed & mask == mask,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerTrigger {
    pub controller: ControllerId,
    pub buttons: ButtonFilter,
}

/// Independent input filters of one axis, OR-combined
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerSet {
    pub pointer: ButtonFilter,
    /// Buttons that must have been released this tick in addition to `pointer`
    pub pointer_release: Option<u32>,
    /// Lower-case key name
    pub key: Option<String>,
    pub controller: Option<ControllerTrigger>,
    pub joystick_button: Option<u8>,
}

impl TriggerSet {
    pub fn pointer(buttons: ButtonFilter) -> Self {
        Self {
            pointer: buttons,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.pointer.is_set()
            && self.key.is_none()
            && self.controller.is_none()
            && self.joystick_button.is_none()
    }
}

/// Pointer buttons held down and released since the previous input step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerState {
    pub down: u32,
    pub released: u32,
}

/// Everything the trigger evaluation looks at during one tick
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub pointer: PointerState,
    keys_down: HashSet<String>,
    pub controllers: DeviceTable,
    /// Buttons last reported pressed by the external system
    pub joystick_buttons: u64,
}

impl DeviceSnapshot {
    pub fn set_key(&mut self, name: &str, pressed: bool) {
        let name = name.trim().to_ascii_lowercase();
        if pressed {
            self.keys_down.insert(name);
        } else {
            self.keys_down.remove(&name);
        }
    }

    pub fn is_key_down(&self, name: &str) -> bool {
        self.keys_down.contains(&name.trim().to_ascii_lowercase())
    }

    /// Release edges only last for a single input step
    pub fn clear_edges(&mut self) {
        self.pointer.released = 0;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub active: bool,
    pub warning: Option<String>,
}

/// Evaluates all triggers of `axis` and stores the result in `axis.is_active`
pub fn evaluate(axis: &mut Axis, snapshot: &DeviceSnapshot) -> TriggerOutcome {
    let triggers = &axis.triggers;
    let mut active = false;
    let mut warning = None;

    if triggers.pointer.matches(snapshot.pointer.down) {
        let released = match triggers.pointer_release {
            Some(mask) => snapshot.pointer.released & mask == mask,
            None => true,
        };
        active |= released;
    }

    if let Some(key) = &triggers.key {
        active |= snapshot.is_key_down(key);
    }

    if let Some(trigger) = &triggers.controller {
        match snapshot.controllers.get(&trigger.controller) {
            None => {
                warning = Some(format!(
                    "Controller {} for axis '{}' is not installed",
                    trigger.controller, axis.name
                ));
            }
            Some(status) if !status.connected => {
                warning = Some(format!(
                    "Controller '{}' ({}) for axis '{}' is unplugged",
                    status.name, trigger.controller, axis.name
                ));
            }
            Some(status) => {
                active |= trigger.buttons.matches(status.pressed);
            }
        }
    }

    if let Some(bit) = triggers.joystick_button {
        if bit < 64 {
            active |= snapshot.joystick_buttons & (1u64 << bit) != 0;
        }
    }

    axis.is_active = active;
    TriggerOutcome { active, warning }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::tests::throttle;
    use crate::controller::device_table::ControllerStatus;

    const STICK: ControllerId = ControllerId {
        vendor_id: 0x045e,
        product_id: 0x028e,
    };

    #[test]
    fn test_unset_filter_never_matches() {
        assert!(!ButtonFilter::Unset.matches(u32::MAX));
        assert_eq!(ButtonFilter::from_mask(0), ButtonFilter::Unset);
        assert!(ButtonFilter::Mask(0b101).matches(0b111));
        assert!(!ButtonFilter::Mask(0b101).matches(0b001));
    }

    #[test]
    fn test_pointer_trigger_requires_superset() {
        let mut axis = throttle();
        let mut snapshot = DeviceSnapshot::default();
        assert!(!evaluate(&mut axis, &snapshot).active);

        snapshot.pointer.down = 0b11;
        let outcome = evaluate(&mut axis, &snapshot);
        assert!(outcome.active);
        assert!(axis.is_active());
        assert_eq!(outcome.warning, None);
    }

    #[test]
    fn test_pointer_release_edge() {
        let mut axis = throttle();
        axis.triggers.pointer_release = Some(0b10);
        let mut snapshot = DeviceSnapshot::default();
        snapshot.pointer.down = 0b01;
        assert!(!evaluate(&mut axis, &snapshot).active);

        snapshot.pointer.released = 0b10;
        assert!(evaluate(&mut axis, &snapshot).active);

        snapshot.clear_edges();
        assert!(!evaluate(&mut axis, &snapshot).active);
    }

    #[test]
    fn test_key_trigger_is_case_insensitive() {
        let mut axis = throttle();
        axis.triggers = TriggerSet {
            key: Some("lshift".to_string()),
            ..Default::default()
        };
        let mut snapshot = DeviceSnapshot::default();
        snapshot.set_key("LShift", true);
        assert!(evaluate(&mut axis, &snapshot).active);
        snapshot.set_key("LSHIFT", false);
        assert!(!evaluate(&mut axis, &snapshot).active);
    }

    #[test]
    fn test_missing_controller_warns_and_stays_inactive() {
        let mut axis = throttle();
        axis.triggers = TriggerSet {
            controller: Some(ControllerTrigger {
                controller: STICK,
                buttons: ButtonFilter::Mask(1),
            }),
            ..Default::default()
        };
        let mut snapshot = DeviceSnapshot::default();
        let outcome = evaluate(&mut axis, &snapshot);
        assert!(!outcome.active);
        assert!(outcome.warning.unwrap().contains("not installed"));

        snapshot.controllers.insert(
            STICK,
            ControllerStatus {
                name: "Pad".to_string(),
                connected: false,
                pressed: 1,
            },
        );
        let outcome = evaluate(&mut axis, &snapshot);
        assert!(!outcome.active);
        assert!(outcome.warning.unwrap().contains("unplugged"));

        if let Some(status) = snapshot.controllers.get_mut(&STICK) {
            status.connected = true;
        }
        let outcome = evaluate(&mut axis, &snapshot);
        assert!(outcome.active);
        assert_eq!(outcome.warning, None);
    }

    #[test]
    fn test_other_triggers_still_count_when_controller_missing() {
        let mut axis = throttle();
        axis.triggers.controller = Some(ControllerTrigger {
            controller: STICK,
            buttons: ButtonFilter::Mask(1),
        });
        let mut snapshot = DeviceSnapshot::default();
        snapshot.pointer.down = 1;
        let outcome = evaluate(&mut axis, &snapshot);
        assert!(outcome.active);
        assert!(outcome.warning.is_some());
    }

    #[test]
    fn test_joystick_button_trigger() {
        let mut axis = throttle();
        axis.triggers = TriggerSet {
            joystick_button: Some(5),
            ..Default::default()
        };
        let mut snapshot = DeviceSnapshot::default();
        snapshot.joystick_buttons = 1 << 4;
        assert!(!evaluate(&mut axis, &snapshot).active);
        snapshot.joystick_buttons |= 1 << 5;
        assert!(evaluate(&mut axis, &snapshot).active);
    }
}
