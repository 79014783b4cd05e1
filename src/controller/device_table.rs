//! Live view of every controller seen during this session
//!
//! The table is plain data so the engine can evaluate triggers against it without
//! touching gilrs. It is rebuilt by folding [`RawControllerEvent`]s.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::event_collector::RawControllerEvent;

/// USB identity of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl ControllerId {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Parses `vvvv:pppp` in hexadecimal
    pub fn parse(text: &str) -> Option<Self> {
        let (vendor, product) = text.trim().split_once(':')?;
        let vendor_id = u16::from_str_radix(vendor.trim().trim_start_matches("0x"), 16).ok()?;
        let product_id = u16::from_str_radix(product.trim().trim_start_matches("0x"), 16).ok()?;
        Some(Self::new(vendor_id, product_id))
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub name: String,
    pub connected: bool,
    /// Bitmask of [`ButtonType::bit`] values currently held
    pub pressed: u32,
}

// Button type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonType {
    A,
    B,
    X,
    Y,
    Start,
    Select,
    LeftBumper,
    RightBumper,
    LeftStick,
    RightStick,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    Guide,
}

impl ButtonType {
    pub const ALL: [ButtonType; 15] = [
        ButtonType::A,
        ButtonType::B,
        ButtonType::X,
        ButtonType::Y,
        ButtonType::Start,
        ButtonType::Select,
        ButtonType::LeftBumper,
        ButtonType::RightBumper,
        ButtonType::LeftStick,
        ButtonType::RightStick,
        ButtonType::DPadUp,
        ButtonType::DPadDown,
        ButtonType::DPadLeft,
        ButtonType::DPadRight,
        ButtonType::Guide,
    ];

    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }

    /// Case-insensitive lookup, accepts the variant name or a common alias
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase().replace(['_', '-', ' '], "");
        let button = match name.as_str() {
            "a" | "south" => ButtonType::A,
            "b" | "east" => ButtonType::B,
            "x" | "north" => ButtonType::X,
            "y" | "west" => ButtonType::Y,
            "start" => ButtonType::Start,
            "select" | "back" => ButtonType::Select,
            "leftbumper" | "lb" => ButtonType::LeftBumper,
            "rightbumper" | "rb" => ButtonType::RightBumper,
            "leftstick" | "ls" => ButtonType::LeftStick,
            "rightstick" | "rs" => ButtonType::RightStick,
            "dpadup" | "up" => ButtonType::DPadUp,
            "dpaddown" | "down" => ButtonType::DPadDown,
            "dpadleft" | "left" => ButtonType::DPadLeft,
            "dpadright" | "right" => ButtonType::DPadRight,
            "guide" | "mode" => ButtonType::Guide,
            _ => return None,
        };
        Some(button)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickSide {
    Left,
    Right,
}

/// Single stick component usable as a trim or movement source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickAxis {
    LeftX,
    LeftY,
    RightX,
    RightY,
}

impl StickAxis {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "left_x" => Some(StickAxis::LeftX),
            "left_y" => Some(StickAxis::LeftY),
            "right_x" => Some(StickAxis::RightX),
            "right_y" => Some(StickAxis::RightY),
            _ => None,
        }
    }
}

/// Last deadzone-corrected stick positions, each component in `[-1, 1]`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StickPositions {
    pub left: (f64, f64),
    pub right: (f64, f64),
}

impl StickPositions {
    pub fn update(&mut self, side: StickSide, x: f64, y: f64) {
        match side {
            StickSide::Left => self.left = (x, y),
            StickSide::Right => self.right = (x, y),
        }
    }

    pub fn get(&self, axis: StickAxis) -> f64 {
        match axis {
            StickAxis::LeftX => self.left.0,
            StickAxis::LeftY => self.left.1,
            StickAxis::RightX => self.right.0,
            StickAxis::RightY => self.right.1,
        }
    }

    pub fn side(&self, side: StickSide) -> (f64, f64) {
        match side {
            StickSide::Left => self.left,
            StickSide::Right => self.right,
        }
    }
}

/// Controllers keyed by identity. A controller stays "installed" once seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceTable {
    controllers: HashMap<ControllerId, ControllerStatus>,
}

impl DeviceTable {
    pub fn get(&self, id: &ControllerId) -> Option<&ControllerStatus> {
        self.controllers.get(id)
    }

    pub fn get_mut(&mut self, id: &ControllerId) -> Option<&mut ControllerStatus> {
        self.controllers.get_mut(id)
    }

    pub fn insert(&mut self, id: ControllerId, status: ControllerStatus) {
        self.controllers.insert(id, status);
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ControllerId, &ControllerStatus)> {
        self.controllers.iter()
    }

    /// Folds one raw event into the table. Returns true if the table changed.
    pub fn apply(&mut self, event: &RawControllerEvent) -> bool {
        match event {
            RawControllerEvent::Connected { controller, name, .. } => {
                info!("Controller {} '{}' connected", controller, name);
                let status = self
                    .controllers
                    .entry(*controller)
                    .or_insert_with(|| ControllerStatus {
                        name: name.clone(),
                        connected: false,
                        pressed: 0,
                    });
                status.name = name.clone();
                status.connected = true;
                status.pressed = 0;
                true
            }
            RawControllerEvent::Disconnected { controller, .. } => match self.controllers.get_mut(controller) {
                Some(status) => {
                    warn!("Controller {} '{}' unplugged", controller, status.name);
                    status.connected = false;
                    status.pressed = 0;
                    true
                }
                None => {
                    debug!("Disconnect for unknown controller {}", controller);
                    false
                }
            },
            RawControllerEvent::Button {
                controller,
                button,
                pressed,
                ..
            } => match self.controllers.get_mut(controller) {
                Some(status) => {
                    let before = status.pressed;
                    if *pressed {
                        status.pressed |= button.bit();
                    } else {
                        status.pressed &= !button.bit();
                    }
                    before != status.pressed
                }
                None => {
                    debug!("Button event for unknown controller {}", controller);
                    false
                }
            },
            RawControllerEvent::Stick { .. } => false,
        }
    }
}
