//! Controller subsystem for gamepad input
//!
//! ```text
//! Gamepad ──► Collector thread ──► Folding task ──► watch<DeviceTable>
//!             (RawControllerEvent)               └► watch<StickPositions>
//! ```
//!
//! 1. [`event_collector`] - gilrs polling on a dedicated thread
//! 2. [`device_table`] - plain data the engine evaluates triggers against
//! 3. [`controller_handle`] - lifecycle and channel wiring

pub mod controller_handle;
pub mod device_table;
pub mod event_collector;

pub use controller_handle::{ControllerError, ControllerHandle, ControllerSettings};
pub use device_table::{
    ButtonType, ControllerId, ControllerStatus, DeviceTable, StickAxis, StickPositions, StickSide,
};
pub use event_collector::{CollectorError, RawControllerEvent};
