//! Ordered collection of all axes
//!
//! The registry is owned by the engine task. Indices handed out to the external
//! authority are positions in this collection; reports for indices that no longer
//! exist (after a reconfiguration) simply resolve to `None`.

use tracing::{debug, info};

use super::{Axis, AxisError, AxisView};

#[derive(Debug, Clone, Default)]
pub struct AxisRegistry {
    axes: Vec<Axis>,
    /// Incremented on every reconfiguration
    generation: u64,
    /// Joystick buttons last reported pressed by the external system
    joystick_buttons: u64,
}

impl AxisRegistry {
    pub fn new(axes: Vec<Axis>) -> Self {
        let mut registry = Self {
            axes: Vec::new(),
            generation: 0,
            joystick_buttons: 0,
        };
        registry.install(axes);
        registry
    }

    fn install(&mut self, mut axes: Vec<Axis>) {
        for (index, axis) in axes.iter_mut().enumerate() {
            axis.index = index;
        }
        self.axes = axes;
    }

    /// Swaps in a freshly configured set of axes.
    ///
    /// Commits in flight for the old set are not retracted; their echoes are merged
    /// into whatever axis now lives at that index, or dropped if the index is gone.
    pub fn replace_all(&mut self, axes: Vec<Axis>) {
        self.generation += 1;
        info!(
            "Reconfiguring axis registry: {} -> {} axes (generation {})",
            self.axes.len(),
            axes.len(),
            self.generation
        );
        self.install(axes);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn joystick_buttons(&self) -> u64 {
        self.joystick_buttons
    }

    pub fn set_joystick_buttons(&mut self, mask: u64) {
        if mask != self.joystick_buttons {
            debug!("Joystick buttons changed: {:#x} -> {:#x}", self.joystick_buttons, mask);
            self.joystick_buttons = mask;
        }
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Axis> {
        self.axes.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Axis> {
        self.axes.get_mut(index)
    }

    pub fn try_get_mut(&mut self, index: usize) -> Result<&mut Axis, AxisError> {
        self.axes.get_mut(index).ok_or(AxisError::UnknownAxis(index))
    }

    pub fn find(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|axis| axis.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Axis> {
        self.axes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Axis> {
        self.axes.iter_mut()
    }

    pub fn check_invariants(&self) -> Result<(), AxisError> {
        self.axes.iter().try_for_each(Axis::check_invariants)
    }

    pub fn views(&self, idle: (u8, u8, u8), active: (u8, u8, u8)) -> Vec<AxisView> {
        self.axes.iter().map(|axis| axis.view(idle, active)).collect()
    }
}
