//! Axis value model and reconciliation core
//!
//! An [`Axis`] is a bounded numeric quantity that local input gestures push around
//! while an external authority keeps the final say over its value. The per-tick
//! pipeline is split over the submodules:
//!
//! 1. [`trigger`] - decides whether the axis accepts input this tick
//! 2. [`shaper`] - turns 2-D movement into a quantized pending change
//! 3. [`reconciler`] - commits pending changes and merges external echoes
//! 4. [`decay`] - spring-return towards the zero point while idle
//! 5. [`registry`] - ordered collection of all axes
//!
//! # Data flow
//!
//! ```text
//! DeviceSnapshot ──► Trigger ──► Shaper ──► Reconciler ──► PushRequest
//!                                              ▲
//!                          Echo / Bounds ──────┘
//! ```
//!
//! All mutation happens on a single task; nothing in here is shared across threads.

pub mod decay;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod shaper;
pub mod trigger;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::controller::device_table::StickAxis;

pub use error::AxisError;
pub use reconciler::{MergeOutcome, PushRequest, ReconcileState};
pub use registry::AxisRegistry;
pub use shaper::{ShaperSettings, Vector2};
pub use trigger::{
    ButtonFilter, ControllerTrigger, DeviceSnapshot, PointerState, TriggerOutcome, TriggerSet,
};

/// Tolerance used when comparing quantized floating point values
pub const FLOAT_TOLERANCE: f64 = 1e-9;

/// Category of the controlled quantity, decides the smallest meaningful step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    #[default]
    Continuous,
    Boolean,
    Count,
}

/// Gesture direction that increases the axis value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Moving away from the user (screen up)
    Push,
    /// Moving towards the user (screen down)
    Pull,
    Left,
    Right,
}

impl Direction {
    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::Push | Direction::Pull)
    }

    pub fn is_orthogonal_to(self, other: Direction) -> bool {
        self.is_vertical() != other.is_vertical()
    }

    /// Signed component of `movement` along this direction.
    ///
    /// Screen coordinates grow downwards, so a push is a negative `y`.
    pub fn project(self, movement: Vector2) -> f64 {
        match self {
            Direction::Push => -movement.y,
            Direction::Pull => movement.y,
            Direction::Left => -movement.x,
            Direction::Right => movement.x,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "push" | "up" | "forward" => Some(Direction::Push),
            "pull" | "down" | "backward" => Some(Direction::Pull),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => write!(f, "push"),
            Direction::Pull => write!(f, "pull"),
            Direction::Left => write!(f, "left"),
            Direction::Right => write!(f, "right"),
        }
    }
}

/// Direction assignment of an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directions {
    pub primary: Direction,
    secondary: Option<Direction>,
    /// Gesture that walks the value through a detent
    pub detent: Option<Direction>,
}

impl Directions {
    pub fn new(primary: Direction, secondary: Option<Direction>, detent: Option<Direction>) -> Self {
        Self {
            primary,
            secondary,
            detent,
        }
    }

    /// Secondary direction, only if it is orthogonal to the primary one
    pub fn secondary(&self) -> Option<Direction> {
        self.secondary
            .filter(|secondary| secondary.is_orthogonal_to(self.primary))
    }
}

impl Default for Directions {
    fn default() -> Self {
        Self::new(Direction::Push, None, None)
    }
}

/// Detent thresholds as fractions of the half-range on each side of the zero point.
/// `1.0` disables the detent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detents {
    pub negative: f64,
    pub positive: f64,
}

impl Detents {
    pub fn from_percent(negative_pct: f64, positive_pct: f64) -> Self {
        Self {
            negative: (negative_pct / 100.0).clamp(0.0, 1.0),
            positive: (positive_pct / 100.0).clamp(0.0, 1.0),
        }
    }

    pub fn negative_enabled(&self) -> bool {
        self.negative < 1.0
    }

    pub fn positive_enabled(&self) -> bool {
        self.positive < 1.0
    }

    pub fn is_disabled(&self) -> bool {
        !self.negative_enabled() && !self.positive_enabled()
    }
}

impl Default for Detents {
    fn default() -> Self {
        Self {
            negative: 1.0,
            positive: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub fn new(min: f64, max: f64) -> Result<Self, AxisError> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(AxisError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Behaviour-shaping parameters, each independently configurable
#[derive(Debug, Clone, PartialEq)]
pub struct AxisBehavior {
    /// Factor on shaped movement, `0` freezes local input
    pub sensitivity: f64,
    /// Commit on trigger release instead of every tick
    pub wait_for_release: bool,
    /// Stick component whose centered position drives this axis as a trim wheel
    pub trim_source: Option<StickAxis>,
    /// Seconds for a full-scale return to the zero point, `0` disables decay
    pub decrease_over_time_seconds: f64,
    /// Cap for externally sourced drift, `None` applies drift unlimited
    pub allowed_external_change_per_second: Option<f64>,
    /// Rest position for decay and detents
    pub zero_point: f64,
    /// Friction zones around the zero point
    pub detents: Detents,
    /// Number of steps across the range for continuous axes
    pub resolution: u32,
}

impl Default for AxisBehavior {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            wait_for_release: true,
            trim_source: None,
            decrease_over_time_seconds: 0.0,
            allowed_external_change_per_second: None,
            zero_point: 0.0,
            detents: Detents::default(),
            resolution: 1000,
        }
    }
}

/// Read-only projection of an axis for observers
#[derive(Debug, Clone, PartialEq)]
pub struct AxisView {
    pub index: usize,
    pub name: String,
    /// Authoritative value
    pub value: f64,
    /// Uncommitted local change, quantized
    pub pending_change: f64,
    /// Gesture strength in `[0, 1]`
    pub intensity: f64,
    /// Idle colour blended towards the active colour by intensity
    pub color: (u8, u8, u8),
    /// Trigger held this tick
    pub active: bool,
    /// Device availability warning of the last trigger evaluation
    pub warning: Option<String>,
    pub updated_at: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct Axis {
    pub(crate) name: String,
    /// Position in the registry, also the authority's axis id
    pub(crate) index: usize,
    pub(crate) range: AxisRange,
    pub(crate) unit_kind: UnitKind,
    pub(crate) behavior: AxisBehavior,
    pub(crate) directions: Directions,
    pub(crate) triggers: TriggerSet,

    /// Cleared when the authority does not offer this axis
    pub is_available: bool,
    /// User switch, a disabled axis ignores local input
    pub is_enabled: bool,

    // Derived from range and unit kind, see `refresh_derived`
    pub(crate) scale: f64,
    pub(crate) increment: f64,

    /// Last value accepted from the authority, or committed locally while offline
    pub(crate) value: f64,
    /// `normalized_input * scale`, quantized to `increment`
    pub(crate) pending_change: f64,
    /// Accumulated gesture in `[-1, 1]` of the scale
    pub(crate) normalized_input: f64,
    pub(crate) is_active: bool,
    pub(crate) state: ReconcileState,

    /// First authority report has been taken over
    pub(crate) synced: bool,
    /// Time of the last report, for the drift allowance
    pub(crate) last_external_event: Option<Instant>,
    /// Previous trim source position, `None` until the first sample
    pub(crate) trim_position: Option<f64>,
    pub(crate) next_seq: u64,
    pub(crate) warning: Option<String>,
}

impl Axis {
    pub fn new(
        name: impl Into<String>,
        range: AxisRange,
        unit_kind: UnitKind,
        behavior: AxisBehavior,
        directions: Directions,
        triggers: TriggerSet,
    ) -> Self {
        let mut axis = Self {
            name: name.into(),
            index: 0,
            range,
            unit_kind,
            value: range.clamp(behavior.zero_point),
            behavior,
            directions,
            triggers,
            is_available: true,
            is_enabled: true,
            scale: 0.0,
            increment: 0.0,
            pending_change: 0.0,
            normalized_input: 0.0,
            is_active: false,
            state: ReconcileState::Idle,
            synced: false,
            last_external_event: None,
            trim_position: None,
            next_seq: 1,
            warning: None,
        };
        axis.refresh_derived();
        axis
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn range(&self) -> AxisRange {
        self.range
    }

    pub fn unit_kind(&self) -> UnitKind {
        self.unit_kind
    }

    pub fn behavior(&self) -> &AxisBehavior {
        &self.behavior
    }

    pub fn directions(&self) -> &Directions {
        &self.directions
    }

    pub fn triggers(&self) -> &TriggerSet {
        &self.triggers
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn increment(&self) -> f64 {
        self.increment
    }

    /// Last known authoritative value
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn pending_change(&self) -> f64 {
        self.pending_change
    }

    pub fn normalized_input(&self) -> f64 {
        self.normalized_input
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn state(&self) -> ReconcileState {
        self.state
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn has_pending_change(&self) -> bool {
        self.pending_change.abs() > FLOAT_TOLERANCE
    }

    /// Value that local changes are applied on top of.
    ///
    /// While a push awaits its echo this is the pushed target, otherwise the
    /// authoritative value.
    pub fn base_value(&self) -> f64 {
        match self.state {
            ReconcileState::CommitPending { target, .. } => target,
            _ => self.value,
        }
    }

    /// Zero point clamped into the current range
    pub fn zero_point(&self) -> f64 {
        self.range.clamp(self.behavior.zero_point)
    }

    pub fn effective_sensitivity(&self) -> f64 {
        if self.is_enabled && self.is_available {
            self.behavior.sensitivity
        } else {
            0.0
        }
    }

    /// Recomputes `scale` and `increment` from range and unit kind, then re-clamps
    /// value, in-flight target and pending change. Idempotent.
    pub fn refresh_derived(&mut self) {
        let scale = self.range.max - self.range.min;
        self.scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            0.0
        };
        self.increment = match self.unit_kind {
            UnitKind::Boolean | UnitKind::Count => 1.0,
            UnitKind::Continuous if self.scale > 0.0 => {
                self.scale / f64::from(self.behavior.resolution.max(1))
            }
            UnitKind::Continuous => 0.0,
        };

        self.value = self.clamp(self.value);
        if let ReconcileState::CommitPending { seq, target, issued_at } = self.state {
            self.state = ReconcileState::CommitPending {
                seq,
                target: self.clamp(target),
                issued_at,
            };
        }
        self.set_normalized_input(self.normalized_input);
    }

    /// Clamps into range, a NaN keeps the current value
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.range.clamp(self.value);
        }
        self.range.clamp(value)
    }

    /// Truncates towards zero onto a multiple of the increment
    pub fn quantize(&self, amount: f64) -> f64 {
        if self.increment <= 0.0 || !amount.is_finite() {
            return 0.0;
        }
        let steps = amount / self.increment;
        let rounded = steps.round();
        let steps = if (steps - rounded).abs() < 1e-6 {
            rounded
        } else {
            steps.trunc()
        };
        // Normalizes -0.0
        steps * self.increment + 0.0
    }

    /// Normalized headroom `(lower, upper)` left between the base value and the range
    /// bounds, both capped to the unit interval.
    pub fn headroom(&self) -> (f64, f64) {
        if self.scale <= 0.0 {
            return (0.0, 0.0);
        }
        let base = self.base_value();
        let lower = ((self.range.min - base) / self.scale).clamp(-1.0, 0.0);
        let upper = ((self.range.max - base) / self.scale).clamp(0.0, 1.0);
        (lower, upper)
    }

    /// Stores accumulated input and recomputes the quantized pending change
    pub(crate) fn set_normalized_input(&mut self, normalized: f64) {
        if self.scale <= 0.0 || !normalized.is_finite() {
            self.normalized_input = 0.0;
            self.pending_change = 0.0;
            self.refresh_state();
            return;
        }
        let (lower, upper) = self.headroom();
        self.normalized_input = normalized.clamp(lower, upper);
        self.pending_change = self.quantize(self.normalized_input * self.scale);
        self.refresh_state();
    }

    /// Drops accumulated input without committing it
    pub(crate) fn discard_pending(&mut self) {
        self.normalized_input = 0.0;
        self.pending_change = 0.0;
        self.refresh_state();
    }

    pub(crate) fn refresh_state(&mut self) {
        if matches!(self.state, ReconcileState::CommitPending { .. }) {
            return;
        }
        self.state = if self.has_pending_change() || self.normalized_input != 0.0 {
            ReconcileState::Accumulating
        } else {
            ReconcileState::Idle
        };
    }

    /// Applies a bounds update reported by the external authority
    pub fn apply_bounds(&mut self, min: Option<f64>, max: Option<f64>) -> Result<(), AxisError> {
        let min = min.unwrap_or(self.range.min);
        let max = max.unwrap_or(self.range.max);
        let range = AxisRange::new(min, max).map_err(|_| AxisError::CrossingBounds {
            axis: self.name.clone(),
            min,
            max,
        })?;
        self.range = range;
        self.refresh_derived();
        Ok(())
    }

    /// Display intensity, saturating at one third of full-scale input
    pub fn intensity(&self) -> f64 {
        (self.normalized_input.abs() * 3.0).min(1.0)
    }

    pub fn display_color(&self, idle: (u8, u8, u8), active: (u8, u8, u8)) -> (u8, u8, u8) {
        let t = self.intensity();
        let mix = |a: u8, b: u8| -> u8 {
            (f64::from(a) + (f64::from(b) - f64::from(a)) * t)
                .round()
                .clamp(0.0, 255.0) as u8
        };
        (
            mix(idle.0, active.0),
            mix(idle.1, active.1),
            mix(idle.2, active.2),
        )
    }

    pub fn view(&self, idle: (u8, u8, u8), active: (u8, u8, u8)) -> AxisView {
        AxisView {
            index: self.index,
            name: self.name.clone(),
            value: self.value,
            pending_change: self.pending_change,
            intensity: self.intensity(),
            color: self.display_color(idle, active),
            active: self.is_active,
            warning: self.warning.clone(),
            updated_at: Local::now(),
        }
    }

    /// Verifies the numeric invariants that must hold after every operation
    pub fn check_invariants(&self) -> Result<(), AxisError> {
        let violation = |detail: String| AxisError::InvariantViolation {
            axis: self.name.clone(),
            detail,
        };
        let AxisRange { min, max } = self.range;
        if min > max {
            return Err(violation(format!("min {} above max {}", min, max)));
        }
        if !(min - FLOAT_TOLERANCE..=max + FLOAT_TOLERANCE).contains(&self.value) {
            return Err(violation(format!(
                "value {} outside [{}, {}]",
                self.value, min, max
            )));
        }
        let projected = self.base_value() + self.pending_change;
        let slack = 1e-6 * self.scale.max(1.0);
        if projected < min - slack || projected > max + slack {
            return Err(violation(format!(
                "base + pending {} outside [{}, {}]",
                projected, min, max
            )));
        }
        if self.increment > 0.0 {
            let steps = self.pending_change / self.increment;
            if (steps - steps.round()).abs() > 1e-6 {
                return Err(violation(format!(
                    "pending change {} is not a multiple of {}",
                    self.pending_change, self.increment
                )));
            }
        }
        if !(-1.0..=1.0).contains(&self.normalized_input) {
            return Err(violation(format!(
                "normalized input {} outside [-1, 1]",
                self.normalized_input
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn throttle() -> Axis {
        Axis::new(
            "throttle",
            AxisRange::new(0.0, 100.0).unwrap(),
            UnitKind::Continuous,
            AxisBehavior::default(),
            Directions::default(),
            TriggerSet::pointer(ButtonFilter::Mask(1)),
        )
    }

    #[test]
    fn test_increment_follows_unit_kind() {
        let axis = throttle();
        assert_eq!(axis.scale(), 100.0);
        assert!((axis.increment() - 0.1).abs() < 1e-12);

        let flaps = Axis::new(
            "flaps",
            AxisRange::new(0.0, 4.0).unwrap(),
            UnitKind::Count,
            AxisBehavior::default(),
            Directions::default(),
            TriggerSet::default(),
        );
        assert_eq!(flaps.increment(), 1.0);
    }

    #[test]
    fn test_range_rejects_crossing_bounds() {
        assert!(AxisRange::new(5.0, 1.0).is_err());
        assert!(AxisRange::new(f64::NAN, 1.0).is_err());
        assert!(AxisRange::new(1.0, 1.0).is_ok());
    }

    #[test]
    fn test_quantize_truncates_towards_zero() {
        let axis = throttle();
        assert!((axis.quantize(6.0) - 6.0).abs() < 1e-9);
        assert!((axis.quantize(0.26) - 0.2).abs() < 1e-9);
        assert!((axis.quantize(-0.26) + 0.2).abs() < 1e-9);
        assert_eq!(axis.quantize(0.05), 0.0);
        assert_eq!(axis.quantize(f64::NAN), 0.0);
    }

    #[test]
    fn test_secondary_direction_must_be_orthogonal() {
        let parallel = Directions::new(Direction::Push, Some(Direction::Pull), None);
        assert_eq!(parallel.secondary(), None);
        let orthogonal = Directions::new(Direction::Push, Some(Direction::Right), None);
        assert_eq!(orthogonal.secondary(), Some(Direction::Right));
    }

    #[test]
    fn test_normalized_input_respects_headroom() {
        let mut axis = throttle();
        axis.value = 90.0;
        axis.set_normalized_input(0.5);
        assert!((axis.normalized_input() - 0.1).abs() < 1e-12);
        assert!((axis.pending_change() - 10.0).abs() < 1e-9);
        axis.check_invariants().unwrap();
    }

    #[test]
    fn test_apply_bounds_reclamps_value() {
        let mut axis = throttle();
        axis.value = 80.0;
        axis.apply_bounds(None, Some(50.0)).unwrap();
        assert_eq!(axis.value(), 50.0);
        assert!((axis.increment() - 0.05).abs() < 1e-12);
        assert!(axis.apply_bounds(Some(60.0), None).is_err());
        assert_eq!(axis.range().min, 0.0);
        axis.check_invariants().unwrap();
    }

    #[test]
    fn test_intensity_saturates_at_one_third() {
        let mut axis = throttle();
        axis.set_normalized_input(0.1);
        assert!((axis.intensity() - 0.3).abs() < 1e-9);
        axis.set_normalized_input(0.5);
        assert_eq!(axis.intensity(), 1.0);
        assert_eq!(axis.display_color((0, 0, 0), (255, 100, 0)), (255, 100, 0));
    }

    #[test]
    fn test_disabled_axis_has_zero_sensitivity() {
        let mut axis = throttle();
        axis.is_enabled = false;
        assert_eq!(axis.effective_sensitivity(), 0.0);
        axis.is_enabled = true;
        axis.is_available = false;
        assert_eq!(axis.effective_sensitivity(), 0.0);
    }
}
