//! Movement shaping
//!
//! Converts a 2-D movement vector into the one-dimensional normalized input of an
//! axis. Only the dominant movement component is used, so one gesture never drives
//! two orthogonally mapped axes at once.
//!
//! # Detent zones
//!
//! ```text
//!  min      neg detent          zero          pos detent      max
//!   |  range  |~band~|    free    |    free    |~band~|  range  |
//!   | friction|      |            |            |      | friction|
//! ```
//!
//! Inside a band the detent friction applies and the detent-direction gesture may
//! replace the primary one. The negative boundary substitutes whenever the primary
//! gesture does not move back inward, the positive boundary only when the primary
//! gesture is exactly zero.

use serde::{Deserialize, Serialize};

use super::Axis;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Keeps only the larger component, ties keep the vertical one
    pub fn dominant(self) -> Self {
        if self.x.abs() > self.y.abs() {
            Self::new(self.x, 0.0)
        } else {
            Self::new(0.0, self.y)
        }
    }

    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

/// Tuning shared by all axes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaperSettings {
    /// Movement units that sweep the full range at sensitivity 1
    pub global_sensitivity_scale: f64,
    /// Divider applied beyond a detent
    pub range_friction: f64,
    /// Divider applied inside the band around a detent
    pub detent_friction: f64,
    /// Half-width of the band around a detent, as a fraction of the range
    pub detent_width: f64,
}

impl Default for ShaperSettings {
    fn default() -> Self {
        Self {
            global_sensitivity_scale: 500.0,
            range_friction: 4.0,
            detent_friction: 10.0,
            detent_width: 0.02,
        }
    }
}

/// Friction zone the axis currently sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Free,
    /// Within the band of the negative detent; `crossed` if already below it
    NearNegative { crossed: bool },
    /// Within the band of the positive detent; `crossed` if already above it
    NearPositive { crossed: bool },
    Beyond,
}

pub fn classify(axis: &Axis, settings: &ShaperSettings) -> Zone {
    let detents = axis.behavior.detents;
    if detents.is_disabled() {
        return Zone::Free;
    }
    let zero = axis.zero_point();
    let offset = axis.base_value() + axis.pending_change - zero;
    let negative_threshold = (axis.range.min - zero) * detents.negative;
    let positive_threshold = (axis.range.max - zero) * detents.positive;
    let width = axis.scale * settings.detent_width;

    let below = detents.negative_enabled() && offset < negative_threshold;
    let above = detents.positive_enabled() && offset > positive_threshold;
    let close_negative =
        detents.negative_enabled() && (offset - negative_threshold).abs() < width;
    let close_positive =
        detents.positive_enabled() && (offset - positive_threshold).abs() < width;

    if close_negative {
        Zone::NearNegative { crossed: below }
    } else if close_positive {
        Zone::NearPositive { crossed: above }
    } else if below || above {
        Zone::Beyond
    } else {
        Zone::Free
    }
}

/// Raw contribution of `movement` before sensitivity scaling
pub fn contribution(axis: &Axis, movement: Vector2, settings: &ShaperSettings) -> f64 {
    let movement = movement.dominant();
    let directions = axis.directions;
    let primary = directions.primary.project(movement);
    let with_secondary = || {
        if primary != 0.0 {
            return primary;
        }
        directions
            .secondary()
            .map(|secondary| secondary.project(movement))
            .unwrap_or(0.0)
    };
    let detent_projection = directions
        .detent
        .map(|detent| detent.project(movement))
        .unwrap_or(0.0);
    let detent_friction = settings.detent_friction.max(1.0);
    let range_friction = settings.range_friction.max(1.0);

    let raw = match classify(axis, settings) {
        Zone::Free => with_secondary(),
        Zone::NearNegative { crossed } => {
            let change = if !crossed && primary <= 0.0 {
                -detent_projection
            } else {
                primary
            };
            change / detent_friction
        }
        Zone::NearPositive { crossed } => {
            let change = if !crossed && primary == 0.0 {
                detent_projection
            } else {
                primary
            };
            change / detent_friction
        }
        Zone::Beyond => primary / range_friction,
    };

    if raw.is_finite() {
        raw
    } else {
        0.0
    }
}

/// Accumulates `movement` into the normalized input of `axis`
pub fn shape(axis: &mut Axis, movement: Vector2, settings: &ShaperSettings) {
    let raw = contribution(axis, movement, settings);
    if raw == 0.0 {
        return;
    }
    let global_scale = if settings.global_sensitivity_scale > 0.0 {
        settings.global_sensitivity_scale
    } else {
        ShaperSettings::default().global_sensitivity_scale
    };
    let delta = raw * axis.effective_sensitivity() / global_scale;
    if !delta.is_finite() || delta == 0.0 {
        return;
    }
    axis.set_normalized_input(axis.normalized_input + delta);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::tests::throttle;
    use crate::axis::{Detents, Direction, Directions};
    use proptest::prelude::*;

    fn settings() -> ShaperSettings {
        ShaperSettings::default()
    }

    #[test]
    fn test_dominant_component_wins() {
        assert_eq!(Vector2::new(3.0, -1.0).dominant(), Vector2::new(3.0, 0.0));
        assert_eq!(Vector2::new(1.0, -3.0).dominant(), Vector2::new(0.0, -3.0));
        assert_eq!(Vector2::new(2.0, 2.0).dominant(), Vector2::new(0.0, 2.0));
    }

    #[test]
    fn test_push_increases_value() {
        let mut axis = throttle();
        shape(&mut axis, Vector2::new(0.0, -50.0), &settings());
        assert!((axis.normalized_input() - 0.1).abs() < 1e-12);
        assert!((axis.pending_change() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_orthogonal_movement_ignored_without_secondary() {
        let mut axis = throttle();
        shape(&mut axis, Vector2::new(40.0, 0.0), &settings());
        assert_eq!(axis.normalized_input(), 0.0);
    }

    #[test]
    fn test_secondary_used_when_primary_is_zero() {
        let mut axis = throttle();
        axis.directions = Directions::new(Direction::Push, Some(Direction::Right), None);
        shape(&mut axis, Vector2::new(50.0, 0.0), &settings());
        assert!((axis.pending_change() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_axis_ignores_movement() {
        let mut axis = throttle();
        axis.is_enabled = false;
        shape(&mut axis, Vector2::new(0.0, -50.0), &settings());
        assert_eq!(axis.pending_change(), 0.0);
    }

    #[test]
    fn test_nan_movement_is_zero() {
        let mut axis = throttle();
        shape(&mut axis, Vector2::new(0.0, f64::NAN), &settings());
        assert_eq!(axis.normalized_input(), 0.0);
    }

    #[test]
    fn test_friction_below_negative_detent() {
        // zero at 50, negative detent at 80% of the lower half: threshold at 10
        let mut axis = throttle();
        axis.behavior.zero_point = 50.0;
        axis.behavior.detents = Detents::from_percent(80.0, 100.0);
        let movement = Vector2::new(0.0, 5.0);

        axis.value = 40.0;
        assert_eq!(classify(&axis, &settings()), Zone::Free);
        let free = contribution(&axis, movement, &settings()).abs();

        axis.value = 4.0;
        assert_eq!(classify(&axis, &settings()), Zone::Beyond);
        let resisted = contribution(&axis, movement, &settings()).abs();

        assert!(resisted > 0.0);
        assert!(resisted < free);
    }

    #[test]
    fn test_friction_above_positive_detent() {
        let mut axis = throttle();
        axis.behavior.detents = Detents::from_percent(100.0, 80.0);
        let movement = Vector2::new(0.0, -5.0);

        axis.value = 50.0;
        shape(&mut axis, movement, &settings());
        let free = axis.normalized_input();

        axis.discard_pending();
        axis.value = 90.0;
        shape(&mut axis, movement, &settings());
        let resisted = axis.normalized_input();

        assert!(resisted > 0.0);
        assert!(resisted < free);
    }

    #[test]
    fn test_negative_detent_needs_detent_gesture() {
        let mut axis = throttle();
        axis.behavior.zero_point = 50.0;
        axis.behavior.detents = Detents::from_percent(80.0, 100.0);
        axis.directions = Directions::new(Direction::Push, None, Some(Direction::Left));
        axis.value = 10.5;
        assert_eq!(classify(&axis, &settings()), Zone::NearNegative { crossed: false });

        // Pulling towards the detent is replaced by the (absent) detent gesture
        assert_eq!(contribution(&axis, Vector2::new(0.0, 10.0), &settings()), 0.0);
        // Moving left walks through the detent
        let through = contribution(&axis, Vector2::new(-10.0, 0.0), &settings());
        assert!(through < 0.0);
        // Pushing away from the detent is only resisted
        let away = contribution(&axis, Vector2::new(0.0, -10.0), &settings());
        assert!((away - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_positive_detent_substitutes_only_for_zero_primary() {
        let mut axis = throttle();
        axis.behavior.detents = Detents::from_percent(100.0, 80.0);
        axis.directions = Directions::new(Direction::Push, None, Some(Direction::Right));
        axis.value = 79.5;
        assert_eq!(classify(&axis, &settings()), Zone::NearPositive { crossed: false });

        let primary = contribution(&axis, Vector2::new(0.0, -10.0), &settings());
        assert!((primary - 1.0).abs() < 1e-12);
        let detent = contribution(&axis, Vector2::new(10.0, 0.0), &settings());
        assert!((detent - 1.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_no_detent_is_linear(distance in 0.0f64..200.0) {
            let mut single = throttle();
            shape(&mut single, Vector2::new(0.0, -distance), &settings());
            let mut double = throttle();
            shape(&mut double, Vector2::new(0.0, -2.0 * distance), &settings());
            let expected = (2.0 * single.normalized_input()).min(1.0);
            prop_assert!((double.normalized_input() - expected).abs() < 1e-9);
            prop_assert!(double.pending_change() >= single.pending_change());
        }

        #[test]
        fn prop_shaping_preserves_invariants(
            start in 0.0f64..=100.0,
            moves in proptest::collection::vec((-300.0f64..300.0, -300.0f64..300.0), 1..30),
            negative in 50.0f64..=100.0,
            positive in 50.0f64..=100.0,
        ) {
            let mut axis = throttle();
            axis.value = start;
            axis.behavior.zero_point = 50.0;
            axis.behavior.detents = Detents::from_percent(negative, positive);
            axis.directions = Directions::new(Direction::Push, Some(Direction::Right), Some(Direction::Left));
            for (x, y) in moves {
                shape(&mut axis, Vector2::new(x, y), &settings());
                prop_assert!(axis.check_invariants().is_ok(), "{:?}", axis.check_invariants());
            }
        }
    }
}
