//! Spring-return towards the zero point while an axis is idle

use std::time::Instant;

use super::reconciler::{commit, PushRequest};
use super::{Axis, FLOAT_TOLERANCE};

/// Moves an idle self-centering axis one step back towards its zero point.
///
/// The step covers `scale * interval / decrease_over_time_seconds`, rounded onto the
/// increment grid but at least one increment, and never overshoots the zero point.
/// Offsets smaller than one increment count as centered.
pub fn decay(
    axis: &mut Axis,
    interval_seconds: f64,
    now: Instant,
    connected: bool,
) -> Option<PushRequest> {
    let period = axis.behavior.decrease_over_time_seconds;
    if axis.is_active
        || !(period > 0.0)
        || !(interval_seconds > 0.0)
        || axis.increment <= 0.0
        || axis.has_pending_change()
    {
        return None;
    }

    let distance = axis.base_value() - axis.zero_point();
    if distance.abs() + FLOAT_TOLERANCE < axis.increment {
        return None;
    }

    let increment = axis.increment;
    let reachable = axis.quantize(distance.abs());
    let rate_step = (axis.scale * interval_seconds / period / increment).round().max(1.0) * increment;
    let step = rate_step.min(reachable);
    if step <= 0.0 {
        return None;
    }

    axis.normalized_input = 0.0;
    axis.pending_change = -distance.signum() * step;
    commit(axis, connected, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::tests::throttle;

    #[test]
    fn test_decay_returns_towards_zero() {
        let mut axis = throttle();
        axis.behavior.decrease_over_time_seconds = 2.0;
        axis.value = 50.0;
        // 100 units in 2 seconds, a 0.1 s tick moves 5 units
        decay(&mut axis, 0.1, Instant::now(), false);
        assert!((axis.value() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_decay_does_not_overshoot() {
        let mut axis = throttle();
        axis.behavior.decrease_over_time_seconds = 0.5;
        axis.behavior.zero_point = 50.0;
        axis.value = 47.0;
        decay(&mut axis, 0.1, Instant::now(), false);
        assert!((axis.value() - 50.0).abs() < 1e-9);
        assert_eq!(decay(&mut axis, 0.1, Instant::now(), false), None);
        assert!((axis.value() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_decay_moves_at_least_one_increment() {
        let mut axis = throttle();
        axis.behavior.decrease_over_time_seconds = 1000.0;
        axis.value = 10.0;
        decay(&mut axis, 0.01, Instant::now(), false);
        assert!((axis.value() - 9.9).abs() < 1e-9);
    }

    #[test]
    fn test_active_axis_does_not_decay() {
        let mut axis = throttle();
        axis.behavior.decrease_over_time_seconds = 1.0;
        axis.value = 50.0;
        axis.is_active = true;
        assert_eq!(decay(&mut axis, 0.1, Instant::now(), false), None);
        assert_eq!(axis.value(), 50.0);
    }

    #[test]
    fn test_decay_without_period_is_disabled() {
        let mut axis = throttle();
        axis.value = 50.0;
        assert_eq!(decay(&mut axis, 0.1, Instant::now(), false), None);
        assert_eq!(axis.value(), 50.0);
    }

    #[test]
    fn test_connected_decay_issues_push() {
        let mut axis = throttle();
        axis.behavior.decrease_over_time_seconds = 2.0;
        axis.value = 50.0;
        let push = decay(&mut axis, 0.1, Instant::now(), true).unwrap();
        assert!((push.value - 45.0).abs() < 1e-9);
        assert_eq!(axis.value(), 50.0);
        // The next step builds on the in-flight target
        let push = decay(&mut axis, 0.1, Instant::now(), true).unwrap();
        assert!((push.value - 40.0).abs() < 1e-9);
    }
}
