//! Value reconciliation between local gestures and the external authority
//!
//! Every axis moves through three states:
//!
//! ```text
//!            movement                 commit (connected)
//!   Idle ───────────────► Accumulating ─────────────────► CommitPending
//!    ▲                        │  commit (offline)               │
//!    └────────────────────────┴─────────────── own echo ────────┘
//! ```
//!
//! Echoes are merged idempotently. A report matching the in-flight target closes the
//! commit; anything else is external drift and goes through the rate limiter. There is
//! no cancellation channel to the authority, so stale and duplicate echoes must be
//! harmless: they only nudge the value towards what the authority last said.

use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Axis, FLOAT_TOLERANCE};

/// Longest gap between external events that counts towards the drift allowance
pub const MAX_EXTERNAL_INTERVAL_SECS: f64 = 0.1;

/// An in-flight commit without matching echo is abandoned after this long
pub const COMMIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ReconcileState {
    /// No local change, value follows the authority
    #[default]
    Idle,
    /// Gesture in progress, nothing sent yet
    Accumulating,
    /// Push sent, waiting for the matching echo
    CommitPending {
        seq: u64,
        /// Value requested from the authority
        target: f64,
        issued_at: Instant,
    },
}

/// Request for the external authority to take over a new value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PushRequest {
    pub index: usize,
    pub value: f64,
    /// Monotonic per axis, for diagnostics only
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MergeOutcome {
    /// Report differed from the authoritative value by at least one increment
    pub raw_changed: bool,
    /// Local gesture folded in before the merge
    pub push: Option<PushRequest>,
    /// Sequence number of the commit this report acknowledged
    pub acknowledged: Option<u64>,
    /// Drift actually applied after rate limiting
    pub applied_delta: f64,
    /// Report was far outside the range and discarded local input
    pub restricted: bool,
    pub ignored: bool,
}

/// Abandons an in-flight commit older than [`COMMIT_TIMEOUT`].
///
/// Local changes then build on the authoritative value again. Returns whether the
/// commit was dropped.
pub fn expire_commit(axis: &mut Axis, now: Instant) -> bool {
    let ReconcileState::CommitPending { seq, issued_at, .. } = axis.state else {
        return false;
    };
    if now.saturating_duration_since(issued_at) <= COMMIT_TIMEOUT {
        return false;
    }
    warn!(
        "Axis '{}' commit {} was never acknowledged, dropping it",
        axis.name, seq
    );
    axis.state = ReconcileState::Idle;
    // Headroom follows the base value
    axis.refresh_derived();
    axis.refresh_state();
    true
}

/// Ends a gesture if due: on release in wait-for-release mode, every tick otherwise
pub fn on_tick(axis: &mut Axis, connected: bool, now: Instant) -> Option<PushRequest> {
    expire_commit(axis, now);

    if axis.behavior.wait_for_release {
        if axis.is_active {
            return None;
        }
        if !axis.has_pending_change() {
            // Sub-increment remainder of a finished gesture
            if axis.normalized_input != 0.0 {
                axis.discard_pending();
            }
            return None;
        }
        return commit(axis, connected, now);
    }

    if axis.has_pending_change() {
        return commit(axis, connected, now);
    }
    None
}

/// Folds the pending change into the value.
///
/// With a connected authority the value is not touched, a push request is returned and
/// the axis waits for the echo. Offline the change is applied immediately.
pub fn commit(axis: &mut Axis, connected: bool, now: Instant) -> Option<PushRequest> {
    let target = axis.clamp(axis.base_value() + axis.pending_change);
    axis.normalized_input = 0.0;
    axis.pending_change = 0.0;

    if !connected {
        axis.value = target;
        axis.state = ReconcileState::Idle;
        debug!("Axis '{}' committed locally to {:.4}", axis.name, target);
        return None;
    }

    let seq = axis.next_seq;
    axis.next_seq += 1;
    axis.state = ReconcileState::CommitPending {
        seq,
        target,
        issued_at: now,
    };
    debug!(
        "Axis '{}' requesting {:.4} from authority (seq {})",
        axis.name, target, seq
    );
    Some(PushRequest {
        index: axis.index,
        value: target,
        seq,
    })
}

/// Applies an in-flight target locally, used when the authority goes away
pub fn settle_offline(axis: &mut Axis) {
    if let ReconcileState::CommitPending { target, .. } = axis.state {
        axis.value = axis.clamp(target);
        axis.state = ReconcileState::Idle;
        axis.refresh_state();
    }
}

/// Caps the magnitude of externally sourced drift.
///
/// The allowance is a hard bound of `rate * min(0.1 s, elapsed)` on the delta, not a
/// scale factor, so a large jump after a long gap still moves at most that far.
pub fn limit_external_delta(delta: f64, allowed_per_second: Option<f64>, elapsed_secs: f64) -> f64 {
    if !delta.is_finite() {
        return 0.0;
    }
    match allowed_per_second {
        None => delta,
        Some(rate) => {
            let elapsed = elapsed_secs.clamp(0.0, MAX_EXTERNAL_INTERVAL_SECS);
            let cap = rate.max(0.0) * elapsed;
            delta.clamp(-cap, cap)
        }
    }
}

/// Merges a value reported by the external authority
pub fn merge_external(
    axis: &mut Axis,
    reported: f64,
    hint: Option<f64>,
    now: Instant,
    connected: bool,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    if !reported.is_finite() {
        warn!("Ignoring non-finite report for axis '{}'", axis.name);
        outcome.ignored = true;
        return outcome;
    }

    let tolerance = axis.increment.max(FLOAT_TOLERANCE);
    let out_of_bounds =
        reported < axis.range.min - tolerance || reported > axis.range.max + tolerance;
    outcome.raw_changed = (reported - axis.value).abs() >= tolerance;

    if !axis.synced {
        axis.synced = true;
        axis.last_external_event = Some(now);
        axis.value = axis.clamp(reported);
        if let ReconcileState::CommitPending { seq, target, .. } = axis.state {
            if (reported - target).abs() < tolerance {
                axis.state = ReconcileState::Idle;
                outcome.acknowledged = Some(seq);
            }
        }
        if out_of_bounds {
            axis.discard_pending();
            outcome.restricted = true;
        }
        axis.refresh_derived();
        debug!("Axis '{}' synchronized to {:.4}", axis.name, axis.value);
        return outcome;
    }

    if axis.has_pending_change() && (!axis.behavior.wait_for_release || !axis.is_active) {
        outcome.push = commit(axis, connected, now);
    }

    let elapsed = axis
        .last_external_event
        .map(|last| now.saturating_duration_since(last).as_secs_f64())
        .unwrap_or(MAX_EXTERNAL_INTERVAL_SECS);
    axis.last_external_event = Some(now);

    match axis.state {
        ReconcileState::CommitPending { seq, target, .. }
            if (reported - target).abs() < tolerance =>
        {
            axis.value = axis.clamp(reported);
            axis.state = ReconcileState::Idle;
            outcome.acknowledged = Some(seq);
        }
        _ => {
            expire_commit(axis, now);
            let delta = hint
                .filter(|hint| hint.is_finite())
                .unwrap_or(reported - axis.value);
            let applied = limit_external_delta(
                delta,
                axis.behavior.allowed_external_change_per_second,
                elapsed,
            );
            let before = axis.value;
            axis.value = axis.clamp(axis.value + applied);
            outcome.applied_delta = axis.value - before;
        }
    }

    if out_of_bounds {
        axis.discard_pending();
        outcome.restricted = true;
    }

    axis.refresh_derived();
    outcome
}

/// Feeds the centered position of a trim source into a trim-centering axis
pub fn update_trim(
    axis: &mut Axis,
    position: f64,
    now: Instant,
    connected: bool,
) -> Option<PushRequest> {
    if axis.behavior.trim_source.is_none() || !position.is_finite() {
        return None;
    }
    let position = position.clamp(-1.0, 1.0);
    let previous = axis.trim_position.replace(position)?;
    let movement = position - previous;
    if !axis.is_active || movement == 0.0 {
        return None;
    }

    // The trim source spans [-1, 1], i.e. two units for the full scale
    let delta = movement / 2.0 * axis.effective_sensitivity();
    axis.set_normalized_input(axis.normalized_input + delta);
    if !axis.has_pending_change() {
        return None;
    }
    commit(axis, connected, now)
}
