//! Axis engine state machine and main loop

use std::time::{Duration, Instant};

use statum::{machine, state};
use tokio::select;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{EngineError, EngineEvent, EngineSettings};
use crate::axis::{decay, reconciler, shaper, trigger};
use crate::axis::{Axis, AxisRegistry, AxisView, DeviceSnapshot, PushRequest, Vector2};
use crate::controller::device_table::{DeviceTable, StickPositions};

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Live controller state published by the controller subsystem
pub struct ControllerFeeds {
    pub table: watch::Receiver<DeviceTable>,
    pub sticks: watch::Receiver<StickPositions>,
}

#[derive(Debug, Default)]
struct EngineMetrics {
    ticks: u64,
    events: u64,
    pushes: u64,
    dropped_pushes: u64,
    stale_reports: u64,
}

#[state]
#[derive(Debug, Clone)]
pub enum EngineState {
    Initializing,
    Configured,
    Running,
    Stopped,
}

#[machine]
pub struct AxisEngine<S: EngineState> {
    settings: EngineSettings,

    registry: AxisRegistry,

    snapshot: DeviceSnapshot,

    sticks: StickPositions,

    // External authority reachable
    connected: bool,

    push_sender: mpsc::Sender<PushRequest>,

    view_sender: watch::Sender<Vec<AxisView>>,

    last_tick: Option<Instant>,

    metrics: EngineMetrics,

    last_metrics_log: Instant,
}

impl<S: EngineState> AxisEngine<S> {
    pub fn registry(&self) -> &AxisRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn publish_views(&self) {
        let views = self
            .registry
            .views(self.settings.idle_color, self.settings.active_color);
        self.view_sender.send_replace(views);
    }
}

impl AxisEngine<Initializing> {
    pub fn create(
        settings: EngineSettings,
        push_sender: mpsc::Sender<PushRequest>,
        view_sender: watch::Sender<Vec<AxisView>>,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        debug!("Creating Axis Engine with settings: {:?}", settings);
        Ok(Self::new(
            settings,
            AxisRegistry::default(),
            DeviceSnapshot::default(),
            StickPositions::default(),
            false,
            push_sender,
            view_sender,
            None,
            EngineMetrics::default(),
            Instant::now(),
        ))
    }

    pub fn configure(mut self, axes: Vec<Axis>) -> AxisEngine<Configured> {
        info!("Configuring Axis Engine with {} axes", axes.len());
        for axis in &axes {
            debug!(
                "  '{}' range [{}, {}] increment {}",
                axis.name(),
                axis.range().min,
                axis.range().max,
                axis.increment()
            );
        }
        self.registry = AxisRegistry::new(axes);
        self.transition()
    }
}

impl AxisEngine<Configured> {
    pub fn start(self) -> AxisEngine<Running> {
        info!(
            "Starting Axis Engine at {} Hz with {} axes",
            self.settings.tick_hz,
            self.registry.len()
        );
        self.publish_views();
        self.transition()
    }
}

impl AxisEngine<Running> {
    pub fn handle_event(&mut self, event: EngineEvent, now: Instant) {
        self.metrics.events += 1;
        match event {
            EngineEvent::Movement(movement) => self.input_step(movement, Vector2::ZERO, now),
            EngineEvent::Pointer {
                movement,
                down,
                released,
            } => {
                self.snapshot.pointer.down = down;
                self.snapshot.pointer.released |= released;
                self.input_step(movement, Vector2::ZERO, now);
            }
            EngineEvent::Key { name, pressed } => {
                debug!("Key '{}' {}", name, if pressed { "down" } else { "up" });
                self.snapshot.set_key(&name, pressed);
                self.input_step(Vector2::ZERO, Vector2::ZERO, now);
            }
            EngineEvent::Echo { index, value, hint } => self.merge_report(index, value, hint, now),
            EngineEvent::Bounds { index, min, max } => match self.registry.try_get_mut(index) {
                Ok(axis) => match axis.apply_bounds(min, max) {
                    Ok(()) => debug!(
                        "Axis '{}' bounds now [{}, {}]",
                        axis.name(),
                        axis.range().min,
                        axis.range().max
                    ),
                    Err(e) => warn!("Rejected bounds update: {}", e),
                },
                Err(e) => debug!("Ignoring bounds update: {}", e),
            },
            EngineEvent::JoystickButtons(mask) => {
                self.registry.set_joystick_buttons(mask);
                self.input_step(Vector2::ZERO, Vector2::ZERO, now);
            }
            EngineEvent::AuthorityConnected(connected) => self.set_connected(connected),
            EngineEvent::SetEnabled { index, enabled } => match self.registry.get_mut(index) {
                Some(axis) => {
                    info!("Axis '{}' {}", axis.name(), if enabled { "enabled" } else { "disabled" });
                    axis.is_enabled = enabled;
                }
                None => debug!("Ignoring enable request for unknown axis {}", index),
            },
            EngineEvent::SetAvailable { index, available } => match self.registry.get_mut(index) {
                Some(axis) => {
                    info!(
                        "Axis '{}' {}",
                        axis.name(),
                        if available { "available" } else { "unavailable" }
                    );
                    axis.is_available = available;
                }
                None => debug!("Ignoring availability for unknown axis {}", index),
            },
            EngineEvent::Reconfigure(axes) => {
                self.registry.replace_all(axes);
                self.publish_views();
            }
        }
    }

    /// Fixed-rate step: release detection, stick input, trim, decay and view publishing
    pub fn tick(&mut self, now: Instant) {
        let interval = self
            .last_tick
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .unwrap_or(1.0 / self.settings.tick_hz);
        self.last_tick = Some(now);
        self.metrics.ticks += 1;

        let stick = self.stick_movement();
        self.input_step(Vector2::ZERO, stick, now);

        let connected = self.connected;
        let mut pushes = Vec::new();
        for axis in self.registry.iter_mut() {
            if let Some(source) = axis.behavior().trim_source {
                pushes.extend(reconciler::update_trim(
                    axis,
                    self.sticks.get(source),
                    now,
                    connected,
                ));
            }
            pushes.extend(decay::decay(axis, interval, now, connected));
        }
        for push in pushes {
            self.send_push(push);
        }

        if let Err(e) = self.registry.check_invariants() {
            error!("{}", e);
        }
        self.publish_views();
        self.log_metrics_if_due(now);
    }

    pub fn apply_controllers(&mut self, table: DeviceTable) {
        debug!("Controller table updated ({} known)", table.len());
        self.snapshot.controllers = table;
    }

    pub fn apply_sticks(&mut self, sticks: StickPositions) {
        self.sticks = sticks;
    }

    pub fn stop(self) -> AxisEngine<Stopped> {
        info!(
            "Stopping Axis Engine after {} ticks and {} events",
            self.metrics.ticks, self.metrics.events
        );
        self.transition()
    }

    fn stick_movement(&self) -> Vector2 {
        match self.settings.movement_stick {
            // Stick up is a push gesture
            Some(side) => {
                let (x, y) = self.sticks.side(side);
                Vector2::new(x * self.settings.stick_gain, -y * self.settings.stick_gain)
            }
            None => Vector2::ZERO,
        }
    }

    /// Evaluates triggers, shapes movement of active axes and ends finished gestures
    fn input_step(&mut self, movement: Vector2, stick: Vector2, now: Instant) {
        self.snapshot.joystick_buttons = self.registry.joystick_buttons();
        let connected = self.connected;
        let mut pushes = Vec::new();

        for axis in self.registry.iter_mut() {
            let outcome = trigger::evaluate(axis, &self.snapshot);
            if outcome.warning != axis.warning {
                match &outcome.warning {
                    Some(warning) => warn!("{}", warning),
                    None => info!("Axis '{}' trigger device available again", axis.name()),
                }
                axis.warning = outcome.warning;
            }

            if outcome.active {
                let movement = if axis.behavior().trim_source.is_some() {
                    movement
                } else {
                    Vector2::new(movement.x + stick.x, movement.y + stick.y)
                };
                if !movement.is_zero() {
                    shaper::shape(axis, movement, &self.settings.shaper);
                }
            }

            pushes.extend(reconciler::on_tick(axis, connected, now));
        }

        self.snapshot.clear_edges();
        for push in pushes {
            self.send_push(push);
        }
    }

    fn merge_report(&mut self, index: usize, value: f64, hint: Option<f64>, now: Instant) {
        let connected = self.connected;
        let Some(axis) = self.registry.get_mut(index) else {
            self.metrics.stale_reports += 1;
            debug!("Ignoring report {} for unknown axis {}", value, index);
            return;
        };

        let outcome = reconciler::merge_external(axis, value, hint, now, connected);
        if outcome.restricted {
            warn!(
                "Axis '{}' reported {} outside [{}, {}], local input discarded",
                axis.name(),
                value,
                axis.range().min,
                axis.range().max
            );
        }
        if let Some(seq) = outcome.acknowledged {
            debug!("Axis '{}' commit {} acknowledged", axis.name(), seq);
        } else if outcome.raw_changed {
            debug!(
                "Axis '{}' external change applied {:.4}",
                axis.name(),
                outcome.applied_delta
            );
        }
        if let Some(push) = outcome.push {
            self.send_push(push);
        }
    }

    fn set_connected(&mut self, connected: bool) {
        if connected == self.connected {
            return;
        }
        self.connected = connected;
        if connected {
            info!("External authority connected");
        } else {
            warn!("External authority disconnected, settling in-flight commits locally");
            for axis in self.registry.iter_mut() {
                reconciler::settle_offline(axis);
            }
        }
    }

    fn send_push(&mut self, push: PushRequest) {
        match self.push_sender.try_send(push) {
            Ok(()) => self.metrics.pushes += 1,
            Err(TrySendError::Full(push)) => {
                self.metrics.dropped_pushes += 1;
                warn!("Push queue is full, dropped {:?}", push);
            }
            Err(TrySendError::Closed(push)) => {
                self.metrics.dropped_pushes += 1;
                error!("Push queue closed, dropped {:?}", push);
            }
        }
    }

    fn log_metrics_if_due(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_metrics_log) < METRICS_LOG_INTERVAL {
            return;
        }
        info!(
            "Axis Engine stats: {} ticks, {} events, {} pushes ({} dropped), {} stale reports",
            self.metrics.ticks,
            self.metrics.events,
            self.metrics.pushes,
            self.metrics.dropped_pushes,
            self.metrics.stale_reports
        );
        self.metrics = EngineMetrics::default();
        self.last_metrics_log = now;
    }
}

impl AxisEngine<Stopped> {
    pub fn into_registry(self) -> AxisRegistry {
        self.registry
    }
}

// Waits for the next value of an optional feed; a closed feed is dropped
async fn next_change<T: Clone>(feed: &mut Option<watch::Receiver<T>>) -> Option<T> {
    let Some(receiver) = feed.as_mut() else {
        return std::future::pending().await;
    };
    if receiver.changed().await.is_ok() {
        return Some(receiver.borrow_and_update().clone());
    }
    *feed = None;
    None
}

/// Main loop of the engine task
pub async fn run_until_shutdown(
    mut engine: AxisEngine<Running>,
    mut events: mpsc::Receiver<EngineEvent>,
    feeds: Option<ControllerFeeds>,
    cancel: CancellationToken,
) -> Result<AxisEngine<Stopped>, EngineError> {
    let period = Duration::from_secs_f64(1.0 / engine.settings.tick_hz);
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let (mut table_feed, mut stick_feed) = match feeds {
        Some(feeds) => (Some(feeds.table), Some(feeds.sticks)),
        None => (None, None),
    };
    if let Some(table) = table_feed.as_mut() {
        engine.apply_controllers(table.borrow_and_update().clone());
    }
    if let Some(sticks) = stick_feed.as_mut() {
        engine.apply_sticks(*sticks.borrow_and_update());
    }

    info!("Axis Engine main loop running, tick period {:?}", period);

    loop {
        select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Axis Engine received shutdown signal");
                break;
            }
            event = events.recv() => match event {
                Some(event) => engine.handle_event(event, Instant::now()),
                None => {
                    error!("Engine event channel closed");
                    return Err(EngineError::ChannelClosed("engine events".to_string()));
                }
            },
            table = next_change(&mut table_feed) => match table {
                Some(table) => engine.apply_controllers(table),
                None => warn!("Controller table feed closed"),
            },
            sticks = next_change(&mut stick_feed) => match sticks {
                Some(sticks) => engine.apply_sticks(sticks),
                None => warn!("Stick feed closed"),
            },
            _ = ticker.tick() => engine.tick(Instant::now()),
        }
    }

    Ok(engine.stop())
}
