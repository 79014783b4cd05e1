use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};
use statum::{machine, state};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::device_table::{ButtonType, ControllerId, StickPositions, StickSide};

// Raw controller event with chrono timestamps
#[derive(Debug, Clone, PartialEq)]
pub enum RawControllerEvent {
    Connected {
        controller: ControllerId,
        name: String,
        timestamp: DateTime<Local>,
    },
    Disconnected {
        controller: ControllerId,
        timestamp: DateTime<Local>,
    },
    Button {
        controller: ControllerId,
        button: ButtonType,
        pressed: bool,
        timestamp: DateTime<Local>,
    },
    Stick {
        controller: ControllerId,
        side: StickSide,
        x: f64,
        y: f64,
        timestamp: DateTime<Local>,
    },
}

// Collector settings
#[derive(Clone, Debug)]
pub struct CollectorSettings {
    pub joystick_deadzone: f32,
    pub poll_interval: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            joystick_deadzone: 0.05,
            poll_interval: Duration::from_millis(1),
        }
    }
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to send event: {0}")]
    EventSendError(String),

    #[error("Failed to spawn collector thread: {0}")]
    ThreadError(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
pub struct EventCollector<S: CollectionState> {
    gilrs: Gilrs,

    settings: CollectorSettings,

    event_sender: mpsc::Sender<RawControllerEvent>,

    // Identity of every gamepad gilrs has reported
    identities: HashMap<GamepadId, ControllerId>,

    // Last corrected stick values per gamepad, used to fill the untouched component
    sticks: HashMap<GamepadId, StickPositions>,
}

impl<S: CollectionState> EventCollector<S> {
    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    fn send(&self, event: RawControllerEvent) -> Result<(), CollectorError> {
        self.event_sender
            .try_send(event)
            .map_err(|e| CollectorError::EventSendError(e.to_string()))
    }

    // Resolves and remembers the identity of a gamepad
    fn identify(&mut self, id: GamepadId) -> (ControllerId, String) {
        let gamepad = self.gilrs.gamepad(id);
        let controller = ControllerId::new(
            gamepad.vendor_id().unwrap_or_default(),
            gamepad.product_id().unwrap_or_default(),
        );
        let name = gamepad.name().to_string();
        self.identities.insert(id, controller);
        (controller, name)
    }
}

impl EventCollector<Initializing> {
    pub fn create(
        settings: CollectorSettings,
        event_sender: mpsc::Sender<RawControllerEvent>,
    ) -> Result<Self, CollectorError> {
        debug!("Creating Event Collector with settings: {:?}", settings);

        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(CollectorError::InitializationError(e.to_string()));
            }
        };

        Ok(Self::new(gilrs, settings, event_sender, HashMap::new(), HashMap::new()))
    }

    // Announce the gamepads that are already plugged in and start collecting
    pub fn initialize(mut self) -> Result<EventCollector<Collecting>, CollectorError> {
        info!(
            "Initializing Event Collector with deadzone: {}",
            self.settings.joystick_deadzone
        );

        let present: Vec<GamepadId> = self
            .gilrs
            .gamepads()
            .filter(|(_, gamepad)| gamepad.is_connected())
            .map(|(id, _)| id)
            .collect();

        if present.is_empty() {
            warn!("No gamepad connected, waiting for hotplug");
        } else {
            info!("Found {} gamepads:", present.len());
        }

        for id in present {
            let (controller, name) = self.identify(id);
            info!("  {} '{}' (gilrs id {})", controller, name, id);
            self.send(RawControllerEvent::Connected {
                controller,
                name,
                timestamp: Local::now(),
            })?;
        }

        info!("Event Collector initialized, transitioning to Collecting state");
        Ok(self.transition())
    }
}

impl EventCollector<Collecting> {
    // Drain everything gilrs has queued. Returns the number of forwarded events.
    pub fn collect_pending(&mut self) -> Result<usize, CollectorError> {
        let mut forwarded = 0;
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            if let Some(raw_event) = self.convert_gilrs_event(id, event) {
                match &raw_event {
                    RawControllerEvent::Stick { .. } => debug!("Captured event: {:?}", raw_event),
                    _ => info!("Controller event: {:?}", raw_event),
                }
                self.send(raw_event)?;
                forwarded += 1;
            }
        }
        Ok(forwarded)
    }

    pub fn run_collection_loop(&mut self, cancel: CancellationToken) {
        info!("Starting Event Collector loop");

        let mut event_count = 0;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(10);

        while !cancel.is_cancelled() {
            match self.collect_pending() {
                Ok(count) => event_count += count,
                Err(e) => error!("Error collecting event: {}", e),
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                debug!(
                    "Event Collector stats: forwarded {} events in last {} seconds",
                    event_count,
                    log_interval.num_seconds()
                );
                event_count = 0;
                last_log_time = now;
            }

            thread::sleep(self.settings.poll_interval);
        }

        info!("Event Collector loop stopped");
    }

    fn convert_gilrs_event(&mut self, id: GamepadId, event: EventType) -> Option<RawControllerEvent> {
        let now = Local::now();

        match event {
            EventType::Connected => {
                let (controller, name) = self.identify(id);
                Some(RawControllerEvent::Connected {
                    controller,
                    name,
                    timestamp: now,
                })
            }
            EventType::Disconnected => {
                self.sticks.remove(&id);
                let controller = match self.identities.get(&id) {
                    Some(controller) => *controller,
                    None => self.identify(id).0,
                };
                Some(RawControllerEvent::Disconnected {
                    controller,
                    timestamp: now,
                })
            }
            EventType::ButtonPressed(button, _) | EventType::ButtonReleased(button, _) => {
                let pressed = matches!(event, EventType::ButtonPressed(..));
                let controller = *self.identities.get(&id)?;
                map_button(button).map(|button| RawControllerEvent::Button {
                    controller,
                    button,
                    pressed,
                    timestamp: now,
                })
            }
            EventType::AxisChanged(axis, value, _) => {
                let controller = *self.identities.get(&id)?;
                let value = f64::from(apply_deadzone(value, self.settings.joystick_deadzone));
                let sticks = self.sticks.entry(id).or_default();
                let (side, x, y) = match axis {
                    Axis::LeftStickX => (StickSide::Left, value, sticks.left.1),
                    Axis::LeftStickY => (StickSide::Left, sticks.left.0, value),
                    Axis::RightStickX => (StickSide::Right, value, sticks.right.1),
                    Axis::RightStickY => (StickSide::Right, sticks.right.0, value),
                    _ => {
                        debug!("Ignoring unsupported axis: {:?}", axis);
                        return None;
                    }
                };
                if sticks.side(side) == (x, y) {
                    return None;
                }
                sticks.update(side, x, y);
                Some(RawControllerEvent::Stick {
                    controller,
                    side,
                    x,
                    y,
                    timestamp: now,
                })
            }
            _ => None,
        }
    }
}

// Runs the collector on a dedicated thread, gilrs polling is blocking
pub struct CollectorHandle {
    thread: Option<thread::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl CollectorHandle {
    pub fn spawn(
        settings: CollectorSettings,
        event_sender: mpsc::Sender<RawControllerEvent>,
        cancel: CancellationToken,
    ) -> Result<Self, CollectorError> {
        info!("Spawning Event Collector with settings: {:?}", settings);

        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), CollectorError>>(1);
        let thread_cancel = cancel.clone();

        let thread = thread::Builder::new()
            .name("controller-collector".to_string())
            .spawn(move || {
                let mut collector = match EventCollector::create(settings, event_sender)
                    .and_then(|collector| collector.initialize())
                {
                    Ok(collector) => {
                        let _ = ready_tx.send(Ok(()));
                        collector
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                collector.run_collection_loop(thread_cancel);
            })
            .map_err(|e| CollectorError::ThreadError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => info!("Event Collector successfully started"),
            Ok(Err(e)) => {
                error!("Failed to initialize Event Collector: {}", e);
                return Err(e);
            }
            Err(e) => return Err(CollectorError::InitializationError(e.to_string())),
        }

        Ok(Self {
            thread: Some(thread),
            cancel,
        })
    }

    pub fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Event Collector thread panicked");
            }
        }
    }
}

fn map_button(button: Button) -> Option<ButtonType> {
    match button {
        Button::South => Some(ButtonType::A),
        Button::East => Some(ButtonType::B),
        Button::West => Some(ButtonType::Y),
        Button::North => Some(ButtonType::X),
        Button::Start => Some(ButtonType::Start),
        Button::Select => Some(ButtonType::Select),
        Button::LeftTrigger => Some(ButtonType::LeftBumper),
        Button::RightTrigger => Some(ButtonType::RightBumper),
        Button::LeftThumb => Some(ButtonType::LeftStick),
        Button::RightThumb => Some(ButtonType::RightStick),
        Button::DPadUp => Some(ButtonType::DPadUp),
        Button::DPadDown => Some(ButtonType::DPadDown),
        Button::DPadLeft => Some(ButtonType::DPadLeft),
        Button::DPadRight => Some(ButtonType::DPadRight),
        Button::Mode => Some(ButtonType::Guide),
        _ => None,
    }
}

// Rescales the value to the range outside the deadzone
pub fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        value.signum() * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}
