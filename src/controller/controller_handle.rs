//! Controller Handle - unified API for gamepad input
//!
//! Starts the gilrs collector thread and a folding task that turns raw events into
//! a [`DeviceTable`] and the latest [`StickPositions`], both published over `watch`
//! channels for the engine.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::device_table::{DeviceTable, StickPositions};
use super::event_collector::{CollectorError, CollectorHandle, CollectorSettings, RawControllerEvent};

/// Configuration for the controller subsystem
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Analog stick deadzone as a fraction (0.0-1.0)
    pub joystick_deadzone: f32,

    /// Capacity of the raw event queue between collector thread and folding task
    pub event_buffer: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            joystick_deadzone: 0.05,
            event_buffer: 1000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Collector error: {0}")]
    CollectorError(#[from] CollectorError),

    #[error("Initialization error: {0}")]
    InitializationError(String),
}

/// Handle for the complete controller subsystem
pub struct ControllerHandle {
    table_receiver: watch::Receiver<DeviceTable>,
    stick_receiver: watch::Receiver<StickPositions>,
    collector: CollectorHandle,
    folder: JoinHandle<()>,
}

impl ControllerHandle {
    pub fn spawn(settings: ControllerSettings, cancel: CancellationToken) -> Result<Self, ControllerError> {
        info!("Initializing Controller system with settings: {:?}", settings);

        if settings.event_buffer == 0 {
            return Err(ControllerError::InitializationError(
                "event buffer must not be empty".to_string(),
            ));
        }

        let (event_sender, event_receiver) = mpsc::channel(settings.event_buffer);
        let (table_sender, table_receiver) = watch::channel(DeviceTable::default());
        let (stick_sender, stick_receiver) = watch::channel(StickPositions::default());

        // The folding task must exist before the collector announces present gamepads
        let folder = tokio::spawn(fold_events(event_receiver, table_sender, stick_sender));

        let collector_settings = CollectorSettings {
            joystick_deadzone: settings.joystick_deadzone,
            ..Default::default()
        };
        let collector = CollectorHandle::spawn(collector_settings, event_sender, cancel)?;

        info!("Controller system initialized successfully");
        Ok(Self {
            table_receiver,
            stick_receiver,
            collector,
            folder,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceTable> {
        debug!("New subscriber to controller table");
        self.table_receiver.clone()
    }

    pub fn sticks(&self) -> watch::Receiver<StickPositions> {
        self.stick_receiver.clone()
    }

    /// Stops the collector thread; the folding task ends once its queue closes
    pub async fn shutdown(self) {
        info!("Shutting down Controller system");
        let collector = self.collector;
        if tokio::task::spawn_blocking(move || collector.shutdown()).await.is_err() {
            warn!("Collector shutdown task failed");
        }
        if let Err(e) = self.folder.await {
            warn!("Controller folding task ended abnormally: {}", e);
        }
    }
}

/// Folds raw events until the collector side of the queue is dropped
pub async fn fold_events(
    mut events: mpsc::Receiver<RawControllerEvent>,
    table: watch::Sender<DeviceTable>,
    sticks: watch::Sender<StickPositions>,
) {
    debug!("Starting controller folding task");
    while let Some(event) = events.recv().await {
        match &event {
            RawControllerEvent::Stick { side, x, y, .. } => {
                sticks.send_modify(|positions| positions.update(*side, *x, *y));
            }
            RawControllerEvent::Disconnected { .. } => {
                table.send_if_modified(|table| table.apply(&event));
                // A stick of an unplugged controller must not keep driving axes
                sticks.send_replace(StickPositions::default());
            }
            _ => {
                table.send_if_modified(|table| table.apply(&event));
            }
        }
    }
    info!("Controller folding task terminated");
}
