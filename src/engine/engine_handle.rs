//! Public interface to the engine task

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::axis_engine::{run_until_shutdown, AxisEngine, ControllerFeeds, Stopped};
use super::{EngineError, EngineEvent, EngineSettings};
use crate::axis::{Axis, AxisRegistry, AxisView, PushRequest};

/// Handle for the engine task
pub struct AxisEngineHandle {
    event_sender: mpsc::Sender<EngineEvent>,
    view_receiver: watch::Receiver<Vec<AxisView>>,
    cancel: CancellationToken,
    task: JoinHandle<Result<AxisEngine<Stopped>, EngineError>>,
}

impl AxisEngineHandle {
    /// Builds the engine from `axes` and starts its task.
    ///
    /// Push requests for the external authority are delivered on `push_sender`.
    pub fn spawn(
        settings: EngineSettings,
        axes: Vec<Axis>,
        push_sender: mpsc::Sender<PushRequest>,
        feeds: Option<ControllerFeeds>,
        cancel: CancellationToken,
    ) -> Result<Self, EngineError> {
        info!("Spawning Axis Engine with {} axes", axes.len());

        let (event_sender, event_receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let (view_sender, view_receiver) = watch::channel(Vec::new());

        let engine = AxisEngine::create(settings, push_sender, view_sender)?
            .configure(axes)
            .start();

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            debug!("Starting axis engine main task");
            let result = run_until_shutdown(engine, event_receiver, feeds, task_cancel).await;
            match &result {
                Ok(_) => info!("Axis engine task terminated"),
                Err(e) => error!("Axis engine task terminated with error: {}", e),
            }
            result
        });

        Ok(Self {
            event_sender,
            view_receiver,
            cancel,
            task,
        })
    }

    /// Sender for producers that feed the engine (bridge, input sources)
    pub fn events(&self) -> mpsc::Sender<EngineEvent> {
        self.event_sender.clone()
    }

    pub async fn send(&self, event: EngineEvent) -> Result<(), EngineError> {
        self.event_sender
            .send(event)
            .await
            .map_err(|e| EngineError::ChannelClosed(e.to_string()))
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<AxisView>> {
        self.view_receiver.clone()
    }

    /// Swaps in a new axis set, e.g. after the configuration file changed
    pub async fn reconfigure(&self, axes: Vec<Axis>) -> Result<(), EngineError> {
        info!("Requesting reconfiguration with {} axes", axes.len());
        self.send(EngineEvent::Reconfigure(axes)).await
    }

    /// Cancels the task and returns the final registry
    pub async fn shutdown(self) -> Result<AxisRegistry, EngineError> {
        info!("Shutting down Axis Engine");
        self.cancel.cancel();
        let stopped = self
            .task
            .await
            .map_err(|e| EngineError::TaskFailed(e.to_string()))??;
        Ok(stopped.into_registry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::tests::throttle;
    use crate::axis::Vector2;

    #[tokio::test]
    async fn test_handle_round_trip() {
        let (push_tx, mut push_rx) = mpsc::channel(8);
        let handle = AxisEngineHandle::spawn(
            EngineSettings::default(),
            vec![throttle()],
            push_tx,
            None,
            CancellationToken::new(),
        )
        .unwrap();
        let mut views = handle.subscribe();

        handle.send(EngineEvent::AuthorityConnected(true)).await.unwrap();
        handle
            .send(EngineEvent::Pointer {
                movement: Vector2::new(0.0, -50.0),
                down: 1,
                released: 0,
            })
            .await
            .unwrap();
        handle
            .send(EngineEvent::Pointer {
                movement: Vector2::ZERO,
                down: 0,
                released: 1,
            })
            .await
            .unwrap();

        let push = push_rx.recv().await.unwrap();
        assert!((push.value - 10.0).abs() < 1e-9);

        handle
            .send(EngineEvent::Echo {
                index: push.index,
                value: push.value,
                hint: None,
            })
            .await
            .unwrap();

        // Views follow on the next tick
        loop {
            views.changed().await.unwrap();
            let settled = views
                .borrow_and_update()
                .first()
                .map(|view| (view.value - 10.0).abs() < 1e-9)
                .unwrap_or(false);
            if settled {
                break;
            }
        }

        let registry = handle.shutdown().await.unwrap();
        assert!((registry.get(0).unwrap().value() - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_invalid_settings_fail_spawn() {
        let (push_tx, _push_rx) = mpsc::channel(8);
        let settings = EngineSettings {
            tick_hz: -1.0,
            ..Default::default()
        };
        let result = AxisEngineHandle::spawn(settings, vec![], push_tx, None, CancellationToken::new());
        assert!(matches!(result, Err(EngineError::InvalidSettings(_))));
    }
}
