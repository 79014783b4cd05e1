use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::message::{BridgeError, Topics};
use super::MqttSettings;
use crate::axis::PushRequest;
use crate::engine::EngineEvent;

const MAX_ERROR_MESSAGES: usize = 10;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct BridgeStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

/// Connects the engine with the external authority over MQTT
pub struct MqttBridge {
    settings: MqttSettings,
    topics: Topics,
    client: AsyncClient,
    eventloop: EventLoop,
    engine: mpsc::Sender<EngineEvent>,
    pushes: mpsc::Receiver<PushRequest>,
    status: watch::Sender<BridgeStatus>,
    connected: bool,
}

impl MqttBridge {
    pub fn new(
        settings: MqttSettings,
        engine: mpsc::Sender<EngineEvent>,
        pushes: mpsc::Receiver<PushRequest>,
    ) -> Result<Self, BridgeError> {
        settings.validate()?;

        let mut mqtt_options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        mqtt_options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        if let Some(user) = &settings.username {
            mqtt_options.set_credentials(user.clone(), settings.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, settings.request_capacity);
        let (status, _) = watch::channel(BridgeStatus::default());

        Ok(Self {
            topics: Topics::new(&settings.prefix),
            settings,
            client,
            eventloop,
            engine,
            pushes,
            status,
            connected: false,
        })
    }

    pub fn subscribe_status(&self) -> watch::Receiver<BridgeStatus> {
        self.status.subscribe()
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BridgeError> {
        info!(
            "Connecting to MQTT broker {}:{} as '{}' (prefix '{}')",
            self.settings.host,
            self.settings.port,
            self.settings.client_id,
            self.topics.prefix()
        );
        self.set_state(ConnectionState::Connecting);

        let mut failures: u32 = 0;
        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("MQTT bridge received shutdown signal");
                    break;
                }
                push = self.pushes.recv() => match push {
                    Some(push) => self.publish(push),
                    None => {
                        info!("Push channel closed, stopping MQTT bridge");
                        break;
                    }
                },
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        failures = 0;
                        info!("Connected to MQTT broker: {:?}", ack.code);
                        self.subscribe_topics();
                        self.set_connected(true).await?;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.handle_publish(&publish.topic, &publish.payload).await?;
                    }
                    Ok(event) => debug!("MQTT event: {:?}", event),
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        error!("MQTT connection error: {}", e);
                        self.record_error(e.to_string());
                        self.set_connected(false).await?;
                        self.set_state(ConnectionState::Reconnecting);

                        let delay = reconnect_delay(self.settings.reconnect_step_ms, failures);
                        warn!("Reconnecting in {:?} (attempt {})", delay, failures);
                        select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                },
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request failed: {}", e);
        }
        self.set_connected(false).await?;
        Ok(())
    }

    fn publish(&mut self, push: PushRequest) {
        let (topic, payload) = self.topics.encode_push(&push);
        debug!("Publishing {} -> {} (seq {})", topic, payload, push.seq);
        match self
            .client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.into_bytes())
        {
            Ok(()) => self.status.send_modify(|status| {
                status.messages_sent += 1;
                status.last_activity = Some(Local::now());
            }),
            Err(e) => {
                warn!("Failed to queue push for axis {}: {}", push.index, e);
                self.record_error(e.to_string());
            }
        }
    }

    fn subscribe_topics(&mut self) {
        for topic in self.topics.subscriptions() {
            match self.client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                Ok(()) => debug!("Subscribed to {}", topic),
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", topic, e);
                    self.record_error(e.to_string());
                }
            }
        }
    }

    /// Decodes an inbound publish and forwards it to the engine. Malformed messages
    /// are logged and dropped; only a closed engine channel is an error.
    pub async fn handle_publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BridgeError> {
        self.status.send_modify(|status| {
            status.messages_received += 1;
            status.last_activity = Some(Local::now());
        });

        match self.topics.decode(topic, payload) {
            Ok(message) => {
                debug!("Inbound {:?}", message);
                self.engine
                    .send(message.into_event())
                    .await
                    .map_err(|_| BridgeError::EngineClosed)
            }
            Err(e) => {
                warn!("Dropping MQTT message: {}", e);
                Ok(())
            }
        }
    }

    async fn set_connected(&mut self, connected: bool) -> Result<(), BridgeError> {
        if connected {
            self.set_state(ConnectionState::Connected);
        }
        if self.connected == connected {
            return Ok(());
        }
        self.connected = connected;
        if !connected {
            self.set_state(ConnectionState::Disconnected);
        }
        self.engine
            .send(EngineEvent::AuthorityConnected(connected))
            .await
            .map_err(|_| BridgeError::EngineClosed)
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            if status.connection_state == state {
                return false;
            }
            status.connection_state = state;
            true
        });
    }

    fn record_error(&self, message: String) {
        self.status.send_modify(|status| {
            status.error_messages.push(message);
            if status.error_messages.len() > MAX_ERROR_MESSAGES {
                status.error_messages.remove(0);
            }
        });
    }
}

/// Linear backoff, capped at ten steps
pub fn reconnect_delay(step_ms: u64, failures: u32) -> Duration {
    Duration::from_millis(step_ms.saturating_mul(u64::from(failures.clamp(1, 10))))
}

/// Runs the bridge as a task
pub struct MqttBridgeHandle {
    status: watch::Receiver<BridgeStatus>,
    task: JoinHandle<Result<(), BridgeError>>,
}

impl MqttBridgeHandle {
    pub fn spawn(
        settings: MqttSettings,
        engine: mpsc::Sender<EngineEvent>,
        pushes: mpsc::Receiver<PushRequest>,
        cancel: CancellationToken,
    ) -> Result<Self, BridgeError> {
        let bridge = MqttBridge::new(settings, engine, pushes)?;
        let status = bridge.subscribe_status();
        let task = tokio::spawn(async move {
            let result = bridge.run(cancel).await;
            match &result {
                Ok(()) => info!("MQTT bridge task terminated"),
                Err(e) => error!("MQTT bridge task terminated with error: {}", e),
            }
            result
        });
        Ok(Self { status, task })
    }

    pub fn status(&self) -> watch::Receiver<BridgeStatus> {
        self.status.clone()
    }

    /// Waits for the task; cancel its token first
    pub async fn join(self) -> Result<(), BridgeError> {
        self.task
            .await
            .map_err(|e| BridgeError::Client(format!("bridge task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> (MqttBridge, mpsc::Receiver<EngineEvent>) {
        let (engine_tx, engine_rx) = mpsc::channel(8);
        let (_push_tx, push_rx) = mpsc::channel(8);
        let bridge = MqttBridge::new(MqttSettings::default(), engine_tx, push_rx).unwrap();
        (bridge, engine_rx)
    }

    #[test]
    fn test_linear_backoff() {
        assert_eq!(reconnect_delay(500, 0), Duration::from_millis(500));
        assert_eq!(reconnect_delay(500, 3), Duration::from_millis(1500));
        assert_eq!(reconnect_delay(500, 99), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_publish_is_forwarded_to_engine() {
        let (mut bridge, mut engine_rx) = bridge();
        bridge
            .handle_publish("axislink/axis/1/value", b"25;0.5")
            .await
            .unwrap();
        match engine_rx.recv().await.unwrap() {
            EngineEvent::Echo { index, value, hint } => {
                assert_eq!(index, 1);
                assert_eq!(value, 25.0);
                assert_eq!(hint, Some(0.5));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(bridge.subscribe_status().borrow().messages_received, 1);
    }

    #[tokio::test]
    async fn test_malformed_publish_is_dropped() {
        let (mut bridge, mut engine_rx) = bridge();
        bridge
            .handle_publish("axislink/axis/1/bounds", b"oops")
            .await
            .unwrap();
        assert!(engine_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_changes_reach_engine_once() {
        let (mut bridge, mut engine_rx) = bridge();
        bridge.set_connected(true).await.unwrap();
        bridge.set_connected(true).await.unwrap();
        bridge.set_connected(false).await.unwrap();
        assert!(matches!(
            engine_rx.recv().await,
            Some(EngineEvent::AuthorityConnected(true))
        ));
        assert!(matches!(
            engine_rx.recv().await,
            Some(EngineEvent::AuthorityConnected(false))
        ));
        assert!(engine_rx.try_recv().is_err());
        assert_eq!(
            bridge.subscribe_status().borrow().connection_state,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_closed_engine_is_an_error() {
        let (mut bridge, engine_rx) = bridge();
        drop(engine_rx);
        assert_eq!(
            bridge.handle_publish("axislink/joystick/buttons", b"3").await,
            Err(BridgeError::EngineClosed)
        );
    }
}
