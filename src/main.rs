use std::path::PathBuf;

use axislink::authority::MqttBridgeHandle;
use axislink::config::load_config;
use axislink::controller::{ControllerHandle, ControllerSettings};
use axislink::engine::{AxisEngineHandle, ControllerFeeds};
use color_eyre::{eyre::eyre, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let explicit = std::env::args().nth(1).map(PathBuf::from);
    let loaded = load_config(explicit.as_deref()).await?;
    let settings = loaded.config.engine.clone();

    let cancel = CancellationToken::new();

    info!("Initializing controller input");
    let controller_settings = ControllerSettings {
        joystick_deadzone: settings.controller_deadzone,
        ..Default::default()
    };
    let controller = match ControllerHandle::spawn(controller_settings, cancel.child_token()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Controller input unavailable, continuing without it: {}", e);
            None
        }
    };
    let feeds = controller.as_ref().map(|handle| ControllerFeeds {
        table: handle.subscribe(),
        sticks: handle.sticks(),
    });

    let (push_sender, push_receiver) = mpsc::channel(settings.queue_capacity.max(1));
    let engine = AxisEngineHandle::spawn(settings, loaded.axes, push_sender, feeds, cancel.clone())
        .map_err(|e| eyre!("Failed to spawn axis engine: {}", e))?;

    let bridge = if loaded.config.mqtt.enabled {
        Some(
            MqttBridgeHandle::spawn(loaded.config.mqtt, engine.events(), push_receiver, cancel.clone())
                .map_err(|e| eyre!("Failed to spawn MQTT bridge: {}", e))?,
        )
    } else {
        info!("MQTT bridge disabled, axes are committed locally");
        None
    };

    info!("axislink running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    cancel.cancel();

    let registry = engine.shutdown().await?;
    for axis in registry.iter() {
        info!("Final value of '{}': {}", axis.name(), axis.value());
    }
    if let Some(bridge) = bridge {
        if let Err(e) = bridge.join().await {
            warn!("MQTT bridge stopped with error: {}", e);
        }
    }
    if let Some(controller) = controller {
        controller.shutdown().await;
    }

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
