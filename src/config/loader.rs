use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{build_axes, AppConfig};
use crate::axis::Axis;

const CONFIG_DIR: &str = "axislink";
const CONFIG_FILE: &str = "axes.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Configuration file {0} does not exist")]
    NotFound(String),
}

/// Result of loading: the raw configuration, the axes built from it and every problem
/// found on the way
#[derive(Debug)]
pub struct LoadedConfig {
    pub path: Option<PathBuf>,
    pub config: AppConfig,
    pub axes: Vec<Axis>,
    pub errors: Vec<String>,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Loads the configuration.
///
/// An explicitly given path must exist. Without one the default location is used and a
/// missing file yields the built-in defaults.
pub async fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let path = match explicit {
        Some(path) => {
            if !file_exists(path).await? {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            Some(path.to_path_buf())
        }
        None => match default_config_path() {
            Some(path) if file_exists(&path).await? => Some(path),
            Some(path) => {
                warn!(
                    "No configuration at {}, running with defaults",
                    path.display()
                );
                None
            }
            None => {
                warn!("No configuration directory available, running with defaults");
                None
            }
        },
    };

    let config = match &path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            parse_config(&content)?
        }
        None => AppConfig::default(),
    };

    let (config, axes, errors) = finish(config);
    for error in &errors {
        warn!("Configuration: {}", error);
    }
    info!(
        "Configuration loaded: {} axes, {} problems",
        axes.len(),
        errors.len()
    );

    Ok(LoadedConfig {
        path,
        config,
        axes,
        errors,
    })
}

/// Replaces invalid sections by their defaults and builds the axes
fn finish(mut config: AppConfig) -> (AppConfig, Vec<Axis>, Vec<String>) {
    let mut errors = Vec::new();

    if let Err(e) = config.engine.validate() {
        errors.push(format!("[engine]: {}, using defaults", e));
        config.engine = Default::default();
    }
    if let Err(e) = config.mqtt.validate() {
        errors.push(format!("[mqtt]: {}, using defaults", e));
        config.mqtt = Default::default();
    }

    let (axes, axis_errors) = build_axes(&config.axes);
    errors.extend(axis_errors);
    debug!("Built {} of {} configured axes", axes.len(), config.axes.len());

    (config, axes, errors)
}

async fn file_exists(path: &Path) -> Result<bool, ConfigError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{Direction, UnitKind};
    use crate::controller::device_table::{StickAxis, StickSide};

    const SAMPLE: &str = r#"
[engine]
tick_hz = 50
movement_stick = "right"

[mqtt]
host = "sim.local"
prefix = "cockpit"

[[axis]]
name = "throttle"
min = 0
max = 100
direction = "push"
secondary = "right"
detents = [100, 80]
allowed_external_change_per_second = 5.0

[axis.trigger]
pointer = 1

[[axis]]
name = "flaps"
min = 0
max = 4
unit = "count"
direction = "pull"
trim_source = "left_y"

[axis.trigger]
key = "F"
controller = "045e:028e"
controller_buttons = ["rb"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.engine.tick_hz, 50.0);
        assert_eq!(config.engine.movement_stick, Some(StickSide::Right));
        assert_eq!(config.engine.stick_gain, 8.0);
        assert_eq!(config.mqtt.host, "sim.local");
        assert_eq!(config.mqtt.port, 1883);

        let (config, axes, errors) = finish(config);
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(config.axes.len(), 2);

        let throttle = &axes[0];
        assert_eq!(throttle.directions().secondary(), Some(Direction::Right));
        assert!((throttle.behavior().detents.positive - 0.8).abs() < 1e-12);
        assert_eq!(throttle.behavior().allowed_external_change_per_second, Some(5.0));

        let flaps = &axes[1];
        assert_eq!(flaps.index(), 1);
        assert_eq!(flaps.unit_kind(), UnitKind::Count);
        assert_eq!(flaps.increment(), 1.0);
        assert_eq!(flaps.behavior().trim_source, Some(StickAxis::LeftY));
        assert!(flaps.triggers().controller.is_some());
    }

    #[test]
    fn test_invalid_sections_fall_back() {
        let config = parse_config("[engine]\ntick_hz = 0\n[mqtt]\nprefix = \"#\"\n").unwrap();
        let (config, axes, errors) = finish(config);
        assert!(axes.is_empty());
        assert_eq!(errors.len(), 2);
        assert_eq!(config.engine.tick_hz, 36.0);
        assert_eq!(config.mqtt.prefix, "axislink");
    }

    #[test]
    fn test_extreme_tick_rates_fall_back() {
        for rate in ["1e12", "1e-20"] {
            let config = parse_config(&format!("[engine]\ntick_hz = {}\n", rate)).unwrap();
            let (config, _, errors) = finish(config);
            assert_eq!(errors.len(), 1, "{:?}", errors);
            assert_eq!(config.engine.tick_hz, 36.0);
        }
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            parse_config("[[axis]\nname ="),
            Err(ConfigError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_load_from_explicit_path() {
        let path = std::env::temp_dir().join(format!("axislink-test-{}.toml", std::process::id()));
        tokio::fs::write(&path, SAMPLE).await.unwrap();
        let loaded = load_config(Some(&path)).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.axes.len(), 2);
        assert!(loaded.errors.is_empty());
    }

    #[tokio::test]
    async fn test_missing_explicit_path_is_an_error() {
        let path = std::env::temp_dir().join("axislink-does-not-exist.toml");
        assert!(matches!(
            load_config(Some(&path)).await,
            Err(ConfigError::NotFound(_))
        ));
    }
}
