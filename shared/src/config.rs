use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::constants::{
    DEFAULT_CONNECT_READY_DELAY_MS, DEFAULT_DEBOUNCE_DELAY_MS, DEFAULT_HIGH_WATER_MARK,
    DEFAULT_MAX_DEBOUNCE_WAIT_MS, DEFAULT_REQUEST_TIMEOUT_MS,
};
use crate::display::ViewerKind;
use crate::errors::ConfigError;

/// Transport mode of a destination, fixed at configuration time.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[derive(strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ChannelMode {
    /// Blocking send; the producer waits for one ack per item.
    Reqrep,
    /// Fire-and-forget with a bounded outbound queue; full queue drops.
    Publish,
}

/// Full application configuration, loaded from TOML.
#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Socket and queue settings `[transport]`
    #[serde(default)]
    pub transport: TransportConfig,
    /// Receiver batching settings `[engine]`
    #[serde(default)]
    pub engine: EngineConfig,
    /// Receiver listener `[listener]`; absent in producer-only processes
    #[serde(default)]
    pub listener: Option<ListenerConfig>,
    /// Named destinations under `[destinations.<name>]`
    #[serde(default)]
    pub destinations: HashMap<String, DestinationConfig>,
}

/// Transport section `[transport]`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    /// Grace period after a publisher connect before the first frame
    pub connect_ready_delay_ms: u64,
    /// Deadline for a request/reply send
    pub request_timeout_ms: u64,
    /// Outbound queue bound; a full queue drops the batch
    pub high_water_mark: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            connect_ready_delay_ms: DEFAULT_CONNECT_READY_DELAY_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

/// Receiver batching section `[engine]`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet period after the last arrival before a flush
    pub debounce_delay_ms: u64,
    /// Cap on total wait while arrivals keep coming
    pub max_debounce_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            debounce_delay_ms: DEFAULT_DEBOUNCE_DELAY_MS,
            max_debounce_wait_ms: DEFAULT_MAX_DEBOUNCE_WAIT_MS,
        }
    }
}

/// Listener section `[listener]` for the viewer host.
#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    /// Bind address, e.g. `127.0.0.1:5556`
    pub bind: String,
    /// Viewer family served by this host
    pub viewer: ViewerKind,
    /// Ack contract for incoming connections
    pub mode: ChannelMode,
}

/// One `[destinations.<name>]` entry.
#[derive(Debug, Deserialize, Clone)]
pub struct DestinationConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    pub viewer: ViewerKind,
    pub mode: ChannelMode,
}

impl DestinationConfig {
    /// Canonical `host:port` key used for publisher pooling and tracker
    /// registration.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

impl StreamConfig {
    /// Load, parse, and validate a `StreamConfig` from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let cfg: StreamConfig = toml::from_str(&s).map_err(ConfigError::Parse)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve a destination by name.
    pub fn destination(&self, name: &str) -> Result<&DestinationConfig, ConfigError> {
        self.destinations
            .get(name)
            .ok_or_else(|| ConfigError::UnknownDestination(name.to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.high_water_mark == 0 {
            return Err(ConfigError::Validation(
                "transport.high_water_mark must be > 0".into(),
            ));
        }
        if self.engine.max_debounce_wait_ms < self.engine.debounce_delay_ms {
            return Err(ConfigError::Validation(
                "engine.max_debounce_wait_ms must be >= engine.debounce_delay_ms".into(),
            ));
        }
        for (name, dest) in &self.destinations {
            if dest.port == 0 {
                return Err(ConfigError::Validation(format!(
                    "destinations.{name}.port must be > 0"
                )));
            }
            if dest.host.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "destinations.{name}.host must not be empty"
                )));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn from_str(toml: &str) -> Result<Self, ConfigError> {
        let cfg: StreamConfig = toml::from_str(toml).map_err(ConfigError::Parse)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    [transport]
    connect_ready_delay_ms = 50
    request_timeout_ms = 2000
    high_water_mark = 512

    [engine]
    debounce_delay_ms = 250
    max_debounce_wait_ms = 1500

    [listener]
    bind = "127.0.0.1:5556"
    viewer = "fiji"
    mode = "publish"

    [destinations.fiji_main]
    host = "localhost"
    port = 5556
    viewer = "fiji"
    mode = "publish"

    [destinations.napari_ack]
    port = 5557
    viewer = "napari"
    mode = "reqrep"
    "#;

    #[test]
    fn load_reads_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let cfg = StreamConfig::load(&path).unwrap();
        assert_eq!(cfg.transport.high_water_mark, 512);

        assert!(matches!(
            StreamConfig::load(&dir.path().join("missing.toml")).unwrap_err(),
            ConfigError::Io { .. }
        ));
    }

    #[test]
    fn parse_full_config() {
        let cfg = StreamConfig::from_str(SAMPLE).expect("should parse full sample");

        assert_eq!(cfg.transport.connect_ready_delay_ms, 50);
        assert_eq!(cfg.transport.request_timeout_ms, 2000);
        assert_eq!(cfg.transport.high_water_mark, 512);

        assert_eq!(cfg.engine.debounce_delay_ms, 250);
        assert_eq!(cfg.engine.max_debounce_wait_ms, 1500);

        let listener = cfg.listener.as_ref().expect("listener section");
        assert_eq!(listener.bind, "127.0.0.1:5556");
        assert_eq!(listener.viewer, ViewerKind::Fiji);
        assert_eq!(listener.mode, ChannelMode::Publish);

        let fiji = cfg.destination("fiji_main").unwrap();
        assert_eq!(fiji.key(), "localhost:5556");
        assert_eq!(fiji.mode, ChannelMode::Publish);

        let napari = cfg.destination("napari_ack").unwrap();
        assert_eq!(napari.host, "localhost");
        assert_eq!(napari.viewer, ViewerKind::Napari);
        assert_eq!(napari.mode, ChannelMode::Reqrep);
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg = StreamConfig::from_str("").unwrap();
        assert_eq!(cfg.transport.high_water_mark, DEFAULT_HIGH_WATER_MARK);
        assert_eq!(cfg.engine.debounce_delay_ms, DEFAULT_DEBOUNCE_DELAY_MS);
        assert!(cfg.listener.is_none());
        assert!(cfg.destinations.is_empty());
    }

    #[test]
    fn unknown_destination_is_an_error() {
        let cfg = StreamConfig::from_str("").unwrap();
        assert!(matches!(
            cfg.destination("nope").unwrap_err(),
            ConfigError::UnknownDestination(name) if name == "nope"
        ));
    }

    #[test]
    fn zero_port_fails_validation() {
        let toml = r#"
        [destinations.bad]
        port = 0
        viewer = "fiji"
        mode = "publish"
        "#;
        assert!(matches!(
            StreamConfig::from_str(toml).unwrap_err(),
            ConfigError::Validation(_)
        ));
    }

    #[test]
    fn max_wait_below_debounce_fails_validation() {
        let toml = r#"
        [engine]
        debounce_delay_ms = 1000
        max_debounce_wait_ms = 500
        "#;
        assert!(matches!(
            StreamConfig::from_str(toml).unwrap_err(),
            ConfigError::Validation(_)
        ));
    }

    #[test]
    fn invalid_mode_fails_parse() {
        let toml = r#"
        [destinations.bad]
        port = 5556
        viewer = "fiji"
        mode = "multicast"
        "#;
        assert!(matches!(
            StreamConfig::from_str(toml).unwrap_err(),
            ConfigError::Parse(_)
        ));
    }
}
