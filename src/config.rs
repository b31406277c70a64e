// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::path::Path;

use config::{Config as RawConfig, Environment, File};
use serde::Deserialize;

mod base_sensor;
mod debug;
mod device;
mod error;
mod frame_sync;
mod network;
mod pool;
mod sensors;
mod service;

pub use base_sensor::BaseSensor;
pub use debug::Debug;
pub use device::Device;
pub use error::ConfigError;
pub use frame_sync::FrameSync;
pub use network::{Network, Websocket};
pub use pool::BufferPool;
pub use sensors::{BodySensor, ColorSensor, DepthSensor, InfraredSensor, Sensors};
pub use service::Service;

/// The environment variable prefix used for configuration overrides, e.g.
/// `VISIONBRIDGE_NETWORK__WEBSOCKET__PORT=9200`.
const ENV_PREFIX: &str = "VISIONBRIDGE";

/// The full, validated configuration for the service.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    base_sensor: BaseSensor,
    #[serde(default)]
    pub service: Service,
    #[serde(default)]
    pub sensors: Sensors,
    #[serde(default)]
    pub device: Device,
    #[serde(default)]
    pub frame_sync: FrameSync,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    /// Loads configuration from a file, layering `VISIONBRIDGE_`-prefixed environment
    /// variables on top, then validates it.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = RawConfig::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: Config = raw.try_deserialize()?;
        cfg.resolve();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Merges `base_sensor` defaults down into each per-kind sensor section. Called once
    /// after deserialization so that sensor code only ever reads the resolved values.
    fn resolve(&mut self) {
        self.sensors.resolve(&self.base_sensor);
    }

    /// Rejects contradictory configuration (e.g. `initial_size > max_pool_size`, an empty
    /// `frame_sync.required_kinds` while `frame_sync.enabled`) before it reaches any component.
    fn validate(&self) -> Result<(), ConfigError> {
        self.service.validate()?;
        self.sensors.validate()?;
        self.frame_sync.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".yaml").expect("failed to create temp file");
        file.write_all(contents.as_bytes())
            .expect("failed to write config");
        file
    }

    #[test]
    fn test_defaults_when_empty() {
        let file = write_config("{}");
        let cfg = Config::load(file.path()).expect("expected config to load");
        assert!(cfg.sensors.depth.enabled());
        assert_eq!(500, cfg.sensors.depth.min_distance());
        assert_eq!(9102, cfg.network.websocket.port());
    }

    #[test]
    fn test_rejects_contradictory_pool_sizes() {
        let file = write_config(
            r#"
service:
  buffer_pool:
    initial_size: 100
    max_pool_size: 10
"#,
        );
        let err = Config::load(file.path()).expect_err("expected a validation error");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_frame_sync_with_no_kinds() {
        let file = write_config(
            r#"
frame_sync:
  enabled: true
"#,
        );
        let err = Config::load(file.path()).expect_err("expected a validation error");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_base_sensor_overridden_by_kind() {
        let file = write_config(
            r#"
base_sensor:
  max_queue_size: 3
sensors:
  depth:
    max_queue_size: 10
"#,
        );
        let cfg = Config::load(file.path()).expect("expected config to load");
        assert_eq!(10, cfg.sensors.depth.base().max_queue_size());
        assert_eq!(3, cfg.sensors.color.base().max_queue_size());
    }
}
