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
use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;

const DEFAULT_MAX_QUEUE_SIZE: usize = 3;
const DEFAULT_HEALTH_CHECK_INTERVAL: &str = "5s";
const DEFAULT_FRAME_TIMEOUT: &str = "2s";
const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Settings shared by every sensor kind unless overridden in `sensors.<kind>`.
#[derive(Debug, Deserialize, Clone)]
pub struct BaseSensor {
    max_queue_size: Option<usize>,
    health_check_interval: Option<String>,
    frame_timeout: Option<String>,
    max_restarts: Option<u32>,
}

impl Default for BaseSensor {
    fn default() -> BaseSensor {
        BaseSensor {
            max_queue_size: None,
            health_check_interval: None,
            frame_timeout: None,
            max_restarts: None,
        }
    }
}

impl BaseSensor {
    /// The maximum number of raw frames a sensor will hold while its worker is busy.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE)
    }

    /// How often the sensor probes its worker with a health-check message.
    pub fn health_check_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            self.health_check_interval.as_deref(),
            DEFAULT_HEALTH_CHECK_INTERVAL,
        )
    }

    /// How long the sensor will wait for a worker to respond before restarting it.
    pub fn frame_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(self.frame_timeout.as_deref(), DEFAULT_FRAME_TIMEOUT)
    }

    /// The number of consecutive worker restarts tolerated before the sensor stops itself.
    pub fn max_restarts(&self) -> u32 {
        self.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS)
    }

    /// Merges an override on top of this base, preferring the override's values where present.
    pub(super) fn overridden_by(&self, over: &BaseSensor) -> BaseSensor {
        BaseSensor {
            max_queue_size: over.max_queue_size.or(self.max_queue_size),
            health_check_interval: over
                .health_check_interval
                .clone()
                .or_else(|| self.health_check_interval.clone()),
            frame_timeout: over.frame_timeout.clone().or_else(|| self.frame_timeout.clone()),
            max_restarts: over.max_restarts.or(self.max_restarts),
        }
    }
}

pub(super) fn parse_duration(value: Option<&str>, default: &str) -> Result<Duration, ConfigError> {
    let raw = value.unwrap_or(default);
    DurationString::from_string(raw.to_string())
        .map(Into::into)
        .map_err(|e| ConfigError::invalid(format!("invalid duration {raw:?}: {e}")))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let base = BaseSensor::default();
        assert_eq!(DEFAULT_MAX_QUEUE_SIZE, base.max_queue_size());
        assert_eq!(DEFAULT_MAX_RESTARTS, base.max_restarts());
        assert_eq!(Duration::from_secs(5), base.health_check_interval().unwrap());
        assert_eq!(Duration::from_secs(2), base.frame_timeout().unwrap());
    }

    #[test]
    fn test_override_prefers_override_values() {
        let base = BaseSensor {
            max_queue_size: Some(3),
            health_check_interval: Some("5s".into()),
            frame_timeout: Some("2s".into()),
            max_restarts: Some(3),
        };
        let over = BaseSensor {
            max_queue_size: Some(10),
            health_check_interval: None,
            frame_timeout: None,
            max_restarts: None,
        };
        let merged = base.overridden_by(&over);
        assert_eq!(10, merged.max_queue_size());
        assert_eq!(3, merged.max_restarts());
    }
}
