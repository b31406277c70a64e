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

use serde::Deserialize;

use super::base_sensor::parse_duration;
use super::error::ConfigError;
use super::pool::BufferPool;

const DEFAULT_STATS_INTERVAL: &str = "5s";

/// Top-level `service` configuration section.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Service {
    #[serde(default)]
    pub buffer_pool: BufferPool,
    stats_interval: Option<String>,
    auto_start: Option<Vec<String>>,
}

impl Service {
    /// How often the Supervisor broadcasts a `stats` summary message.
    pub fn stats_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(self.stats_interval.as_deref(), DEFAULT_STATS_INTERVAL)
    }

    /// Stream kinds to start automatically when the service comes up.
    pub fn auto_start(&self) -> &[String] {
        self.auto_start.as_deref().unwrap_or(&[])
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        self.buffer_pool.validate()
    }
}
