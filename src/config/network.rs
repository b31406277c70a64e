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

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 9102;
const DEFAULT_IDENTIFICATION_TIMEOUT: &str = "5s";

/// Top-level `network` configuration section.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Network {
    #[serde(default)]
    pub websocket: Websocket,
}

/// The `network.websocket` section. The name is carried over from the subscriber wire
/// protocol's historical label; the transport itself is length-delimited framed TCP (see
/// `broadcaster`), not a browser WebSocket upgrade.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Websocket {
    host: Option<String>,
    port: Option<u16>,
    identification_timeout: Option<String>,
}

impl Websocket {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn identification_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            self.identification_timeout.as_deref(),
            DEFAULT_IDENTIFICATION_TIMEOUT,
        )
    }
}
