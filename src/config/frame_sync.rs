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

use crate::frame::StreamKind;

use super::base_sensor::parse_duration;
use super::error::ConfigError;

const DEFAULT_SYNC_WINDOW: &str = "33ms";
const DEFAULT_DROP_AFTER: &str = "200ms";
const DEFAULT_BUFFER_SIZE: usize = 4;

/// Top-level `frame_sync` configuration section, governing the `MultiSourceSynchronizer`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FrameSync {
    enabled: Option<bool>,
    required_kinds: Option<Vec<String>>,
    sync_window: Option<String>,
    drop_after: Option<String>,
    buffer_size: Option<usize>,
}

impl FrameSync {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn required_kinds(&self) -> Result<Vec<StreamKind>, ConfigError> {
        self.required_kinds
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|name| {
                StreamKind::parse(name)
                    .ok_or_else(|| ConfigError::invalid(format!("unknown stream kind {name:?}")))
            })
            .collect()
    }

    pub fn sync_window(&self) -> Result<Duration, ConfigError> {
        parse_duration(self.sync_window.as_deref(), DEFAULT_SYNC_WINDOW)
    }

    pub fn drop_after(&self) -> Result<Duration, ConfigError> {
        parse_duration(self.drop_after.as_deref(), DEFAULT_DROP_AFTER)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled() {
            return Ok(());
        }
        if self.required_kinds()?.is_empty() {
            return Err(ConfigError::invalid(
                "frame_sync.required_kinds must declare at least one kind when frame_sync is enabled",
            ));
        }
        Ok(())
    }
}
