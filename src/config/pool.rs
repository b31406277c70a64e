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
use serde::Deserialize;

use super::error::ConfigError;

const DEFAULT_INITIAL_SIZE: usize = 4;
const DEFAULT_EXPAND_SIZE: usize = 2;
const DEFAULT_MAX_POOL_SIZE: usize = 64;

/// Sizing for the per-kind `BufferPool`, nested under `service.buffer_pool`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BufferPool {
    initial_size: Option<usize>,
    expand_size: Option<usize>,
    max_pool_size: Option<usize>,
}

impl BufferPool {
    pub fn initial_size(&self) -> usize {
        self.initial_size.unwrap_or(DEFAULT_INITIAL_SIZE)
    }

    pub fn expand_size(&self) -> usize {
        self.expand_size.unwrap_or(DEFAULT_EXPAND_SIZE)
    }

    pub fn max_pool_size(&self) -> usize {
        self.max_pool_size.unwrap_or(DEFAULT_MAX_POOL_SIZE)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_size() > self.max_pool_size() {
            return Err(ConfigError::invalid(
                "service.buffer_pool.initial_size must not exceed max_pool_size",
            ));
        }
        if self.expand_size() == 0 {
            return Err(ConfigError::invalid(
                "service.buffer_pool.expand_size must be greater than zero",
            ));
        }
        Ok(())
    }
}
