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

/// Top-level `debug` configuration section.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Debug {
    log_level: Option<String>,
    logging: Option<bool>,
    #[serde(default)]
    pub performance: Performance,
}

impl Debug {
    /// The `tracing`/`EnvFilter` level directive to install at startup.
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Whether structured logging is enabled at all (disabling still allows panics to surface).
    pub fn logging(&self) -> bool {
        self.logging.unwrap_or(true)
    }
}

/// The `debug.performance` section: per-frame processing-time diagnostics.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Performance {
    log_process_time: Option<bool>,
}

impl Performance {
    pub fn log_process_time(&self) -> bool {
        self.log_process_time.unwrap_or(false)
    }
}
