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

/// Top-level `device` configuration section: which physical/mock driver to open.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Device {
    driver: Option<String>,
    index: Option<u32>,
}

impl Device {
    /// The driver backend name. `"mock"` selects the synthetic in-process driver.
    pub fn driver(&self) -> &str {
        self.driver.as_deref().unwrap_or("mock")
    }

    /// The device index to open when more than one device is attached.
    pub fn index(&self) -> u32 {
        self.index.unwrap_or(0)
    }
}
