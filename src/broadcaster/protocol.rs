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

//! The tagged JSON records exchanged with subscribers, carried over length-delimited framed
//! TCP. `type` is the serde tag, matching the wire convention named in the sensor/gesture/
//! sync/control messages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::frame::{JointName, ProcessedFrame, StreamKind, SyncBundle, Swipe, Vec3};

/// Inbound messages a subscriber may send after identification (or, for `Identify`, before).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Identify {
        name: String,
        version: String,
        platform: String,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    StartSensor {
        sensor_type: String,
    },
    StopSensor {
        sensor_type: String,
    },
    #[serde(rename = "setLED")]
    SetLed {
        color: String,
    },
    #[serde(rename = "setIREmitter")]
    SetIrEmitter {
        enabled: bool,
    },
    SetTilt {
        angle: i8,
    },
    RequestDeviceInfo,
}

/// Outbound messages the Broadcaster sends to one or all subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Identify {
        client_id: String,
    },
    Welcome {
        session_id: String,
        server_version: String,
        timestamp: u64,
    },
    Error {
        error: String,
    },
    Frame {
        sensor_type: StreamKind,
        data: ProcessedFrame,
    },
    Movement {
        sensor_type: StreamKind,
        tracking_id: u64,
        velocities: HashMap<JointName, Vec3>,
    },
    Gesture {
        sensor_type: StreamKind,
        tracking_id: u64,
        swipe: Swipe,
    },
    FrameSync {
        frame: SyncBundle,
    },
    Stats {
        stats: serde_json::Value,
    },
    DeviceInfo {
        info: serde_json::Value,
    },
    Close {
        code: u16,
        reason: String,
    },
}

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
