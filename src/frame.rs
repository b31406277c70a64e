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

//! Core domain types shared by the pool, worker, sensor, and synchronizer modules: stream
//! kinds, raw/processed frames, and the body-tracking skeleton.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pool::PooledBuffer;

/// One of the four independently-clocked streams the driver can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamKind {
    Depth,
    Infrared,
    Color,
    Body,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Depth,
        StreamKind::Infrared,
        StreamKind::Color,
        StreamKind::Body,
    ];

    /// Parses a config-file/wire-protocol string into a `StreamKind`, case-insensitively.
    pub fn parse(s: &str) -> Option<StreamKind> {
        match s.to_ascii_lowercase().as_str() {
            "depth" => Some(StreamKind::Depth),
            "infrared" | "ir" => Some(StreamKind::Infrared),
            "color" | "colour" => Some(StreamKind::Color),
            "body" => Some(StreamKind::Body),
            _ => None,
        }
    }

    /// The frame's element width in bytes (16-bit for depth/infrared, RGBA for color, 0 for
    /// body since body frames are records rather than pixel buffers).
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            StreamKind::Depth | StreamKind::Infrared => 2,
            StreamKind::Color => 4,
            StreamKind::Body => 0,
        }
    }

    /// The expected pixel dimensions for this stream kind.
    pub const fn dimensions(self) -> (u32, u32) {
        match self {
            StreamKind::Depth | StreamKind::Infrared => (512, 424),
            StreamKind::Color => (1920, 1080),
            StreamKind::Body => (0, 0),
        }
    }

    /// The expected raw buffer size in bytes for a frame of this kind, or `None` for body
    /// (whose raw frame is a variable-length body-record array, not a fixed pixel buffer).
    pub fn expected_byte_len(self) -> Option<usize> {
        if self == StreamKind::Body {
            return None;
        }
        let (w, h) = self.dimensions();
        Some(w as usize * h as usize * self.bytes_per_pixel())
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Depth => "depth",
            StreamKind::Infrared => "infrared",
            StreamKind::Color => "color",
            StreamKind::Body => "body",
        };
        write!(f, "{name}")
    }
}

/// A raw frame as delivered by the driver: a pool-owned buffer plus a monotonic capture
/// timestamp in milliseconds. Dropping the `RawFrame` returns `data` to the `BufferPool`.
pub struct RawFrame {
    pub kind: StreamKind,
    pub data: PooledBuffer,
    pub captured_at_ms: u64,
    pub seq: u64,
}

/// A raw body-tracking frame as delivered by the driver. Body frames carry a variable-length
/// record array rather than a pooled pixel buffer, so they bypass the `BufferPool` entirely.
pub struct RawBodyFrame {
    pub bodies: Vec<BodyRecord>,
    pub captured_at_ms: u64,
    pub seq: u64,
}

/// A monotonic millisecond clock rooted at process start, used throughout the pipeline
/// instead of wall-clock time so frame ordering is immune to clock adjustments.
pub fn now_ms() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

/// The canonical 25-joint skeleton. Joints are addressed exclusively by name; no integer
/// index is used anywhere in the body worker or its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JointName {
    SpineBase,
    SpineMid,
    Neck,
    Head,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
    SpineShoulder,
    HandTipLeft,
    ThumbLeft,
    HandTipRight,
    ThumbRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }

    pub fn scale(self, s: f32) -> Vec3 {
        Vec3 {
            x: self.x * s,
            y: self.y * s,
            z: self.z * s,
        }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Joint tracking confidence reported by the driver. Ordering matters: `> NotTracked` is
/// used by center-of-mass/AABB computation to select included joints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackingState {
    NotTracked = 0,
    Inferred = 1,
    Tracked = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub position: Vec3,
    pub tracking_state: TrackingState,
    pub confidence: f32,
    pub previous_position: Option<Vec3>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandState {
    Unknown,
    NotTracked,
    Open,
    Closed,
    Lasso,
}

/// A single tracked (or untracked) body as delivered by the driver, before smoothing.
#[derive(Debug, Clone)]
pub struct BodyRecord {
    pub tracking_id: u64,
    pub tracked: bool,
    pub joints: HashMap<JointName, Joint>,
    pub left_hand: HandState,
    pub right_hand: HandState,
}

/// A swipe gesture direction, detected from the right-hand joint's spine-relative motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Swipe {
    Left,
    Right,
}

/// The kind-specific output of a `ProcessingWorker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    Depth {
        processed: Vec<f32>,
        width: u32,
        height: u32,
        min_depth: u16,
        max_depth: u16,
        point_cloud: Option<Vec<[f32; 3]>>,
        colorized: Option<Vec<[u8; 3]>>,
    },
    Infrared {
        processed: Vec<f32>,
        width: u32,
        height: u32,
        format: String,
    },
    Color {
        processed: Vec<u8>,
        width: u32,
        height: u32,
        format: String,
        compressed: bool,
    },
    Body {
        bodies: Vec<ProcessedBody>,
        timestamp_ms: u64,
    },
}

/// A single body after smoothing and the optional derived-metric passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedBody {
    pub tracking_id: u64,
    pub joints: HashMap<JointName, Joint>,
    pub center_of_mass: Option<Vec3>,
    pub bounds: Option<(Vec3, Vec3)>,
    pub confidence: Option<f32>,
    pub velocities: Option<HashMap<JointName, Vec3>>,
}

/// The fully processed output of a worker, ready to hand to the Supervisor for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedFrame {
    pub kind: StreamKind,
    pub seq: u64,
    pub captured_at_ms: u64,
    pub emitted_at_ms: u64,
    pub payload: Payload,
    pub process_time_ms: f64,
}

/// A bundle of per-kind frame references assembled by the `MultiSourceSynchronizer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBundle {
    pub timestamp_ms: u64,
    pub frames: HashMap<StreamKind, ProcessedFrame>,
    pub max_delay_ms: u64,
}
