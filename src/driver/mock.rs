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
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use rand::Rng;
use tracing::{info, span, Level};

use crate::cancel::CancelHandle;
use crate::frame::{
    now_ms, BodyRecord, HandState, Joint, JointName, RawBodyFrame, RawFrame, StreamKind,
    TrackingState, Vec3,
};
use crate::pool::BufferPool;

use super::{DeviceInfo, Driver, DriverError, LedMode};

const DEPTH_INFRARED_BODY_INTERVAL: Duration = Duration::from_millis(33);
const COLOR_INTERVAL: Duration = Duration::from_millis(33);

/// A synthetic driver that fabricates frames in-process. Used for tests and for running the
/// full pipeline on hardware that doesn't have a camera attached.
pub struct MockDriver {
    name: String,
    index: u32,
    led: Mutex<LedMode>,
    ir_emitter: Mutex<bool>,
    tilt: AtomicI8,
    open_streams: Mutex<Vec<StreamKind>>,
    seq: AtomicU64,
}

impl MockDriver {
    pub fn new(name: &str, index: u32) -> MockDriver {
        MockDriver {
            name: name.to_string(),
            index,
            led: Mutex::new(LedMode::Off),
            ir_emitter: Mutex::new(true),
            tilt: AtomicI8::new(0),
            open_streams: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub fn led(&self) -> LedMode {
        *self.led.lock().expect("led lock poisoned")
    }

    #[cfg(test)]
    pub fn tilt(&self) -> i8 {
        self.tilt.load(Ordering::Relaxed)
    }

    fn mark_open(&self, kind: StreamKind) -> Result<(), DriverError> {
        let mut open = self.open_streams.lock().expect("open_streams lock poisoned");
        if open.contains(&kind) {
            return Err(DriverError::AlreadyOpen(kind));
        }
        open.push(kind);
        Ok(())
    }

    /// Fills a pooled buffer with a synthetic ramp pattern so processing code has something
    /// non-trivial to filter, normalize, or colorize.
    fn fill_pixel_pattern(kind: StreamKind, buf: &mut [u8], tick: u64) {
        match kind {
            StreamKind::Depth | StreamKind::Infrared => {
                for (i, chunk) in buf.chunks_mut(2).enumerate() {
                    let value = ((i as u64 + tick * 7) % 4000) as u16 + 400;
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }
            StreamKind::Color => {
                for (i, chunk) in buf.chunks_mut(4).enumerate() {
                    let shade = ((i as u64 + tick * 5) % 256) as u8;
                    chunk.copy_from_slice(&[shade, shade.wrapping_add(32), shade.wrapping_add(64), 255]);
                }
            }
            StreamKind::Body => {}
        }
    }

    fn synthetic_body(tick: u64) -> BodyRecord {
        let sway = ((tick % 60) as f32 / 60.0 - 0.5) * 0.4;
        // A little per-tick jitter so smoothing/jitter-radius logic downstream has something
        // to actually filter, rather than a perfectly noiseless sway.
        let jitter = rand::thread_rng().gen_range(-0.01..0.01);
        let mut joints = HashMap::new();
        for name in [
            JointName::SpineBase,
            JointName::SpineMid,
            JointName::Neck,
            JointName::Head,
            JointName::ShoulderLeft,
            JointName::ElbowLeft,
            JointName::WristLeft,
            JointName::HandLeft,
            JointName::ShoulderRight,
            JointName::ElbowRight,
            JointName::WristRight,
            JointName::HandRight,
            JointName::HipLeft,
            JointName::KneeLeft,
            JointName::AnkleLeft,
            JointName::FootLeft,
            JointName::HipRight,
            JointName::KneeRight,
            JointName::AnkleRight,
            JointName::FootRight,
            JointName::SpineShoulder,
            JointName::HandTipLeft,
            JointName::ThumbLeft,
            JointName::HandTipRight,
            JointName::ThumbRight,
        ] {
            joints.insert(
                name,
                Joint {
                    position: Vec3 {
                        x: sway + jitter,
                        y: 0.0,
                        z: 2.0,
                    },
                    tracking_state: TrackingState::Tracked,
                    confidence: 0.95,
                    previous_position: None,
                },
            );
        }
        BodyRecord {
            tracking_id: 1,
            tracked: true,
            joints,
            left_hand: HandState::Open,
            right_hand: HandState::Open,
        }
    }
}

impl Driver for MockDriver {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            serial: format!("MOCK-{:04}", self.index),
            firmware_version: "0.0.0-mock".to_string(),
            supports_body_tracking: true,
        }
    }

    fn open_pixel_stream(
        &self,
        kind: StreamKind,
        pool: Arc<BufferPool>,
        sender: Sender<RawFrame>,
        cancel_handle: CancelHandle,
    ) -> Result<(), DriverError> {
        self.mark_open(kind)?;

        let span = span!(Level::INFO, "open pixel stream (mock)");
        let _enter = span.enter();
        info!(device = self.name, kind = %kind, "opening stream");

        let interval = if kind == StreamKind::Color {
            COLOR_INTERVAL
        } else {
            DEPTH_INFRARED_BODY_INTERVAL
        };

        thread::spawn(move || {
            let mut tick: u64 = 0;
            while !cancel_handle.is_cancelled() {
                let mut buf = match pool.acquire(kind) {
                    Ok(buf) => buf,
                    Err(err) => {
                        tracing::warn!(kind = %kind, error = %err, "dropping frame, pool exhausted");
                        thread::sleep(interval);
                        continue;
                    }
                };
                Self::fill_pixel_pattern(kind, buf.as_mut_slice(), tick);

                let frame = RawFrame {
                    kind,
                    data: buf,
                    captured_at_ms: now_ms(),
                    seq: tick,
                };
                if sender.send(frame).is_err() {
                    break;
                }

                tick += 1;
                thread::sleep(interval);
            }
        });

        Ok(())
    }

    fn open_body_stream(
        &self,
        sender: Sender<RawBodyFrame>,
        cancel_handle: CancelHandle,
    ) -> Result<(), DriverError> {
        self.mark_open(StreamKind::Body)?;

        thread::spawn(move || {
            let mut tick: u64 = 0;
            while !cancel_handle.is_cancelled() {
                let frame = RawBodyFrame {
                    bodies: vec![Self::synthetic_body(tick)],
                    captured_at_ms: now_ms(),
                    seq: tick,
                };
                if sender.send(frame).is_err() {
                    break;
                }
                tick += 1;
                thread::sleep(DEPTH_INFRARED_BODY_INTERVAL);
            }
        });

        Ok(())
    }

    fn set_led(&self, mode: LedMode) -> Result<(), DriverError> {
        *self.led.lock().expect("led lock poisoned") = mode;
        Ok(())
    }

    fn set_ir_emitter(&self, enabled: bool) -> Result<(), DriverError> {
        *self.ir_emitter.lock().expect("ir_emitter lock poisoned") = enabled;
        Ok(())
    }

    fn set_tilt(&self, angle_degrees: i8) -> Result<(), DriverError> {
        if !(-27..=27).contains(&angle_degrees) {
            return Err(DriverError::TiltOutOfRange(angle_degrees));
        }
        self.tilt.store(angle_degrees, Ordering::Relaxed);
        Ok(())
    }
}

impl fmt::Display for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crossbeam_channel::unbounded;

    use super::*;

    #[test]
    fn test_open_pixel_stream_emits_frames() {
        let driver = MockDriver::new("mock0", 0);
        let pool = Arc::new(BufferPool::new(2, 1, 8));
        let (tx, rx) = unbounded();
        let cancel_handle = CancelHandle::new();

        driver
            .open_pixel_stream(StreamKind::Depth, pool, tx, cancel_handle.clone())
            .expect("open stream");

        let frame = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("expected a frame");
        assert_eq!(StreamKind::Depth, frame.kind);
        assert!(!frame.data.is_empty());

        cancel_handle.cancel();
    }

    #[test]
    fn test_open_pixel_stream_rejects_double_open() {
        let driver = MockDriver::new("mock0", 0);
        let pool = Arc::new(BufferPool::new(2, 1, 8));
        let (tx, _rx) = unbounded();
        let cancel_handle = CancelHandle::new();

        driver
            .open_pixel_stream(StreamKind::Color, pool.clone(), tx.clone(), cancel_handle.clone())
            .expect("first open");
        let err = driver.open_pixel_stream(StreamKind::Color, pool, tx, cancel_handle.clone());
        assert!(matches!(err, Err(DriverError::AlreadyOpen(StreamKind::Color))));

        cancel_handle.cancel();
    }

    #[test]
    fn test_set_tilt_rejects_out_of_range() {
        let driver = MockDriver::new("mock0", 0);
        assert!(driver.set_tilt(28).is_err());
        assert!(driver.set_tilt(-28).is_err());
        assert!(driver.set_tilt(10).is_ok());
        assert_eq!(10, driver.tilt());
    }

    #[test]
    fn test_open_body_stream_emits_tracked_body() {
        let driver = MockDriver::new("mock0", 0);
        let (tx, rx) = unbounded();
        let cancel_handle = CancelHandle::new();

        driver
            .open_body_stream(tx, cancel_handle.clone())
            .expect("open body stream");

        let frame = rx.recv_timeout(Duration::from_secs(1)).expect("frame");
        assert_eq!(1, frame.bodies.len());
        assert!(frame.bodies[0].tracked);
        assert_eq!(25, frame.bodies[0].joints.len());

        cancel_handle.cancel();
    }
}
