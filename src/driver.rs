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

//! The `Driver` trait abstracts over the physical device. Only one implementation ships
//! today (`mock`, a synthetic frame generator), but the trait boundary is where a real
//! libfreenect/libusb-backed driver would plug in without touching anything upstream of it.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use thiserror::Error;

use crate::cancel::CancelHandle;
use crate::frame::{RawBodyFrame, RawFrame, StreamKind};
use crate::pool::BufferPool;

mod mock;

pub use mock::MockDriver;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{0} stream is already open")]
    AlreadyOpen(StreamKind),

    #[error("buffer pool error: {0}")]
    Pool(#[from] crate::pool::PoolError),

    #[error("tilt angle {0} out of range (-27..=27)")]
    TiltOutOfRange(i8),

    #[error("driver I/O error: {0}")]
    Io(String),
}

/// Static information about the opened device, reported in the Supervisor's `deviceInfo`
/// broadcast message.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub firmware_version: String,
    pub supports_body_tracking: bool,
}

/// LED color/blink mode, mirroring the historical Kinect LED control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedMode {
    Off,
    Green,
    Red,
    Yellow,
    BlinkGreen,
}

/// A camera device capable of streaming depth/infrared/color pixel frames and body-tracking
/// records, plus a small set of hardware controls.
pub trait Driver: fmt::Display + Send + Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Returns static device metadata for the `deviceInfo` broadcast.
    fn device_info(&self) -> DeviceInfo;

    /// Opens a pixel stream (depth, infrared, or color) and spawns a thread that pushes
    /// `RawFrame`s onto `sender` until `cancel_handle` is cancelled. Buffers are drawn from
    /// `pool`. Returns once the capture thread has started, not once it's finished.
    fn open_pixel_stream(
        &self,
        kind: StreamKind,
        pool: Arc<BufferPool>,
        sender: Sender<RawFrame>,
        cancel_handle: CancelHandle,
    ) -> Result<(), DriverError>;

    /// Opens the body-tracking stream and spawns a thread that pushes `RawBodyFrame`s onto
    /// `sender` until `cancel_handle` is cancelled.
    fn open_body_stream(
        &self,
        sender: Sender<RawBodyFrame>,
        cancel_handle: CancelHandle,
    ) -> Result<(), DriverError>;

    /// Sets the status LED.
    fn set_led(&self, mode: LedMode) -> Result<(), DriverError>;

    /// Enables or disables the IR emitter.
    fn set_ir_emitter(&self, enabled: bool) -> Result<(), DriverError>;

    /// Sets the motor tilt angle in degrees, within `-27..=27`.
    fn set_tilt(&self, angle_degrees: i8) -> Result<(), DriverError>;
}

/// Opens a driver by name. `"mock"` (or any name starting with `mock`) selects the synthetic
/// in-process driver; no other backend is implemented.
pub fn get_driver(name: &str, index: u32) -> Result<Arc<dyn Driver>, DriverError> {
    if name.starts_with("mock") {
        return Ok(Arc::new(MockDriver::new(name, index)));
    }
    Err(DriverError::Io(format!("unknown driver backend {name:?}")))
}

#[cfg(test)]
pub mod test {
    pub use super::mock::MockDriver;
}
