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

use super::base_sensor::BaseSensor;
use super::error::ConfigError;

const DEFAULT_MIN_DISTANCE: u16 = 500;
const DEFAULT_MAX_DISTANCE: u16 = 4500;
const DEFAULT_GESTURE_THRESHOLD: f32 = 0.35;
const DEFAULT_CORRECTION: f32 = 0.5;
const DEFAULT_MAX_DEVIATION: f32 = 0.25;
const DEFAULT_JITTER_RADIUS: f32 = 0.03;

/// The top-level `sensors` configuration section: one entry per stream kind.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Sensors {
    #[serde(default)]
    pub depth: DepthSensor,
    #[serde(default)]
    pub color: ColorSensor,
    #[serde(default)]
    pub infrared: InfraredSensor,
    #[serde(default)]
    pub body: BodySensor,
}

impl Sensors {
    pub(super) fn resolve(&mut self, base: &BaseSensor) {
        self.depth.base = base.overridden_by(&self.depth.base);
        self.color.base = base.overridden_by(&self.color.base);
        self.infrared.base = base.overridden_by(&self.infrared.base);
        self.body.base = base.overridden_by(&self.body.base);
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        self.depth.validate()?;
        self.body.validate()?;
        Ok(())
    }
}

/// Per-sensor enable flag plus base-sensor override, shared shape across all kinds.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DepthSensor {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(flatten)]
    base: BaseSensor,
    min_distance: Option<u16>,
    max_distance: Option<u16>,
    normalize: Option<bool>,
    gamma: Option<bool>,
    point_cloud: Option<bool>,
    colorize: Option<String>,
    focal_length: Option<f32>,
    principal_point_x: Option<f32>,
    principal_point_y: Option<f32>,
}

impl DepthSensor {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn base(&self) -> &BaseSensor {
        &self.base
    }

    pub fn min_distance(&self) -> u16 {
        self.min_distance.unwrap_or(DEFAULT_MIN_DISTANCE)
    }

    pub fn max_distance(&self) -> u16 {
        self.max_distance.unwrap_or(DEFAULT_MAX_DISTANCE)
    }

    pub fn normalize(&self) -> bool {
        self.normalize.unwrap_or(true)
    }

    pub fn gamma(&self) -> bool {
        self.gamma.unwrap_or(false)
    }

    pub fn point_cloud(&self) -> bool {
        self.point_cloud.unwrap_or(false)
    }

    pub fn colorize(&self) -> Option<&str> {
        self.colorize.as_deref()
    }

    /// Returns the calibration triple `(focal_length, ppx, ppy)` when point-cloud
    /// generation is enabled and the calibration is well-formed.
    pub fn calibration(&self) -> Result<(f32, f32, f32), ConfigError> {
        let focal_length = self.focal_length.unwrap_or(365.0);
        let ppx = self.principal_point_x.unwrap_or(256.0);
        let ppy = self.principal_point_y.unwrap_or(212.0);
        if focal_length <= 0.0 {
            return Err(ConfigError::invalid("depth focal_length must be > 0"));
        }
        if !ppx.is_finite() || !ppy.is_finite() {
            return Err(ConfigError::invalid(
                "depth principal point must be finite",
            ));
        }
        Ok((focal_length, ppx, ppy))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_distance() >= self.max_distance() {
            return Err(ConfigError::invalid(
                "sensors.depth.min_distance must be less than max_distance",
            ));
        }
        if self.point_cloud.unwrap_or(false) {
            self.calibration()?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InfraredSensor {
    enabled: Option<bool>,
    #[serde(flatten)]
    base: BaseSensor,
    gamma: Option<bool>,
}

impl InfraredSensor {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn base(&self) -> &BaseSensor {
        &self.base
    }

    pub fn gamma(&self) -> bool {
        self.gamma.unwrap_or(false)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ColorSensor {
    enabled: Option<bool>,
    #[serde(flatten)]
    base: BaseSensor,
    force_alpha: Option<bool>,
    compress: Option<bool>,
    compression_format: Option<String>,
    compression_quality: Option<u8>,
}

impl ColorSensor {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn base(&self) -> &BaseSensor {
        &self.base
    }

    pub fn force_alpha(&self) -> bool {
        self.force_alpha.unwrap_or(true)
    }

    pub fn compress(&self) -> bool {
        self.compress.unwrap_or(false)
    }

    pub fn compression_format(&self) -> &str {
        self.compression_format.as_deref().unwrap_or("jpeg")
    }

    pub fn compression_quality(&self) -> u8 {
        self.compression_quality.unwrap_or(80)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BodySensor {
    enabled: Option<bool>,
    #[serde(flatten)]
    base: BaseSensor,
    correction: Option<f32>,
    max_deviation: Option<f32>,
    jitter_radius: Option<f32>,
    velocities: Option<bool>,
    bounds: Option<bool>,
    confidence: Option<bool>,
    gestures: Option<bool>,
    gesture_threshold: Option<f32>,
}

impl BodySensor {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn base(&self) -> &BaseSensor {
        &self.base
    }

    pub fn correction(&self) -> f32 {
        self.correction.unwrap_or(DEFAULT_CORRECTION)
    }

    pub fn max_deviation(&self) -> f32 {
        self.max_deviation.unwrap_or(DEFAULT_MAX_DEVIATION)
    }

    pub fn jitter_radius(&self) -> f32 {
        self.jitter_radius.unwrap_or(DEFAULT_JITTER_RADIUS)
    }

    pub fn velocities(&self) -> bool {
        self.velocities.unwrap_or(true)
    }

    pub fn bounds(&self) -> bool {
        self.bounds.unwrap_or(true)
    }

    pub fn confidence(&self) -> bool {
        self.confidence.unwrap_or(true)
    }

    pub fn gestures(&self) -> bool {
        self.gestures.unwrap_or(true)
    }

    pub fn gesture_threshold(&self) -> f32 {
        self.gesture_threshold.unwrap_or(DEFAULT_GESTURE_THRESHOLD)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_deviation() <= 0.0 || self.jitter_radius() < 0.0 {
            return Err(ConfigError::invalid(
                "sensors.body max_deviation must be > 0 and jitter_radius must be >= 0",
            ));
        }
        Ok(())
    }
}
