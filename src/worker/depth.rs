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
use rayon::prelude::*;

use crate::frame::Payload;

use super::WorkerError;

#[derive(Debug, Clone)]
pub struct DepthParams {
    pub width: u32,
    pub height: u32,
    pub min_distance: u16,
    pub max_distance: u16,
    pub normalize: bool,
    pub gamma: bool,
    pub point_cloud: bool,
    pub colorize: Option<String>,
    pub focal_length: f32,
    pub principal_point_x: f32,
    pub principal_point_y: f32,
}

/// Applies the depth worker's reliability filter, optional normalization/gamma, optional
/// point-cloud projection, and optional LUT colorization.
pub fn process(raw: &[u8], params: &DepthParams) -> Result<Payload, WorkerError> {
    let expected_len = params.width as usize * params.height as usize * 2;
    if raw.len() != expected_len {
        return Err(WorkerError::InvalidBufferLength {
            expected: expected_len,
            actual: raw.len(),
        });
    }
    if params.point_cloud && params.focal_length <= 0.0 {
        return Err(WorkerError::InvalidCalibration(
            "focal_length must be positive".to_string(),
        ));
    }

    let pixel_count = params.width as usize * params.height as usize;
    let range = (params.max_distance - params.min_distance).max(1) as f32;
    let width = params.width as usize;

    // Per-pixel work is independent, so the hot loop fans out across rayon's global pool
    // rather than running single-threaded; point-cloud projection and LUT colorization are
    // the expensive parts at 512x424 resolution.
    let per_pixel: Vec<(f32, Option<[f32; 3]>, Option<[u8; 3]>)> = (0..pixel_count)
        .into_par_iter()
        .map(|i| {
            let raw_value = u16::from_le_bytes([raw[i * 2], raw[i * 2 + 1]]);
            let valid = raw_value >= params.min_distance && raw_value <= params.max_distance;

            let normalized = if valid {
                let mut n = (raw_value - params.min_distance) as f32 / range;
                if params.gamma {
                    n = n.powf(0.5);
                }
                n
            } else {
                0.0
            };
            let value = if params.normalize { normalized } else { raw_value as f32 };

            let point = if params.point_cloud && valid {
                let x = (i % width) as f32;
                let y = (i / width) as f32;
                let z = raw_value as f32;
                let x_prime = (x - params.principal_point_x) * z / params.focal_length;
                let y_prime = (y - params.principal_point_y) * z / params.focal_length;
                Some([x_prime, y_prime, z])
            } else {
                None
            };

            let color = params.colorize.is_some().then(|| colorize_turbo(normalized));

            (value, point, color)
        })
        .collect();

    let mut processed = Vec::with_capacity(pixel_count);
    let mut point_cloud = params.point_cloud.then(Vec::new);
    let mut colorized = params.colorize.is_some().then(Vec::new);
    for (value, point, color) in per_pixel {
        processed.push(value);
        if let (Some(cloud), Some(point)) = (point_cloud.as_mut(), point) {
            cloud.push(point);
        }
        if let (Some(lut), Some(color)) = (colorized.as_mut(), color) {
            lut.push(color);
        }
    }

    Ok(Payload::Depth {
        processed,
        width: params.width,
        height: params.height,
        min_depth: params.min_distance,
        max_depth: params.max_distance,
        point_cloud,
        colorized,
    })
}

/// A small fixed LUT approximating the "turbo" colormap; exact palette fidelity doesn't
/// matter for this pipeline, only that normalized depth maps to a stable, visually ordered
/// RGB triplet.
fn colorize_turbo(normalized: f32) -> [u8; 3] {
    let n = normalized.clamp(0.0, 1.0);
    let r = (255.0 * n).round() as u8;
    let g = (255.0 * (1.0 - (n - 0.5).abs() * 2.0).clamp(0.0, 1.0)).round() as u8;
    let b = (255.0 * (1.0 - n)).round() as u8;
    [r, g, b]
}

#[cfg(test)]
mod test {
    use super::*;

    fn params() -> DepthParams {
        DepthParams {
            width: 2,
            height: 1,
            min_distance: 500,
            max_distance: 4500,
            normalize: true,
            gamma: false,
            point_cloud: false,
            colorize: None,
            focal_length: 365.0,
            principal_point_x: 256.0,
            principal_point_y: 212.0,
        }
    }

    #[test]
    fn test_rejects_wrong_buffer_length() {
        let err = process(&[0u8; 2], &params());
        assert!(matches!(err, Err(WorkerError::InvalidBufferLength { .. })));
    }

    #[test]
    fn test_filters_out_of_range_to_zero() {
        let raw = [100u16.to_le_bytes(), 1000u16.to_le_bytes()].concat();
        let payload = process(&raw, &params()).expect("process");
        let Payload::Depth { processed, .. } = payload else {
            panic!("expected depth payload");
        };
        assert_eq!(0.0, processed[0], "below min_distance should filter to zero");
        assert!(processed[1] > 0.0);
    }

    #[test]
    fn test_point_cloud_only_includes_valid_points() {
        let mut p = params();
        p.point_cloud = true;
        let raw = [100u16.to_le_bytes(), 1000u16.to_le_bytes()].concat();
        let payload = process(&raw, &p).expect("process");
        let Payload::Depth { point_cloud, .. } = payload else {
            panic!("expected depth payload");
        };
        assert_eq!(1, point_cloud.expect("point cloud").len());
    }

    #[test]
    fn test_point_cloud_rejects_bad_calibration() {
        let mut p = params();
        p.point_cloud = true;
        p.focal_length = 0.0;
        let raw = [1000u16.to_le_bytes(); 2].concat();
        let err = process(&raw, &p);
        assert!(matches!(err, Err(WorkerError::InvalidCalibration(_))));
    }
}
