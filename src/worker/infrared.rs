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
use crate::frame::Payload;

use super::WorkerError;

#[derive(Debug, Clone)]
pub struct InfraredParams {
    pub width: u32,
    pub height: u32,
    pub gamma: bool,
}

/// Normalizes a raw 16-bit infrared buffer to `[0,1]`, with optional gamma correction.
pub fn process(raw: &[u8], params: &InfraredParams) -> Result<Payload, WorkerError> {
    let expected_len = params.width as usize * params.height as usize * 2;
    if raw.len() != expected_len {
        return Err(WorkerError::InvalidBufferLength {
            expected: expected_len,
            actual: raw.len(),
        });
    }

    let pixel_count = params.width as usize * params.height as usize;
    let mut processed = Vec::with_capacity(pixel_count);
    for i in 0..pixel_count {
        let raw_value = u16::from_le_bytes([raw[i * 2], raw[i * 2 + 1]]);
        let mut n = raw_value as f32 / u16::MAX as f32;
        if params.gamma {
            n = n.powf(0.5);
        }
        processed.push(n);
    }

    Ok(Payload::Infrared {
        processed,
        width: params.width,
        height: params.height,
        format: "f32".to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rejects_wrong_buffer_length() {
        let params = InfraredParams {
            width: 2,
            height: 1,
            gamma: false,
        };
        let err = process(&[0u8; 2], &params);
        assert!(matches!(err, Err(WorkerError::InvalidBufferLength { .. })));
    }

    #[test]
    fn test_gamma_brightens_midtones() {
        let params_plain = InfraredParams {
            width: 1,
            height: 1,
            gamma: false,
        };
        let params_gamma = InfraredParams {
            gamma: true,
            ..params_plain.clone()
        };
        let raw = (16384u16).to_le_bytes();

        let Payload::Infrared { processed: plain, .. } = process(&raw, &params_plain).unwrap() else {
            panic!()
        };
        let Payload::Infrared { processed: gamma, .. } = process(&raw, &params_gamma).unwrap() else {
            panic!()
        };
        assert!(gamma[0] > plain[0]);
    }
}
