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
pub struct ColorParams {
    pub width: u32,
    pub height: u32,
    pub force_alpha: bool,
    pub compress: bool,
    pub compression_format: String,
}

/// Optionally forces every pixel's alpha channel opaque. No codec is wired in yet, so the
/// compression step is a no-op; `compressed` reflects whether the output actually differs from
/// the input rather than a hardcoded value, so it stays truthful once a real encoder lands.
pub fn process(raw: &[u8], params: &ColorParams) -> Result<Payload, WorkerError> {
    let expected_len = params.width as usize * params.height as usize * 4;
    if raw.len() != expected_len {
        return Err(WorkerError::InvalidBufferLength {
            expected: expected_len,
            actual: raw.len(),
        });
    }

    let mut processed = raw.to_vec();
    if params.force_alpha {
        for chunk in processed.chunks_mut(4) {
            chunk[3] = 255;
        }
    }

    let compressed_bytes = if params.compress {
        compress_noop(&processed)
    } else {
        None
    };
    let compressed = compressed_bytes.is_some();
    let processed = compressed_bytes.unwrap_or(processed);

    Ok(Payload::Color {
        processed,
        width: params.width,
        height: params.height,
        format: params.compression_format.clone(),
        compressed,
    })
}

/// Placeholder for a real codec. Returns `None` (no transformation) until one is wired in.
fn compress_noop(_processed: &[u8]) -> Option<Vec<u8>> {
    None
}

#[cfg(test)]
mod test {
    use super::*;

    fn params() -> ColorParams {
        ColorParams {
            width: 1,
            height: 1,
            force_alpha: true,
            compress: true,
            compression_format: "jpeg".to_string(),
        }
    }

    #[test]
    fn test_rejects_wrong_buffer_length() {
        let err = process(&[0u8; 3], &params());
        assert!(matches!(err, Err(WorkerError::InvalidBufferLength { .. })));
    }

    #[test]
    fn test_force_alpha_sets_opaque() {
        let payload = process(&[10, 20, 30, 0], &params()).expect("process");
        let Payload::Color { processed, .. } = payload else {
            panic!("expected color payload");
        };
        assert_eq!(255, processed[3]);
    }

    #[test]
    fn test_compression_reports_false_until_real_codec() {
        let payload = process(&[10, 20, 30, 255], &params()).expect("process");
        let Payload::Color { compressed, .. } = payload else {
            panic!("expected color payload");
        };
        assert!(!compressed);
    }
}
