//! PNG and TIFF predictors (ISO 32000-1, 7.4.4.4).
//!
//! Cross-reference streams are almost always written with PNG Up (12).

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};

/// Decode parameters for stream decoders.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 2 = TIFF, 10-15 = PNG)
    pub predictor: i64,
    /// Number of columns (samples per row)
    pub columns: usize,
    /// Color components per sample
    pub colors: usize,
    /// Bits per component
    pub bits_per_component: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl DecodeParams {
    /// Read a `/DecodeParms` dictionary, falling back to defaults per key.
    pub fn from_dict(dict: &Dictionary) -> Self {
        let int = |key: &str| dict.get(key).and_then(Object::as_integer);
        let defaults = Self::default();
        Self {
            predictor: int("Predictor").unwrap_or(defaults.predictor),
            columns: int("Columns").map(|v| v.max(1) as usize).unwrap_or(defaults.columns),
            colors: int("Colors").map(|v| v.max(1) as usize).unwrap_or(defaults.colors),
            bits_per_component: int("BitsPerComponent")
                .map(|v| v.max(1) as usize)
                .unwrap_or(defaults.bits_per_component),
        }
    }

    fn pixel_bytes_per_row(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Reverse predictor encoding.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => decode_tiff(data, params),
        10..=15 => decode_png(data, params),
        other => Err(Error::Decode(format!("Unsupported predictor: {}", other))),
    }
}

fn decode_tiff(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row_len = params.pixel_bytes_per_row();
    let bpp = params.bytes_per_pixel();
    let mut output = Vec::with_capacity(data.len());
    for row in data.chunks(row_len) {
        let start = output.len();
        for (i, &byte) in row.iter().enumerate() {
            let left = if i >= bpp { output[start + i - bpp] } else { 0 };
            output.push(byte.wrapping_add(left));
        }
    }
    Ok(output)
}

fn decode_png(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let pixel_bytes = params.pixel_bytes_per_row();
    let row_len = pixel_bytes + 1;
    let bpp = params.bytes_per_pixel();

    if data.len() % row_len != 0 {
        return Err(Error::Decode(format!(
            "Data length {} is not a multiple of row size {}",
            data.len(),
            row_len
        )));
    }

    let mut output: Vec<u8> = Vec::with_capacity(data.len() / row_len * pixel_bytes);
    let mut previous = vec![0u8; pixel_bytes];

    for row in data.chunks(row_len) {
        let tag = row[0];
        let mut current = vec![0u8; pixel_bytes];
        for i in 0..pixel_bytes {
            let raw = row[i + 1];
            let left = if i >= bpp { current[i - bpp] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bpp { previous[i - bpp] } else { 0 };
            current[i] = match tag {
                0 => raw,
                1 => raw.wrapping_add(left),
                2 => raw.wrapping_add(up),
                3 => raw.wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => raw.wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(Error::Decode(format!("Invalid PNG predictor tag: {}", other)))
                },
            };
        }
        output.extend_from_slice(&current);
        previous = current;
    }

    Ok(output)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_sub_row() {
        let params = DecodeParams {
            predictor: 11,
            columns: 3,
            ..Default::default()
        };
        assert_eq!(decode_predictor(&[1, 5, 1, 1], &params).unwrap(), vec![5, 6, 7]);
    }

    #[test]
    fn test_png_rejects_ragged_data() {
        let params = DecodeParams {
            predictor: 12,
            columns: 4,
            ..Default::default()
        };
        assert!(decode_predictor(&[2, 0, 0], &params).is_err());
    }

    #[test]
    fn test_paeth_picks_nearest() {
        assert_eq!(paeth(10, 20, 10), 20);
        assert_eq!(paeth(0, 0, 0), 0);
    }
}
