//! ByteRange calculation for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the signature value begins
//! - `offset2` = byte offset where the signature value ends
//! - `length2` = remaining bytes to end of file
//!
//! The signature value is a hex-encoded string within `<` and `>` delimiters.
//! A reservation of `n` bytes therefore occupies `2n + 2` bytes of the file.

use super::digest::Hasher;
use super::types::DigestAlgorithm;
use crate::error::{Error, Result};

/// Width of the `/ByteRange` value written at preparation time. The real
/// array is patched in later and padded with spaces to this width.
pub const BYTE_RANGE_WIDTH: usize = 64;

/// Calculator for PDF signature byte ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRangeCalculator {
    /// Reserved envelope capacity in bytes
    reservation: usize,
}

impl ByteRangeCalculator {
    /// Calculator for a placeholder that can hold `reservation` envelope bytes.
    pub fn new(reservation: usize) -> Self {
        Self { reservation }
    }

    /// Reserved envelope capacity in bytes.
    pub fn reservation(&self) -> usize {
        self.reservation
    }

    /// Size of the `/Contents` value in the file: hex digits plus brackets.
    pub fn placeholder_size(&self) -> usize {
        self.reservation * 2 + 2
    }

    /// `<000...0>` of [`placeholder_size`](Self::placeholder_size) bytes.
    pub fn generate_placeholder(&self) -> Vec<u8> {
        let mut placeholder = Vec::with_capacity(self.placeholder_size());
        placeholder.push(b'<');
        placeholder.resize(self.placeholder_size() - 1, b'0');
        placeholder.push(b'>');
        placeholder
    }

    /// ByteRange for a file of `file_size` bytes whose `/Contents` value
    /// starts (at its `<`) at `contents_offset`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let before_sig = contents_offset as i64;
        let after_sig_start = (contents_offset + self.placeholder_size()) as i64;
        let after_sig_len = file_size as i64 - after_sig_start;

        [0, before_sig, after_sig_start, after_sig_len]
    }

    /// Format a ByteRange array as a PDF array string.
    pub fn format_byte_range(byte_range: &[i64; 4]) -> String {
        format!("[{} {} {} {}]", byte_range[0], byte_range[1], byte_range[2], byte_range[3])
    }

    /// The ByteRange array right-padded with spaces to [`BYTE_RANGE_WIDTH`].
    pub fn format_padded(byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        let mut text = Self::format_byte_range(byte_range).into_bytes();
        if text.len() > BYTE_RANGE_WIDTH {
            return Err(Error::InvalidPdf(format!(
                "ByteRange {} does not fit its {} byte slot",
                Self::format_byte_range(byte_range),
                BYTE_RANGE_WIDTH
            )));
        }
        text.resize(BYTE_RANGE_WIDTH, b' ');
        Ok(text)
    }

    /// Extract the bytes to be signed from a PDF file.
    ///
    /// This returns the concatenation of the two ranges specified by ByteRange.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        let (first, second) = Self::ranges(pdf_data.len(), byte_range)?;
        let mut signed_bytes = Vec::with_capacity(first.len() + second.len());
        signed_bytes.extend_from_slice(&pdf_data[first]);
        signed_bytes.extend_from_slice(&pdf_data[second]);
        Ok(signed_bytes)
    }

    /// Digest of the bytes covered by `byte_range`, without copying them.
    pub fn hash_signed_bytes(
        pdf_data: &[u8],
        byte_range: &[i64; 4],
        algorithm: DigestAlgorithm,
    ) -> Result<Vec<u8>> {
        let (first, second) = Self::ranges(pdf_data.len(), byte_range)?;
        let mut hasher = Hasher::new(algorithm);
        hasher.update(&pdf_data[first]);
        hasher.update(&pdf_data[second]);
        Ok(hasher.finalize())
    }

    fn ranges(
        file_size: usize,
        byte_range: &[i64; 4],
    ) -> Result<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        let to_usize = |v: i64| {
            usize::try_from(v).map_err(|_| Error::InvalidPdf(format!("negative ByteRange value {}", v)))
        };
        let offset1 = to_usize(byte_range[0])?;
        let length1 = to_usize(byte_range[1])?;
        let offset2 = to_usize(byte_range[2])?;
        let length2 = to_usize(byte_range[3])?;

        if offset1 + length1 > file_size {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range exceeds file size: {} + {} > {}",
                offset1, length1, file_size
            )));
        }
        if offset2 + length2 > file_size {
            return Err(Error::InvalidPdf(format!(
                "ByteRange second range exceeds file size: {} + {} > {}",
                offset2, length2, file_size
            )));
        }
        Ok((offset1..offset1 + length1, offset2..offset2 + length2))
    }

    /// Check that a ByteRange covers the entire document except one gap.
    pub fn validate_byte_range(byte_range: &[i64; 4], file_size: usize) -> Result<()> {
        let offset1 = byte_range[0];
        let length1 = byte_range[1];
        let offset2 = byte_range[2];
        let length2 = byte_range[3];

        if offset1 != 0 {
            return Err(Error::InvalidPdf(format!("ByteRange must start at 0, got {}", offset1)));
        }

        let expected_end = file_size as i64;
        let actual_end = offset2 + length2;
        if actual_end != expected_end {
            return Err(Error::InvalidPdf(format!(
                "ByteRange must end at file size {}, got {}",
                expected_end, actual_end
            )));
        }

        if length1 < 0 || length2 < 0 || length1 > offset2 {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range ({}) overlaps with second range start ({})",
                length1, offset2
            )));
        }

        Ok(())
    }

    /// Write `envelope` hex-encoded into the placeholder at `contents_offset`,
    /// padding the remaining capacity with `0` digits. The file length does
    /// not change.
    ///
    /// Fails with `InsufficientReservation` when the envelope is larger than
    /// the reservation; the data is left untouched in that case.
    pub fn insert_signature(
        &self,
        pdf_data: &mut [u8],
        contents_offset: usize,
        envelope: &[u8],
    ) -> Result<()> {
        if envelope.len() > self.reservation {
            return Err(Error::InsufficientReservation {
                required: envelope.len(),
                reserved: self.reservation,
            });
        }

        let end = contents_offset + self.placeholder_size();
        if end > pdf_data.len() {
            return Err(Error::InvalidPdf("Signature insertion would exceed file bounds".to_string()));
        }
        let slot = &mut pdf_data[contents_offset..end];
        if slot[0] != b'<' || slot[slot.len() - 1] != b'>' {
            return Err(Error::InvalidPdf(format!(
                "no signature placeholder at offset {}",
                contents_offset
            )));
        }

        let hex = bytes_to_hex(envelope);
        slot[1..1 + hex.len()].copy_from_slice(hex.as_bytes());
        for digit in &mut slot[1 + hex.len()..self.placeholder_size() - 1] {
            *digit = b'0';
        }
        Ok(())
    }
}

/// Convert bytes to uppercase hex string.
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8] = b"0123456789ABCDEF";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}
