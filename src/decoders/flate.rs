//! FlateDecode (zlib/deflate) implementation using flate2.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// FlateDecode filter implementation.
pub struct FlateDecoder;

impl StreamDecoder for FlateDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        match ZlibDecoder::new(input).read_to_end(&mut output) {
            Ok(_) => Ok(output),
            Err(e) if !output.is_empty() => {
                log::warn!("FlateDecode recovered {} bytes before error: {}", output.len(), e);
                Ok(output)
            },
            Err(e) => {
                // some writers omit the zlib header
                log::debug!("zlib decode failed ({}), trying raw deflate", e);
                output.clear();
                DeflateDecoder::new(input)
                    .read_to_end(&mut output)
                    .map_err(|e| Error::Decode(format!("FlateDecode failed: {}", e)))?;
                Ok(output)
            },
        }
    }

    fn name(&self) -> &str {
        "FlateDecode"
    }
}
