//! Stream decoders for the filters used by cross-reference and object
//! streams: FlateDecode with optional PNG/TIFF predictors.
//!
//! Page content is never decoded; signing only needs to read document
//! structure.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};

mod flate;
mod predictor;

pub use flate::FlateDecoder;
pub use predictor::{decode_predictor, DecodeParams};

/// Decompressed output larger than this is rejected.
const MAX_DECOMPRESSED_SIZE: usize = 100 * 1024 * 1024;

/// Trait for PDF stream decoders.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Filter name (e.g., "FlateDecode").
    fn name(&self) -> &str;
}

/// Decode a stream's data according to its `/Filter` and `/DecodeParms`.
pub fn decode_stream(dict: &Dictionary, data: &[u8]) -> Result<Vec<u8>> {
    let filters: Vec<&str> = match dict.get("Filter") {
        None => Vec::new(),
        Some(Object::Name(name)) => vec![name.as_str()],
        Some(Object::Array(items)) => items.iter().filter_map(Object::as_name).collect(),
        Some(other) => {
            return Err(Error::Decode(format!("invalid /Filter of type {}", other.type_name())))
        },
    };

    let params = match dict.get("DecodeParms") {
        Some(Object::Dictionary(d)) => Some(DecodeParams::from_dict(d)),
        Some(Object::Array(items)) => items
            .iter()
            .find_map(Object::as_dict)
            .map(DecodeParams::from_dict),
        _ => None,
    };

    let mut current = data.to_vec();
    for filter in filters {
        let decoder: Box<dyn StreamDecoder> = match filter {
            "FlateDecode" | "Fl" => Box::new(FlateDecoder),
            other => return Err(Error::UnsupportedFilter(other.to_string())),
        };
        current = decoder.decode(&current)?;
        if current.len() > MAX_DECOMPRESSED_SIZE {
            return Err(Error::Decode(format!(
                "{} output of {} bytes exceeds limit",
                decoder.name(),
                current.len()
            )));
        }
    }

    match params {
        Some(params) if params.predictor != 1 => decode_predictor(&current, &params),
        _ => Ok(current),
    }
}
