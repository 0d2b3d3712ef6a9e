//! Digest engine.
//!
//! Hashes byte sequences with a caller-selected algorithm. Used for the
//! canonical byte range of a prepared document, for the signed attributes
//! handed to a TSA, and for callers that only want a digest sent to a remote
//! key custodian.

use super::types::{DigestAlgorithm, SignInput, SignMode};
use crate::error::Result;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Incremental hasher over one of the supported algorithms.
#[derive(Clone)]
pub enum Hasher {
    /// SHA-1
    Sha1(Sha1),
    /// SHA-256
    Sha256(Sha256),
    /// SHA-384
    Sha384(Sha384),
    /// SHA-512
    Sha512(Sha512),
}

impl Hasher {
    /// Start a hash.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha384 => Hasher::Sha384(Sha384::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    /// Feed more data.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    /// Finish and return the digest.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha384(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Hash `data` with `algorithm`.
pub fn digest(data: &[u8], algorithm: DigestAlgorithm) -> Vec<u8> {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Hash `data` with an algorithm given by name (`SHA256`, `SHA-384`, ...).
///
/// Unknown names fail with `UnsupportedAlgorithm`.
pub fn digest_named(data: &[u8], algorithm: &str) -> Result<Vec<u8>> {
    Ok(digest(data, algorithm.parse()?))
}

/// Replace a document-mode payload by its digest.
///
/// Inputs already in digest mode are returned unchanged, so the call is
/// idempotent.
pub fn digest_sign_input(input: SignInput) -> SignInput {
    match input.sign_mode {
        SignMode::Digest => input,
        SignMode::Document => SignInput {
            input: digest(&input.input, input.digest_algorithm),
            sign_mode: SignMode::Digest,
            ..input
        },
    }
}
