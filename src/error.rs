//! Error types for the signing library.
//!
//! Every public operation returns [`Result`]. Errors are grouped into the
//! categories of [`ErrorCategory`] so callers can decide whether a failed
//! signing session may be retried.

/// Result type alias for signing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Remote collaborator that produced a [`Error::RemoteService`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteService {
    /// CRL distribution point or OCSP responder
    Revocation,
    /// RFC 3161 time-stamp authority
    Timestamp,
    /// External signer (HSM, vault, signing service)
    Signer,
    /// Key/certificate provider
    KeyProvider,
    /// Signature configuration store
    ConfigStore,
}

impl std::fmt::Display for RemoteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RemoteService::Revocation => "revocation source",
            RemoteService::Timestamp => "timestamp authority",
            RemoteService::Signer => "external signer",
            RemoteService::KeyProvider => "key provider",
            RemoteService::ConfigStore => "signature config store",
        };
        f.write_str(name)
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or empty required input
    Validation,
    /// Session used out of order, or in a way the document forbids
    ProtocolState,
    /// The reserved placeholder was too small for the envelope
    Capacity,
    /// Caller/config mismatch (unknown level or algorithm)
    Configuration,
    /// Failure reported by a remote collaborator
    RemoteService,
    /// The input document could not be read or rewritten
    Document,
    /// ASN.1 / serialization failure
    Encoding,
}

/// Error types that can occur while preparing, signing or merging.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Unsupported document feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or empty required input
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The session already produced its output
    #[error("This signing session is already closed")]
    AlreadyClosed,

    /// The envelope skeleton already received its signature value
    #[error("The signature envelope is already finalized")]
    AlreadyFinalized,

    /// A certifying signature would be layered over existing signatures
    #[error("Certification signature cannot be created: {0}")]
    CertificationConflict(String),

    /// The envelope does not fit into the reserved placeholder
    #[error("Not enough space: envelope needs {required} bytes, {reserved} reserved")]
    InsufficientReservation {
        /// Encoded envelope size in bytes
        required: usize,
        /// Reserved placeholder capacity in bytes
        reserved: usize,
    },

    /// Signature level has no PDF sub-filter
    #[error("Unsupported signature level: {0}")]
    UnsupportedSignatureLevel(String),

    /// Digest or signature algorithm is not recognized
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A remote collaborator failed
    #[error("{service} failed: {message}")]
    RemoteService {
        /// Which collaborator failed
        service: RemoteService,
        /// Failure description
        message: String,
    },

    /// The level demands revocation evidence and none could be gathered
    #[error("Signature level {0} requires revocation evidence but none was collected")]
    MissingRevocationEvidence(String),

    /// No session is stored under the given identifier
    #[error("Signing session not found: {0}")]
    SessionNotFound(String),

    /// Certificate could not be decoded
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// ASN.1 DER encoding or decoding error
    #[error("ASN.1 error: {0}")]
    Asn1(#[from] der::Error),

    /// Session (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a remote collaborator failure.
    pub fn remote(service: RemoteService, message: impl Into<String>) -> Self {
        Error::RemoteService {
            service,
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_) => ErrorCategory::Validation,
            Error::AlreadyClosed
            | Error::AlreadyFinalized
            | Error::CertificationConflict(_)
            | Error::SessionNotFound(_) => ErrorCategory::ProtocolState,
            Error::InsufficientReservation { .. } => ErrorCategory::Capacity,
            Error::UnsupportedSignatureLevel(_) | Error::UnsupportedAlgorithm(_) => {
                ErrorCategory::Configuration
            },
            Error::RemoteService { .. } | Error::MissingRevocationEvidence(_) => {
                ErrorCategory::RemoteService
            },
            Error::InvalidPdf(_)
            | Error::ParseError { .. }
            | Error::ObjectNotFound(..)
            | Error::Decode(_)
            | Error::UnsupportedFilter(_)
            | Error::Unsupported(_)
            | Error::Io(_) => ErrorCategory::Document,
            Error::Certificate(_) | Error::Asn1(_) | Error::Serialization(_) => {
                ErrorCategory::Encoding
            },
        }
    }

    /// Whether restarting from `prepare` can succeed.
    ///
    /// Capacity errors succeed with a larger explicit estimate; remote
    /// failures may be transient. Everything else fails the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Capacity | ErrorCategory::RemoteService)
    }
}
