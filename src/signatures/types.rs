//! Digital signature types and protocol data contracts.
//!
//! The request/response structs here are what crosses the boundary between
//! the signing protocol and its callers. All of them serialize with serde so
//! they can travel as JSON; binary payloads are base64 strings.

use crate::config::{ConfigKeyBinding, SignatureFormParameters};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use der::oid::ObjectIdentifier;
use der::Decode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// SHA-1 (legacy only)
    #[serde(rename = "SHA1")]
    Sha1,
    /// SHA-256 (recommended)
    #[default]
    #[serde(rename = "SHA256")]
    Sha256,
    /// SHA-384
    #[serde(rename = "SHA384")]
    Sha384,
    /// SHA-512
    #[serde(rename = "SHA512")]
    Sha512,
}

impl DigestAlgorithm {
    /// Object identifier of this digest algorithm.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => ObjectIdentifier::new_unwrap("1.3.14.3.2.26"),
            DigestAlgorithm::Sha256 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1"),
            DigestAlgorithm::Sha384 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2"),
            DigestAlgorithm::Sha512 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3"),
        }
    }

    /// Name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// Algorithm for a digest OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        [Self::Sha1, Self::Sha256, Self::Sha384, Self::Sha512]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
            .ok_or_else(|| Error::UnsupportedAlgorithm(oid.to_string()))
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    /// Accepts `SHA256`, `SHA-256` and `sha256` style names.
    fn from_str(name: &str) -> Result<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "SHA1" => Ok(DigestAlgorithm::Sha1),
            "SHA256" => Ok(DigestAlgorithm::Sha256),
            "SHA384" => Ok(DigestAlgorithm::Sha384),
            "SHA512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(Error::UnsupportedAlgorithm(name.to_string())),
        }
    }
}

/// Public-key family of a signature algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    /// RSA PKCS#1 v1.5
    Rsa,
    /// ECDSA
    Ecdsa,
    /// DSA
    Dsa,
}

/// Signature algorithm reported by the external signer, e.g. `RSA_SHA256`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignatureAlgorithm {
    family: KeyFamily,
    digest: DigestAlgorithm,
}

impl SignatureAlgorithm {
    /// RSA with SHA-256, the most common remote-signing algorithm.
    pub const RSA_SHA256: Self = Self {
        family: KeyFamily::Rsa,
        digest: DigestAlgorithm::Sha256,
    };

    /// ECDSA with SHA-256.
    pub const ECDSA_SHA256: Self = Self {
        family: KeyFamily::Ecdsa,
        digest: DigestAlgorithm::Sha256,
    };

    /// Combine a key family and digest.
    pub fn new(family: KeyFamily, digest: DigestAlgorithm) -> Self {
        Self { family, digest }
    }

    /// Key family (RSA / ECDSA / DSA).
    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Digest half of the algorithm.
    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    /// OID written into `SignerInfo.signatureAlgorithm`.
    pub fn oid(&self) -> ObjectIdentifier {
        use DigestAlgorithm::*;
        let oid = match (self.family, self.digest) {
            (KeyFamily::Rsa, Sha1) => "1.2.840.113549.1.1.5",
            (KeyFamily::Rsa, Sha256) => "1.2.840.113549.1.1.11",
            (KeyFamily::Rsa, Sha384) => "1.2.840.113549.1.1.12",
            (KeyFamily::Rsa, Sha512) => "1.2.840.113549.1.1.13",
            (KeyFamily::Ecdsa, Sha1) => "1.2.840.10045.4.1",
            (KeyFamily::Ecdsa, Sha256) => "1.2.840.10045.4.3.2",
            (KeyFamily::Ecdsa, Sha384) => "1.2.840.10045.4.3.3",
            (KeyFamily::Ecdsa, Sha512) => "1.2.840.10045.4.3.4",
            (KeyFamily::Dsa, Sha1) => "1.2.840.10040.4.3",
            (KeyFamily::Dsa, Sha256) => "2.16.840.1.101.3.4.3.2",
            (KeyFamily::Dsa, Sha384) => "2.16.840.1.101.3.4.3.3",
            (KeyFamily::Dsa, Sha512) => "2.16.840.1.101.3.4.3.4",
        };
        ObjectIdentifier::new_unwrap(oid)
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self.family {
            KeyFamily::Rsa => "RSA",
            KeyFamily::Ecdsa => "ECDSA",
            KeyFamily::Dsa => "DSA",
        };
        write!(f, "{}_{}", family, self.digest.name().replace('-', ""))
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = Error;

    /// `RSA_SHA256`, `SHA256withRSA`, `ecdsa-sha384`, ... The family is read
    /// from the name; names naming neither RSA nor (EC)DSA are rejected.
    fn from_str(name: &str) -> Result<Self> {
        let upper = name.to_ascii_uppercase();
        let family = if upper.contains("ECDSA") {
            KeyFamily::Ecdsa
        } else if upper.contains("RSA") {
            KeyFamily::Rsa
        } else if upper.contains("DSA") {
            KeyFamily::Dsa
        } else {
            return Err(Error::UnsupportedAlgorithm(name.to_string()));
        };
        let compact: String = upper.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        let digest = ["SHA512", "SHA384", "SHA256", "SHA1"]
            .into_iter()
            .find(|d| compact.contains(d))
            .ok_or_else(|| Error::UnsupportedAlgorithm(name.to_string()))?
            .parse()?;
        Ok(Self { family, digest })
    }
}

impl TryFrom<String> for SignatureAlgorithm {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        name.parse()
    }
}

impl From<SignatureAlgorithm> for String {
    fn from(alg: SignatureAlgorithm) -> Self {
        alg.to_string()
    }
}

/// Signature sub-filter type (signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - CMS detached signature
    #[default]
    Pkcs7Detached,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    CadesDetached,
    /// ETSI.RFC3161 - document timestamp token
    Rfc3161,
}

impl SignatureSubFilter {
    /// PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
            SignatureSubFilter::Rfc3161 => "ETSI.RFC3161",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            "ETSI.RFC3161" => Some(SignatureSubFilter::Rfc3161),
            _ => None,
        }
    }
}

/// What the payload of a [`SignInput`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignMode {
    /// The payload is the data itself (signed attributes, raw document)
    Document,
    /// The payload is already a digest
    Digest,
}

/// Serde helpers for binary fields carried as base64 text.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }

    /// Same encoding for a list of byte strings.
    pub mod list {
        use super::STANDARD;
        use base64::Engine;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(items.iter().map(|item| STANDARD.encode(item)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
            Vec::<String>::deserialize(deserializer)?
                .into_iter()
                .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
                .collect()
        }
    }
}

/// Original document handed to the protocol.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrigData {
    /// Document name, echoed into the output
    pub name: Option<String>,
    /// Document bytes
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl OrigData {
    /// Wrap document bytes.
    pub fn new(name: Option<String>, content: Vec<u8>) -> Self {
        Self { name, content }
    }
}

impl fmt::Debug for OrigData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrigData")
            .field("name", &self.name)
            .field("content", &format!("{} bytes", self.content.len()))
            .finish()
    }
}

/// Certificate chain ordered from leaf to root, DER encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChainRepr", into = "ChainRepr")]
pub struct CertificateChain {
    certificates: Vec<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct ChainRepr(#[serde(with = "base64_bytes::list")] Vec<Vec<u8>>);

impl TryFrom<ChainRepr> for CertificateChain {
    type Error = Error;

    fn try_from(repr: ChainRepr) -> Result<Self> {
        Self::new(repr.0)
    }
}

impl From<CertificateChain> for ChainRepr {
    fn from(chain: CertificateChain) -> Self {
        ChainRepr(chain.certificates)
    }
}

impl CertificateChain {
    /// Build a chain; it must be non-empty and every entry must decode as an
    /// X.509 certificate.
    pub fn new(certificates: Vec<Vec<u8>>) -> Result<Self> {
        if certificates.is_empty() {
            return Err(Error::Validation("certificate chain is empty".into()));
        }
        for (i, der_bytes) in certificates.iter().enumerate() {
            x509_cert::Certificate::from_der(der_bytes)
                .map_err(|e| Error::Certificate(format!("chain entry {}: {}", i, e)))?;
        }
        Ok(Self { certificates })
    }

    /// Signing (leaf) certificate.
    pub fn leaf(&self) -> &[u8] {
        &self.certificates[0]
    }

    /// All certificates, leaf first.
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Always false; an empty chain cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// `(certificate, issuer)` for every adjacent pair; the root has no pair.
    pub fn issuer_pairs(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.certificates
            .windows(2)
            .map(|pair| (pair[0].as_slice(), pair[1].as_slice()))
    }

    /// Decode every certificate.
    pub fn decode(&self) -> Result<Vec<x509_cert::Certificate>> {
        self.certificates
            .iter()
            .map(|c| x509_cert::Certificate::from_der(c).map_err(|e| Error::Certificate(e.to_string())))
            .collect()
    }
}

/// The "data to be processed next", passed between protocol steps.
///
/// `input` means whatever `sign_mode` says it means: the data itself for
/// [`SignMode::Document`], a digest of it for [`SignMode::Digest`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SignInput {
    /// Document name
    pub name: Option<String>,
    /// Payload
    #[serde(with = "base64_bytes")]
    pub input: Vec<u8>,
    /// Meaning of `input`
    pub sign_mode: SignMode,
    /// Digest algorithm of the configuration
    pub digest_algorithm: DigestAlgorithm,
    /// Signing date written into the signature
    pub signing_date: DateTime<Utc>,
    /// Config and key that will be used
    pub binding: ConfigKeyBinding,
    /// Effective form parameters (config merged with overrides)
    pub form_parameters: SignatureFormParameters,
    /// Password carried for the key provider
    pub password: Option<String>,
}

impl fmt::Debug for SignInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignInput")
            .field("name", &self.name)
            .field("input", &format!("{} bytes", self.input.len()))
            .field("sign_mode", &self.sign_mode)
            .field("digest_algorithm", &self.digest_algorithm)
            .field("signing_date", &self.signing_date)
            .field("binding", &self.binding)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Raw signature value produced by an external signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Raw signature bytes (PKCS#1 v1.5 block, DER ECDSA signature, ...)
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    /// Algorithm that produced `value`
    pub algorithm: SignatureAlgorithm,
    /// Binding that produced it
    pub binding: ConfigKeyBinding,
}

/// Final result of a signing operation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignOutput {
    /// Signed document bytes
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    /// Document name
    pub name: Option<String>,
    /// The signature that was embedded
    pub signature: Signature,
}

impl fmt::Debug for SignOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignOutput")
            .field("value", &format!("{} bytes", self.value.len()))
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

/// Request to prepare a document and obtain the data to sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetermineSignInput {
    /// Document to sign
    pub orig_data: OrigData,
    /// Whether the caller wants the data itself or its digest
    pub sign_mode: SignMode,
    /// Config and key to use
    pub binding: ConfigKeyBinding,
    /// Per-request form parameters; unset fields fall back to the config
    pub form_params_override: Option<SignatureFormParameters>,
}

/// Request to embed an externally produced signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSignature {
    /// The document originally passed to `determine_sign_input`
    pub orig_data: OrigData,
    /// Raw signature value
    pub signature: Signature,
    /// Session returned by `determine_sign_input`
    pub session_id: crate::signatures::SessionId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_algorithm_names() {
        assert_eq!(DigestAlgorithm::Sha256.name(), "SHA-256");
        assert_eq!("sha-384".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha384);
        assert!(matches!("MD5".parse::<DigestAlgorithm>(), Err(Error::UnsupportedAlgorithm(_))));
        let oid = DigestAlgorithm::Sha512.oid();
        assert_eq!(DigestAlgorithm::from_oid(&oid).unwrap(), DigestAlgorithm::Sha512);
    }

    #[test]
    fn test_signature_algorithm_family_from_name() {
        let rsa: SignatureAlgorithm = "RSA_SHA256".parse().unwrap();
        assert_eq!(rsa, SignatureAlgorithm::RSA_SHA256);
        assert_eq!(rsa.to_string(), "RSA_SHA256");

        let ec: SignatureAlgorithm = "SHA384withECDSA".parse().unwrap();
        assert_eq!(ec.family(), KeyFamily::Ecdsa);
        assert_eq!(ec.digest(), DigestAlgorithm::Sha384);

        let dsa: SignatureAlgorithm = "DSA_SHA1".parse().unwrap();
        assert_eq!(dsa.family(), KeyFamily::Dsa);

        assert!(matches!(
            "ED25519".parse::<SignatureAlgorithm>(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!("RSA_MD5".parse::<SignatureAlgorithm>().is_err());
    }

    #[test]
    fn test_signature_algorithm_serde() {
        let json = serde_json::to_string(&SignatureAlgorithm::ECDSA_SHA256).unwrap();
        assert_eq!(json, "\"ECDSA_SHA256\"");
        let back: SignatureAlgorithm = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SignatureAlgorithm::ECDSA_SHA256);
    }

    #[test]
    fn test_sub_filter_names() {
        assert_eq!(SignatureSubFilter::CadesDetached.as_pdf_name(), "ETSI.CAdES.detached");
        assert_eq!(
            SignatureSubFilter::from_pdf_name("adbe.pkcs7.detached"),
            Some(SignatureSubFilter::Pkcs7Detached)
        );
        assert_eq!(SignatureSubFilter::from_pdf_name("adbe.x509.rsa_sha1"), None);
    }

    #[test]
    fn test_empty_chain_rejected() {
        assert!(matches!(CertificateChain::new(Vec::new()), Err(Error::Validation(_))));
        assert!(matches!(CertificateChain::new(vec![vec![1, 2, 3]]), Err(Error::Certificate(_))));
    }

    #[test]
    fn test_orig_data_base64_json() {
        let data = OrigData::new(Some("a.pdf".into()), b"%PDF".to_vec());
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("JVBERg=="));
        let back: OrigData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
        assert!(format!("{:?}", data).contains("4 bytes"));
    }
}
