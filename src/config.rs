//! Signature configuration.
//!
//! A [`SignatureConfig`] is resolved once per signing session (from a
//! [`ConfigProvider`]) and is not changed afterwards. Everything here is
//! serde (de)serializable so a config store can keep it as JSON.

use crate::error::{Error, RemoteService, Result};
use crate::signatures::{
    CertificateChain, DigestAlgorithm, KeyProvider, SignatureConfigStore, SignatureSubFilter,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Evidence tier of a baseline signature level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BaselineTier {
    /// Signature only
    B,
    /// + signature timestamp
    T,
    /// + revocation evidence
    LT,
    /// + archival timestamp
    LTA,
}

/// Signature level (family and baseline tier).
///
/// Only the PKCS7 and PAdES families can be embedded in a PDF; CAdES and
/// XAdES levels are valid names that [`SignatureLevel::sub_filter`] rejects.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureLevel {
    /// CMS signature, no evidence
    PKCS7_B,
    /// CMS signature + timestamp
    PKCS7_T,
    /// CMS signature + timestamp + revocation evidence
    PKCS7_LT,
    /// CMS signature + long-term archival timestamp
    PKCS7_LTA,
    /// PAdES baseline B
    PAdES_BASELINE_B,
    /// PAdES baseline T
    PAdES_BASELINE_T,
    /// PAdES baseline LT
    PAdES_BASELINE_LT,
    /// PAdES baseline LTA
    PAdES_BASELINE_LTA,
    /// CAdES baseline B (detached CMS files, not PDF)
    CAdES_BASELINE_B,
    /// CAdES baseline T
    CAdES_BASELINE_T,
    /// CAdES baseline LT
    CAdES_BASELINE_LT,
    /// CAdES baseline LTA
    CAdES_BASELINE_LTA,
    /// XAdES baseline B (XML, not PDF)
    XAdES_BASELINE_B,
    /// XAdES baseline T
    XAdES_BASELINE_T,
    /// XAdES baseline LT
    XAdES_BASELINE_LT,
    /// XAdES baseline LTA
    XAdES_BASELINE_LTA,
}

impl SignatureLevel {
    /// Every defined level.
    pub const ALL: [SignatureLevel; 16] = [
        SignatureLevel::PKCS7_B,
        SignatureLevel::PKCS7_T,
        SignatureLevel::PKCS7_LT,
        SignatureLevel::PKCS7_LTA,
        SignatureLevel::PAdES_BASELINE_B,
        SignatureLevel::PAdES_BASELINE_T,
        SignatureLevel::PAdES_BASELINE_LT,
        SignatureLevel::PAdES_BASELINE_LTA,
        SignatureLevel::CAdES_BASELINE_B,
        SignatureLevel::CAdES_BASELINE_T,
        SignatureLevel::CAdES_BASELINE_LT,
        SignatureLevel::CAdES_BASELINE_LTA,
        SignatureLevel::XAdES_BASELINE_B,
        SignatureLevel::XAdES_BASELINE_T,
        SignatureLevel::XAdES_BASELINE_LT,
        SignatureLevel::XAdES_BASELINE_LTA,
    ];

    /// Canonical name, e.g. `PAdES_BASELINE_LT`.
    pub fn name(&self) -> &'static str {
        use SignatureLevel::*;
        match self {
            PKCS7_B => "PKCS7_B",
            PKCS7_T => "PKCS7_T",
            PKCS7_LT => "PKCS7_LT",
            PKCS7_LTA => "PKCS7_LTA",
            PAdES_BASELINE_B => "PAdES_BASELINE_B",
            PAdES_BASELINE_T => "PAdES_BASELINE_T",
            PAdES_BASELINE_LT => "PAdES_BASELINE_LT",
            PAdES_BASELINE_LTA => "PAdES_BASELINE_LTA",
            CAdES_BASELINE_B => "CAdES_BASELINE_B",
            CAdES_BASELINE_T => "CAdES_BASELINE_T",
            CAdES_BASELINE_LT => "CAdES_BASELINE_LT",
            CAdES_BASELINE_LTA => "CAdES_BASELINE_LTA",
            XAdES_BASELINE_B => "XAdES_BASELINE_B",
            XAdES_BASELINE_T => "XAdES_BASELINE_T",
            XAdES_BASELINE_LT => "XAdES_BASELINE_LT",
            XAdES_BASELINE_LTA => "XAdES_BASELINE_LTA",
        }
    }

    /// Baseline tier of the level.
    pub fn tier(&self) -> BaselineTier {
        use SignatureLevel::*;
        match self {
            PKCS7_B | PAdES_BASELINE_B | CAdES_BASELINE_B | XAdES_BASELINE_B => BaselineTier::B,
            PKCS7_T | PAdES_BASELINE_T | CAdES_BASELINE_T | XAdES_BASELINE_T => BaselineTier::T,
            PKCS7_LT | PAdES_BASELINE_LT | CAdES_BASELINE_LT | XAdES_BASELINE_LT => BaselineTier::LT,
            PKCS7_LTA | PAdES_BASELINE_LTA | CAdES_BASELINE_LTA | XAdES_BASELINE_LTA => {
                BaselineTier::LTA
            },
        }
    }

    /// PKCS7 levels produce a CMS sub-filter, PAdES levels a CAdES one.
    pub fn sub_filter(&self) -> Result<SignatureSubFilter> {
        use SignatureLevel::*;
        match self {
            PKCS7_B | PKCS7_T | PKCS7_LT | PKCS7_LTA => Ok(SignatureSubFilter::Pkcs7Detached),
            PAdES_BASELINE_B | PAdES_BASELINE_T | PAdES_BASELINE_LT | PAdES_BASELINE_LTA => {
                Ok(SignatureSubFilter::CadesDetached)
            },
            other => Err(Error::UnsupportedSignatureLevel(other.name().to_string())),
        }
    }

    /// Whether the level asks for long-term evidence (LT or LTA).
    pub fn is_long_term(&self) -> bool {
        self.tier() >= BaselineTier::LT
    }
}

impl fmt::Display for SignatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignatureLevel {
    type Err = Error;

    /// Case and underscores are ignored: `PAdESBASELINELT` and
    /// `pades_baseline_lt` name the same level.
    fn from_str(name: &str) -> Result<Self> {
        let key = |s: &str| s.replace('_', "").to_ascii_uppercase();
        let wanted = key(name);
        Self::ALL
            .into_iter()
            .find(|level| key(level.name()) == wanted)
            .ok_or_else(|| Error::UnsupportedSignatureLevel(name.to_string()))
    }
}

/// How strictly a piece of evidence is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// Never fetched
    Skip,
    /// Fetched; failures are logged and ignored
    BestEffort,
    /// Fetched; failure aborts the signing session
    Required,
}

/// Which evidence a signing session gathers and which failures are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidencePolicy {
    /// Signature timestamp from a TSA
    pub timestamp: Requirement,
    /// CRL / OCSP evidence for the chain
    pub revocation: Requirement,
    /// Document timestamp revision after the signature
    pub archival_timestamp: bool,
}

impl EvidencePolicy {
    /// Default policy of a level.
    pub fn for_level(level: SignatureLevel) -> Self {
        let (timestamp, revocation, archival_timestamp) = match level.tier() {
            BaselineTier::B => (Requirement::Skip, Requirement::BestEffort, false),
            BaselineTier::T => (Requirement::Required, Requirement::BestEffort, false),
            BaselineTier::LT => (Requirement::Required, Requirement::Required, false),
            BaselineTier::LTA => (Requirement::Required, Requirement::Required, true),
        };
        Self {
            timestamp,
            revocation,
            archival_timestamp,
        }
    }
}

/// Access restriction of a certifying signature (DocMDP `/P`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificationPermission {
    /// Approval signature, not certifying
    #[default]
    NotCertified,
    /// P=1: no changes allowed
    NoChanges,
    /// P=2: form filling and signing allowed
    FormFilling,
    /// P=3: form filling, signing and annotations allowed
    FormFillingAndAnnotations,
}

impl CertificationPermission {
    /// DocMDP `/P` value, `None` for approval signatures.
    pub fn docmdp_level(&self) -> Option<i64> {
        match self {
            CertificationPermission::NotCertified => None,
            CertificationPermission::NoChanges => Some(1),
            CertificationPermission::FormFilling => Some(2),
            CertificationPermission::FormFillingAndAnnotations => Some(3),
        }
    }

    /// Whether this makes the signature a certification.
    pub fn is_certifying(&self) -> bool {
        self.docmdp_level().is_some()
    }
}

/// Placement of the signature widget. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldPlacement {
    /// Page number (1-based)
    pub page: u32,
    /// Lower-left x
    pub origin_x: f64,
    /// Lower-left y
    pub origin_y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

/// Form/appearance parameters of a signature. Every field is optional so an
/// override can name only what it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureFormParameters {
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// `/Name`
    pub signer_name: Option<String>,
    /// `/Prop_Build /App /Name`
    pub signature_creator: Option<String>,
    /// Certification (DocMDP) permission
    pub certification_permission: Option<CertificationPermission>,
    /// Password handed to the key provider
    pub password: Option<String>,
    /// Time zone offset of `/M` in minutes east of UTC
    pub signing_time_zone: Option<i32>,
    /// Field name; a unique `SignatureN` name is generated when unset
    pub field_name: Option<String>,
    /// Widget placement; invisible when unset
    pub placement: Option<FieldPlacement>,
}

impl SignatureFormParameters {
    /// Fields set in `overrides` win; unset ones come from `self`.
    pub fn merge_override(&self, overrides: Option<&SignatureFormParameters>) -> Self {
        let Some(o) = overrides else {
            return self.clone();
        };
        Self {
            reason: o.reason.clone().or_else(|| self.reason.clone()),
            location: o.location.clone().or_else(|| self.location.clone()),
            contact_info: o.contact_info.clone().or_else(|| self.contact_info.clone()),
            signer_name: o.signer_name.clone().or_else(|| self.signer_name.clone()),
            signature_creator: o.signature_creator.clone().or_else(|| self.signature_creator.clone()),
            certification_permission: o.certification_permission.or(self.certification_permission),
            password: o.password.clone().or_else(|| self.password.clone()),
            signing_time_zone: o.signing_time_zone.or(self.signing_time_zone),
            field_name: o.field_name.clone().or_else(|| self.field_name.clone()),
            placement: o.placement.or(self.placement),
        }
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Make the signature certifying.
    pub fn with_certification(mut self, permission: CertificationPermission) -> Self {
        self.certification_permission = Some(permission);
        self
    }

    /// Effective certification permission.
    pub fn certification(&self) -> CertificationPermission {
        self.certification_permission.unwrap_or_default()
    }
}

/// Time-stamp authority connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampParameters {
    /// RFC 3161 endpoint
    pub tsa_url: String,
    /// Basic auth user
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "TimestampParameters::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bytes reserved for a document timestamp token
    #[serde(default = "TimestampParameters::default_token_reservation")]
    pub token_reservation: usize,
}

impl TimestampParameters {
    fn default_timeout_secs() -> u64 {
        30
    }

    fn default_token_reservation() -> usize {
        crate::signatures::DOCUMENT_TIMESTAMP_RESERVATION
    }

    /// TSA without authentication.
    pub fn new(tsa_url: impl Into<String>) -> Self {
        Self {
            tsa_url: tsa_url.into(),
            username: None,
            password: None,
            timeout_secs: Self::default_timeout_secs(),
            token_reservation: Self::default_token_reservation(),
        }
    }

    /// Reserve `bytes` for document timestamp tokens of this TSA.
    pub fn with_token_reservation(mut self, bytes: usize) -> Self {
        self.token_reservation = bytes;
        self
    }

    /// Use HTTP basic authentication.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl fmt::Debug for TimestampParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimestampParameters")
            .field("tsa_url", &self.tsa_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("token_reservation", &self.token_reservation)
            .finish()
    }
}

/// Resolved configuration of one signing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Identifier in the config store
    pub id: Option<String>,
    /// Signature level
    pub level: SignatureLevel,
    /// Digest algorithm
    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,
    /// Default form parameters
    #[serde(default)]
    pub form_parameters: SignatureFormParameters,
    /// Time-stamp authority
    pub timestamp: Option<TimestampParameters>,
    /// Replaces the level's default evidence policy
    pub evidence_policy: Option<EvidencePolicy>,
    /// Placeholder reservation in bytes; 0 means estimate
    #[serde(default)]
    pub estimated_size: usize,
}

impl SignatureConfig {
    /// Config for a level with SHA-256 and no TSA.
    pub fn new(level: SignatureLevel) -> Self {
        Self {
            id: None,
            level,
            digest_algorithm: DigestAlgorithm::Sha256,
            form_parameters: SignatureFormParameters::default(),
            timestamp: None,
            evidence_policy: None,
            estimated_size: 0,
        }
    }

    /// Set the digest algorithm.
    pub fn with_digest_algorithm(mut self, alg: DigestAlgorithm) -> Self {
        self.digest_algorithm = alg;
        self
    }

    /// Set the default form parameters.
    pub fn with_form_parameters(mut self, params: SignatureFormParameters) -> Self {
        self.form_parameters = params;
        self
    }

    /// Set the time-stamp authority.
    pub fn with_timestamp(mut self, params: TimestampParameters) -> Self {
        self.timestamp = Some(params);
        self
    }

    /// Override the level's evidence policy.
    pub fn with_evidence_policy(mut self, policy: EvidencePolicy) -> Self {
        self.evidence_policy = Some(policy);
        self
    }

    /// Fix the placeholder reservation instead of estimating it.
    pub fn with_estimated_size(mut self, bytes: usize) -> Self {
        self.estimated_size = bytes;
        self
    }

    /// Policy in force: the override if present, else the level default.
    pub fn effective_policy(&self) -> EvidencePolicy {
        self.evidence_policy
            .unwrap_or_else(|| EvidencePolicy::for_level(self.level))
    }
}

/// Which signature config and which key to use for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigKeyBinding {
    /// Signature config identifier
    pub signature_config_id: String,
    /// Key provider identifier
    pub key_provider_id: String,
    /// Key / certificate alias within the provider
    pub kid: String,
}

impl ConfigKeyBinding {
    /// Build a binding.
    pub fn new(
        signature_config_id: impl Into<String>,
        key_provider_id: impl Into<String>,
        kid: impl Into<String>,
    ) -> Self {
        Self {
            signature_config_id: signature_config_id.into(),
            key_provider_id: key_provider_id.into(),
            kid: kid.into(),
        }
    }

    /// Every part must be non-empty.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("signature_config_id", &self.signature_config_id),
            ("key_provider_id", &self.key_provider_id),
            ("kid", &self.kid),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("binding {} is empty", name)));
            }
        }
        Ok(())
    }
}

/// Resolves configuration and certificate chains for a binding, either from
/// fixed offline values or from online collaborators.
#[derive(Clone, Default)]
pub struct ConfigProvider {
    offline_config: Option<SignatureConfig>,
    offline_chain: Option<CertificateChain>,
    config_store: Option<Arc<dyn SignatureConfigStore>>,
    key_provider: Option<Arc<dyn KeyProvider>>,
}

impl fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigProvider")
            .field("offline_config", &self.offline_config)
            .field("offline_chain", &self.offline_chain.as_ref().map(CertificateChain::len))
            .field("config_store", &self.config_store.is_some())
            .field("key_provider", &self.key_provider.is_some())
            .finish()
    }
}

impl ConfigProvider {
    /// Serve a fixed config and chain for every binding.
    pub fn offline(config: SignatureConfig, chain: CertificateChain) -> Self {
        Self {
            offline_config: Some(config),
            offline_chain: Some(chain),
            ..Default::default()
        }
    }

    /// Look configs and chains up through collaborators.
    pub fn online(config_store: Arc<dyn SignatureConfigStore>, key_provider: Arc<dyn KeyProvider>) -> Self {
        Self {
            config_store: Some(config_store),
            key_provider: Some(key_provider),
            ..Default::default()
        }
    }

    /// Resolve the signature config of a binding.
    pub fn signature_config(&self, binding: &ConfigKeyBinding) -> Result<SignatureConfig> {
        if let Some(config) = &self.offline_config {
            return Ok(config.clone());
        }
        match &self.config_store {
            Some(store) => store.get_config(&binding.signature_config_id).map_err(|e| match e {
                Error::RemoteService { .. } => e,
                other => Error::remote(RemoteService::ConfigStore, other.to_string()),
            }),
            None => Err(Error::Validation(
                "no offline signature config and no config store configured".into(),
            )),
        }
    }

    /// Resolve the certificate chain of a binding.
    pub fn certificate_chain(&self, binding: &ConfigKeyBinding) -> Result<CertificateChain> {
        if let Some(chain) = &self.offline_chain {
            return Ok(chain.clone());
        }
        match &self.key_provider {
            Some(provider) => provider.get_certificate_chain(binding),
            None => Err(Error::Validation(
                "no offline certificate chain and no key provider configured".into(),
            )),
        }
    }

    /// Key provider for one-shot signing, if online.
    pub fn key_provider(&self) -> Option<&Arc<dyn KeyProvider>> {
        self.key_provider.as_ref()
    }
}
