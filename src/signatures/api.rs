//! Protocol entry points.
//!
//! [`SigningEngine`] serves both call patterns over one session type:
//!
//! - two-phase: [`determine_sign_input`](SigningEngine::determine_sign_input)
//!   returns the data to sign and a session id; the caller obtains the
//!   signature elsewhere and calls
//!   [`merge_signature`](SigningEngine::merge_signature);
//! - one-shot: [`sign`](SigningEngine::sign) asks the configured
//!   [`KeyProvider`] for the signature inline.
//!
//! ```no_run
//! use pdf_remote_sign::config::{ConfigKeyBinding, ConfigProvider, SignatureConfig, SignatureLevel};
//! use pdf_remote_sign::signatures::{
//!     CertificateChain, DetermineSignInput, MergeSignature, OrigData, SignMode, Signature,
//!     SignatureAlgorithm, SigningEngine,
//! };
//!
//! # fn remote_sign(_: &[u8]) -> Vec<u8> { Vec::new() }
//! # fn main() -> pdf_remote_sign::Result<()> {
//! let chain = CertificateChain::new(vec![std::fs::read("signer.der")?])?;
//! let config = SignatureConfig::new(SignatureLevel::PAdES_BASELINE_B);
//! let engine = SigningEngine::new(ConfigProvider::offline(config, chain));
//!
//! let binding = ConfigKeyBinding::new("default", "hsm", "signing-key");
//! let document = OrigData::new(Some("contract.pdf".into()), std::fs::read("contract.pdf")?);
//! let response = engine.determine_sign_input(&DetermineSignInput {
//!     orig_data: document.clone(),
//!     sign_mode: SignMode::Digest,
//!     binding: binding.clone(),
//!     form_params_override: None,
//! })?;
//!
//! let value = remote_sign(&response.sign_input.input);
//! let output = engine.merge_signature(&MergeSignature {
//!     orig_data: document,
//!     signature: Signature { value, algorithm: SignatureAlgorithm::RSA_SHA256, binding },
//!     session_id: response.session_id,
//! })?;
//! std::fs::write("contract-signed.pdf", &output.value)?;
//! # Ok(())
//! # }
//! ```

use super::digest::digest_sign_input;
use super::revocation::{NoRevocation, RevocationSource};
use super::session::{InMemorySessionStore, SessionId, SessionStore, SigningSession};
use super::timestamp::TimestampAuthority;
use super::types::{CertificateChain, DetermineSignInput, MergeSignature, SignInput, SignOutput, Signature};
use crate::config::{ConfigKeyBinding, ConfigProvider, Requirement, SignatureConfig};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(feature = "http")]
use super::timestamp::HttpTimestampAuthority;

/// Holder of signing keys and their certificates (HSM, vault, signing
/// service).
pub trait KeyProvider: Send + Sync {
    /// Certificate chain of the key named by `binding`, leaf first.
    fn get_certificate_chain(&self, binding: &ConfigKeyBinding) -> Result<CertificateChain>;

    /// Sign `input` with the key named by `input.binding`. Only the
    /// one-shot path calls this.
    fn sign(&self, input: &SignInput) -> Result<Signature>;
}

/// Source of signature configurations.
pub trait SignatureConfigStore: Send + Sync {
    /// Configuration stored under `config_id`.
    fn get_config(&self, config_id: &str) -> Result<SignatureConfig>;
}

/// Result of [`SigningEngine::determine_sign_input`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInputResponse {
    /// Data for the external signer
    pub sign_input: SignInput,
    /// Session to pass back to `merge_signature`
    pub session_id: SessionId,
}

/// Signing protocol over pluggable collaborators.
#[derive(Clone)]
pub struct SigningEngine {
    config_provider: ConfigProvider,
    revocation: Arc<dyn RevocationSource>,
    timestamp_authority: Option<Arc<dyn TimestampAuthority>>,
    sessions: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for SigningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningEngine")
            .field("config_provider", &self.config_provider)
            .field("timestamp_authority", &self.timestamp_authority.is_some())
            .finish()
    }
}

impl SigningEngine {
    /// Engine without revocation lookups, with TSAs built from the config
    /// and an in-memory session store.
    pub fn new(config_provider: ConfigProvider) -> Self {
        Self {
            config_provider,
            revocation: Arc::new(NoRevocation),
            timestamp_authority: None,
            sessions: Arc::new(InMemorySessionStore::new()),
        }
    }

    /// Use `source` for CRL and OCSP evidence.
    pub fn with_revocation_source(mut self, source: Arc<dyn RevocationSource>) -> Self {
        self.revocation = source;
        self
    }

    /// Use `tsa` for every timestamp instead of the configured URL.
    pub fn with_timestamp_authority(mut self, tsa: Arc<dyn TimestampAuthority>) -> Self {
        self.timestamp_authority = Some(tsa);
        self
    }

    /// Keep two-phase sessions in `store`.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = store;
        self
    }

    /// Prepare the document and return the data to sign.
    pub fn determine_sign_input(&self, request: &DetermineSignInput) -> Result<SignInputResponse> {
        let (session, _) = self.open_session(request)?;
        let sign_input = session.sign_input(request.sign_mode)?;
        let session_id = session.id();
        self.sessions.insert(session)?;
        log::info!(
            "determined sign input for {:?}: {} bytes, mode {:?}, session {}",
            request.orig_data.name,
            sign_input.input.len(),
            sign_input.sign_mode,
            session_id
        );
        Ok(SignInputResponse { sign_input, session_id })
    }

    /// Replace the payload of `input` with its digest.
    pub fn digest(&self, input: SignInput) -> SignInput {
        digest_sign_input(input)
    }

    /// Embed an externally produced signature.
    ///
    /// A request that fails validation (other document, other binding,
    /// empty or mismatched signature) leaves the session open. Once merging
    /// starts the session is consumed whether or not it succeeds; a failed
    /// merge is retried from `determine_sign_input`.
    pub fn merge_signature(&self, request: &MergeSignature) -> Result<SignOutput> {
        if request.orig_data.content.is_empty() {
            return Err(Error::Validation("document bytes are empty".into()));
        }
        let mut session = self.sessions.checkout_checked(&request.session_id, &|session: &SigningSession| {
            session.check_document(&request.orig_data.content)?;
            session.check_signature(&request.signature)
        })?;
        let tsa = self.timestamp_authority_for(session.config())?;
        let value = session.merge(&request.signature, tsa.as_deref())?;
        Ok(SignOutput {
            value,
            name: request.orig_data.name.clone(),
            signature: request.signature.clone(),
        })
    }

    /// One-shot signing through the configured key provider.
    pub fn sign(&self, request: &DetermineSignInput) -> Result<SignOutput> {
        let signer = self
            .config_provider
            .key_provider()
            .cloned()
            .ok_or_else(|| Error::Validation("one-shot signing needs a key provider".into()))?;
        let (mut session, tsa) = self.open_session(request)?;
        let (value, signature) = session.sign_with(signer.as_ref(), tsa.as_deref())?;
        Ok(SignOutput {
            value,
            name: request.orig_data.name.clone(),
            signature,
        })
    }

    fn open_session(
        &self,
        request: &DetermineSignInput,
    ) -> Result<(SigningSession, Option<Arc<dyn TimestampAuthority>>)> {
        if request.orig_data.content.is_empty() {
            return Err(Error::Validation("document bytes are empty".into()));
        }
        request.binding.validate()?;
        let config = self.config_provider.signature_config(&request.binding)?;
        let chain = self.config_provider.certificate_chain(&request.binding)?;
        let form = config
            .form_parameters
            .merge_override(request.form_params_override.as_ref());
        let tsa = self.timestamp_authority_for(&config)?;

        let mut session = SigningSession::open(config, request.binding.clone(), form, request.orig_data.name.clone());
        session.prepare(&request.orig_data.content, &chain, self.revocation.as_ref(), tsa.is_some())?;
        Ok((session, tsa))
    }

    fn timestamp_authority_for(&self, config: &SignatureConfig) -> Result<Option<Arc<dyn TimestampAuthority>>> {
        let policy = config.effective_policy();
        if policy.timestamp == Requirement::Skip && !policy.archival_timestamp {
            return Ok(None);
        }
        if let Some(tsa) = &self.timestamp_authority {
            return Ok(Some(Arc::clone(tsa)));
        }
        match &config.timestamp {
            #[cfg(feature = "http")]
            Some(params) => Ok(Some(Arc::new(HttpTimestampAuthority::new(params.clone())?))),
            _ => Ok(None),
        }
    }
}
