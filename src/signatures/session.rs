//! Two-phase signing sessions.
//!
//! A session moves `Opened → Prepared → Finalized`. Preparing writes the
//! placeholder revision and builds the envelope skeleton; merging embeds an
//! externally produced signature value. Between the two calls the session
//! may be serialized and kept in a [`SessionStore`], so `prepare` and
//! `merge` do not have to run in the same process.

use super::digest::digest;
use super::envelope::EnvelopeSkeleton;
use super::preparer::{
    check_certification, estimate_reservation, prepare_document, PlaceholderRequest, PreparedDocument,
    DOCUMENT_TIMESTAMP_RESERVATION,
};
use super::revocation::{collect_revocation, RevocationEvidence, RevocationSource};
use super::timestamp::TimestampAuthority;
use super::types::{base64_bytes, CertificateChain, DigestAlgorithm, SignInput, SignMode, Signature};
use super::KeyProvider;
use crate::config::{ConfigKeyBinding, EvidencePolicy, Requirement, SignatureConfig, SignatureFormParameters};
use crate::document::PdfDocument;
use crate::error::{Error, RemoteService, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::Validation(format!("invalid session id '{}': {}", s, e)))
    }
}

/// Lifecycle state of a [`SigningSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Config resolved, nothing written yet
    Opened,
    /// Placeholder written, waiting for the signature value
    Prepared,
    /// Output produced; terminal
    Finalized,
}

/// State of one signing operation.
#[derive(Clone, Serialize, Deserialize)]
pub struct SigningSession {
    id: SessionId,
    state: SessionState,
    name: Option<String>,
    binding: ConfigKeyBinding,
    config: SignatureConfig,
    form_parameters: SignatureFormParameters,
    signing_date: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    original_digest: Vec<u8>,
    prepared: Option<PreparedDocument>,
    skeleton: Option<EnvelopeSkeleton>,
}

impl fmt::Debug for SigningSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("name", &self.name)
            .field("level", &self.config.level)
            .field("signing_date", &self.signing_date)
            .field("reservation", &self.prepared.as_ref().map(PreparedDocument::reservation))
            .finish()
    }
}

impl SigningSession {
    /// Open a session for `config`; the signing date is now, to the second.
    pub fn open(
        config: SignatureConfig,
        binding: ConfigKeyBinding,
        form_parameters: SignatureFormParameters,
        name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            state: SessionState::Opened,
            name,
            binding,
            config,
            form_parameters,
            signing_date: DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now),
            original_digest: Vec::new(),
            prepared: None,
            skeleton: None,
        }
    }

    /// Fix the signing date.
    pub fn with_signing_date(mut self, date: DateTime<Utc>) -> Self {
        self.signing_date = date;
        self
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Resolved configuration.
    pub fn config(&self) -> &SignatureConfig {
        &self.config
    }

    /// Evidence policy in force.
    pub fn policy(&self) -> EvidencePolicy {
        self.config.effective_policy()
    }

    /// Prepared document, once prepared.
    pub fn prepared(&self) -> Option<&PreparedDocument> {
        self.prepared.as_ref()
    }

    /// Envelope skeleton, once prepared.
    pub fn skeleton(&self) -> Option<&EnvelopeSkeleton> {
        self.skeleton.as_ref()
    }

    /// Write the placeholder and build the envelope skeleton.
    ///
    /// `timestamping` tells whether a TSA is available; a policy requiring
    /// timestamps fails here without one. A certification conflict is
    /// detected before `revocation` is asked for anything.
    pub fn prepare(
        &mut self,
        document: &[u8],
        chain: &CertificateChain,
        revocation: &dyn RevocationSource,
        timestamping: bool,
    ) -> Result<()> {
        match self.state {
            SessionState::Opened => {},
            SessionState::Prepared => return Err(Error::Validation("session is already prepared".into())),
            SessionState::Finalized => return Err(Error::AlreadyClosed),
        }
        if document.is_empty() {
            return Err(Error::Validation("document bytes are empty".into()));
        }
        self.binding.validate()?;
        let sub_filter = self.config.level.sub_filter()?;
        let policy = self.policy();
        let needs_tsa = policy.timestamp == Requirement::Required || policy.archival_timestamp;
        if needs_tsa && !timestamping {
            return Err(Error::Validation(format!(
                "signature level {} requires a timestamp authority",
                self.config.level
            )));
        }

        let doc = PdfDocument::from_bytes(document.to_vec())?;
        check_certification(&doc, self.form_parameters.certification())?;

        let evidence = match policy.revocation {
            Requirement::Skip => RevocationEvidence::default(),
            Requirement::BestEffort | Requirement::Required => collect_revocation(chain, revocation),
        };
        let reservation = match self.config.estimated_size {
            0 => estimate_reservation(&evidence, self.config.level.is_long_term()),
            explicit => explicit,
        };
        let prepared = prepare_document(
            &doc,
            &PlaceholderRequest {
                sub_filter,
                form_parameters: self.form_parameters.clone(),
                signing_date: self.signing_date,
                reservation,
            },
        )?;

        let algorithm = self.config.digest_algorithm;
        let document_digest = prepared.canonical_digest(algorithm)?;
        let skeleton =
            EnvelopeSkeleton::build(&document_digest, chain, &evidence, sub_filter, algorithm, self.signing_date)?;

        log::info!(
            "session {} prepared: level {}, {} byte reservation, {} evidence items",
            self.id,
            self.config.level,
            reservation,
            evidence.len()
        );
        self.original_digest = digest(document, DigestAlgorithm::Sha256);
        self.prepared = Some(prepared);
        self.skeleton = Some(skeleton);
        self.state = SessionState::Prepared;
        Ok(())
    }

    /// Data to sign for the external signer, as data or as digest.
    pub fn sign_input(&self, mode: SignMode) -> Result<SignInput> {
        let skeleton = self.require_skeleton()?;
        let input = match mode {
            SignMode::Document => skeleton.signed_attributes().to_vec(),
            SignMode::Digest => skeleton.signed_attributes_digest(),
        };
        Ok(SignInput {
            name: self.name.clone(),
            input,
            sign_mode: mode,
            digest_algorithm: self.config.digest_algorithm,
            signing_date: self.signing_date,
            binding: self.binding.clone(),
            form_parameters: self.form_parameters.clone(),
            password: self.form_parameters.password.clone(),
        })
    }

    /// Fail unless `document` is the document this session prepared.
    pub fn check_document(&self, document: &[u8]) -> Result<()> {
        if self.original_digest.is_empty() || digest(document, DigestAlgorithm::Sha256) != self.original_digest {
            return Err(Error::Validation(
                "document differs from the one the session was prepared for".into(),
            ));
        }
        Ok(())
    }

    /// Fail unless `signature` can be merged into this session.
    pub fn check_signature(&self, signature: &Signature) -> Result<()> {
        match self.state {
            SessionState::Prepared => {},
            SessionState::Opened => return Err(Error::Validation("session is not prepared".into())),
            SessionState::Finalized => return Err(Error::AlreadyClosed),
        }
        if signature.value.is_empty() {
            return Err(Error::Validation("signature value is empty".into()));
        }
        if signature.binding != self.binding {
            return Err(Error::Validation("signature was produced for a different binding".into()));
        }
        if signature.algorithm.digest() != self.config.digest_algorithm {
            return Err(Error::Validation(format!(
                "signature algorithm {} does not match digest algorithm {}",
                signature.algorithm,
                self.config.digest_algorithm.name()
            )));
        }
        Ok(())
    }

    /// Embed `signature` and return the signed document.
    ///
    /// Timestamps are fetched from `tsa` as the policy demands; a failing
    /// TSA is fatal only when the timestamp is required. No output is
    /// produced on any error.
    pub fn merge(&mut self, signature: &Signature, tsa: Option<&dyn TimestampAuthority>) -> Result<Vec<u8>> {
        self.check_signature(signature)?;
        let policy = self.policy();
        let level = self.config.level;
        let algorithm = self.config.digest_algorithm;
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| Error::Validation("session has no prepared document".into()))?;
        let skeleton = self
            .skeleton
            .as_mut()
            .ok_or_else(|| Error::Validation("session has no envelope skeleton".into()))?;

        if policy.revocation == Requirement::Required && skeleton.evidence().is_empty() {
            return Err(Error::MissingRevocationEvidence(level.to_string()));
        }

        let token = match (policy.timestamp, tsa) {
            (Requirement::Skip, _) => None,
            (Requirement::Required, None) => {
                return Err(Error::Validation(format!("signature level {} requires a timestamp authority", level)));
            },
            (Requirement::BestEffort, None) => None,
            (requirement, Some(tsa)) => {
                match tsa.request_token(&skeleton.timestamp_imprint(&signature.value), algorithm) {
                    Ok(token) => Some(token),
                    Err(e) if requirement == Requirement::Required => return Err(e),
                    Err(e) => {
                        log::warn!("session {}: continuing without signature timestamp: {}", self.id, e);
                        None
                    },
                }
            },
        };

        let envelope = skeleton.finalize(&signature.value, signature.algorithm, token.as_deref())?;
        let mut signed = prepared.patch(&envelope)?;
        if policy.archival_timestamp {
            let tsa = tsa.ok_or_else(|| {
                Error::Validation(format!("signature level {} requires a timestamp authority", level))
            })?;
            let reservation = self
                .config
                .timestamp
                .as_ref()
                .map_or(DOCUMENT_TIMESTAMP_RESERVATION, |params| params.token_reservation);
            signed = append_document_timestamp(signed, tsa, algorithm, reservation)?;
        }

        self.state = SessionState::Finalized;
        log::info!(
            "session {} finalized: {} byte envelope, {} bytes output",
            self.id,
            envelope.len(),
            signed.len()
        );
        Ok(signed)
    }

    /// One-shot path: ask `signer` for the signature inline, then merge.
    ///
    /// A signer failure leaves the session prepared and surfaces as a
    /// remote service error.
    pub fn sign_with(
        &mut self,
        signer: &dyn KeyProvider,
        tsa: Option<&dyn TimestampAuthority>,
    ) -> Result<(Vec<u8>, Signature)> {
        let input = self.sign_input(SignMode::Digest)?;
        let signature = signer.sign(&input).map_err(|e| match e {
            Error::RemoteService { .. } => e,
            other => Error::remote(RemoteService::Signer, other.to_string()),
        })?;
        let signed = self.merge(&signature, tsa)?;
        Ok((signed, signature))
    }

    /// Serialize for an external store.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restore a serialized session.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn require_skeleton(&self) -> Result<&EnvelopeSkeleton> {
        match self.state {
            SessionState::Finalized => Err(Error::AlreadyClosed),
            _ => self
                .skeleton
                .as_ref()
                .ok_or_else(|| Error::Validation("session is not prepared".into())),
        }
    }
}

/// Append a `/DocTimeStamp` revision over `signed`.
fn append_document_timestamp(
    signed: Vec<u8>,
    tsa: &dyn TimestampAuthority,
    algorithm: DigestAlgorithm,
    reservation: usize,
) -> Result<Vec<u8>> {
    let doc = PdfDocument::from_bytes(signed)?;
    let prepared = prepare_document(&doc, &PlaceholderRequest::document_timestamp(reservation))?;
    let token = tsa.request_token(&prepared.canonical_digest(algorithm)?, algorithm)?;
    prepared.patch(&token)
}

/// Keeps sessions between `prepare` and `merge`.
pub trait SessionStore: Send + Sync {
    /// Store a prepared session under its id.
    fn insert(&self, session: SigningSession) -> Result<()>;

    /// Take a session out for merging.
    ///
    /// First caller wins: the id is closed atomically and every later call
    /// fails with `AlreadyClosed`. Unknown ids fail with `SessionNotFound`.
    fn checkout(&self, id: &SessionId) -> Result<SigningSession> {
        self.checkout_checked(id, &|_: &SigningSession| Ok(()))
    }

    /// [`checkout`](Self::checkout), but only if `check` accepts the
    /// session. A rejected session stays open.
    fn checkout_checked(
        &self,
        id: &SessionId,
        check: &dyn Fn(&SigningSession) -> Result<()>,
    ) -> Result<SigningSession>;
}

enum Slot {
    Open(Box<SigningSession>),
    Closed,
}

/// Process-local [`SessionStore`].
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Slot>>,
}

impl InMemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions still waiting for a merge.
    pub fn open_sessions(&self) -> usize {
        self.lock().values().filter(|slot| matches!(slot, Slot::Open(_))).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Slot>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySessionStore")
            .field("open_sessions", &self.open_sessions())
            .finish()
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: SigningSession) -> Result<()> {
        let mut sessions = self.lock();
        if sessions.contains_key(&session.id) {
            return Err(Error::Validation(format!("session {} already stored", session.id)));
        }
        log::debug!("storing session {}", session.id);
        sessions.insert(session.id, Slot::Open(Box::new(session)));
        Ok(())
    }

    fn checkout_checked(
        &self,
        id: &SessionId,
        check: &dyn Fn(&SigningSession) -> Result<()>,
    ) -> Result<SigningSession> {
        let mut sessions = self.lock();
        let slot = sessions.get_mut(id).ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        match slot {
            Slot::Open(session) => check(&**session)?,
            Slot::Closed => return Err(Error::AlreadyClosed),
        }
        match std::mem::replace(slot, Slot::Closed) {
            Slot::Open(session) => {
                log::info!("session {} checked out", id);
                Ok(*session)
            },
            Slot::Closed => Err(Error::AlreadyClosed),
        }
    }
}
