// src/security/trust.rs

use crate::error::{BridgeError, Result, TrustRejection};
use crate::events::{dispatcher, LogLevel};
use crate::prefs::Preferences;
use crate::role::Role;
use crate::security::identity::{self, Identity};
use base64::Engine;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// File (under the state dir) holding identity, pin and auth flag.
pub const TRUST_STATE_FILE: &str = "tls_identity.json";

const KEY_PRIVATE: &str = "identity_private";
const KEY_CERT: &str = "identity_certificate";
const KEY_PEER_CERT: &str = "peer_certificate";
const KEY_PEER_FP: &str = "peer_fingerprint";
const KEY_AUTH_ERROR: &str = "auth_error";

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Outcome of a trust evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecisionOutcome {
    Accept,
    Reject,
}

/// Pin state observed while evaluating one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    NoPin,
    PinnedMatch,
    PinnedMismatch,
    /// Peer presented our own identity.
    SelfConnection,
}

/// Detailed trust decision returned by [`TrustContext::evaluate_chain`]
#[derive(Debug, Clone)]
pub struct TrustDecision {
    pub outcome: TrustDecisionOutcome,
    pub reason: &'static str,
    pub fingerprint: Option<String>,
    pub pin_state: Option<PinState>,
    /// The peer certificate was pinned by this evaluation.
    pub stored: bool,
    pub rejection: Option<TrustRejection>,
}

impl TrustDecision {
    fn accept(reason: &'static str, fp: String, pin_state: PinState, stored: bool) -> Self {
        Self {
            outcome: TrustDecisionOutcome::Accept,
            reason,
            fingerprint: Some(fp),
            pin_state: Some(pin_state),
            stored,
            rejection: None,
        }
    }

    fn reject(rejection: TrustRejection, fp: Option<String>, pin_state: Option<PinState>) -> Self {
        Self {
            outcome: TrustDecisionOutcome::Reject,
            reason: rejection.reason(),
            fingerprint: fp,
            pin_state,
            stored: false,
            rejection: Some(rejection),
        }
    }

    pub fn is_accept(&self) -> bool {
        self.outcome == TrustDecisionOutcome::Accept
    }

    /// `Some(true)` when the peer matched the pin, `Some(false)` on mismatch.
    pub fn pinned_match(&self) -> Option<bool> {
        match self.pin_state {
            Some(PinState::PinnedMatch) => Some(true),
            Some(PinState::PinnedMismatch) => Some(false),
            _ => None,
        }
    }

    pub fn into_result(self) -> std::result::Result<Self, TrustRejection> {
        match self.rejection {
            Some(r) => Err(r),
            None => Ok(self),
        }
    }
}

struct TrustState {
    prefs: Preferences,
    role: Role,
}

/// Identity, pinned peer and auth-error flag of one context.
///
/// Cloning is cheap and every clone shares the same state; all reads and
/// mutations go through a single lock, so a handshake always observes the
/// result of any identity regeneration or pin reset that happened before it.
#[derive(Clone)]
pub struct TrustContext {
    inner: Arc<Mutex<TrustState>>,
}

impl std::fmt::Debug for TrustContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.lock();
        f.debug_struct("TrustContext")
            .field("role", &st.role)
            .field("path", &st.prefs.path())
            .finish()
    }
}

impl TrustContext {
    /// Open the persisted trust state under `state_dir` (in-memory when `None`).
    pub fn open(state_dir: Option<&Path>, role: Role) -> Result<Self> {
        let prefs = Preferences::open_in(state_dir, TRUST_STATE_FILE)?;
        Ok(Self::with_prefs(prefs, role))
    }

    pub fn in_memory(role: Role) -> Self {
        Self::with_prefs(Preferences::in_memory(), role)
    }

    fn with_prefs(prefs: Preferences, role: Role) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrustState { prefs, role })),
        }
    }

    pub fn role(&self) -> Role {
        self.inner.lock().role
    }

    /// Current identity, generated and persisted on first use.
    pub fn ensure_identity(&self) -> Result<Identity> {
        let mut st = self.inner.lock();
        Ok(ensure_locked(&mut st)?.0)
    }

    /// Replace the identity unconditionally; clears the pin and the auth flag.
    pub fn regenerate_identity(&self) -> Result<Identity> {
        let mut st = self.inner.lock();
        regenerate_locked(&mut st)
    }

    /// Switch role. The certificate names the role, so the identity is regenerated.
    pub fn set_role(&self, role: Role) -> Result<Identity> {
        let mut st = self.inner.lock();
        st.role = role;
        regenerate_locked(&mut st)
    }

    pub fn local_fingerprint(&self) -> Result<String> {
        Ok(self.ensure_identity()?.fingerprint)
    }

    pub fn pinned_peer_fingerprint(&self) -> Option<String> {
        self.inner.lock().prefs.get_string(KEY_PEER_FP)
    }

    pub fn pinned_peer_certificate(&self) -> Option<CertificateDer<'static>> {
        let st = self.inner.lock();
        st.prefs
            .get_string(KEY_PEER_CERT)
            .and_then(|b| B64.decode(b).ok())
            .map(CertificateDer::from)
    }

    /// Pin `cert` unless a peer is already pinned. Returns whether it was stored.
    pub fn pin_peer_certificate(&self, cert: &CertificateDer<'_>) -> Result<bool> {
        let fp = identity::fingerprint(cert)?;
        let mut st = self.inner.lock();
        if st.prefs.contains(KEY_PEER_FP) {
            return Ok(false);
        }
        store_pin(&mut st.prefs, cert, &fp)?;
        Ok(true)
    }

    /// Forget the pinned peer; the next handshake re-enters trust-on-first-use.
    pub fn reset_pin(&self) -> Result<()> {
        let mut st = self.inner.lock();
        st.prefs.update(|e| {
            e.remove(KEY_PEER_CERT);
            e.remove(KEY_PEER_FP);
            e.remove(KEY_AUTH_ERROR);
        })?;
        dispatcher::emit_system("trust", LogLevel::Info, "pin_reset", None);
        Ok(())
    }

    pub fn mark_auth_error(&self) -> Result<()> {
        self.inner.lock().prefs.update(|e| e.put_bool(KEY_AUTH_ERROR, true))
    }

    pub fn clear_auth_error(&self) -> Result<()> {
        let mut st = self.inner.lock();
        if st.prefs.get_bool(KEY_AUTH_ERROR, false) {
            st.prefs.update(|e| e.put_bool(KEY_AUTH_ERROR, false))?;
        }
        Ok(())
    }

    pub fn has_auth_error(&self) -> bool {
        self.inner.lock().prefs.get_bool(KEY_AUTH_ERROR, false)
    }

    /// Certificate chain and private key to present in a TLS session.
    pub fn credentials(&self) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let mut st = self.inner.lock();
        let (identity, key) = ensure_locked(&mut st)?;
        Ok((vec![identity.certificate], PrivateKeyDer::Pkcs8(key)))
    }

    /// Trust-on-first-use decision for a peer chain (leaf first) at `now` (UNIX seconds).
    ///
    /// The whole check-then-pin runs under the context lock: an unpinned peer
    /// is pinned, a matching or self connection clears the auth flag.
    pub fn evaluate_chain(&self, chain: &[CertificateDer<'_>], now: i64) -> TrustDecision {
        self.decide(chain, now, true)
    }

    /// Same checks as [`TrustContext::evaluate_chain`] without pinning or
    /// clearing the auth flag. A pin mismatch still sets the flag.
    ///
    /// Used while the handshake is in flight; the pin is written by
    /// [`TrustContext::evaluate_chain`] once the peer proved it holds the key.
    pub fn assess_chain(&self, chain: &[CertificateDer<'_>], now: i64) -> TrustDecision {
        self.decide(chain, now, false)
    }

    fn decide(&self, chain: &[CertificateDer<'_>], now: i64, commit: bool) -> TrustDecision {
        let Some(leaf) = chain.first() else {
            return TrustDecision::reject(TrustRejection::EmptyChain, None, None);
        };
        if let Err(rejection) = identity::check_validity(leaf, now) {
            return TrustDecision::reject(rejection, identity::fingerprint(leaf).ok(), None);
        }
        let fp = match identity::fingerprint(leaf) {
            Ok(fp) => fp,
            Err(rejection) => return TrustDecision::reject(rejection, None, None),
        };

        let mut st = self.inner.lock();
        let own = match ensure_locked(&mut st) {
            Ok((identity, _)) => Some(identity.fingerprint),
            Err(e) => {
                dispatcher::emit_system("trust", LogLevel::Warn, "identity_unavailable", Some(e.to_string()));
                None
            }
        };
        if own.as_deref() == Some(fp.as_str()) {
            if commit {
                clear_flag_locked(&mut st.prefs);
            }
            return TrustDecision::accept("self-connection", fp, PinState::SelfConnection, false);
        }

        match st.prefs.get_string(KEY_PEER_FP) {
            None if !commit => TrustDecision::accept("tofu-first-use", fp, PinState::NoPin, false),
            None => {
                if let Err(e) = store_pin(&mut st.prefs, leaf, &fp) {
                    dispatcher::emit_system("trust", LogLevel::Warn, "pin_persist_failed", Some(e.to_string()));
                }
                dispatcher::emit_system("trust", LogLevel::Info, "peer_pinned", Some(fp.clone()));
                TrustDecision::accept("tofu-pinned", fp, PinState::NoPin, true)
            }
            Some(pinned) if pinned == fp => {
                if commit {
                    clear_flag_locked(&mut st.prefs);
                }
                TrustDecision::accept("pin-match", fp, PinState::PinnedMatch, false)
            }
            Some(_) => {
                if let Err(e) = st.prefs.update(|e| e.put_bool(KEY_AUTH_ERROR, true)) {
                    dispatcher::emit_system("trust", LogLevel::Warn, "auth_flag_persist_failed", Some(e.to_string()));
                }
                TrustDecision::reject(TrustRejection::PinMismatch, Some(fp), Some(PinState::PinnedMismatch))
            }
        }
    }
}

fn store_pin(prefs: &mut Preferences, cert: &CertificateDer<'_>, fp: &str) -> Result<()> {
    let encoded = B64.encode(cert.as_ref());
    prefs.update(|e| {
        e.put_string(KEY_PEER_CERT, encoded);
        e.put_string(KEY_PEER_FP, fp);
        e.put_bool(KEY_AUTH_ERROR, false);
    })
}

fn clear_flag_locked(prefs: &mut Preferences) {
    if prefs.get_bool(KEY_AUTH_ERROR, false) {
        if let Err(e) = prefs.update(|e| e.put_bool(KEY_AUTH_ERROR, false)) {
            dispatcher::emit_system("trust", LogLevel::Warn, "auth_flag_persist_failed", Some(e.to_string()));
        }
    }
}

fn load_stored(prefs: &Preferences) -> Option<(Identity, PrivatePkcs8KeyDer<'static>)> {
    let key = B64.decode(prefs.get_string(KEY_PRIVATE)?).ok()?;
    let cert = CertificateDer::from(B64.decode(prefs.get_string(KEY_CERT)?).ok()?);
    if !identity::key_matches_certificate(&key, &cert) {
        return None;
    }
    let fingerprint = identity::fingerprint(&cert).ok()?;
    Some((
        Identity {
            certificate: cert,
            fingerprint,
        },
        PrivatePkcs8KeyDer::from(key),
    ))
}

fn ensure_locked(st: &mut TrustState) -> Result<(Identity, PrivatePkcs8KeyDer<'static>)> {
    if let Some(stored) = load_stored(&st.prefs) {
        return Ok(stored);
    }
    if st.prefs.contains(KEY_PRIVATE) || st.prefs.contains(KEY_CERT) {
        dispatcher::emit_system(
            "identity",
            LogLevel::Warn,
            "identity_invalid",
            Some("stored identity unusable; generating a new one".into()),
        );
    }
    let generated = persist_new(st)?;
    dispatcher::emit_system(
        "identity",
        LogLevel::Info,
        "identity_generated",
        Some(generated.0.fingerprint.clone()),
    );
    Ok(generated)
}

fn regenerate_locked(st: &mut TrustState) -> Result<Identity> {
    let (identity, _) = persist_new(st)?;
    st.prefs.update(|e| {
        e.remove(KEY_PEER_CERT);
        e.remove(KEY_PEER_FP);
        e.remove(KEY_AUTH_ERROR);
    })?;
    dispatcher::emit_system(
        "identity",
        LogLevel::Info,
        "identity_regenerated",
        Some(format!("{} {}", st.role.name(), identity.fingerprint)),
    );
    Ok(identity)
}

fn persist_new(st: &mut TrustState) -> Result<(Identity, PrivatePkcs8KeyDer<'static>)> {
    let generated = identity::generate_identity(st.role.describe())?;
    let key_b64 = B64.encode(generated.private_key.secret_pkcs8_der());
    let cert_b64 = B64.encode(generated.identity.certificate.as_ref());
    st.prefs
        .update(|e| {
            e.put_string(KEY_PRIVATE, key_b64);
            e.put_string(KEY_CERT, cert_b64);
        })
        .map_err(|e| match e {
            BridgeError::Storage(msg) => BridgeError::Storage(format!("identity not persisted: {}", msg)),
            other => other,
        })?;
    Ok((generated.identity, generated.private_key))
}
