// src/error.rs

use thiserror::Error;

/// Why the trust verifier refused a peer certificate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrustRejection {
    #[error("empty certificate chain")]
    EmptyChain,
    #[error("certificate expired")]
    ExpiredCertificate,
    #[error("certificate not yet valid")]
    NotYetValid,
    #[error("certificate could not be parsed")]
    Unparsable,
    #[error("pinned certificate mismatch")]
    PinMismatch,
}

impl TrustRejection {
    /// Short machine-friendly token used in trust events.
    pub fn reason(&self) -> &'static str {
        match self {
            TrustRejection::EmptyChain => "empty-chain",
            TrustRejection::ExpiredCertificate => "expired",
            TrustRejection::NotYetValid => "not-yet-valid",
            TrustRejection::Unparsable => "unparsable",
            TrustRejection::PinMismatch => "pin-mismatch",
        }
    }
}

/// Failure cause carried by [`BridgeError::Handshake`].
#[derive(Debug, Error)]
pub enum HandshakeCause {
    #[error(transparent)]
    Trust(TrustRejection),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error(transparent)]
    Tls(#[from] rustls::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("empty certificate chain")]
    EmptyChain,
    #[error("peer certificate outside its validity window")]
    ExpiredCertificate,
    #[error("peer certificate does not match the pinned certificate")]
    PinMismatch,
    #[error("TLS handshake failed: {cause}")]
    Handshake { cause: HandshakeCause },
    #[error("port {port} already in use")]
    PortInUse {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("{0} timed out")]
    IoTimeout(&'static str),
    #[error("share {name} too large ({size} bytes)")]
    ShareTooLarge { name: String, size: u64 },
    #[error("message of {size} bytes exceeds the {limit} byte line limit")]
    MessageTooLarge { size: usize, limit: usize },
    #[error("persisted state error: {0}")]
    Storage(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub(crate) fn handshake(cause: impl Into<HandshakeCause>) -> Self {
        BridgeError::Handshake {
            cause: cause.into(),
        }
    }

    /// True when the failure means the peer presented an identity other than the pinned one.
    pub fn is_pin_mismatch(&self) -> bool {
        matches!(
            self,
            BridgeError::PinMismatch
                | BridgeError::Handshake {
                    cause: HandshakeCause::Trust(TrustRejection::PinMismatch)
                }
        )
    }
}

impl From<TrustRejection> for BridgeError {
    fn from(rejection: TrustRejection) -> Self {
        match rejection {
            TrustRejection::EmptyChain => BridgeError::EmptyChain,
            TrustRejection::ExpiredCertificate | TrustRejection::NotYetValid => {
                BridgeError::ExpiredCertificate
            }
            TrustRejection::PinMismatch => BridgeError::PinMismatch,
            TrustRejection::Unparsable => {
                BridgeError::handshake(HandshakeCause::Trust(TrustRejection::Unparsable))
            }
        }
    }
}

impl From<TrustRejection> for HandshakeCause {
    fn from(rejection: TrustRejection) -> Self {
        HandshakeCause::Trust(rejection)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::MalformedMessage(err.to_string())
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
