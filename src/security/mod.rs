//! Identity, trust-on-first-use pinning and the mutually authenticated transport.

pub mod identity;
pub mod secure_channel;
pub mod trust;

pub use identity::{fingerprint, Identity};
pub use secure_channel::{accept_secure, connect_secure, AuthSummary, SecureChannel, TofuVerifier};
pub use trust::{PinState, TrustContext, TrustDecision, TrustDecisionOutcome};
