//! # IntentBridge Core Library
//!
//! Loopback bridge between two isolated contexts on one device (for example
//! two OS user profiles). Each context runs a small listener on a fixed,
//! role-specific port; the other context dials it to hand over links,
//! routing preferences and shares, or to check that it is alive.
//!
//! ## Design Principles
//! * Mutual TLS on every connection, trust-on-first-use: the first peer
//!   identity seen is pinned, any other identity is refused until the pin is reset.
//! * One identity, one pin, one auth-error flag per context, owned by a
//!   [`security::TrustContext`] and shared by both connection directions.
//! * One JSON line per connection; `ping` is the only request with a reply.
//! * Async-first (Tokio); every I/O step has a deadline.
//! * Event-driven instrumentation (JSON line audit log + console).
//!
//! ## Key Modules
//! * `security` – Identity generation, pinning, the TLS verifier and channels.
//! * `network` – Wire messages, the message server, send / ping.
//! * `bridge` – Dispatch target, routing preferences, outbound courier.
//! * `config` – TOML configuration and resolved runtime settings.
//! * `prefs` / `role` – Persisted key-value state and the context role.
//! * `events` – Structured logging/events dispatcher.

pub mod bridge;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod network;
pub mod prefs;
pub mod role;
pub mod security;

pub use error::{BridgeError, HandshakeCause, TrustRejection};
pub use role::Role;
pub use security::TrustContext;
