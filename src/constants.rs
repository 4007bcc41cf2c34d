//! Central place for application-wide constants and default values.

/// Default application name shown in logs
pub const DEFAULT_APP_NAME: &str = "IntentBridge";

/// Left padding used to align log lines with those that include emoji prefixes.
pub const ICON_PLACEHOLDER: &str = "   "; // Three spaces for alignment

/// Loopback address both listeners bind to
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Listening port of the Personal Space role
pub const PERSONAL_LISTEN_PORT: u16 = 39123;
/// Listening port of the Private Space role
pub const PRIVATE_LISTEN_PORT: u16 = 39124;

/// Connect + handshake deadline for outbound connections
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
/// Deadline for reading one message line
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
/// Deadline for writing one message line (shares can be large)
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;
/// Idle wake-up of the accept loop
pub const DEFAULT_ACCEPT_IDLE_MS: u64 = 1_000;
/// Bounded wait when stopping the listener
pub const DEFAULT_STOP_JOIN_MS: u64 = 500;

/// Upper bound on a single protocol line
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
/// Outbound sends allowed in flight at once
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 4;

/// Identity certificate backdating, tolerates small clock skew between profiles
pub const CERT_BACKDATE_SECS: i64 = 60;
/// Identity certificate lifetime in days (the cert is an identity token)
pub const CERT_VALIDITY_DAYS: i64 = 100 * 365;

/// Share attachment caps; a share must also fit in one protocol line
pub const MAX_SINGLE_STREAM_BYTES: u64 = 1000 * 1024 * 1024;
pub const MAX_SHARE_BYTES: u64 = 1050 * 1024 * 1024;
/// Longest share summary taken from free text
pub const MAX_SUMMARY_CHARS: usize = 200;

/// JSON event log defaults
pub const DEFAULT_EVENT_LOG_PATH: &str = "logs/intentbridge.jsonl";
pub const DEFAULT_EVENT_LOG_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_EVENT_LOG_ROTATE: u32 = 3;
/// Queue depth of the event dispatcher
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Application / crate version (populated from Cargo.toml via env! macro)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Human friendly composite version string used in logs.
pub fn full_version() -> String {
    format!("v{}", APP_VERSION)
}
