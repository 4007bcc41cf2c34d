use crate::constants::*;
use crate::role::Role;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct PortsConfig {
    /// Listening port of the Personal Space role
    pub personal: Option<u16>,
    /// Listening port of the Private Space role
    pub private: Option<u16>,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            personal: Some(PERSONAL_LISTEN_PORT),
            private: Some(PRIVATE_LISTEN_PORT),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    /// Connect + TLS handshake deadline for outbound connections
    pub connect_ms: Option<u64>,
    /// Deadline for reading one line (request on the server, response on ping)
    pub read_ms: Option<u64>,
    /// Deadline for writing one line
    pub write_ms: Option<u64>,
    /// How often the accept loop wakes up while idle
    pub accept_idle_ms: Option<u64>,
    /// Bounded wait for the accept loop and in-flight handlers on stop
    pub stop_join_ms: Option<u64>,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_ms: Some(DEFAULT_CONNECT_TIMEOUT_MS),
            read_ms: Some(DEFAULT_READ_TIMEOUT_MS),
            write_ms: Some(DEFAULT_WRITE_TIMEOUT_MS),
            accept_idle_ms: Some(DEFAULT_ACCEPT_IDLE_MS),
            stop_join_ms: Some(DEFAULT_STOP_JOIN_MS),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Longest accepted protocol line in bytes
    pub max_message_bytes: Option<usize>,
    /// Outbound sends allowed in flight at once
    pub max_concurrent_sends: Option<usize>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: Some(DEFAULT_MAX_MESSAGE_BYTES),
            max_concurrent_sends: Some(DEFAULT_MAX_CONCURRENT_SENDS),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Path to JSON line event log (rotated). If unset, defaults to logs/intentbridge.jsonl
    pub json_path: Option<String>,
    /// Max size in bytes before rotation (default 5MB)
    pub json_max_bytes: Option<usize>,
    /// Number of rotated files to retain (default 3)
    pub json_rotate: Option<u32>,
    /// Disable console sink (default false)
    pub disable_console: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Explicit role; overrides (and is persisted over) the stored role
    pub role: Option<Role>,
    /// Directory for persisted key-value state
    pub state_dir: Option<String>,
    /// Peer host, loopback unless testing
    pub host: Option<String>,
    pub ports: Option<PortsConfig>,
    pub timeouts: Option<TimeoutsConfig>,
    pub limits: Option<LimitsConfig>,
    pub logging: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: None,
            state_dir: Some("data".to_string()),
            host: Some(LOOPBACK_HOST.to_string()),
            ports: Some(PortsConfig::default()),
            timeouts: Some(TimeoutsConfig::default()),
            limits: Some(LimitsConfig::default()),
            logging: None,
        }
    }
}

impl Config {
    /// Parse a TOML config file.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str::<Config>(content)?)
    }

    /// Load config from `path`, falling back to defaults when the file does not exist.
    /// Returns whether the file was found alongside the config.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<(Self, bool)> {
        use anyhow::Context;
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg = Self::from_toml_str(&content)
                    .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
                Ok((cfg, true))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((Self::default(), false)),
            Err(e) => Err(e).with_context(|| format!("failed to read config file '{}'", path.display())),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(self.state_dir.clone().unwrap_or_else(|| "data".into()))
    }

    pub fn host(&self) -> String {
        self.host.clone().unwrap_or_else(|| LOOPBACK_HOST.into())
    }

    /// Fixed listening port for `role`.
    pub fn listening_port(&self, role: Role) -> u16 {
        let ports = self.ports.clone().unwrap_or_default();
        match role {
            Role::PersonalSpace => ports.personal.unwrap_or(PERSONAL_LISTEN_PORT),
            Role::PrivateSpace => ports.private.unwrap_or(PRIVATE_LISTEN_PORT),
        }
    }

    /// Port the peer of `role` listens on.
    pub fn target_port(&self, role: Role) -> u16 {
        self.listening_port(role.opposite())
    }

    /// Resolved timing and size knobs used by the server and the client side.
    pub fn settings(&self) -> Settings {
        let t = self.timeouts.clone().unwrap_or_default();
        let l = self.limits.clone().unwrap_or_default();
        Settings {
            connect_timeout: Duration::from_millis(
                t.connect_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            read_timeout: Duration::from_millis(t.read_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS)),
            write_timeout: Duration::from_millis(t.write_ms.unwrap_or(DEFAULT_WRITE_TIMEOUT_MS)),
            accept_idle: Duration::from_millis(t.accept_idle_ms.unwrap_or(DEFAULT_ACCEPT_IDLE_MS)),
            stop_join: Duration::from_millis(t.stop_join_ms.unwrap_or(DEFAULT_STOP_JOIN_MS)),
            max_message_bytes: l.max_message_bytes.unwrap_or(DEFAULT_MAX_MESSAGE_BYTES),
            max_concurrent_sends: l
                .max_concurrent_sends
                .unwrap_or(DEFAULT_MAX_CONCURRENT_SENDS)
                .max(1),
            personal_port: self.listening_port(Role::PersonalSpace),
            private_port: self.listening_port(Role::PrivateSpace),
            host: self.host(),
        }
    }
}

/// Flattened runtime settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub accept_idle: Duration,
    pub stop_join: Duration,
    pub max_message_bytes: usize,
    pub max_concurrent_sends: usize,
    pub personal_port: u16,
    pub private_port: u16,
    pub host: String,
}

impl Default for Settings {
    fn default() -> Self {
        Config::default().settings()
    }
}

impl Settings {
    pub fn listening_port(&self, role: Role) -> u16 {
        match role {
            Role::PersonalSpace => self.personal_port,
            Role::PrivateSpace => self.private_port,
        }
    }

    pub fn target_port(&self, role: Role) -> u16 {
        self.listening_port(role.opposite())
    }

    /// Deadline for reading one inbound line: never shorter than what a
    /// sender with the same settings may spend writing it.
    pub fn inbound_line_timeout(&self) -> Duration {
        self.read_timeout.max(self.write_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_fixed_role_ports() {
        let cfg = Config::default();
        assert_eq!(cfg.listening_port(Role::PersonalSpace), 39123);
        assert_eq!(cfg.listening_port(Role::PrivateSpace), 39124);
        assert_eq!(cfg.target_port(Role::PersonalSpace), 39124);
        assert_eq!(cfg.target_port(Role::PrivateSpace), 39123);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg = Config::from_toml_str(
            r#"
            role = "PRIVATE_SPACE"
            state_dir = "/tmp/ib"

            [ports]
            private = 40001

            [timeouts]
            connect_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(cfg.role, Some(Role::PrivateSpace));
        assert_eq!(cfg.listening_port(Role::PrivateSpace), 40001);
        // unset port inside a present table falls back to the constant
        assert_eq!(cfg.listening_port(Role::PersonalSpace), 39123);
        let s = cfg.settings();
        assert_eq!(s.connect_timeout, Duration::from_millis(500));
        assert_eq!(s.read_timeout, Duration::from_millis(DEFAULT_READ_TIMEOUT_MS));
        assert_eq!(s.inbound_line_timeout(), Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS));
    }
}
