// src/network/transport.rs

use crate::config::Settings;
use crate::error::{BridgeError, Result};
use crate::events::LogLevel;
use crate::network::events::emit_outbound_event;
use crate::network::message::{Inbound, Message};
use crate::security::{connect_secure, TrustContext};
use std::time::Duration;

/// Deadlines and limits for one outbound exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_message_bytes: usize,
}

impl ClientOptions {
    /// Every step bounded by the same `timeout`.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            read_timeout: timeout,
            write_timeout: timeout,
            max_message_bytes: crate::constants::DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl From<&Settings> for ClientOptions {
    fn from(s: &Settings) -> Self {
        Self {
            connect_timeout: s.connect_timeout,
            read_timeout: s.read_timeout,
            write_timeout: s.write_timeout,
            max_message_bytes: s.max_message_bytes,
        }
    }
}

/// Outcome of [`ping`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResult {
    pub success: bool,
    /// The peer presented an identity other than the pinned one.
    pub auth_error: bool,
    pub message: Option<String>,
}

impl PingResult {
    fn ok() -> Self {
        Self {
            success: true,
            auth_error: false,
            message: None,
        }
    }

    fn failed(err: &BridgeError) -> Self {
        Self {
            success: false,
            auth_error: err.is_pin_mismatch(),
            message: Some(err.to_string()),
        }
    }
}

/// Deliver one fire-and-forget message. No reply is awaited.
///
/// A line the peer would refuse as oversized is not sent at all.
pub async fn try_send(
    ctx: &TrustContext,
    host: &str,
    port: u16,
    message: &Message,
    opts: &ClientOptions,
) -> Result<()> {
    let line = message.to_line()?;
    if line.len() > opts.max_message_bytes {
        return Err(BridgeError::MessageTooLarge {
            size: line.len(),
            limit: opts.max_message_bytes,
        });
    }
    let mut channel = connect_secure(ctx, host, port, opts.connect_timeout).await?;
    channel.write_line(&line, opts.write_timeout).await?;
    channel.close(opts.write_timeout).await
}

/// [`try_send`] flattened to a success flag; failures are logged.
pub async fn send_with(
    ctx: &TrustContext,
    host: &str,
    port: u16,
    message: &Message,
    opts: &ClientOptions,
) -> bool {
    match try_send(ctx, host, port, message, opts).await {
        Ok(()) => {
            emit_outbound_event(LogLevel::Info, "send_ok", host, port, Some(message.type_name().into()));
            true
        }
        Err(e) => {
            emit_outbound_event(
                LogLevel::Warn,
                "send_failed",
                host,
                port,
                Some(format!("{}: {}", message.type_name(), e)),
            );
            false
        }
    }
}

pub async fn send(ctx: &TrustContext, host: &str, port: u16, message: &Message, timeout: Duration) -> bool {
    send_with(ctx, host, port, message, &ClientOptions::uniform(timeout)).await
}

async fn exchange_ping(ctx: &TrustContext, host: &str, port: u16, opts: &ClientOptions) -> Result<()> {
    let mut channel = connect_secure(ctx, host, port, opts.connect_timeout).await?;
    channel.write_line(&Message::Ping.to_line()?, opts.write_timeout).await?;
    let reply = channel
        .read_line(opts.max_message_bytes, opts.read_timeout)
        .await?
        .ok_or_else(|| BridgeError::MalformedMessage("connection closed without reply".into()))?;
    let _ = channel.close(opts.write_timeout).await;
    match Message::parse_line(&reply)? {
        Inbound::Message(Message::Pong) => Ok(()),
        Inbound::Message(other) => Err(BridgeError::MalformedMessage(format!(
            "expected pong, got {}",
            other.type_name()
        ))),
        Inbound::Unknown(kind) => Err(BridgeError::MalformedMessage(format!(
            "expected pong, got {}",
            kind
        ))),
    }
}

/// Probe the peer: succeeds iff it answers `pong`.
pub async fn ping_with(ctx: &TrustContext, host: &str, port: u16, opts: &ClientOptions) -> PingResult {
    match exchange_ping(ctx, host, port, opts).await {
        Ok(()) => {
            if let Err(e) = ctx.clear_auth_error() {
                emit_outbound_event(LogLevel::Warn, "auth_flag_clear_failed", host, port, Some(e.to_string()));
            }
            emit_outbound_event(LogLevel::Debug, "ping_ok", host, port, None);
            PingResult::ok()
        }
        Err(e) => {
            let result = PingResult::failed(&e);
            let level = if result.auth_error {
                LogLevel::Warn
            } else {
                LogLevel::Info
            };
            emit_outbound_event(level, "ping_failed", host, port, Some(e.to_string()));
            result
        }
    }
}

pub async fn ping(ctx: &TrustContext, host: &str, port: u16, timeout: Duration) -> PingResult {
    ping_with(ctx, host, port, &ClientOptions::uniform(timeout)).await
}
