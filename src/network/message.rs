// src/network/message.rs

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Category key -> role name, as carried by `handoff.routing`.
pub type RoutingSnapshot = BTreeMap<String, String>;

/// One line of the bridge protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Ping,
    Pong,
    Handoff {
        #[serde(default)]
        uri: String,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "routing_entries"
        )]
        routing: Option<RoutingSnapshot>,
    },
    RoutingPref {
        #[serde(default)]
        category: String,
        #[serde(default)]
        role: String,
    },
    Share(SharePayload),
}

/// String entries of a routing object; other entries are dropped and a
/// non-object reads as no snapshot, leaving the rest of the hand-off intact.
fn routing_entries<'de, D>(deserializer: D) -> std::result::Result<Option<RoutingSnapshot>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(entries) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(Some(
        entries
            .into_iter()
            .filter_map(|(category, role)| match role {
                Value::String(role) => Some((category, role)),
                _ => None,
            })
            .collect(),
    ))
}

/// Body of a `share` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharePayload {
    #[serde(default)]
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default)]
    pub items: Vec<ShareItem>,
    #[serde(default)]
    pub has_streams: bool,
}

/// One attached stream; `data` is base64.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShareItem {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub data: String,
}

const SHARE_TAG: &str = r#""type":"share","#;

#[derive(Default)]
struct ByteCount(usize);

impl std::io::Write for ByteCount {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharePayload {
    /// Length of the `share` line carrying this payload, terminator excluded.
    pub fn line_len(&self) -> Result<usize> {
        let mut count = ByteCount::default();
        serde_json::to_writer(&mut count, self)?;
        Ok(count.0 + SHARE_TAG.len())
    }
}

/// A parsed line: a known message or a `type` this build does not handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Message),
    Unknown(String),
}

const KNOWN_TYPES: [&str; 5] = ["ping", "pong", "handoff", "routing_pref", "share"];

impl Message {
    /// Wire token of the `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Ping => "ping",
            Message::Pong => "pong",
            Message::Handoff { .. } => "handoff",
            Message::RoutingPref { .. } => "routing_pref",
            Message::Share(_) => "share",
        }
    }

    pub fn handoff(uri: impl Into<String>, routing: Option<RoutingSnapshot>) -> Self {
        Message::Handoff {
            uri: uri.into(),
            routing,
        }
    }

    pub fn routing_pref(category: impl Into<String>, role: impl Into<String>) -> Self {
        Message::RoutingPref {
            category: category.into(),
            role: role.into(),
        }
    }

    /// Single-line JSON encoding (serde_json never emits raw newlines).
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one line. Anything that is not a JSON object with a string `type`
    /// is malformed; an unrecognised `type` is reported as [`Inbound::Unknown`].
    pub fn parse_line(line: &str) -> Result<Inbound> {
        let value: Value = serde_json::from_str(line.trim())?;
        let Some(obj) = value.as_object() else {
            return Err(BridgeError::MalformedMessage("not a JSON object".into()));
        };
        let Some(kind) = obj.get("type").and_then(Value::as_str) else {
            return Err(BridgeError::MalformedMessage("missing type".into()));
        };
        if !KNOWN_TYPES.contains(&kind) {
            return Ok(Inbound::Unknown(kind.to_string()));
        }
        let kind = kind.to_string();
        serde_json::from_value(value)
            .map(Inbound::Message)
            .map_err(|e| BridgeError::MalformedMessage(format!("{}: {}", kind, e)))
    }
}
