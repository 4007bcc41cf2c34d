// src/bridge/local.rs

use crate::bridge::handler::BridgeHandler;
use crate::bridge::routing::RoutingPrefs;
use crate::events::{dispatcher, LogLevel};
use crate::network::message::{RoutingSnapshot, SharePayload};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use uuid::Uuid;

const INBOX_CAPACITY: usize = 64;

/// Something the peer handed over.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Handoff {
        uri: String,
        routing_applied: bool,
        received_at: SystemTime,
    },
    Share {
        id: String,
        summary: Option<String>,
        mime: String,
        items: usize,
        received_at: SystemTime,
    },
}

/// Default handler: keeps routing in sync, remembers recent arrivals and
/// broadcasts them to whoever surfaces them to the user.
pub struct LocalBridge {
    routing: Arc<RoutingPrefs>,
    inbox: Mutex<VecDeque<Incoming>>,
    notify: broadcast::Sender<Incoming>,
}

impl LocalBridge {
    pub fn new(routing: Arc<RoutingPrefs>) -> Self {
        let (notify, _) = broadcast::channel(INBOX_CAPACITY);
        Self {
            routing,
            inbox: Mutex::new(VecDeque::with_capacity(INBOX_CAPACITY)),
            notify,
        }
    }

    pub fn routing(&self) -> &Arc<RoutingPrefs> {
        &self.routing
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Incoming> {
        self.notify.subscribe()
    }

    /// Most recent arrivals, oldest first.
    pub fn recent(&self) -> Vec<Incoming> {
        self.inbox.lock().iter().cloned().collect()
    }

    fn record(&self, item: Incoming) {
        {
            let mut inbox = self.inbox.lock();
            if inbox.len() == INBOX_CAPACITY {
                inbox.pop_front();
            }
            inbox.push_back(item.clone());
        }
        // no subscribers is fine
        let _ = self.notify.send(item);
    }
}

impl BridgeHandler for LocalBridge {
    fn on_handoff(&self, uri: &str, routing: Option<&RoutingSnapshot>) {
        let routing_applied = routing
            .map(|snapshot| self.routing.apply_snapshot(snapshot))
            .unwrap_or(false);
        self.record(Incoming::Handoff {
            uri: uri.to_string(),
            routing_applied,
            received_at: SystemTime::now(),
        });
    }

    fn on_routing_pref_update(&self, category: &str, role: &str) -> bool {
        self.routing.apply_remote_update(category, role)
    }

    fn on_share(&self, payload: &SharePayload) -> Option<String> {
        if payload.is_empty() {
            return None;
        }
        let id = Uuid::new_v4().to_string();
        let summary = payload.summary();
        dispatcher::emit_system(
            "bridge",
            LogLevel::Info,
            "share_received",
            Some(format!("{} ({})", id, summary.as_deref().unwrap_or("no summary"))),
        );
        self.record(Incoming::Share {
            id: id.clone(),
            summary,
            mime: payload.mime.clone(),
            items: payload.items.len(),
            received_at: SystemTime::now(),
        });
        Some(id)
    }

    fn on_routing_snapshot(&self, routing: &RoutingSnapshot) -> bool {
        self.routing.apply_snapshot(routing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::routing::LinkCategory;
    use crate::role::Role;

    #[test]
    fn handoff_applies_routing_and_is_recorded() {
        let bridge = LocalBridge::new(Arc::new(RoutingPrefs::in_memory()));
        let mut rx = bridge.subscribe();
        let mut snap = RoutingSnapshot::new();
        snap.insert("browser".into(), "PRIVATE_SPACE".into());
        bridge.on_handoff("https://example.com", Some(&snap));

        assert_eq!(
            bridge.routing().preferred_role(LinkCategory::Browser),
            Role::PrivateSpace
        );
        let Incoming::Handoff { uri, routing_applied, .. } = rx.try_recv().unwrap() else {
            panic!("expected handoff");
        };
        assert_eq!(uri, "https://example.com");
        assert!(routing_applied);
        assert_eq!(bridge.recent().len(), 1);
    }

    #[test]
    fn empty_share_is_not_stored() {
        let bridge = LocalBridge::new(Arc::new(RoutingPrefs::in_memory()));
        assert_eq!(bridge.on_share(&SharePayload::default()), None);
        let id = bridge
            .on_share(&SharePayload::text(None, "hello"))
            .unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert!(matches!(
            &bridge.recent()[..],
            [Incoming::Share { summary: Some(s), .. }] if s == "hello"
        ));
    }

    #[test]
    fn inbox_is_bounded() {
        let bridge = LocalBridge::new(Arc::new(RoutingPrefs::in_memory()));
        for i in 0..(INBOX_CAPACITY + 5) {
            bridge.on_handoff(&format!("tel:{}", i), None);
        }
        let recent = bridge.recent();
        assert_eq!(recent.len(), INBOX_CAPACITY);
        assert!(matches!(&recent[0], Incoming::Handoff { uri, .. } if uri == "tel:5"));
    }
}
