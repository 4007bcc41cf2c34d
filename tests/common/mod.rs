#![allow(dead_code)]

use intentbridge::bridge::BridgeHandler;
use intentbridge::config::Settings;
use intentbridge::network::{MessageServer, RoutingSnapshot, SharePayload};
use intentbridge::{Role, TrustContext};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub const HOST: &str = "127.0.0.1";
pub const TIMEOUT: Duration = Duration::from_secs(2);

/// Ephemeral ports and short idle/stop intervals.
pub fn test_settings() -> Settings {
    Settings {
        personal_port: 0,
        private_port: 0,
        connect_timeout: TIMEOUT,
        read_timeout: TIMEOUT,
        write_timeout: TIMEOUT,
        accept_idle: Duration::from_millis(100),
        stop_join: Duration::from_millis(500),
        ..Settings::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Handoff(String, Option<RoutingSnapshot>),
    RoutingPref(String, String),
    Share(SharePayload),
}

/// Handler that records every callback.
#[derive(Default)]
pub struct Recorder {
    pub calls: Mutex<Vec<Call>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Poll until at least `n` calls arrived (server handling is asynchronous).
    pub async fn wait_for(&self, n: usize) -> Vec<Call> {
        for _ in 0..100 {
            if self.calls.lock().len() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.calls()
    }
}

impl BridgeHandler for Recorder {
    fn on_handoff(&self, uri: &str, routing: Option<&RoutingSnapshot>) {
        self.calls
            .lock()
            .push(Call::Handoff(uri.to_string(), routing.cloned()));
    }

    fn on_routing_pref_update(&self, category: &str, role: &str) -> bool {
        self.calls
            .lock()
            .push(Call::RoutingPref(category.to_string(), role.to_string()));
        true
    }

    fn on_share(&self, payload: &SharePayload) -> Option<String> {
        self.calls.lock().push(Call::Share(payload.clone()));
        Some("stored".into())
    }
}

/// Start a server for `role` on an ephemeral port; returns it with the bound port.
pub async fn start_server(
    ctx: &TrustContext,
    handler: Arc<dyn BridgeHandler>,
    role: Role,
) -> (MessageServer, u16) {
    let server = MessageServer::new(ctx.clone(), handler, test_settings());
    server.start(role).await.expect("server start");
    let port = server.local_port().expect("bound port");
    (server, port)
}
