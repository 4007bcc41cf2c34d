// src/bridge/courier.rs
// Outbound side: hands links, routing changes and shares to the peer context.

use crate::bridge::routing::{LinkCategory, RoutingPrefs};
use crate::config::Settings;
use crate::error::Result;
use crate::events::{dispatcher, LogLevel};
use crate::network::message::{Message, SharePayload};
use crate::network::transport::{self, ClientOptions, PingResult};
use crate::role::Role;
use crate::security::TrustContext;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Where [`Courier::route`] sent a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// The link's category prefers this context's role.
    Local,
    /// Handed to the peer; `true` if the hand-off was delivered.
    Forwarded(bool),
}

/// Sends to the peer listening on the port opposite to our role.
///
/// At most `max_concurrent_sends` exchanges run at once; background sends
/// started with [`Courier::dispatch`] are tracked so [`Courier::shutdown`]
/// can wait for them.
pub struct Courier {
    ctx: TrustContext,
    settings: Settings,
    routing: Arc<RoutingPrefs>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<bool>>,
}

impl Courier {
    pub fn new(ctx: TrustContext, settings: Settings, routing: Arc<RoutingPrefs>) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_sends.max(1)));
        Self {
            ctx,
            settings,
            routing,
            permits,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// `(host, port)` of the peer.
    pub fn target(&self) -> (String, u16) {
        let role: Role = self.ctx.role();
        (self.settings.host.clone(), self.settings.target_port(role))
    }

    /// Send one message and report whether it was written.
    pub async fn deliver(&self, message: &Message) -> bool {
        deliver_with(&self.ctx, &self.settings, &self.permits, message).await
    }

    /// Fire-and-forget variant of [`Courier::deliver`].
    pub fn dispatch(&self, message: Message) {
        let ctx = self.ctx.clone();
        let settings = self.settings.clone();
        let permits = self.permits.clone();
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move { deliver_with(&ctx, &settings, &permits, &message).await });
    }

    /// Hand `uri` to the peer together with our routing table.
    pub async fn handoff(&self, uri: &str) -> bool {
        let delivered = self
            .deliver(&Message::handoff(uri, Some(self.routing.snapshot())))
            .await;
        if !delivered {
            dispatcher::emit_system("courier", LogLevel::Warn, "handoff_failed", Some(uri.to_string()));
        }
        delivered
    }

    /// Keep `uri` here when its category prefers our role, otherwise hand it off.
    pub async fn route(&self, uri: &str) -> RouteDecision {
        let category = LinkCategory::classify(uri);
        let preferred = self.routing.preferred_role(category);
        if preferred == self.ctx.role() {
            dispatcher::emit_system(
                "courier",
                LogLevel::Info,
                "link_kept",
                Some(format!("{} {}", category, uri)),
            );
            return RouteDecision::Local;
        }
        RouteDecision::Forwarded(self.handoff(uri).await)
    }

    /// Store the preference locally, then tell the peer.
    pub async fn sync_routing_preference(&self, category: LinkCategory, role: Role) -> Result<bool> {
        self.routing.set_preferred_role(category, role)?;
        Ok(self
            .deliver(&Message::routing_pref(category.key(), role.name()))
            .await)
    }

    pub async fn share(&self, payload: SharePayload) -> bool {
        self.deliver(&Message::Share(payload)).await
    }

    pub async fn ping(&self) -> PingResult {
        let (host, port) = self.target();
        match self.permits.clone().acquire_owned().await {
            Ok(_permit) => {
                transport::ping_with(&self.ctx, &host, port, &ClientOptions::from(&self.settings)).await
            }
            Err(_) => PingResult {
                success: false,
                auth_error: false,
                message: Some("courier closed".into()),
            },
        }
    }

    /// Wait up to `timeout` for background sends; abort the rest.
    /// Returns how many were abandoned.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.permits.close();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(timeout, drain).await.is_ok() {
            return 0;
        }
        let abandoned = tasks.len();
        tasks.abort_all();
        dispatcher::emit_system(
            "courier",
            LogLevel::Warn,
            "sends_abandoned",
            Some(abandoned.to_string()),
        );
        abandoned
    }
}

async fn deliver_with(
    ctx: &TrustContext,
    settings: &Settings,
    permits: &Arc<Semaphore>,
    message: &Message,
) -> bool {
    let Ok(_permit) = permits.clone().acquire_owned().await else {
        return false;
    };
    let port = settings.target_port(ctx.role());
    transport::send_with(ctx, &settings.host, port, message, &ClientOptions::from(settings)).await
}
