// src/network/listener.rs

use crate::bridge::BridgeHandler;
use crate::config::Settings;
use crate::constants::LOOPBACK_HOST;
use crate::error::{BridgeError, Result};
use crate::events::{dispatcher, LogLevel};
use crate::network::events::emit_network_event;
use crate::network::message::{Inbound, Message};
use crate::role::Role;
use crate::security::{accept_secure, TrustContext};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

fn log_network_event(level: LogLevel, action: &str, addr: Option<SocketAddr>, detail: Option<String>) {
    emit_network_event("listener", level, action, addr, detail);
}

/// Lifecycle of a [`MessageServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Stopped,
    Starting,
    Listening,
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    addr: SocketAddr,
}

struct Shared {
    ctx: TrustContext,
    handler: Arc<dyn BridgeHandler>,
    settings: Settings,
}

/// Loopback listener speaking the one-line-per-connection protocol.
pub struct MessageServer {
    shared: Arc<Shared>,
    phase: Arc<Mutex<ServerPhase>>,
    running: Mutex<Option<Running>>,
}

impl MessageServer {
    pub fn new(ctx: TrustContext, handler: Arc<dyn BridgeHandler>, settings: Settings) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx,
                handler,
                settings,
            }),
            phase: Arc::new(Mutex::new(ServerPhase::Stopped)),
            running: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> ServerPhase {
        *self.phase.lock()
    }

    pub fn is_listening(&self) -> bool {
        self.phase() == ServerPhase::Listening
    }

    /// Bound port while running (useful when configured with port 0).
    pub fn local_port(&self) -> Option<u16> {
        self.running.lock().as_ref().map(|r| r.addr.port())
    }

    /// Bind the loopback port assigned to `role` and start accepting.
    ///
    /// Calling it on a running server is a no-op. A failed bind leaves the
    /// server stopped and returns [`BridgeError::PortInUse`].
    pub async fn start(&self, role: Role) -> Result<()> {
        {
            let mut phase = self.phase.lock();
            if *phase != ServerPhase::Stopped {
                return Ok(());
            }
            *phase = ServerPhase::Starting;
        }
        let port = self.shared.settings.listening_port(role);
        let bound = match TcpListener::bind((LOOPBACK_HOST, port)).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, addr) = match bound {
            Ok(pair) => pair,
            Err(source) => {
                *self.phase.lock() = ServerPhase::Stopped;
                log_network_event(
                    LogLevel::Warn,
                    "listener_bind_failed",
                    None,
                    Some(format!("{} port {}: {}", role, port, source)),
                );
                return Err(BridgeError::PortInUse { port, source });
            }
        };
        log_network_event(
            LogLevel::Info,
            "listener_bind",
            Some(addr),
            Some(role.to_string()),
        );

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            rx,
            self.shared.clone(),
            self.phase.clone(),
        ));
        *self.running.lock() = Some(Running {
            shutdown: tx,
            task,
            addr,
        });
        let mut phase = self.phase.lock();
        if *phase == ServerPhase::Starting {
            *phase = ServerPhase::Listening;
        }
        Ok(())
    }

    /// Close the listener and wait (bounded) for the accept loop to finish.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };
        let _ = running.shutdown.send(true);
        let mut task = running.task;
        if timeout(self.shared.settings.stop_join * 2, &mut task).await.is_err() {
            task.abort();
            log_network_event(
                LogLevel::Warn,
                "listener_stop_abandoned",
                Some(running.addr),
                None,
            );
        }
        *self.phase.lock() = ServerPhase::Stopped;
        log_network_event(LogLevel::Info, "listener_stopped", Some(running.addr), None);
    }
}

impl Drop for MessageServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    shared: Arc<Shared>,
    phase: Arc<Mutex<ServerPhase>>,
) {
    let mut handlers = JoinSet::new();
    loop {
        while handlers.try_join_next().is_some() {}
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = timeout(shared.settings.accept_idle, listener.accept()) => match accepted {
                // idle tick, re-check the shutdown signal
                Err(_) => {}
                Ok(Ok((stream, peer_addr))) => {
                    log_network_event(LogLevel::Debug, "incoming_connection", Some(peer_addr), None);
                    handlers.spawn(handle_connection(shared.clone(), stream, peer_addr));
                }
                Ok(Err(e)) => {
                    log_network_event(LogLevel::Error, "accept_failed", None, Some(e.to_string()));
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
    drop(listener);
    *phase.lock() = ServerPhase::Stopped;

    let drain = async {
        while handlers.join_next().await.is_some() {}
    };
    if timeout(shared.settings.stop_join, drain).await.is_err() {
        log_network_event(
            LogLevel::Warn,
            "handlers_abandoned",
            None,
            Some(format!("{} still running", handlers.len())),
        );
        handlers.abort_all();
    }
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, peer_addr: SocketAddr) {
    let settings = &shared.settings;
    let mut channel =
        match accept_secure(&shared.ctx, stream, peer_addr, settings.connect_timeout).await {
            Ok(channel) => channel,
            Err(e) => {
                let level = if e.is_pin_mismatch() {
                    LogLevel::Warn
                } else {
                    LogLevel::Info
                };
                log_network_event(level, "handshake_failed", Some(peer_addr), Some(e.to_string()));
                return;
            }
        };

    let line = match channel
        .read_line(settings.max_message_bytes, settings.inbound_line_timeout())
        .await
    {
        Ok(Some(line)) => line,
        Ok(None) => {
            log_network_event(LogLevel::Debug, "empty_message", Some(peer_addr), None);
            let _ = channel.close(settings.write_timeout).await;
            return;
        }
        Err(e) => {
            log_network_event(LogLevel::Warn, "read_failed", Some(peer_addr), Some(e.to_string()));
            return;
        }
    };

    let reply = match Message::parse_line(&line) {
        Ok(inbound) => dispatch(shared.handler.as_ref(), inbound),
        Err(e) => {
            dispatcher::emit_message(LogLevel::Warn, "unknown", "malformed", Some(e.to_string()));
            None
        }
    };

    if let Some(reply) = reply {
        let written = match reply.to_line() {
            Ok(line) => channel.write_line(&line, settings.write_timeout).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            log_network_event(LogLevel::Warn, "reply_failed", Some(peer_addr), Some(e.to_string()));
        }
    }
    let _ = channel.close(settings.write_timeout).await;
}

/// Route one parsed line to `handler`; returns the reply to write, if any.
pub fn dispatch(handler: &dyn BridgeHandler, inbound: Inbound) -> Option<Message> {
    let message = match inbound {
        Inbound::Message(message) => message,
        Inbound::Unknown(kind) => {
            dispatcher::emit_message(LogLevel::Warn, &kind, "ignored", Some("unknown type".into()));
            return None;
        }
    };
    let kind = message.type_name();
    match message {
        Message::Ping => {
            dispatcher::emit_message(LogLevel::Debug, kind, "pong", None);
            Some(Message::Pong)
        }
        Message::Pong => {
            dispatcher::emit_message(LogLevel::Debug, kind, "ignored", None);
            None
        }
        Message::Handoff { uri, routing } => {
            if uri.is_empty() {
                let applied = routing
                    .as_ref()
                    .map(|r| handler.on_routing_snapshot(r))
                    .unwrap_or(false);
                dispatcher::emit_message(
                    LogLevel::Warn,
                    kind,
                    "missing_uri",
                    Some(format!("routing applied: {}", applied)),
                );
            } else {
                handler.on_handoff(&uri, routing.as_ref());
                dispatcher::emit_message(LogLevel::Info, kind, "delivered", Some(uri));
            }
            None
        }
        Message::RoutingPref { category, role } => {
            let applied = handler.on_routing_pref_update(&category, &role);
            let (level, outcome) = if applied {
                (LogLevel::Info, "applied")
            } else {
                (LogLevel::Warn, "rejected")
            };
            dispatcher::emit_message(level, kind, outcome, Some(format!("{} -> {}", category, role)));
            None
        }
        Message::Share(payload) => {
            match handler.on_share(&payload) {
                Some(id) => dispatcher::emit_message(LogLevel::Info, kind, "stored", Some(id)),
                None => dispatcher::emit_message(LogLevel::Warn, kind, "discarded", None),
            }
            None
        }
    }
}
