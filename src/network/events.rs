use crate::events::{
    dispatcher,
    model::{LogEvent, LogLevel, NetworkEvent},
};
use std::net::SocketAddr;

/// Emit a structured network event (bind, accept, handshake, send, ping).
pub(crate) fn emit_network_event(
    component: &'static str,
    level: LogLevel,
    action: &str,
    addr: Option<SocketAddr>,
    detail: Option<String>,
) {
    let mut meta = dispatcher::meta(component, level);
    meta.corr_id = Some(dispatcher::correlation_id());
    dispatcher::emit(LogEvent::Network(NetworkEvent {
        meta,
        action: action.to_string(),
        addr: addr.map(|a| a.to_string()),
        detail,
    }));
}

/// Same as [`emit_network_event`] for an outbound `host:port` target.
pub(crate) fn emit_outbound_event(level: LogLevel, action: &str, host: &str, port: u16, detail: Option<String>) {
    let mut meta = dispatcher::meta("client", level);
    meta.corr_id = Some(dispatcher::correlation_id());
    dispatcher::emit(LogEvent::Network(NetworkEvent {
        meta,
        action: action.to_string(),
        addr: Some(format!("{}:{}", host, port)),
        detail,
    }));
}
