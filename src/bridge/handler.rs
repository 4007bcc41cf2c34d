use crate::network::message::{RoutingSnapshot, SharePayload};

/// Receiver of dispatched protocol messages.
///
/// Called from connection tasks, so implementations must be cheap and must
/// not block on network I/O.
pub trait BridgeHandler: Send + Sync {
    /// A link was handed over by the peer.
    fn on_handoff(&self, uri: &str, routing: Option<&RoutingSnapshot>);

    /// The peer changed which role handles `category`. Returns whether it was applied.
    fn on_routing_pref_update(&self, category: &str, role: &str) -> bool;

    /// Store a shared payload; returns its id, or `None` when nothing was stored.
    fn on_share(&self, payload: &SharePayload) -> Option<String>;

    /// Routing snapshot that arrived without a usable link.
    fn on_routing_snapshot(&self, _routing: &RoutingSnapshot) -> bool {
        false
    }
}
