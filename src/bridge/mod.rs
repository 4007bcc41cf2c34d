//! Collaborators around the transport: the dispatch target, routing
//! preferences and the outbound courier.

pub mod courier;
pub mod handler;
pub mod local;
pub mod routing;
pub mod share;

pub use courier::{Courier, RouteDecision};
pub use handler::BridgeHandler;
pub use local::{Incoming, LocalBridge};
pub use routing::{LinkCategory, RoutingPrefs};
