pub(crate) mod events;
pub mod listener;
pub mod message;
pub mod transport;

pub use listener::{dispatch, MessageServer, ServerPhase};
pub use message::{Inbound, Message, RoutingSnapshot, ShareItem, SharePayload};
pub use transport::{ping, ping_with, send, send_with, try_send, ClientOptions, PingResult};
