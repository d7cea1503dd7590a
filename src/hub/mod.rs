pub mod broadcast;
pub mod channel;
pub mod message;

pub use broadcast::{BroadcastHub, ConnectionId, Outbound};
pub use channel::Channel;
pub use message::{ClientMessage, ServerMessage, ServerMessageKind};
