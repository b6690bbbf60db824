//! WebSocket rendezvous service pairing two peers per room

mod actor;
mod messages;
mod server;
mod types;

pub use actor::{Registration, RoomManagerHandle};
pub use messages::{ClientMessage, ServerMessage, parse_advertisement};
pub use server::{DEFAULT_RENDEZVOUS_PORT, RendezvousServer, RunningRendezvous};
pub use types::{
    ConnectionId, LINK_PATH_PREFIX, MAX_ROOM_ID, OutboundMessage, PeerAdvertisement,
    RendezvousError, Role, RoomId,
};
