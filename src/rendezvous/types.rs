use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Rendezvous service errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RendezvousError {
    #[error("invalid room: {0}")]
    InvalidRoom(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Width of the decimal room id in registration paths
pub const ROOM_ID_WIDTH: usize = 5;
/// Largest room id expressible in `ROOM_ID_WIDTH` digits
pub const MAX_ROOM_ID: u32 = 99_999;
/// Path prefix of the link endpoint
pub const LINK_PATH_PREFIX: &str = "/link/";

/// Room id: rendezvous slot shared by exactly two peers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(u32);

impl RoomId {
    pub fn new(id: u32) -> Result<Self, RendezvousError> {
        if id > MAX_ROOM_ID {
            return Err(RendezvousError::InvalidRoom(id.to_string()));
        }
        Ok(Self(id))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Extract the room from a `/link/NNNNN` request path.
    pub fn from_path(path: &str) -> Result<Self, RendezvousError> {
        let digits = path
            .strip_prefix(LINK_PATH_PREFIX)
            .and_then(|rest| rest.get(..ROOM_ID_WIDTH))
            .ok_or_else(|| RendezvousError::InvalidRoom(path.to_string()))?;
        digits.parse()
    }

    /// Request path registering for this room
    pub fn path(&self) -> String {
        format!("{}{}", LINK_PATH_PREFIX, self)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = ROOM_ID_WIDTH)
    }
}

impl FromStr for RoomId {
    type Err = RendezvousError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RendezvousError::InvalidRoom(s.to_string()));
        }
        let id: u32 = s
            .parse()
            .map_err(|_| RendezvousError::InvalidRoom(s.to_string()))?;
        Self::new(id)
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = u32::deserialize(deserializer)?;
        RoomId::new(id).map_err(serde::de::Error::custom)
    }
}

/// Identifies one WebSocket connection to the rendezvous service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Role of a peer on the direct connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Accepts the inbound connection
    Listener,
    /// Dials the listener
    Connector,
}

/// Where a registered peer is listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAdvertisement {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for PeerAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Create a new outbound message from any string type
    pub fn new(s: impl Into<Utf8Bytes>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// Advertisement waiting in a room for its partner
#[derive(Debug)]
pub(crate) struct PendingPeer {
    pub conn: ConnectionId,
    pub advertisement: PeerAdvertisement,
    /// Channel for outbound messages to this peer's connection.
    pub tx: mpsc::UnboundedSender<OutboundMessage>,
}
