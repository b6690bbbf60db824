use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use super::types::{PeerAdvertisement, RendezvousError, Role};

const LISTENER_REPLY: &str = "SERVER";
const CONNECTOR_PREFIX: &str = "CLIENT:";
const REJECTED_PREFIX: &str = "REJECTED:";

/// Registration sent from client to server: `"<host>:<port>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub advertisement: PeerAdvertisement,
}

impl FromStr for ClientMessage {
    type Err = RendezvousError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            advertisement: parse_advertisement(s)?,
        })
    }
}

impl fmt::Display for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.advertisement.fmt(f)
    }
}

/// Reply sent from server to client once the room is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// You listen; the peer dials you
    Listener,

    /// You dial the peer at this address
    Connector { peer: PeerAdvertisement },

    /// Registration refused; no room entry was created
    Rejected { reason: String },
}

impl ServerMessage {
    pub fn role(&self) -> Option<Role> {
        match self {
            ServerMessage::Listener => Some(Role::Listener),
            ServerMessage::Connector { .. } => Some(Role::Connector),
            ServerMessage::Rejected { .. } => None,
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Listener => f.write_str(LISTENER_REPLY),
            ServerMessage::Connector { peer } => write!(f, "{}{}", CONNECTOR_PREFIX, peer),
            ServerMessage::Rejected { reason } => write!(f, "{}{}", REJECTED_PREFIX, reason),
        }
    }
}

impl FromStr for ServerMessage {
    type Err = RendezvousError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == LISTENER_REPLY {
            Ok(ServerMessage::Listener)
        } else if let Some(addr) = s.strip_prefix(CONNECTOR_PREFIX) {
            Ok(ServerMessage::Connector {
                peer: parse_advertisement(addr)?,
            })
        } else if let Some(reason) = s.strip_prefix(REJECTED_PREFIX) {
            Ok(ServerMessage::Rejected {
                reason: reason.to_string(),
            })
        } else {
            Err(RendezvousError::Internal(format!("unrecognized reply: {}", s)))
        }
    }
}

/// Parse `"<host>:<port>"`, where host is `localhost` or an IP literal.
///
/// IPv6 hosts may appear bare (`::1:4000`) or bracketed (`[::1]:4000`).
pub fn parse_advertisement(s: &str) -> Result<PeerAdvertisement, RendezvousError> {
    let invalid = || RendezvousError::InvalidAddress(s.to_string());

    let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if host != "localhost" && host.parse::<IpAddr>().is_err() {
        return Err(invalid());
    }

    Ok(PeerAdvertisement {
        host: host.to_string(),
        port,
    })
}
