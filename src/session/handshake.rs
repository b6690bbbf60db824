use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use super::client;
use super::error::SessionError;
use crate::config::SessionConfig;
use crate::rendezvous::{PeerAdvertisement, Role, ServerMessage};

/// The single direct connection of a session
pub(crate) struct Established {
    pub stream: TcpStream,
    pub role: Role,
    pub peer_addr: SocketAddr,
}

/// Bind, register, then accept or dial depending on the assigned role.
pub(crate) async fn establish(config: &SessionConfig) -> Result<Established, SessionError> {
    match config.handshake_timeout() {
        Some(limit) => tokio::time::timeout(limit, connect_to_peer(config))
            .await
            .map_err(|_| SessionError::HandshakeTimeout(limit))?,
        None => connect_to_peer(config).await,
    }
}

async fn connect_to_peer(config: &SessionConfig) -> Result<Established, SessionError> {
    let listener = TcpListener::bind((config.bind_host.as_str(), config.bind_port))
        .await
        .map_err(|source| SessionError::Bind {
            addr: format!("{}:{}", config.bind_host, config.bind_port),
            source,
        })?;
    let local_addr = listener.local_addr()?;
    info!("Listening for peer on {}", local_addr);

    let advertisement = PeerAdvertisement {
        host: config.advertised_host().to_string(),
        port: local_addr.port(),
    };

    let (stream, role) = match client::request_role(config, advertisement).await? {
        ServerMessage::Listener => {
            let (stream, peer_addr) = listener.accept().await?;
            info!("Accepted peer connection from {}", peer_addr);
            (stream, Role::Listener)
        }
        ServerMessage::Connector { peer } => {
            drop(listener);
            info!("Connecting to peer at {}", peer);
            let stream = TcpStream::connect((peer.host.as_str(), peer.port)).await?;
            (stream, Role::Connector)
        }
        ServerMessage::Rejected { reason } => {
            return Err(SessionError::RegistrationRejected(reason));
        }
    };

    stream.set_nodelay(true)?;
    let peer_addr = stream.peer_addr()?;

    Ok(Established {
        stream,
        role,
        peer_addr,
    })
}
