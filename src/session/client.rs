use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use super::error::SessionError;
use crate::config::SessionConfig;
use crate::rendezvous::{ClientMessage, PeerAdvertisement, ServerMessage};

/// Register `advertisement` for the configured room and wait for the pairing reply.
///
/// Nothing arrives until a second peer registers for the same room.
pub(crate) async fn request_role(
    config: &SessionConfig,
    advertisement: PeerAdvertisement,
) -> Result<ServerMessage, SessionError> {
    let url = config.link_url();
    let (mut ws, _) = connect_async(url.as_str()).await?;
    info!("Registered with rendezvous {} as {}", url, advertisement);

    let registration = ClientMessage { advertisement };
    ws.send(Message::text(registration.to_string())).await?;

    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => {
                let reply: ServerMessage = text
                    .as_str()
                    .parse()
                    .map_err(|_| SessionError::UnexpectedReply(text.as_str().to_string()))?;
                debug!("Rendezvous reply: {}", reply);
                let _ = ws.close(None).await;
                return Ok(reply);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    Err(SessionError::RendezvousClosed)
}
