use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::debug;

use super::error::SessionError;
use super::store::ExchangeStore;
use crate::protocol::{Frame, FrameDecoder, PUSH_HEADER_SIZE};

/// Encoded frame waiting in the outbound slot
pub(crate) struct Outgoing {
    pub bytes: Vec<u8>,
    /// Fired once the bytes are written to the connection
    pub drained: oneshot::Sender<()>,
}

/// Move frames between the connection, the store and the outbound slot.
///
/// Only returns when the session is over: the peer hung up, the socket
/// failed, or the peer sent bytes that are not a frame.
pub(crate) async fn run<S>(
    mut stream: S,
    store: &ExchangeStore,
    slot: &async_channel::Receiver<Outgoing>,
    read_buffer_size: usize,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; read_buffer_size.max(PUSH_HEADER_SIZE)];
    let mut decoder = FrameDecoder::new();
    let mut slot_open = true;

    loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Err(SessionError::PeerDisconnected);
                }
                decoder.extend(&buf[..n]);
                while let Some(frame) = decoder.next_frame()? {
                    apply(frame, store, &mut stream).await?;
                }
            }

            outgoing = slot.recv(), if slot_open => {
                match outgoing {
                    Ok(outgoing) => {
                        stream.write_all(&outgoing.bytes).await?;
                        stream.flush().await?;
                        debug!("Sent {} bytes", outgoing.bytes.len());
                        let _ = outgoing.drained.send(());
                    }
                    // every handle is gone; keep serving pulls
                    Err(_) => slot_open = false,
                }
            }
        }
    }
}

async fn apply<W>(frame: Frame, store: &ExchangeStore, writer: &mut W) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    match frame {
        Frame::Push { data_type, payload } => {
            debug!("Received {} ({} bytes)", data_type, payload.len());
            store.store_inbound(data_type, payload);
        }
        Frame::Pull { data_type } => match store.outbound(data_type) {
            Some(payload) => {
                let bytes = Frame::Push { data_type, payload }.encode()?;
                writer.write_all(&bytes).await?;
                writer.flush().await?;
                debug!("Answered pull for {}", data_type);
            }
            None => debug!("Pull for {} with nothing published", data_type),
        },
    }
    Ok(())
}
