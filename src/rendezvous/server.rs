use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::{Registration, RoomManagerHandle};
use super::messages::{ClientMessage, ServerMessage};
use super::types::{ConnectionId, OutboundMessage, RendezvousError, RoomId};
use crate::config::RendezvousConfig;

pub const DEFAULT_RENDEZVOUS_PORT: u16 = 11111;

#[derive(Debug, Clone, Copy)]
struct Keepalive {
    ping_interval: Duration,
    pong_timeout: Duration,
}

/// WebSocket rendezvous service pairing peers by room
pub struct RendezvousServer {
    listener: TcpListener,
    handle: RoomManagerHandle,
    keepalive: Keepalive,
    next_conn: Arc<AtomicU64>,
}

impl RendezvousServer {
    /// Bind the listener and start a fresh room manager
    pub async fn bind(config: &RendezvousConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind).await?;
        info!("Rendezvous server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handle: RoomManagerHandle::spawn(),
            keepalive: Keepalive {
                ping_interval: config.ping_interval(),
                pong_timeout: config.pong_timeout(),
            },
            next_conn: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn rooms(&self) -> RoomManagerHandle {
        self.handle.clone()
    }

    /// Serve until the listener fails
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves; open connections are dropped on return
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Rendezvous server shutting down");
                    break;
                }

                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted?;
                    let conn = ConnectionId::new(self.next_conn.fetch_add(1, Ordering::Relaxed));
                    let handle = self.handle.clone();
                    let keepalive = self.keepalive;

                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, conn, handle, keepalive).await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        Ok(())
    }

    /// Run in a background task
    pub fn spawn(self) -> std::io::Result<RunningRendezvous> {
        let local_addr = self.local_addr()?;
        let rooms = self.rooms();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(self.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        Ok(RunningRendezvous {
            local_addr,
            rooms,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// A rendezvous server running in the background
pub struct RunningRendezvous {
    local_addr: SocketAddr,
    rooms: RoomManagerHandle,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl RunningRendezvous {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL clients register against
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub fn rooms(&self) -> &RoomManagerHandle {
        &self.rooms
    }

    /// Stop accepting and wait for the server task to finish
    pub async fn stop(self) -> std::io::Result<()> {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(e)),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn: ConnectionId,
    handle: RoomManagerHandle,
    keepalive: Keepalive,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut path = String::new();
    let mut ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_string();
            Ok(resp)
        },
    )
    .await?;

    let room = RoomId::from_path(&path);
    info!("WebSocket connection {} from {} on {}", conn, addr, path);

    // role replies are queued by the room manager, possibly on behalf of the partner
    let (tx, mut replies) = mpsc::unbounded_channel::<OutboundMessage>();
    let mut heartbeat = Heartbeat::new(keepalive);
    let mut registered = false;

    loop {
        let outgoing = tokio::select! {
            beat = heartbeat.next() => match beat {
                Beat::Ping => {
                    debug!("Ping sent to {}", addr);
                    Message::Ping(Bytes::new())
                }
                Beat::Missed => {
                    warn!("No Pong received, disconnecting {}", addr);
                    break;
                }
            },

            Some(reply) = replies.recv() => Message::Text(reply.into_inner()),

            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match handle_registration(text.as_str(), &room, conn, &tx, &handle).await {
                        Ok(()) => {
                            registered = true;
                            continue;
                        }
                        Err(e) => {
                            warn!("Registration from {} rejected: {}", addr, e);
                            Message::text(ServerMessage::Rejected { reason: e.to_string() }.to_string())
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    heartbeat.pong();
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Connection closed by {}", addr);
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
            },
        };

        if let Err(e) = ws.send(outgoing).await {
            warn!("Send to {} failed: {}", addr, e);
            break;
        }
    }

    if registered {
        handle.leave(conn).await;
    }
    info!("WebSocket disconnected: {}", addr);

    Ok(())
}

enum Beat {
    Ping,
    Missed,
}

/// Ping/pong bookkeeping for one connection
struct Heartbeat {
    ticks: Interval,
    pong_timeout: Duration,
    /// Set while a ping is unanswered
    pong_deadline: Option<Instant>,
}

impl Heartbeat {
    fn new(keepalive: Keepalive) -> Self {
        let first = Instant::now() + keepalive.ping_interval;
        let mut ticks = tokio::time::interval_at(first, keepalive.ping_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticks,
            pong_timeout: keepalive.pong_timeout,
            pong_deadline: None,
        }
    }

    /// Resolves when a ping is due, or when the last one went unanswered
    /// past its deadline or the next tick. Cancel safe.
    async fn next(&mut self) -> Beat {
        match self.pong_deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = self.ticks.tick() => {}
                }
                Beat::Missed
            }
            None => {
                self.ticks.tick().await;
                self.pong_deadline = Some(Instant::now() + self.pong_timeout);
                Beat::Ping
            }
        }
    }

    fn pong(&mut self) {
        self.pong_deadline = None;
    }
}

async fn handle_registration(
    text: &str,
    room: &Result<RoomId, RendezvousError>,
    conn: ConnectionId,
    tx: &mpsc::UnboundedSender<OutboundMessage>,
    handle: &RoomManagerHandle,
) -> Result<(), RendezvousError> {
    let room = room.clone()?;
    let msg: ClientMessage = text.trim().parse()?;

    match handle
        .register(conn, room, msg.advertisement, tx.clone())
        .await?
    {
        Registration::Waiting => debug!("{} waiting in room {}", conn, room),
        Registration::Paired { role } => debug!("{} paired in room {} as {:?}", conn, room, role),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start() -> RunningRendezvous {
        let config = RendezvousConfig {
            bind: "127.0.0.1:0".to_string(),
            ..RendezvousConfig::default()
        };
        RendezvousServer::bind(&config).await.unwrap().spawn().unwrap()
    }

    async fn next_text(ws: &mut Client) -> String {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return text.as_str().to_string(),
                _ => continue,
            }
        }
    }

    async fn wait_for_rooms(server: &RunningRendezvous, expected: Vec<RoomId>) {
        for _ in 0..100 {
            if server.rooms().pending_rooms().await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("rooms never became {:?}", expected);
    }

    fn quick_keepalive() -> Keepalive {
        Keepalive {
            ping_interval: Duration::from_millis(20),
            pong_timeout: Duration::from_millis(30),
        }
    }

    #[tokio::test]
    async fn heartbeat_pings_then_gives_up_without_pong() {
        let mut heartbeat = Heartbeat::new(quick_keepalive());
        assert!(matches!(heartbeat.next().await, Beat::Ping));
        assert!(matches!(heartbeat.next().await, Beat::Missed));
    }

    #[tokio::test]
    async fn heartbeat_keeps_pinging_while_answered() {
        let mut heartbeat = Heartbeat::new(quick_keepalive());
        for _ in 0..3 {
            assert!(matches!(heartbeat.next().await, Beat::Ping));
            heartbeat.pong();
        }
    }

    #[tokio::test]
    async fn unanswered_pings_drop_the_connection() {
        let config = RendezvousConfig {
            bind: "127.0.0.1:0".to_string(),
            ping_interval_secs: 1,
            pong_timeout_secs: 1,
        };
        let server = RendezvousServer::bind(&config).await.unwrap().spawn().unwrap();
        let (ws, _) = connect_async(format!("{}/link/00005", server.url()))
            .await
            .unwrap();
        let (mut write, _read) = ws.split();
        write.send(Message::text("127.0.0.1:4000")).await.unwrap();
        wait_for_rooms(&server, vec![RoomId::new(5).unwrap()]).await;

        // the read half is never polled, so the ping goes unanswered
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(server.rooms().pending_rooms().await.unwrap().is_empty());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn pairs_two_websocket_clients() {
        let server = start().await;
        let url = format!("{}/link/00042", server.url());
        let room = RoomId::new(42).unwrap();

        let (mut a, _) = connect_async(url.as_str()).await.unwrap();
        a.send(Message::text("203.0.113.5:54321")).await.unwrap();
        wait_for_rooms(&server, vec![room]).await;

        let (mut b, _) = connect_async(url.as_str()).await.unwrap();
        b.send(Message::text("198.51.100.7:54322")).await.unwrap();

        let a_reply = next_text(&mut a).await;
        let b_reply = next_text(&mut b).await;
        let replies = (a_reply.as_str(), b_reply.as_str());
        assert!(
            replies == ("SERVER", "CLIENT:203.0.113.5:54321")
                || replies == ("CLIENT:198.51.100.7:54322", "SERVER"),
            "unexpected replies {:?}",
            replies
        );

        wait_for_rooms(&server, vec![]).await;
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_address_is_rejected_without_room_entry() {
        let server = start().await;
        let url = format!("{}/link/00042", server.url());

        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        ws.send(Message::text("not-an-ip:1234")).await.unwrap();

        let reply = next_text(&mut ws).await;
        assert!(reply.starts_with("REJECTED:"), "{}", reply);
        assert!(server.rooms().pending_rooms().await.unwrap().is_empty());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn bad_room_path_is_rejected() {
        let server = start().await;
        let url = format!("{}/link/4", server.url());

        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        ws.send(Message::text("127.0.0.1:4000")).await.unwrap();

        let reply = next_text(&mut ws).await;
        assert!(reply.starts_with("REJECTED:invalid room"), "{}", reply);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_before_pairing_clears_room() {
        let server = start().await;
        let url = format!("{}/link/00007", server.url());
        let room = RoomId::new(7).unwrap();

        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        ws.send(Message::text("localhost:4000")).await.unwrap();
        wait_for_rooms(&server, vec![room]).await;

        ws.close(None).await.unwrap();
        drop(ws);
        wait_for_rooms(&server, vec![]).await;
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn independent_servers_do_not_share_rooms() {
        let first = start().await;
        let second = start().await;

        let (mut ws, _) = connect_async(format!("{}/link/00001", first.url()).as_str())
            .await
            .unwrap();
        ws.send(Message::text("127.0.0.1:4000")).await.unwrap();
        wait_for_rooms(&first, vec![RoomId::new(1).unwrap()]).await;

        assert!(second.rooms().pending_rooms().await.unwrap().is_empty());
        first.stop().await.unwrap();
        second.stop().await.unwrap();
    }
}
