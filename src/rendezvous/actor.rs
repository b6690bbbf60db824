use std::collections::HashMap;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::messages::ServerMessage;
use super::types::{
    ConnectionId, OutboundMessage, PeerAdvertisement, PendingPeer, RendezvousError, Role, RoomId,
};

/// Commands sent to the room manager actor
pub(crate) enum RoomCommand {
    Register {
        conn: ConnectionId,
        room: RoomId,
        advertisement: PeerAdvertisement,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
        reply: oneshot::Sender<Registration>,
    },
    Leave {
        conn: ConnectionId,
    },
    PendingRooms {
        reply: oneshot::Sender<Vec<RoomId>>,
    },
}

/// Result of a registration, as seen by the registering connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Stored; waiting for a partner
    Waiting,
    /// Paired immediately; both replies are already queued
    Paired { role: Role },
}

pub(crate) async fn room_manager_actor(mut rx: mpsc::Receiver<RoomCommand>) {
    let mut rooms: HashMap<RoomId, PendingPeer> = HashMap::new();
    let mut conn_rooms: HashMap<ConnectionId, RoomId> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Register {
                conn,
                room,
                advertisement,
                peer_tx,
                reply,
            } => {
                // a connection holds at most one pending advertisement
                if let Some(previous) = conn_rooms.remove(&conn) {
                    if rooms.get(&previous).is_some_and(|p| p.conn == conn) {
                        rooms.remove(&previous);
                        debug!("Connection {} replaced its entry in room {}", conn, previous);
                    }
                }

                let waiting = rooms
                    .remove(&room)
                    .filter(|pending| {
                        if pending.tx.is_closed() {
                            warn!(
                                "Discarding stale entry of {} in room {}",
                                pending.conn, room
                            );
                            conn_rooms.remove(&pending.conn);
                            false
                        } else {
                            true
                        }
                    });

                let outcome = match waiting {
                    None => {
                        info!("Room {} registered by {} ({})", room, conn, advertisement);
                        rooms.insert(
                            room,
                            PendingPeer {
                                conn,
                                advertisement,
                                tx: peer_tx,
                            },
                        );
                        conn_rooms.insert(conn, room);
                        Registration::Waiting
                    }
                    Some(waiting) => {
                        conn_rooms.remove(&waiting.conn);
                        let role = pair(room, waiting, conn, advertisement, &peer_tx);
                        Registration::Paired { role }
                    }
                };

                let _ = reply.send(outcome);
            }

            RoomCommand::Leave { conn } => {
                if let Some(room) = conn_rooms.remove(&conn) {
                    if rooms.get(&room).is_some_and(|p| p.conn == conn) {
                        rooms.remove(&room);
                        info!("Room {} removed ({} left before pairing)", room, conn);
                    }
                }
            }

            RoomCommand::PendingRooms { reply } => {
                let mut pending: Vec<RoomId> = rooms.keys().copied().collect();
                pending.sort();
                let _ = reply.send(pending);
            }
        }
    }
}

/// Pair the waiting peer with the newcomer and queue both replies.
///
/// Returns the role assigned to the newcomer.
fn pair(
    room: RoomId,
    waiting: PendingPeer,
    conn: ConnectionId,
    advertisement: PeerAdvertisement,
    peer_tx: &mpsc::UnboundedSender<OutboundMessage>,
) -> Role {
    let newcomer_listens = rand::rng().random_bool(0.5);

    let (waiting_reply, newcomer_reply, newcomer_role) = if newcomer_listens {
        (
            ServerMessage::Connector {
                peer: advertisement,
            },
            ServerMessage::Listener,
            Role::Listener,
        )
    } else {
        (
            ServerMessage::Listener,
            ServerMessage::Connector {
                peer: waiting.advertisement,
            },
            Role::Connector,
        )
    };

    let _ = waiting.tx.send(OutboundMessage::from(waiting_reply.to_string()));
    let _ = peer_tx.send(OutboundMessage::from(newcomer_reply.to_string()));

    info!(
        "Room {} paired: {} is {:?}, {} is {:?}",
        room,
        waiting.conn,
        opposite(newcomer_role),
        conn,
        newcomer_role
    );
    newcomer_role
}

fn opposite(role: Role) -> Role {
    match role {
        Role::Listener => Role::Connector,
        Role::Connector => Role::Listener,
    }
}

/// Handle to communicate with the room manager actor
#[derive(Clone)]
pub struct RoomManagerHandle {
    pub(crate) tx: mpsc::Sender<RoomCommand>,
}

impl RoomManagerHandle {
    /// Spawn a fresh room manager actor
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<RoomCommand>(1024);
        tokio::spawn(room_manager_actor(rx));
        Self { tx }
    }

    /// Advertise `advertisement` in `room`, pairing with a waiting peer if any
    pub async fn register(
        &self,
        conn: ConnectionId,
        room: RoomId,
        advertisement: PeerAdvertisement,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<Registration, RendezvousError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RoomCommand::Register {
                conn,
                room,
                advertisement,
                peer_tx,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| RendezvousError::Internal("actor channel closed".to_string()))
    }

    /// Drop any pending advertisement owned by `conn`
    pub async fn leave(&self, conn: ConnectionId) {
        let _ = self.tx.send(RoomCommand::Leave { conn }).await;
    }

    /// Rooms currently holding a waiting advertisement
    pub async fn pending_rooms(&self) -> Result<Vec<RoomId>, RendezvousError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RoomCommand::PendingRooms { reply: reply_tx })
            .await;
        reply_rx
            .await
            .map_err(|_| RendezvousError::Internal("actor channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad(host: &str, port: u16) -> PeerAdvertisement {
        PeerAdvertisement {
            host: host.to_string(),
            port,
        }
    }

    fn room(id: u32) -> RoomId {
        RoomId::new(id).unwrap()
    }

    #[tokio::test]
    async fn pairing_scenario() {
        let handle = RoomManagerHandle::spawn();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();

        let first = handle
            .register(ConnectionId::new(1), room(42), ad("203.0.113.5", 54321), a_tx)
            .await
            .unwrap();
        assert_eq!(first, Registration::Waiting);
        assert_eq!(handle.pending_rooms().await.unwrap(), vec![room(42)]);
        assert!(a_rx.try_recv().is_err());

        let second = handle
            .register(ConnectionId::new(2), room(42), ad("198.51.100.7", 54322), b_tx)
            .await
            .unwrap();

        let a_reply = a_rx.try_recv().unwrap();
        let b_reply = b_rx.try_recv().unwrap();
        match second {
            Registration::Paired {
                role: Role::Connector,
            } => {
                assert_eq!(a_reply.as_str(), "SERVER");
                assert_eq!(b_reply.as_str(), "CLIENT:203.0.113.5:54321");
            }
            Registration::Paired {
                role: Role::Listener,
            } => {
                assert_eq!(a_reply.as_str(), "CLIENT:198.51.100.7:54322");
                assert_eq!(b_reply.as_str(), "SERVER");
            }
            Registration::Waiting => panic!("expected pairing"),
        }

        assert!(handle.pending_rooms().await.unwrap().is_empty());
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn third_arrival_opens_a_new_entry() {
        let handle = RoomManagerHandle::spawn();
        let mut receivers = Vec::new();
        for i in 0..3 {
            let (tx, rx) = mpsc::unbounded_channel();
            receivers.push(rx);
            handle
                .register(ConnectionId::new(i), room(7), ad("127.0.0.1", 4000 + i as u16), tx)
                .await
                .unwrap();
        }
        assert_eq!(handle.pending_rooms().await.unwrap(), vec![room(7)]);
    }

    #[tokio::test]
    async fn role_assignment_is_balanced() {
        let handle = RoomManagerHandle::spawn();
        let rounds = 2000u64;
        let mut listeners = 0u32;

        for i in 0..rounds {
            let (a_tx, _a_rx) = mpsc::unbounded_channel();
            let (b_tx, _b_rx) = mpsc::unbounded_channel();
            handle
                .register(ConnectionId::new(2 * i), room(1), ad("127.0.0.1", 1), a_tx)
                .await
                .unwrap();
            let outcome = handle
                .register(ConnectionId::new(2 * i + 1), room(1), ad("127.0.0.1", 2), b_tx)
                .await
                .unwrap();
            if outcome == (Registration::Paired { role: Role::Listener }) {
                listeners += 1;
            }
        }

        let fraction = listeners as f64 / rounds as f64;
        assert!((0.43..0.57).contains(&fraction), "fraction {}", fraction);
    }

    #[tokio::test]
    async fn leave_removes_pending_entry() {
        let handle = RoomManagerHandle::spawn();
        let (tx, _rx) = mpsc::unbounded_channel();
        handle
            .register(ConnectionId::new(1), room(5), ad("localhost", 1), tx)
            .await
            .unwrap();
        handle.leave(ConnectionId::new(1)).await;
        assert!(handle.pending_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn leave_by_other_connection_keeps_entry() {
        let handle = RoomManagerHandle::spawn();
        let (tx, _rx) = mpsc::unbounded_channel();
        handle
            .register(ConnectionId::new(1), room(5), ad("localhost", 1), tx)
            .await
            .unwrap();
        handle.leave(ConnectionId::new(2)).await;
        assert_eq!(handle.pending_rooms().await.unwrap(), vec![room(5)]);
    }

    #[tokio::test]
    async fn reregistering_does_not_pair_with_itself() {
        let handle = RoomManagerHandle::spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new(1);

        handle
            .register(conn, room(9), ad("127.0.0.1", 1), tx.clone())
            .await
            .unwrap();
        let again = handle
            .register(conn, room(9), ad("127.0.0.1", 2), tx)
            .await
            .unwrap();

        assert_eq!(again, Registration::Waiting);
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.pending_rooms().await.unwrap(), vec![room(9)]);
    }

    #[tokio::test]
    async fn closed_waiting_peer_is_not_paired() {
        let handle = RoomManagerHandle::spawn();
        let (stale_tx, stale_rx) = mpsc::unbounded_channel();
        drop(stale_rx);
        handle
            .register(ConnectionId::new(1), room(3), ad("127.0.0.1", 1), stale_tx)
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = handle
            .register(ConnectionId::new(2), room(3), ad("127.0.0.1", 2), tx)
            .await
            .unwrap();

        assert_eq!(outcome, Registration::Waiting);
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.pending_rooms().await.unwrap(), vec![room(3)]);
    }
}
