use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::error::SessionError;
use super::handshake;
use super::io_loop::{self, Outgoing};
use super::store::{ExchangeStore, Table};
use crate::config::SessionConfig;
use crate::protocol::{DataType, Frame};
use crate::rendezvous::Role;

/// Called once with the error that ended a session
pub type FatalErrorHook = Arc<dyn Fn(&SessionError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Connected(Role),
    Closed,
}

/// A peer session running in the background
pub struct PeerSession {
    handle: PeerHandle,
    task: JoinHandle<Result<(), SessionError>>,
    pending: async_channel::Receiver<Outgoing>,
}

impl PeerSession {
    /// Spawn the handshake and I/O loop.
    ///
    /// The returned handle is usable immediately; frames placed before the
    /// direct connection exists wait in the slot until it does, or fail with
    /// `SessionError::Closed` if the session ends first.
    pub fn start(config: SessionConfig, on_fatal: Option<FatalErrorHook>) -> Self {
        let store = Arc::new(ExchangeStore::new());
        let (slot_tx, slot_rx) = async_channel::bounded(1);
        let (state_tx, state_rx) = watch::channel(SessionState::Handshaking);

        let pending = slot_rx.clone();
        let task = tokio::spawn(run_session(
            config,
            store.clone(),
            slot_rx,
            state_tx,
            on_fatal,
        ));

        Self {
            handle: PeerHandle {
                store,
                slot: slot_tx,
                state: state_rx,
            },
            task,
            pending,
        }
    }

    pub fn handle(&self) -> PeerHandle {
        self.handle.clone()
    }

    /// Wait for the session to end
    pub async fn join(self) -> Result<(), SessionError> {
        match self.task.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Closed),
        }
    }

    /// Drop the connection without waiting.
    ///
    /// Further placements fail at once and frames still queued are released
    /// with `SessionError::Closed`, even if the task was never polled.
    pub fn abort(&self) {
        self.task.abort();
        release(&self.pending);
    }
}

async fn run_session(
    config: SessionConfig,
    store: Arc<ExchangeStore>,
    slot: async_channel::Receiver<Outgoing>,
    state: watch::Sender<SessionState>,
    on_fatal: Option<FatalErrorHook>,
) -> Result<(), SessionError> {
    let teardown = Teardown { slot, state };

    let result = async {
        let established = handshake::establish(&config).await?;
        info!(
            "Connected to peer {} as {:?}",
            established.peer_addr, established.role
        );
        teardown
            .state
            .send_replace(SessionState::Connected(established.role));

        io_loop::run(
            established.stream,
            &store,
            &teardown.slot,
            config.read_buffer_size,
        )
        .await
    }
    .await;

    drop(teardown);

    if let Err(e) = &result {
        error!("Peer session ended: {}", e);
        if let Some(hook) = &on_fatal {
            hook(e);
        }
    }
    result
}

/// Marks the session closed and releases every caller still holding a frame
/// in the slot. Runs on drop, so an aborted task releases them too.
struct Teardown {
    slot: async_channel::Receiver<Outgoing>,
    state: watch::Sender<SessionState>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.state.send_replace(SessionState::Closed);
        release(&self.slot);
    }
}

/// Close the slot and drop whatever is still queued in it
fn release(slot: &async_channel::Receiver<Outgoing>) {
    slot.close();
    // dropping the ack senders fails the waiting `place` calls
    let mut released = 0;
    while let Ok(pending) = slot.try_recv() {
        drop(pending);
        released += 1;
    }
    if released > 0 {
        debug!("Released {} unsent frame(s)", released);
    }
}

/// Application side of a session: publish and fetch named payloads
#[derive(Clone)]
pub struct PeerHandle {
    pub(crate) store: Arc<ExchangeStore>,
    pub(crate) slot: async_channel::Sender<Outgoing>,
    pub(crate) state: watch::Receiver<SessionState>,
}

impl PeerHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait for the handshake and return the assigned role
    pub async fn connected(&self) -> Result<Role, SessionError> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| *s != SessionState::Handshaking)
            .await
            .map_err(|_| SessionError::Closed)?;
        match *reached {
            SessionState::Connected(role) => Ok(role),
            _ => Err(SessionError::Closed),
        }
    }

    pub fn store(&self) -> &ExchangeStore {
        &self.store
    }

    /// Serve `payload` for `data_type` and push it to the peer.
    ///
    /// Returns once the push has been written to the connection.
    pub async fn publish(
        &self,
        data_type: DataType,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), SessionError> {
        let bytes = self.prepare_publish(data_type, payload.into())?;
        self.place(bytes).await
    }

    /// Take the peer's payload for `data_type` if it has arrived.
    ///
    /// On a miss a PULL is sent and `None` returned; call again later.
    pub async fn fetch(
        &self,
        data_type: DataType,
        remove_on_read: bool,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        if let Some(payload) = self.store.read_inbound(data_type, remove_on_read) {
            return Ok(Some(payload));
        }
        self.place(Frame::Pull { data_type }.encode()?).await?;
        Ok(None)
    }

    pub fn clear(&self, data_type: DataType, table: Table) {
        self.store.clear(data_type, table);
    }

    /// Repeat `fetch` every `retry` until the payload arrives or `timeout` passes
    pub async fn wait_for(
        &self,
        data_type: DataType,
        retry: Duration,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, SessionError> {
        let attempt = self.fetch_until_present(data_type, retry);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| SessionError::FetchTimeout(data_type))?,
            None => attempt.await,
        }
    }

    async fn fetch_until_present(
        &self,
        data_type: DataType,
        retry: Duration,
    ) -> Result<Vec<u8>, SessionError> {
        loop {
            if let Some(payload) = self.fetch(data_type, true).await? {
                return Ok(payload);
            }
            tokio::time::sleep(retry).await;
        }
    }

    /// `publish` for callers on plain threads. Panics inside an async context.
    pub fn publish_blocking(
        &self,
        data_type: DataType,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), SessionError> {
        let bytes = self.prepare_publish(data_type, payload.into())?;
        self.place_blocking(bytes)
    }

    /// `fetch` for callers on plain threads. Panics inside an async context.
    pub fn fetch_blocking(
        &self,
        data_type: DataType,
        remove_on_read: bool,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        if let Some(payload) = self.store.read_inbound(data_type, remove_on_read) {
            return Ok(Some(payload));
        }
        self.place_blocking(Frame::Pull { data_type }.encode()?)?;
        Ok(None)
    }

    fn prepare_publish(
        &self,
        data_type: DataType,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, SessionError> {
        let frame = Frame::Push { data_type, payload };
        let bytes = frame.encode()?;
        if let Frame::Push { payload, .. } = frame {
            self.store.set_outbound(data_type, payload);
        }
        Ok(bytes)
    }

    async fn place(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        let (drained, drained_rx) = oneshot::channel();
        self.slot
            .send(Outgoing { bytes, drained })
            .await
            .map_err(|_| SessionError::Closed)?;
        drained_rx.await.map_err(|_| SessionError::Closed)
    }

    fn place_blocking(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        let (drained, drained_rx) = oneshot::channel();
        self.slot
            .send_blocking(Outgoing { bytes, drained })
            .map_err(|_| SessionError::Closed)?;
        drained_rx.blocking_recv().map_err(|_| SessionError::Closed)
    }
}
