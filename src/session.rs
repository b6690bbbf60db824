//! Direct peer connection: rendezvous handshake, I/O loop and exchange API

mod client;
mod error;
mod handle;
mod handshake;
mod io_loop;
mod store;

pub use error::SessionError;
pub use handle::{FatalErrorHook, PeerHandle, PeerSession, SessionState};
pub use store::{ExchangeStore, Table};
