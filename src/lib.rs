//! Rendezvous-brokered peer links exchanging small named data blocks.
//!
//! [`rendezvous`] pairs two clients per room and tells one to listen and the
//! other to dial. [`session`] performs that handshake from the client side and
//! then moves [`protocol`] frames over the direct connection.

pub mod config;
pub mod protocol;
pub mod rendezvous;
pub mod session;
