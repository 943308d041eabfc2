//! Deck Transport Layer
//!
//! Owns the socket to the deck and reports what happens on it as a stream of
//! [`TransportEvent`]s: raw byte chunks, errors and disconnects. Framing is
//! left to the protocol layer because a chunk boundary carries no meaning.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{TcpConfig, TcpReceiver, TcpSender, TcpServer, TcpTransport};
pub use traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};
