//! Clipcast protocol runtime.
//!
//! The [`acceptor`] admits connections under the global cap, optionally
//! through the [`tls`] decorator that upgrades sockets in the background;
//! the [`manager`] owns every live socket and drives one [`handler`] per
//! connection, serialising its requests and applying the keep-alive
//! policy.

pub mod acceptor;
pub mod handler;
pub mod manager;
pub mod stream;
pub mod tls;

pub use acceptor::{Accept, Acceptor, PlainAcceptor};
pub use handler::{HandlerContext, RequestHandler, RunOutcome};
pub use manager::ConnectionManager;
pub use stream::ClientStream;
pub use tls::{Handshake, HandshakeError, SecureAcceptor, TlsHandshaker, TlsSettings};
